use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use thiserror::Error;
use tracing::{Instrument, info, instrument, trace_span, warn};
use tracing_error::{ExtractSpanTrace, SpanTrace};

use crate::cluster::RbacStore;
use crate::error::{SpannedErr, SpannedExt, report_span_trace};

use super::MANAGER_ROLE_NAME;

#[derive(Error, Debug)]
pub enum RbacError {
    #[error("Failed to create cluster role '{0}': {1}")]
    ClusterRole(String, SpannedErr<kube::Error>),

    #[error("Failed to create service account '{0}': {1}")]
    ServiceAccount(String, SpannedErr<kube::Error>),

    #[error("Failed to create cluster role binding '{0}': {1}")]
    ClusterRoleBinding(String, SpannedErr<kube::Error>),
}

impl ExtractSpanTrace for RbacError {
    fn span_trace(&self) -> Option<&SpanTrace> {
        match self {
            RbacError::ClusterRole(_, e) => e.span_trace(),
            RbacError::ServiceAccount(_, e) => e.span_trace(),
            RbacError::ClusterRoleBinding(_, e) => e.span_trace(),
        }
    }
}

/// Cluster role, service account and binding that let the collection workload read
/// node-level configuration.
///
/// Names are derived from the collection job's name, which already hashes node and
/// namespace. Collections running side by side never share RBAC objects, so one
/// teardown cannot pull permissions from another running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RbacBundle {
    pub namespace: String,
    pub cluster_role: String,
    pub service_account: String,
    pub role_binding: String,
}

impl RbacBundle {
    pub fn for_collection(namespace: &str, job_name: &str) -> Self {
        RbacBundle {
            namespace: namespace.to_string(),
            cluster_role: format!("{job_name}-cr"),
            service_account: format!("{job_name}-sa"),
            role_binding: format!("{job_name}-rb"),
        }
    }

    fn metadata(name: &str, namespace: Option<&str>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: namespace.map(str::to_string),
            labels: Some(
                [(
                    "app.kubernetes.io/managed-by".to_string(),
                    MANAGER_ROLE_NAME.to_string(),
                )]
                .into(),
            ),
            ..Default::default()
        }
    }

    pub fn cluster_role_manifest(&self) -> ClusterRole {
        ClusterRole {
            metadata: Self::metadata(&self.cluster_role, None),
            rules: Some(vec![PolicyRule {
                api_groups: Some(vec!["".to_string()]),
                resources: Some(vec!["nodes/proxy".to_string(), "nodes".to_string()]),
                verbs: vec!["get".to_string()],
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    pub fn service_account_manifest(&self) -> ServiceAccount {
        ServiceAccount {
            metadata: Self::metadata(&self.service_account, Some(&self.namespace)),
            ..Default::default()
        }
    }

    pub fn role_binding_manifest(&self) -> ClusterRoleBinding {
        ClusterRoleBinding {
            metadata: Self::metadata(&self.role_binding, None),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: self.cluster_role.clone(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: self.service_account.clone(),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            }]),
        }
    }

    /// Creates role, service account, then binding. Stops at the first failure and
    /// leaves already created objects in place.
    #[instrument("rbac/create", skip_all, fields(kubernetes_namespace = %self.namespace))]
    pub async fn create<S: RbacStore>(&self, store: &S) -> Result<(), RbacError> {
        async {
            store
                .create_cluster_role(&self.cluster_role_manifest())
                .await
                .with_span_trace()
                .map_err(|e| RbacError::ClusterRole(self.cluster_role.clone(), e))
        }
        .instrument(trace_span!("create_cluster_role", name = %self.cluster_role))
        .await?;

        async {
            store
                .create_service_account(&self.namespace, &self.service_account_manifest())
                .await
                .with_span_trace()
                .map_err(|e| RbacError::ServiceAccount(self.service_account.clone(), e))
        }
        .instrument(trace_span!("create_service_account", name = %self.service_account))
        .await?;

        async {
            store
                .create_cluster_role_binding(&self.role_binding_manifest())
                .await
                .with_span_trace()
                .map_err(|e| RbacError::ClusterRoleBinding(self.role_binding.clone(), e))
        }
        .instrument(trace_span!("create_cluster_role_binding", name = %self.role_binding))
        .await?;

        info!(
            "RBAC objects '{}', '{}' and '{}' created.",
            self.cluster_role, self.service_account, self.role_binding
        );
        Ok(())
    }

    /// Best-effort: every delete is attempted, failures are only logged.
    #[instrument("rbac/delete", skip_all, fields(kubernetes_namespace = %self.namespace))]
    pub async fn delete<S: RbacStore>(&self, store: &S) {
        if let Err(e) = store
            .delete_cluster_role_binding(&self.role_binding)
            .await
            .with_span_trace()
        {
            warn!("Failed to delete cluster role binding '{}': {}", self.role_binding, e);
            report_span_trace(&e);
        }
        if let Err(e) = store
            .delete_cluster_role(&self.cluster_role)
            .await
            .with_span_trace()
        {
            warn!("Failed to delete cluster role '{}': {}", self.cluster_role, e);
            report_span_trace(&e);
        }
        if let Err(e) = store
            .delete_service_account(&self.namespace, &self.service_account)
            .await
            .with_span_trace()
        {
            warn!("Failed to delete service account '{}': {}", self.service_account, e);
            report_span_trace(&e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::{Call, FakeCluster};

    #[test]
    fn test_names_are_derived_from_job_name() {
        let a = RbacBundle::for_collection("team-a", "node-collector-4xz");
        let b = RbacBundle::for_collection("team-a", "node-collector-7bq");
        assert_eq!(a.cluster_role, "node-collector-4xz-cr");
        assert_eq!(a.service_account, "node-collector-4xz-sa");
        assert_eq!(a.role_binding, "node-collector-4xz-rb");
        assert_eq!(a.namespace, "team-a");
        assert_ne!(a.cluster_role, b.cluster_role);
        assert_ne!(a.service_account, b.service_account);
        assert_ne!(a.role_binding, b.role_binding);
    }

    #[test]
    fn test_binding_links_role_and_service_account() {
        let bundle = RbacBundle::for_collection("team-a", "collect-1");
        let binding = bundle.role_binding_manifest();
        assert_eq!(binding.role_ref.name, bundle.cluster_role);
        let subject = &binding.subjects.unwrap()[0];
        assert_eq!(subject.name, bundle.service_account);
        assert_eq!(subject.namespace.as_deref(), Some("team-a"));
    }

    #[tokio::test]
    async fn test_create_order() {
        let cluster = FakeCluster::new();
        let bundle = RbacBundle::for_collection("ns", "collect-1");
        bundle.create(&cluster).await.unwrap();
        assert_eq!(
            cluster.calls(),
            vec![
                Call::CreateClusterRole(bundle.cluster_role.clone()),
                Call::CreateServiceAccount("ns".to_string(), bundle.service_account.clone()),
                Call::CreateClusterRoleBinding(bundle.role_binding.clone()),
            ]
        );
    }

    #[tokio::test]
    async fn test_create_stops_at_first_failure_without_rollback() {
        let cluster = FakeCluster {
            failing: vec!["create_service_account"],
            ..FakeCluster::new()
        };
        let bundle = RbacBundle::for_collection("ns", "collect-1");
        let result = bundle.create(&cluster).await;
        assert!(matches!(result, Err(RbacError::ServiceAccount(..))));
        // The cluster role stays behind: creation is not rolled back.
        assert_eq!(
            cluster.calls(),
            vec![
                Call::CreateClusterRole(bundle.cluster_role.clone()),
                Call::CreateServiceAccount("ns".to_string(), bundle.service_account.clone()),
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_attempts_everything_despite_errors() {
        let cluster = FakeCluster {
            failing: vec!["delete_cluster_role_binding", "delete_cluster_role"],
            ..FakeCluster::new()
        };
        let bundle = RbacBundle::for_collection("ns", "collect-1");
        bundle.delete(&cluster).await;
        assert_eq!(
            cluster.calls(),
            vec![
                Call::DeleteClusterRoleBinding(bundle.role_binding.clone()),
                Call::DeleteClusterRole(bundle.cluster_role.clone()),
                Call::DeleteServiceAccount("ns".to_string(), bundle.service_account.clone()),
            ]
        );
    }
}
