use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use k8s_openapi::api::core::v1::{Namespace, Pod, PodStatus, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::{JobStore, LogReader, LogStream, NamespaceStore, RbacStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    GetNamespace(String),
    CreateNamespace(String),
    DeleteNamespace(String),
    CreateClusterRole(String),
    CreateServiceAccount(String, String),
    CreateClusterRoleBinding(String),
    DeleteClusterRole(String),
    DeleteServiceAccount(String, String),
    DeleteClusterRoleBinding(String),
    CreateJob(String),
    GetJob(String),
    DeleteJob(String),
    ListPods(String),
    ContainerLogs(String, String),
}

impl Call {
    pub(crate) fn is_delete(&self) -> bool {
        matches!(
            self,
            Call::DeleteNamespace(_)
                | Call::DeleteClusterRole(_)
                | Call::DeleteServiceAccount(..)
                | Call::DeleteClusterRoleBinding(_)
                | Call::DeleteJob(_)
        )
    }

    pub(crate) fn is_log_retrieval(&self) -> bool {
        matches!(self, Call::ListPods(_) | Call::ContainerLogs(..))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NamespaceLookup {
    Found,
    NotFound,
    Error,
}

/// In-memory cluster that records every call.
///
/// Operations listed in `failing` return an error. `get_job` pops `job_statuses`
/// front to back and keeps returning the last one.
#[derive(Debug)]
pub(crate) struct FakeCluster {
    pub(crate) namespace_lookup: NamespaceLookup,
    pub(crate) failing: Vec<&'static str>,
    pub(crate) job_statuses: Mutex<VecDeque<JobStatus>>,
    pub(crate) pods: Vec<Pod>,
    pub(crate) empty_pod_lists: Mutex<usize>,
    pub(crate) logs: String,
    pub(crate) calls: Mutex<Vec<Call>>,
    pub(crate) created_jobs: Mutex<Vec<Job>>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        FakeCluster {
            namespace_lookup: NamespaceLookup::Found,
            failing: Vec::new(),
            job_statuses: Mutex::new(VecDeque::from([complete_status()])),
            pods: vec![pod("collector-pod", "Succeeded")],
            empty_pod_lists: Mutex::new(0),
            logs: "collected output".to_string(),
            calls: Mutex::new(Vec::new()),
            created_jobs: Mutex::new(Vec::new()),
        }
    }
}

pub(crate) fn complete_status() -> JobStatus {
    condition_status("Complete", None)
}

pub(crate) fn failed_status(message: &str) -> JobStatus {
    condition_status("Failed", Some(message))
}

pub(crate) fn running_status() -> JobStatus {
    JobStatus {
        active: Some(1),
        ..Default::default()
    }
}

fn condition_status(type_: &str, message: Option<&str>) -> JobStatus {
    JobStatus {
        conditions: Some(vec![JobCondition {
            type_: type_.to_string(),
            status: "True".to_string(),
            message: message.map(str::to_string),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

pub(crate) fn pod(name: &str, phase: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn fake_error(operation: &str) -> kube::Error {
    kube::Error::Service(format!("{operation} failed").into())
}

impl FakeCluster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_job_statuses(self, statuses: Vec<JobStatus>) -> Self {
        *self.job_statuses.lock().unwrap() = statuses.into();
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn created_jobs(&self) -> Vec<Job> {
        self.created_jobs.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, operation: &'static str) -> Result<(), kube::Error> {
        if self.failing.contains(&operation) {
            Err(fake_error(operation))
        } else {
            Ok(())
        }
    }
}

fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

impl NamespaceStore for FakeCluster {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, kube::Error> {
        self.record(Call::GetNamespace(name.to_string()));
        match self.namespace_lookup {
            NamespaceLookup::Found => Ok(Some(namespace(name))),
            NamespaceLookup::NotFound => Ok(None),
            NamespaceLookup::Error => Err(fake_error("get_namespace")),
        }
    }

    async fn create_namespace(&self, name: &str) -> Result<Namespace, kube::Error> {
        self.record(Call::CreateNamespace(name.to_string()));
        self.check("create_namespace")?;
        Ok(namespace(name))
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), kube::Error> {
        self.record(Call::DeleteNamespace(name.to_string()));
        self.check("delete_namespace")
    }
}

impl RbacStore for FakeCluster {
    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<ClusterRole, kube::Error> {
        let name = role.metadata.name.clone().unwrap_or_default();
        self.record(Call::CreateClusterRole(name));
        self.check("create_cluster_role")?;
        Ok(role.clone())
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount, kube::Error> {
        let name = account.metadata.name.clone().unwrap_or_default();
        self.record(Call::CreateServiceAccount(namespace.to_string(), name));
        self.check("create_service_account")?;
        Ok(account.clone())
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, kube::Error> {
        let name = binding.metadata.name.clone().unwrap_or_default();
        self.record(Call::CreateClusterRoleBinding(name));
        self.check("create_cluster_role_binding")?;
        Ok(binding.clone())
    }

    async fn delete_cluster_role(&self, name: &str) -> Result<(), kube::Error> {
        self.record(Call::DeleteClusterRole(name.to_string()));
        self.check("delete_cluster_role")
    }

    async fn delete_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), kube::Error> {
        self.record(Call::DeleteServiceAccount(
            namespace.to_string(),
            name.to_string(),
        ));
        self.check("delete_service_account")
    }

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), kube::Error> {
        self.record(Call::DeleteClusterRoleBinding(name.to_string()));
        self.check("delete_cluster_role_binding")
    }
}

impl JobStore for FakeCluster {
    async fn create_job(&self, job: &Job) -> Result<Job, kube::Error> {
        let name = job.metadata.name.clone().unwrap_or_default();
        self.record(Call::CreateJob(name));
        self.check("create_job")?;
        let mut created = job.clone();
        created.metadata.uid = Some("0000-fake-uid".to_string());
        self.created_jobs.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn get_job(&self, _namespace: &str, name: &str) -> Result<Job, kube::Error> {
        self.record(Call::GetJob(name.to_string()));
        self.check("get_job")?;
        let mut job = self
            .created_jobs
            .lock()
            .unwrap()
            .iter()
            .find(|job| job.metadata.name.as_deref() == Some(name))
            .cloned()
            .ok_or_else(|| fake_error("get_job"))?;
        let mut statuses = self.job_statuses.lock().unwrap();
        job.status = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        Ok(job)
    }

    async fn delete_job(&self, _namespace: &str, name: &str) -> Result<(), kube::Error> {
        self.record(Call::DeleteJob(name.to_string()));
        self.check("delete_job")
    }
}

impl LogStream for FakeCluster {
    async fn list_pods(
        &self,
        _namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, kube::Error> {
        self.record(Call::ListPods(label_selector.to_string()));
        self.check("list_pods")?;
        let mut empty = self.empty_pod_lists.lock().unwrap();
        if *empty > 0 {
            *empty -= 1;
            return Ok(Vec::new());
        }
        Ok(self.pods.clone())
    }

    async fn container_logs(
        &self,
        _namespace: &str,
        pod_name: &str,
        container: &str,
    ) -> Result<LogReader, kube::Error> {
        self.record(Call::ContainerLogs(
            pod_name.to_string(),
            container.to_string(),
        ));
        self.check("container_logs")?;
        Ok(Box::pin(futures::io::Cursor::new(
            self.logs.clone().into_bytes(),
        )))
    }
}

pub(crate) fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
