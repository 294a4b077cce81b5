use std::io;

use derive_debug::Dbg;
use futures::channel::{mpsc, oneshot};
use futures::{AsyncReadExt, SinkExt, TryStreamExt};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Pod, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, ListParams, LogParams, PostParams};
use kube::{Api, Client};
use tracing::{Instrument, Level, instrument, warn};

use super::{JobStore, LogReader, LogStream, NamespaceStore, RbacStore};
use crate::kubernetes_objects::MANAGER_ROLE_NAME;

const LOG_CHUNK_SIZE: usize = 8 * 1024;

/// The real cluster, reached through a `kube::Client`.
#[derive(Dbg, Clone)]
pub struct KubeCluster {
    #[dbg(skip)]
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        KubeCluster { client }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(MANAGER_ROLE_NAME.to_string()),
            ..Default::default()
        }
    }
}

impl NamespaceStore for KubeCluster {
    #[instrument("kube/get_namespace", level = Level::TRACE, skip(self))]
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, kube::Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.get_opt(name).await
    }

    #[instrument("kube/create_namespace", level = Level::TRACE, skip(self))]
    async fn create_namespace(&self, name: &str) -> Result<Namespace, kube::Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&Self::post_params(), &namespace).await
    }

    #[instrument("kube/delete_namespace", level = Level::TRACE, skip(self))]
    async fn delete_namespace(&self, name: &str) -> Result<(), kube::Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::background()).await?;
        Ok(())
    }
}

impl RbacStore for KubeCluster {
    #[instrument("kube/create_cluster_role", level = Level::TRACE, skip_all)]
    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<ClusterRole, kube::Error> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        api.create(&Self::post_params(), role).await
    }

    #[instrument("kube/create_service_account", level = Level::TRACE, skip(self, account))]
    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount, kube::Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        api.create(&Self::post_params(), account).await
    }

    #[instrument("kube/create_cluster_role_binding", level = Level::TRACE, skip_all)]
    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, kube::Error> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        api.create(&Self::post_params(), binding).await
    }

    #[instrument("kube/delete_cluster_role", level = Level::TRACE, skip(self))]
    async fn delete_cluster_role(&self, name: &str) -> Result<(), kube::Error> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::background()).await?;
        Ok(())
    }

    #[instrument("kube/delete_service_account", level = Level::TRACE, skip(self))]
    async fn delete_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), kube::Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::background()).await?;
        Ok(())
    }

    #[instrument("kube/delete_cluster_role_binding", level = Level::TRACE, skip(self))]
    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), kube::Error> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::background()).await?;
        Ok(())
    }
}

impl JobStore for KubeCluster {
    #[instrument(
        "kube/create_job",
        level = Level::TRACE,
        skip_all,
        fields(job_name = ?job.metadata.name)
    )]
    async fn create_job(&self, job: &Job) -> Result<Job, kube::Error> {
        let namespace = job.metadata.namespace.as_deref().unwrap_or("default");
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.create(&Self::post_params(), job).await
    }

    #[instrument("kube/get_job", level = Level::TRACE, skip(self))]
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, kube::Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await
    }

    #[instrument("kube/delete_job", level = Level::TRACE, skip(self))]
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::background()).await?;
        Ok(())
    }
}

impl LogStream for KubeCluster {
    #[instrument("kube/list_pods", level = Level::TRACE, skip(self))]
    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, kube::Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default().labels(label_selector)).await?;
        Ok(pods.items)
    }

    /// Opens the log stream on a background task that owns the `Api`, and hands the
    /// chunks over a channel so the returned reader does not borrow from it.
    #[instrument("kube/container_logs", level = Level::TRACE, skip(self))]
    async fn container_logs(
        &self,
        namespace: &str,
        pod_name: &str,
        container: &str,
    ) -> Result<LogReader, kube::Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(container.to_string()),
            ..Default::default()
        };
        let pod_name = pod_name.to_string();

        let (opened_tx, opened_rx) = oneshot::channel::<Result<(), kube::Error>>();
        let (mut chunk_tx, chunk_rx) = mpsc::channel::<io::Result<Vec<u8>>>(16);

        tokio::spawn(
            async move {
                let reader = match api.log_stream(&pod_name, &params).await {
                    Ok(reader) => {
                        let _ = opened_tx.send(Ok(()));
                        reader
                    }
                    Err(e) => {
                        let _ = opened_tx.send(Err(e));
                        return;
                    }
                };
                let mut reader = Box::pin(reader);
                let mut buf = vec![0u8; LOG_CHUNK_SIZE];
                loop {
                    let chunk = match reader.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => Ok(buf[..n].to_vec()),
                        Err(e) => {
                            warn!("Log stream of pod '{}' broke: {}", pod_name, e);
                            Err(e)
                        }
                    };
                    let failed = chunk.is_err();
                    // The receiver is gone once the caller drops the reader.
                    if chunk_tx.send(chunk).await.is_err() || failed {
                        break;
                    }
                }
            }
            .in_current_span(),
        );

        opened_rx
            .await
            .map_err(|e| kube::Error::Service(Box::new(e)))??;

        Ok(Box::pin(chunk_rx.into_async_read()))
    }
}
