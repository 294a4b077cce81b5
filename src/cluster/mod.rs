//! Capability traits over the cluster API.
//!
//! The collector only talks to the cluster through these traits. [`KubeCluster`]
//! implements all of them on top of a `kube::Client`; tests use an in-memory fake.
//! Every delete uses background propagation.
#![allow(async_fn_in_trait)]

mod kube_cluster;

#[cfg(test)]
pub(crate) mod fake;

use std::pin::Pin;

use futures::io::AsyncRead;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Pod, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};

pub use self::kube_cluster::KubeCluster;

/// Container log output. Dropping the reader closes the underlying stream.
pub type LogReader = Pin<Box<dyn AsyncRead + Send>>;

pub trait NamespaceStore {
    /// `Ok(None)` when the namespace does not exist.
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, kube::Error>;
    async fn create_namespace(&self, name: &str) -> Result<Namespace, kube::Error>;
    async fn delete_namespace(&self, name: &str) -> Result<(), kube::Error>;
}

pub trait RbacStore {
    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<ClusterRole, kube::Error>;
    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount, kube::Error>;
    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, kube::Error>;

    async fn delete_cluster_role(&self, name: &str) -> Result<(), kube::Error>;
    async fn delete_service_account(&self, namespace: &str, name: &str)
    -> Result<(), kube::Error>;
    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), kube::Error>;
}

pub trait JobStore {
    async fn create_job(&self, job: &Job) -> Result<Job, kube::Error>;
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, kube::Error>;
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;
}

pub trait LogStream {
    async fn list_pods(&self, namespace: &str, label_selector: &str)
    -> Result<Vec<Pod>, kube::Error>;
    async fn container_logs(
        &self,
        namespace: &str,
        pod_name: &str,
        container: &str,
    ) -> Result<LogReader, kube::Error>;
}

/// Everything the collector needs from the cluster.
pub trait Cluster: NamespaceStore + RbacStore + JobStore + LogStream {}

impl<T> Cluster for T where T: NamespaceStore + RbacStore + JobStore + LogStream {}
