//! Ephemeral collection jobs: build, submit, wait, read logs, tear down.
//!
//! [`Collector::apply_and_collect`] runs the whole lifecycle for one node and
//! returns the workload's output. [`Collector::apply`] only submits, leaving the
//! lifecycle to the caller.

pub mod config;
pub mod error;
pub mod logs;
pub mod runner;

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::Job;
use tracing::{Instrument, info, instrument, trace_span, warn};

use crate::cancellation::Cancellation;
use crate::cluster::Cluster;
use crate::error::{SpannedExt, report_span_trace};
use crate::kubernetes_objects::identity::collection_job_name;
use crate::kubernetes_objects::job::JobDescription;
use crate::kubernetes_objects::rbac::RbacBundle;
use crate::kubernetes_objects::template::TemplateRegistry;
use crate::kubernetes_objects::{
    LABEL_AUTO_CREATED, LABEL_COLLECTOR_NAME, LABEL_RESOURCE_KIND, LABEL_RESOURCE_NAME,
    NODE_COLLECTOR_NAME,
};

pub use self::config::{CollectorConfig, CollectorConfigBuilder, CollectorConfigError};
pub use self::error::CollectError;
use self::logs::LogsReader;
use self::runner::Runner;

#[derive(Debug)]
pub struct Collector<C> {
    cluster: C,
    config: CollectorConfig,
    templates: TemplateRegistry,
    cancellation: Cancellation,
}

impl<C: Cluster> Collector<C> {
    pub fn new(cluster: C, config: CollectorConfig, templates: TemplateRegistry) -> Self {
        Collector {
            cluster,
            config,
            templates,
            cancellation: Cancellation::never(),
        }
    }

    /// Waits in `apply_and_collect` stop when `cancellation` fires.
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Labels merged here apply to every later call.
    pub fn append_labels(&mut self, labels: BTreeMap<String, String>) {
        self.config = self.config.with_labels(labels);
    }

    /// Runs one collection on `node_name` and returns the workload's log.
    ///
    /// Cleanup of the RBAC objects and the job only happens once the job has
    /// completed. A failure before that leaves them in the cluster.
    #[instrument(
        "apply_and_collect",
        skip(self),
        fields(kubernetes_namespace = %self.config.namespace)
    )]
    pub async fn apply_and_collect(&self, node_name: &str) -> Result<String, CollectError> {
        self.ensure_namespace().await?;

        let job_name =
            collection_job_name(&self.config.template, node_name, &self.config.namespace);

        let rbac = if self.config.node_config {
            let bundle = RbacBundle::for_collection(&self.config.namespace, &job_name);
            bundle.create(&self.cluster).await?;
            Some(bundle)
        } else {
            None
        };

        let mut builder = self
            .config
            .job_builder(node_name)
            .name(job_name)
            .labels(self.collection_labels(node_name))
            .use_node_selector(true);
        if let Some(bundle) = &rbac {
            builder = builder.service_account(bundle.service_account.clone());
        }
        let job = builder.build(&self.templates)?;

        let runner = Runner::new(self.config.job_polling.clone(), self.config.timeout);
        let finished = runner.run(&self.cluster, &job, &self.cancellation).await?;

        let logs = LogsReader::new(self.config.pod_lookup.clone(), self.config.container.clone());
        let output = logs.read_to_string(&self.cluster, &finished).await;

        self.teardown(rbac.as_ref(), &job).await;

        let output = output?;
        info!(
            "Collected {} bytes from node '{}' with job '{}'.",
            output.len(),
            node_name,
            job.name()
        );
        Ok(output)
    }

    /// Submits a job named after the configured `name` and returns it as created.
    /// Does not wait, read logs or delete anything.
    #[instrument("apply", skip(self), fields(kubernetes_namespace = %self.config.namespace))]
    pub async fn apply(&self, node_name: &str) -> Result<Job, CollectError> {
        let job = self
            .config
            .job_builder(node_name)
            .name(self.config.name.clone().unwrap_or_default())
            .service_account(self.config.service_account.clone().unwrap_or_default())
            .use_node_selector(self.config.use_node_selector)
            .build(&self.templates)?;
        Ok(runner::submit(&self.cluster, &job).await?)
    }

    /// Deletes the configured namespace. Failures are only logged.
    #[instrument("cleanup", skip(self), fields(kubernetes_namespace = %self.config.namespace))]
    pub async fn cleanup(&self) {
        match self
            .cluster
            .delete_namespace(&self.config.namespace)
            .await
            .with_span_trace()
        {
            Ok(()) => info!("Namespace '{}' deleted.", self.config.namespace),
            Err(e) => {
                warn!("Failed to delete namespace '{}': {}", self.config.namespace, e);
                report_span_trace(&e);
            }
        }
    }

    async fn ensure_namespace(&self) -> Result<(), CollectError> {
        let namespace = &self.config.namespace;
        let existing = async { self.cluster.get_namespace(namespace).await.with_span_trace() }
            .instrument(trace_span!("get_namespace"))
            .await
            .map_err(|e| CollectError::Namespace(namespace.clone(), e))?;
        if existing.is_some() {
            return Ok(());
        }

        info!("Namespace '{}' not found. Creating it...", namespace);
        async { self.cluster.create_namespace(namespace).await.with_span_trace() }
            .instrument(trace_span!("create_namespace"))
            .await
            .map_err(|e| CollectError::Namespace(namespace.clone(), e))?;
        Ok(())
    }

    /// Identification labels for a collection job. Configured labels win.
    fn collection_labels(&self, node_name: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::from([
            (LABEL_COLLECTOR_NAME.to_string(), NODE_COLLECTOR_NAME.to_string()),
            (LABEL_AUTO_CREATED.to_string(), "true".to_string()),
            (LABEL_RESOURCE_NAME.to_string(), node_name.to_string()),
            (LABEL_RESOURCE_KIND.to_string(), "Node".to_string()),
        ]);
        labels.extend(self.config.labels.clone());
        labels
    }

    async fn teardown(&self, rbac: Option<&RbacBundle>, job: &JobDescription) {
        info!("Tearing down collection job '{}'...", job.name());
        if let Some(bundle) = rbac {
            bundle.delete(&self.cluster).await;
        }
        if let Err(e) = self
            .cluster
            .delete_job(job.namespace(), job.name())
            .await
            .with_span_trace()
        {
            warn!("Failed to delete job '{}': {}", job.name(), e);
            report_span_trace(&e);
        }
    }
}
