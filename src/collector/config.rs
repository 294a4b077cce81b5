use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{
    Affinity, LocalObjectReference, PodSecurityContext, ResourceRequirements, SecurityContext,
    Toleration, Volume, VolumeMount,
};
use thiserror::Error;

use crate::config::polling::{PodLookupConfig, PollingConfig};
use crate::kubernetes_objects::NODE_COLLECTOR_NAME;
use crate::kubernetes_objects::job::JobBuilder;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CollectorConfigError {
    #[error("Namespace must not be empty")]
    EmptyNamespace,

    #[error("Namespace '{0}' is not a valid DNS-1123 label")]
    InvalidNamespace(String),

    #[error("Template name must not be empty")]
    EmptyTemplate,

    #[error("Log container name must not be empty")]
    EmptyContainer,

    #[error("Job polling interval must be greater than zero")]
    ZeroPollInterval,

    #[error("Pod lookup interval must be greater than zero")]
    ZeroPodLookupInterval,
}

/// Settings shared by every collection. Immutable; build it with
/// [`CollectorConfig::builder`].
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    pub(crate) namespace: String,
    pub(crate) template: String,
    pub(crate) name: Option<String>,
    pub(crate) image_ref: Option<String>,
    pub(crate) service_account: Option<String>,
    pub(crate) priority_class_name: Option<String>,
    pub(crate) container: String,
    pub(crate) timeout: Option<Duration>,
    pub(crate) collector_timeout: Duration,
    pub(crate) node_config: bool,
    pub(crate) use_node_selector: bool,
    pub(crate) labels: BTreeMap<String, String>,
    pub(crate) annotations: BTreeMap<String, String>,
    pub(crate) affinity: Option<Affinity>,
    pub(crate) tolerations: Vec<Toleration>,
    pub(crate) pod_security_context: Option<PodSecurityContext>,
    pub(crate) security_context: Option<SecurityContext>,
    pub(crate) volumes: Vec<Volume>,
    pub(crate) volume_mounts: Vec<VolumeMount>,
    pub(crate) image_pull_secrets: Vec<LocalObjectReference>,
    pub(crate) resources: Option<ResourceRequirements>,
    pub(crate) job_polling: PollingConfig,
    pub(crate) pod_lookup: PodLookupConfig,
}

impl CollectorConfig {
    pub fn builder(namespace: impl Into<String>) -> CollectorConfigBuilder {
        CollectorConfigBuilder::new(namespace)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn node_config(&self) -> bool {
        self.node_config
    }

    /// Copy of this configuration with `labels` merged in. Later values win.
    pub fn with_labels(&self, labels: BTreeMap<String, String>) -> CollectorConfig {
        let mut config = self.clone();
        config.labels.extend(labels);
        config
    }

    pub fn with_name(&self, name: impl Into<String>) -> CollectorConfig {
        let mut config = self.clone();
        config.name = Some(name.into());
        config
    }

    /// Job builder carrying every setting common to both collection flows.
    pub(crate) fn job_builder(&self, node_name: &str) -> JobBuilder {
        JobBuilder::new()
            .template(self.template.clone())
            .namespace(self.namespace.clone())
            .node_name(node_name)
            .labels(self.labels.clone())
            .annotations(self.annotations.clone())
            .timeout(self.collector_timeout)
            .security_context(self.security_context.clone())
            .pod_security_context(self.pod_security_context.clone())
            .image_ref(self.image_ref.clone().unwrap_or_default())
            .affinity(self.affinity.clone())
            .tolerations(self.tolerations.clone())
            .volumes(self.volumes.clone())
            .image_pull_secrets(self.image_pull_secrets.clone())
            .volume_mounts(self.volume_mounts.clone())
            .node_config(self.node_config)
            .priority_class_name(self.priority_class_name.clone().unwrap_or_default())
            .resources(self.resources.clone())
    }
}

/// Accumulates collector options. The last call for an option wins, except
/// [`CollectorConfigBuilder::labels`], which merges.
#[derive(Debug, Clone)]
pub struct CollectorConfigBuilder {
    config: CollectorConfig,
}

impl CollectorConfigBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        CollectorConfigBuilder {
            config: CollectorConfig {
                namespace: namespace.into(),
                template: NODE_COLLECTOR_NAME.to_string(),
                name: None,
                image_ref: None,
                service_account: None,
                priority_class_name: None,
                container: NODE_COLLECTOR_NAME.to_string(),
                timeout: None,
                collector_timeout: Duration::ZERO,
                node_config: false,
                use_node_selector: false,
                labels: BTreeMap::new(),
                annotations: BTreeMap::new(),
                affinity: None,
                tolerations: Vec::new(),
                pod_security_context: None,
                security_context: None,
                volumes: Vec::new(),
                volume_mounts: Vec::new(),
                image_pull_secrets: Vec::new(),
                resources: None,
                job_polling: PollingConfig::default(),
                pod_lookup: PodLookupConfig::default(),
            },
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.config.template = template.into();
        self
    }

    /// Job name used by `apply`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    pub fn image_ref(mut self, image_ref: impl Into<String>) -> Self {
        self.config.image_ref = Some(image_ref.into());
        self
    }

    pub fn service_account(mut self, service_account: impl Into<String>) -> Self {
        self.config.service_account = Some(service_account.into());
        self
    }

    pub fn priority_class_name(mut self, priority_class_name: impl Into<String>) -> Self {
        self.config.priority_class_name = Some(priority_class_name.into());
        self
    }

    /// Container whose log is collected.
    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.config.container = container.into();
        self
    }

    /// How long `apply_and_collect` waits for the job. `None` waits forever.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Active deadline set on the job itself.
    pub fn collector_timeout(mut self, timeout: Duration) -> Self {
        self.config.collector_timeout = timeout;
        self
    }

    pub fn node_config(mut self, node_config: bool) -> Self {
        self.config.node_config = node_config;
        self
    }

    pub fn use_node_selector(mut self, use_node_selector: bool) -> Self {
        self.config.use_node_selector = use_node_selector;
        self
    }

    pub fn labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.config.labels.extend(labels);
        self
    }

    pub fn annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.config.annotations = annotations;
        self
    }

    pub fn affinity(mut self, affinity: Affinity) -> Self {
        self.config.affinity = Some(affinity);
        self
    }

    pub fn tolerations(mut self, tolerations: Vec<Toleration>) -> Self {
        self.config.tolerations = tolerations;
        self
    }

    pub fn pod_security_context(mut self, context: PodSecurityContext) -> Self {
        self.config.pod_security_context = Some(context);
        self
    }

    pub fn security_context(mut self, context: SecurityContext) -> Self {
        self.config.security_context = Some(context);
        self
    }

    pub fn volumes(mut self, volumes: Vec<Volume>) -> Self {
        self.config.volumes = volumes;
        self
    }

    pub fn volume_mounts(mut self, volume_mounts: Vec<VolumeMount>) -> Self {
        self.config.volume_mounts = volume_mounts;
        self
    }

    pub fn image_pull_secrets(mut self, secrets: Vec<LocalObjectReference>) -> Self {
        self.config.image_pull_secrets = secrets;
        self
    }

    pub fn resources(mut self, resources: ResourceRequirements) -> Self {
        self.config.resources = Some(resources);
        self
    }

    pub fn job_polling(mut self, polling: PollingConfig) -> Self {
        self.config.job_polling = polling;
        self
    }

    pub fn pod_lookup(mut self, pod_lookup: PodLookupConfig) -> Self {
        self.config.pod_lookup = pod_lookup;
        self
    }

    pub fn build(self) -> Result<CollectorConfig, CollectorConfigError> {
        let config = self.config;
        if config.namespace.is_empty() {
            return Err(CollectorConfigError::EmptyNamespace);
        }
        if !is_dns_label(&config.namespace) {
            return Err(CollectorConfigError::InvalidNamespace(config.namespace));
        }
        if config.template.is_empty() {
            return Err(CollectorConfigError::EmptyTemplate);
        }
        if config.container.is_empty() {
            return Err(CollectorConfigError::EmptyContainer);
        }
        if config.job_polling.poll_interval.is_zero() {
            return Err(CollectorConfigError::ZeroPollInterval);
        }
        if config.pod_lookup.poll_interval.is_zero() {
            return Err(CollectorConfigError::ZeroPodLookupInterval);
        }
        Ok(config)
    }
}

fn is_dns_label(s: &str) -> bool {
    s.len() <= 63
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}
