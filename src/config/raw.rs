use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use k8s_openapi::api::core::v1::{
    Affinity, LocalObjectReference, PodSecurityContext, ResourceRequirements, SecurityContext,
    Toleration, Volume, VolumeMount,
};
use serde::Deserialize;
use thiserror::Error;

use super::Config;
use super::polling::{PodLookupConfig, PollingConfig, deserialize_optional_duration};
use crate::collector::{CollectorConfig, CollectorConfigError};

const DEFAULT_CONCURRENCY: usize = 5;

/// Config file as written. Nested Kubernetes objects use the API's own camelCase keys.
#[cfg_attr(test, derive(PartialEq))]
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub(super) struct RawConfig {
    pub(super) namespace: String,
    pub(super) template: Option<String>,
    pub(super) template_dir: Option<PathBuf>,

    /// Job name used by `apply`
    pub(super) name: Option<String>,
    pub(super) image_ref: Option<String>,
    pub(super) service_account: Option<String>,
    pub(super) priority_class_name: Option<String>,

    /// Container whose log is collected
    pub(super) container: Option<String>,

    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub(super) timeout: Option<Duration>,

    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub(super) collector_timeout: Option<Duration>,

    #[serde(default)]
    pub(super) node_config: bool,
    #[serde(default)]
    pub(super) use_node_selector: bool,

    #[serde(default)]
    pub(super) labels: BTreeMap<String, String>,
    #[serde(default)]
    pub(super) annotations: BTreeMap<String, String>,

    pub(super) affinity: Option<Affinity>,
    #[serde(default)]
    pub(super) tolerations: Vec<Toleration>,
    pub(super) pod_security_context: Option<PodSecurityContext>,
    pub(super) security_context: Option<SecurityContext>,
    #[serde(default)]
    pub(super) volumes: Vec<Volume>,
    #[serde(default)]
    pub(super) volume_mounts: Vec<VolumeMount>,
    #[serde(default)]
    pub(super) image_pull_secrets: Vec<LocalObjectReference>,
    pub(super) resources: Option<ResourceRequirements>,

    #[serde(default)]
    pub(super) job_polling: PollingConfig,
    #[serde(default)]
    pub(super) pod_lookup: PodLookupConfig,

    /// Nodes collected at once by `collect`
    pub(super) concurrency: Option<usize>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigParseError {
    #[error("Invalid collector settings: {0}")]
    Collector(#[from] CollectorConfigError),

    #[error("concurrency must be greater than zero")]
    ZeroConcurrency,
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigParseError;
    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let concurrency = raw.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(ConfigParseError::ZeroConcurrency);
        }

        let mut builder = CollectorConfig::builder(raw.namespace)
            .timeout(raw.timeout)
            .collector_timeout(raw.collector_timeout.unwrap_or_default())
            .node_config(raw.node_config)
            .use_node_selector(raw.use_node_selector)
            .labels(raw.labels)
            .annotations(raw.annotations)
            .tolerations(raw.tolerations)
            .volumes(raw.volumes)
            .volume_mounts(raw.volume_mounts)
            .image_pull_secrets(raw.image_pull_secrets)
            .job_polling(raw.job_polling)
            .pod_lookup(raw.pod_lookup);

        if let Some(template) = raw.template {
            builder = builder.template(template);
        }
        if let Some(name) = raw.name {
            builder = builder.name(name);
        }
        if let Some(image_ref) = raw.image_ref {
            builder = builder.image_ref(image_ref);
        }
        if let Some(service_account) = raw.service_account {
            builder = builder.service_account(service_account);
        }
        if let Some(priority_class_name) = raw.priority_class_name {
            builder = builder.priority_class_name(priority_class_name);
        }
        if let Some(container) = raw.container {
            builder = builder.container(container);
        }
        if let Some(affinity) = raw.affinity {
            builder = builder.affinity(affinity);
        }
        if let Some(context) = raw.pod_security_context {
            builder = builder.pod_security_context(context);
        }
        if let Some(context) = raw.security_context {
            builder = builder.security_context(context);
        }
        if let Some(resources) = raw.resources {
            builder = builder.resources(resources);
        }

        Ok(Config {
            collector: builder.build()?,
            template_dir: raw.template_dir,
            concurrency,
        })
    }
}
