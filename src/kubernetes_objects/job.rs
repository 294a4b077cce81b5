use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    Affinity, LocalObjectReference, PodSecurityContext, PodSpec, ResourceRequirements,
    SecurityContext, Toleration, Volume, VolumeMount,
};
use thiserror::Error;
use tracing::{Level, instrument};

use super::template::{TemplateError, TemplateRegistry};
use super::{LABEL_HOSTNAME, NODE_COLLECTOR_NAME};

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Manifest is not a valid Job: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Manifest has no 'spec' field")]
    MissingJobSpec,

    #[error("Manifest has no 'spec.template.spec' field")]
    MissingPodSpec,

    #[error("Manifest has no containers")]
    NoContainers,
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Failed to decode job template '{0}': {1}")]
    Decode(String, #[source] DecodeError),

    #[error("Job has no name: neither the template nor the caller set one")]
    MissingName,

    #[error("Job has no namespace: neither the template nor the caller set one")]
    MissingNamespace,

    #[error("A node name is required when node configuration mode is enabled")]
    MissingNodeName,
}

/// A ready-to-submit job. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescription {
    job: Job,
}

impl JobDescription {
    pub fn name(&self) -> &str {
        self.job.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.job.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn manifest(&self) -> &Job {
        &self.job
    }

    pub fn pod_spec(&self) -> Option<&PodSpec> {
        self.job.spec.as_ref()?.template.spec.as_ref()
    }
}

/// Declarative mutations over a named job template.
///
/// Setters overwrite, so the last call for a field wins. [`JobBuilder::build`] applies
/// the fields in a fixed order: namespace, name, labels, annotations, active deadline,
/// node targeting, service account, affinity, tolerations, priority class, pod security
/// context, volumes, image pull secrets, resources, image, `--node` argument, container
/// security context, volume mounts.
///
/// Image, container security context and volume mounts only touch the first container.
/// Resource requirements touch every container.
#[derive(Debug, Clone)]
pub struct JobBuilder {
    template: String,
    namespace: Option<String>,
    name: Option<String>,
    node_name: Option<String>,
    image_ref: Option<String>,
    service_account: Option<String>,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    affinity: Option<Affinity>,
    tolerations: Vec<Toleration>,
    priority_class_name: Option<String>,
    pod_security_context: Option<PodSecurityContext>,
    security_context: Option<SecurityContext>,
    volumes: Vec<Volume>,
    volume_mounts: Vec<VolumeMount>,
    image_pull_secrets: Vec<LocalObjectReference>,
    resources: Option<ResourceRequirements>,
    timeout: Duration,
    node_config: bool,
    use_node_selector: bool,
}

impl Default for JobBuilder {
    fn default() -> Self {
        JobBuilder {
            template: NODE_COLLECTOR_NAME.to_string(),
            namespace: None,
            name: None,
            node_name: None,
            image_ref: None,
            service_account: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            affinity: None,
            tolerations: Vec::new(),
            priority_class_name: None,
            pod_security_context: None,
            security_context: None,
            volumes: Vec::new(),
            volume_mounts: Vec::new(),
            image_pull_secrets: Vec::new(),
            resources: None,
            timeout: Duration::ZERO,
            node_config: false,
            use_node_selector: false,
        }
    }
}

fn non_empty(value: impl Into<String>) -> Option<String> {
    Some(value.into()).filter(|v| !v.is_empty())
}

impl JobBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = non_empty(namespace);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = non_empty(name);
        self
    }

    pub fn node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = non_empty(node_name);
        self
    }

    pub fn image_ref(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = non_empty(image_ref);
        self
    }

    pub fn service_account(mut self, service_account: impl Into<String>) -> Self {
        self.service_account = non_empty(service_account);
        self
    }

    pub fn labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn affinity(mut self, affinity: Option<Affinity>) -> Self {
        self.affinity = affinity;
        self
    }

    pub fn tolerations(mut self, tolerations: Vec<Toleration>) -> Self {
        self.tolerations = tolerations;
        self
    }

    pub fn priority_class_name(mut self, priority_class_name: impl Into<String>) -> Self {
        self.priority_class_name = non_empty(priority_class_name);
        self
    }

    pub fn pod_security_context(mut self, context: Option<PodSecurityContext>) -> Self {
        self.pod_security_context = context;
        self
    }

    pub fn security_context(mut self, context: Option<SecurityContext>) -> Self {
        self.security_context = context;
        self
    }

    pub fn volumes(mut self, volumes: Vec<Volume>) -> Self {
        self.volumes = volumes;
        self
    }

    pub fn volume_mounts(mut self, volume_mounts: Vec<VolumeMount>) -> Self {
        self.volume_mounts = volume_mounts;
        self
    }

    pub fn image_pull_secrets(mut self, secrets: Vec<LocalObjectReference>) -> Self {
        self.image_pull_secrets = secrets;
        self
    }

    pub fn resources(mut self, resources: Option<ResourceRequirements>) -> Self {
        self.resources = resources;
        self
    }

    /// Active deadline of the job itself. Zero keeps the template's value.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn node_config(mut self, node_config: bool) -> Self {
        self.node_config = node_config;
        self
    }

    pub fn use_node_selector(mut self, use_node_selector: bool) -> Self {
        self.use_node_selector = use_node_selector;
        self
    }

    #[instrument(
        "job_builder/build",
        level = Level::TRACE,
        skip_all,
        fields(template = %self.template)
    )]
    pub fn build(&self, templates: &TemplateRegistry) -> Result<JobDescription, BuildError> {
        let manifest = templates.get(&self.template)?;
        let mut job = decode(manifest).map_err(|e| BuildError::Decode(self.template.clone(), e))?;

        if self.node_config && self.node_name.is_none() {
            return Err(BuildError::MissingNodeName);
        }

        if let Some(namespace) = &self.namespace {
            job.metadata.namespace = Some(namespace.clone());
        }
        if let Some(name) = &self.name {
            job.metadata.name = Some(name.clone());
        }
        if job.metadata.name.as_deref().unwrap_or_default().is_empty() {
            return Err(BuildError::MissingName);
        }
        if job.metadata.namespace.as_deref().unwrap_or_default().is_empty() {
            return Err(BuildError::MissingNamespace);
        }

        if !self.labels.is_empty() {
            job.metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .extend(self.labels.clone());
        }
        if !self.annotations.is_empty() {
            job.metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .extend(self.annotations.clone());
        }

        // decode() guarantees spec, pod spec and at least one container.
        let Some(job_spec) = job.spec.as_mut() else {
            return Err(BuildError::Decode(self.template.clone(), DecodeError::MissingJobSpec));
        };
        if !self.timeout.is_zero() {
            job_spec.active_deadline_seconds =
                Some(i64::try_from(self.timeout.as_secs()).unwrap_or(i64::MAX));
        }
        let Some(pod) = job_spec.template.spec.as_mut() else {
            return Err(BuildError::Decode(self.template.clone(), DecodeError::MissingPodSpec));
        };

        self.apply_pod_mutations(pod);
        self.apply_container_mutations(pod)
            .map_err(|e| BuildError::Decode(self.template.clone(), e))?;

        Ok(JobDescription { job })
    }

    fn apply_pod_mutations(&self, pod: &mut PodSpec) {
        match (&self.node_name, self.use_node_selector) {
            (Some(node), true) => {
                pod.node_selector = Some(BTreeMap::from([(
                    LABEL_HOSTNAME.to_string(),
                    node.clone(),
                )]));
                pod.node_name = None;
            }
            (Some(node), false) => pod.node_name = Some(node.clone()),
            (None, _) => {}
        }
        if let Some(service_account) = &self.service_account {
            pod.service_account_name = Some(service_account.clone());
        }
        if let Some(affinity) = &self.affinity {
            pod.affinity = Some(affinity.clone());
        }
        if !self.tolerations.is_empty() {
            pod.tolerations = Some(self.tolerations.clone());
        }
        if let Some(priority_class_name) = &self.priority_class_name {
            pod.priority_class_name = Some(priority_class_name.clone());
        }
        if let Some(context) = &self.pod_security_context {
            pod.security_context = Some(context.clone());
        }
        if !self.volumes.is_empty() {
            pod.volumes = Some(self.volumes.clone());
        }
        if !self.image_pull_secrets.is_empty() {
            pod.image_pull_secrets = Some(self.image_pull_secrets.clone());
        }
    }

    fn apply_container_mutations(&self, pod: &mut PodSpec) -> Result<(), DecodeError> {
        if let Some(resources) = &self.resources {
            for container in pod.containers.iter_mut() {
                container.resources = Some(resources.clone());
            }
        }

        let primary = pod.containers.first_mut().ok_or(DecodeError::NoContainers)?;
        if let Some(image_ref) = &self.image_ref {
            primary.image = Some(image_ref.clone());
        }
        if self.node_config
            && let Some(node) = &self.node_name
        {
            primary
                .args
                .get_or_insert_with(Vec::new)
                .extend(["--node".to_string(), node.clone()]);
        }
        if let Some(context) = &self.security_context {
            primary.security_context = Some(context.clone());
        }
        if !self.volume_mounts.is_empty() {
            primary.volume_mounts = Some(self.volume_mounts.clone());
        }
        Ok(())
    }
}

fn decode(manifest: &str) -> Result<Job, DecodeError> {
    let job: Job = serde_yaml::from_str(manifest)?;
    let spec = job.spec.as_ref().ok_or(DecodeError::MissingJobSpec)?;
    let pod = spec.template.spec.as_ref().ok_or(DecodeError::MissingPodSpec)?;
    if pod.containers.is_empty() {
        return Err(DecodeError::NoContainers);
    }
    Ok(job)
}
