pub mod identity;
pub mod job;
pub mod rbac;
pub mod template;

pub(crate) const MANAGER_ROLE_NAME: &str = "node-collector";

/// Name of the built-in template and of its primary container.
pub const NODE_COLLECTOR_NAME: &str = "node-collector";

pub const LABEL_HOSTNAME: &str = "kubernetes.io/hostname";

// Identification metadata attached to collection jobs. Never interpreted here.
pub const LABEL_COLLECTOR_NAME: &str = "node-collector.io/collector-name";
pub const LABEL_AUTO_CREATED: &str = "node-collector.io/auto-created";
pub const LABEL_RESOURCE_NAME: &str = "node-collector.io/resource-name";
pub const LABEL_RESOURCE_KIND: &str = "node-collector.io/resource-kind";
