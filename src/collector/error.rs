use thiserror::Error;
use tracing_error::{ExtractSpanTrace, SpanTrace};

use crate::error::SpannedErr;
use crate::kubernetes_objects::job::BuildError;
use crate::kubernetes_objects::rbac::RbacError;

use super::logs::LogsError;
use super::runner::RunError;

#[derive(Error, Debug)]
pub enum CollectError {
    #[error("Failed to build job: {0}")]
    Build(#[from] BuildError),

    #[error("Failed to ensure namespace '{0}' exists: {1}")]
    Namespace(String, SpannedErr<kube::Error>),

    #[error("Failed to provision RBAC: {0}")]
    Rbac(#[from] RbacError),

    #[error("{0}")]
    Run(#[from] RunError),

    #[error("Failed to collect logs: {0}")]
    Logs(#[from] LogsError),
}

impl ExtractSpanTrace for CollectError {
    fn span_trace(&self) -> Option<&SpanTrace> {
        match self {
            CollectError::Build(_) => None,
            CollectError::Namespace(_, e) => e.span_trace(),
            CollectError::Rbac(e) => e.span_trace(),
            CollectError::Run(e) => e.span_trace(),
            CollectError::Logs(e) => e.span_trace(),
        }
    }
}
