use std::time::Duration;

use futures::future;
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use thiserror::Error;
use tokio::select;
use tracing::{Instrument, debug, error, info, instrument, trace_span, warn};
use tracing_error::{ExtractSpanTrace, SpanTrace};

use crate::cancellation::Cancellation;
use crate::cluster::JobStore;
use crate::config::polling::PollingConfig;
use crate::error::{SpannedErr, SpannedExt};
use crate::kubernetes_objects::job::JobDescription;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Failed to submit job '{0}': {1}")]
    Apply(String, SpannedErr<kube::Error>),

    #[error("Job '{0}' did not finish within {1:?}")]
    Timeout(String, Duration, SpanTrace),

    #[error("Job '{0}' failed: {1}")]
    WorkloadFailed(String, String, SpanTrace),

    #[error("Waiting for job '{0}' was cancelled ({1})")]
    Cancelled(String, &'static str, SpanTrace),

    #[error("Failed to read status of job '{0}': {1}")]
    Status(String, SpannedErr<kube::Error>),
}

impl ExtractSpanTrace for RunError {
    fn span_trace(&self) -> Option<&SpanTrace> {
        match self {
            RunError::Apply(_, e) => e.span_trace(),
            RunError::Timeout(_, _, span_trace) => Some(span_trace),
            RunError::WorkloadFailed(_, _, span_trace) => Some(span_trace),
            RunError::Cancelled(_, _, span_trace) => Some(span_trace),
            RunError::Status(_, e) => e.span_trace(),
        }
    }
}

/// Phase of a submitted job as reported by the cluster.
///
/// A wait that runs out of time or is cancelled ends in [`RunError::Timeout`] or
/// [`RunError::Cancelled`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Submitted,
    Running,
    Complete,
    Failed,
}

impl JobPhase {
    pub fn observe(status: Option<&JobStatus>) -> JobPhase {
        let Some(status) = status else {
            return JobPhase::Submitted;
        };
        let condition_true = |type_: &str| {
            status.conditions.iter().flatten().any(|c| {
                c.type_ == type_ && c.status == "True"
            })
        };
        if condition_true("Failed") {
            return JobPhase::Failed;
        }
        if condition_true("Complete") {
            return JobPhase::Complete;
        }
        let active = status.active.unwrap_or(0);
        if status.succeeded.unwrap_or(0) > 0 && active == 0 {
            return JobPhase::Complete;
        }
        if active > 0 || status.start_time.is_some() {
            JobPhase::Running
        } else {
            JobPhase::Submitted
        }
    }
}

fn failure_reason(status: Option<&JobStatus>) -> String {
    status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.type_ == "Failed" && c.status == "True")
        })
        .and_then(|c| c.message.clone().or_else(|| c.reason.clone()))
        .unwrap_or_else(|| "job reported failure".to_string())
}

/// Submits a job without waiting for it.
#[instrument(
    "submit_job",
    skip_all,
    fields(kubernetes_namespace = %job.namespace(), job_name = %job.name())
)]
pub(crate) async fn submit<S: JobStore>(store: &S, job: &JobDescription) -> Result<Job, RunError> {
    let created = async {
        store
            .create_job(job.manifest())
            .await
            .with_span_trace()
            .map_err(|e| RunError::Apply(job.name().to_string(), e))
    }
    .instrument(trace_span!("create_job"))
    .await?;
    info!("Job '{}' submitted.", job.name());
    Ok(created)
}

/// Submits a job and blocks until it completes, fails, times out or is cancelled.
#[derive(Debug, Clone)]
pub struct Runner {
    polling: PollingConfig,
    timeout: Option<Duration>,
}

impl Runner {
    pub fn new(polling: PollingConfig, timeout: Option<Duration>) -> Self {
        Runner { polling, timeout }
    }

    /// On success returns the job as last observed, in the `Complete` phase.
    #[instrument(
        "run_job",
        skip_all,
        fields(kubernetes_namespace = %job.namespace(), job_name = %job.name())
    )]
    pub async fn run<S: JobStore>(
        &self,
        store: &S,
        job: &JobDescription,
        cancellation: &Cancellation,
    ) -> Result<Job, RunError> {
        submit(store, job).await?;

        let deadline = async {
            match self.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => future::pending::<()>().await,
            }
        };

        select! {
            result = self.wait_until_job_finished(store, job.namespace(), job.name()) => result,
            reason = cancellation.cancelled() => {
                warn!("Stopped waiting for job '{}': {}.", job.name(), reason);
                Err(RunError::Cancelled(job.name().to_string(), reason, SpanTrace::capture()))
            }
            _ = deadline => {
                let timeout = self.timeout.unwrap_or_default();
                error!("Waited more than {:?} for job '{}' to finish.", timeout, job.name());
                Err(RunError::Timeout(job.name().to_string(), timeout, SpanTrace::capture()))
            }
        }
    }

    #[instrument("wait_until_job_finished", skip(self, store), level = "trace")]
    async fn wait_until_job_finished<S: JobStore>(
        &self,
        store: &S,
        namespace: &str,
        job_name: &str,
    ) -> Result<Job, RunError> {
        info!(
            "Waiting up to {} for job '{}' to finish...",
            self.timeout
                .map(|t| format!("{t:?}"))
                .unwrap_or_else(|| "forever".to_string()),
            job_name
        );
        tokio::time::sleep(self.polling.initial_wait).await;
        let mut wait_duration = self.polling.initial_wait;
        let mut errors_count = 0u64;
        loop {
            match store.get_job(namespace, job_name).await {
                Ok(job) => {
                    errors_count = 0;
                    match JobPhase::observe(job.status.as_ref()) {
                        JobPhase::Complete => {
                            info!(
                                "Job '{}' completed after {:?}.",
                                job_name, wait_duration
                            );
                            break Ok(job);
                        }
                        JobPhase::Failed => {
                            let reason = failure_reason(job.status.as_ref());
                            error!("Job '{}' failed: {}", job_name, reason);
                            break Err(RunError::WorkloadFailed(
                                job_name.to_string(),
                                reason,
                                SpanTrace::capture(),
                            ));
                        }
                        phase => {
                            debug!(
                                "Job '{}' is {:?} after {:?}. Waiting another {:?}...",
                                job_name, phase, wait_duration, self.polling.poll_interval
                            );
                        }
                    }
                    wait_duration += self.polling.poll_interval;
                    tokio::time::sleep(self.polling.poll_interval).await;
                }
                Err(e) => {
                    warn!("Error while checking job '{}': {}", job_name, e);
                    errors_count += 1;
                    if errors_count >= self.polling.max_errors {
                        error!(
                            "Failed to check job '{}' status {} times. Aborting wait.",
                            job_name, errors_count
                        );
                        break Err(RunError::Status(job_name.to_string(), SpannedErr::new(e)));
                    }
                    warn!(
                        "Waiting another {:?} before retrying...",
                        self.polling.error_wait
                    );
                    wait_duration += self.polling.error_wait;
                    tokio::time::sleep(self.polling.error_wait).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::{
        Call, FakeCluster, complete_status, failed_status, running_status,
    };
    use crate::kubernetes_objects::job::JobBuilder;
    use crate::kubernetes_objects::template::TemplateRegistry;

    fn fast_polling() -> PollingConfig {
        PollingConfig {
            initial_wait: Duration::ZERO,
            poll_interval: Duration::from_millis(5),
            error_wait: Duration::from_millis(5),
            max_errors: 3,
        }
    }

    fn job() -> JobDescription {
        JobBuilder::new()
            .namespace("ns")
            .name("collect-1")
            .build(&TemplateRegistry::default())
            .unwrap()
    }

    #[test]
    fn test_observe_phase() {
        assert_eq!(JobPhase::observe(None), JobPhase::Submitted);
        assert_eq!(JobPhase::observe(Some(&JobStatus::default())), JobPhase::Submitted);
        assert_eq!(JobPhase::observe(Some(&running_status())), JobPhase::Running);
        assert_eq!(JobPhase::observe(Some(&complete_status())), JobPhase::Complete);
        assert_eq!(JobPhase::observe(Some(&failed_status("x"))), JobPhase::Failed);
        let succeeded = JobStatus {
            succeeded: Some(1),
            ..Default::default()
        };
        assert_eq!(JobPhase::observe(Some(&succeeded)), JobPhase::Complete);
    }

    #[tokio::test]
    async fn test_run_until_complete() {
        let cluster = FakeCluster::new().with_job_statuses(vec![
            running_status(),
            running_status(),
            complete_status(),
        ]);
        let runner = Runner::new(fast_polling(), Some(Duration::from_secs(5)));
        let finished = runner.run(&cluster, &job(), &Cancellation::never()).await.unwrap();
        assert_eq!(JobPhase::observe(finished.status.as_ref()), JobPhase::Complete);
        assert_eq!(
            cluster.calls(),
            vec![
                Call::CreateJob("collect-1".to_string()),
                Call::GetJob("collect-1".to_string()),
                Call::GetJob("collect-1".to_string()),
                Call::GetJob("collect-1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_workload_failure() {
        let cluster =
            FakeCluster::new().with_job_statuses(vec![failed_status("BackoffLimitExceeded")]);
        let runner = Runner::new(fast_polling(), None);
        let result = runner.run(&cluster, &job(), &Cancellation::never()).await;
        assert!(matches!(
            result,
            Err(RunError::WorkloadFailed(name, reason, _))
                if name == "collect-1" && reason == "BackoffLimitExceeded"
        ));
    }

    #[tokio::test]
    async fn test_timeout() {
        let cluster = FakeCluster::new().with_job_statuses(vec![running_status()]);
        let runner = Runner::new(fast_polling(), Some(Duration::from_millis(30)));
        let result = runner.run(&cluster, &job(), &Cancellation::never()).await;
        let Err(err) = result else {
            panic!("expected a timeout");
        };
        assert!(matches!(
            err,
            RunError::Timeout(_, timeout, _) if timeout == Duration::from_millis(30)
        ));
        assert_eq!(err.to_string(), "Job 'collect-1' did not finish within 30ms");
    }

    #[tokio::test]
    async fn test_cancellation() {
        let cluster = FakeCluster::new().with_job_statuses(vec![running_status()]);
        let runner = Runner::new(fast_polling(), None);
        let (handle, cancellation) = Cancellation::manual();
        handle.cancel("test");
        let result = runner.run(&cluster, &job(), &cancellation).await;
        assert!(matches!(result, Err(RunError::Cancelled(_, "test", _))));
    }

    #[tokio::test]
    async fn test_submission_failure_does_not_wait() {
        let cluster = FakeCluster {
            failing: vec!["create_job"],
            ..FakeCluster::new()
        };
        let runner = Runner::new(fast_polling(), None);
        let result = runner.run(&cluster, &job(), &Cancellation::never()).await;
        assert!(matches!(result, Err(RunError::Apply(..))));
        assert_eq!(cluster.calls(), vec![Call::CreateJob("collect-1".to_string())]);
    }

    #[tokio::test]
    async fn test_status_errors_exhaust_budget() {
        let cluster = FakeCluster {
            failing: vec!["get_job"],
            ..FakeCluster::new()
        };
        let runner = Runner::new(fast_polling(), Some(Duration::from_secs(5)));
        let result = runner.run(&cluster, &job(), &Cancellation::never()).await;
        assert!(matches!(result, Err(RunError::Status(..))));
        let polls = cluster
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::GetJob(_)))
            .count();
        assert_eq!(polls, 3);
    }
}
