use std::time::Duration;

use futures::io::AsyncReadExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, instrument, trace_span};
use tracing_error::{ExtractSpanTrace, SpanTrace};

use crate::cluster::{LogReader, LogStream};
use crate::config::polling::PodLookupConfig;
use crate::error::{SpannedErr, SpannedExt};

#[derive(Error, Debug)]
pub enum LogsError {
    #[error("No pod for job '{0}' appeared within {1:?}")]
    PodNotFound(String, Duration, SpanTrace),

    #[error("Failed to list pods of job '{0}': {1}")]
    PodLookup(String, SpannedErr<kube::Error>),

    #[error("Failed to open log stream of pod '{0}': {1}")]
    LogStream(String, SpannedErr<kube::Error>),

    #[error("Failed to read log stream of pod '{0}': {1}")]
    Read(String, SpannedErr<std::io::Error>),
}

impl ExtractSpanTrace for LogsError {
    fn span_trace(&self) -> Option<&SpanTrace> {
        match self {
            LogsError::PodNotFound(_, _, span_trace) => Some(span_trace),
            LogsError::PodLookup(_, e) => e.span_trace(),
            LogsError::LogStream(_, e) => e.span_trace(),
            LogsError::Read(_, e) => e.span_trace(),
        }
    }
}

/// Finds the pod a job created and streams the log of one of its containers.
#[derive(Debug, Clone)]
pub struct LogsReader {
    pod_lookup: PodLookupConfig,
    container: String,
}

impl LogsReader {
    pub fn new(pod_lookup: PodLookupConfig, container: impl Into<String>) -> Self {
        LogsReader {
            pod_lookup,
            container: container.into(),
        }
    }

    #[instrument(
        "open_logs",
        skip_all,
        fields(job_name = %job_name(job), container = %self.container)
    )]
    pub async fn open<S: LogStream>(&self, store: &S, job: &Job) -> Result<LogReader, LogsError> {
        let namespace = job.metadata.namespace.as_deref().unwrap_or_default();
        let pod = self.find_pod(store, namespace, job).await?;
        let pod_name = pod.metadata.name.unwrap_or_default();

        async {
            store
                .container_logs(namespace, &pod_name, &self.container)
                .await
                .with_span_trace()
                .map_err(|e| LogsError::LogStream(pod_name.clone(), e))
        }
        .instrument(trace_span!("container_logs", pod_name = %pod_name))
        .await
    }

    /// Buffers the whole log. Invalid UTF-8 is replaced rather than rejected.
    pub async fn read_to_string<S: LogStream>(
        &self,
        store: &S,
        job: &Job,
    ) -> Result<String, LogsError> {
        let mut reader = self.open(store, job).await?;
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .with_span_trace()
            .map_err(|e| LogsError::Read(job_name(job).to_string(), e))?;
        info!("Read {} bytes of output from job '{}'.", buf.len(), job_name(job));
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    async fn find_pod<S: LogStream>(
        &self,
        store: &S,
        namespace: &str,
        job: &Job,
    ) -> Result<Pod, LogsError> {
        let selector = pod_selector(job);
        let started = Instant::now();
        loop {
            let pods = async {
                store
                    .list_pods(namespace, &selector)
                    .await
                    .with_span_trace()
                    .map_err(|e| LogsError::PodLookup(job_name(job).to_string(), e))
            }
            .instrument(trace_span!("list_pods", label_selector = %selector))
            .await?;

            if let Some(pod) = select_pod(pods) {
                return Ok(pod);
            }
            if started.elapsed() >= self.pod_lookup.max_wait {
                return Err(LogsError::PodNotFound(
                    job_name(job).to_string(),
                    self.pod_lookup.max_wait,
                    SpanTrace::capture(),
                ));
            }
            debug!(
                "No pod for job '{}' yet. Waiting another {:?}...",
                job_name(job),
                self.pod_lookup.poll_interval
            );
            tokio::time::sleep(self.pod_lookup.poll_interval).await;
        }
    }
}

fn job_name(job: &Job) -> &str {
    job.metadata.name.as_deref().unwrap_or_default()
}

/// Label selector matching the job's pods: the job's own selector when the API
/// server filled it in, `job-name=<name>` otherwise.
fn pod_selector(job: &Job) -> String {
    let match_labels = job
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.as_ref())
        .and_then(|selector| selector.match_labels.as_ref())
        .filter(|labels| !labels.is_empty());
    match match_labels {
        Some(labels) => labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","),
        None => format!("job-name={}", job_name(job)),
    }
}

/// A succeeded pod if there is one, the newest otherwise.
fn select_pod(mut pods: Vec<Pod>) -> Option<Pod> {
    let succeeded = pods.iter().position(|pod| {
        pod.status
            .as_ref()
            .and_then(|status| status.phase.as_deref())
            == Some("Succeeded")
    });
    match succeeded {
        Some(index) => Some(pods.swap_remove(index)),
        None => pods
            .into_iter()
            .max_by(|a, b| {
                a.metadata
                    .creation_timestamp
                    .cmp(&b.metadata.creation_timestamp)
            }),
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::batch::v1::JobSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

    use super::*;
    use crate::cluster::fake::{Call, FakeCluster, labels, pod};

    fn job(selector: Option<LabelSelector>) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some("collect-1".to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            spec: Some(JobSpec {
                selector,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn reader() -> LogsReader {
        LogsReader::new(
            PodLookupConfig {
                poll_interval: Duration::from_millis(5),
                max_wait: Duration::from_millis(50),
            },
            "node-collector",
        )
    }

    #[test]
    fn test_selector_prefers_job_selector() {
        let selector = LabelSelector {
            match_labels: Some(labels(&[("controller-uid", "abc")])),
            ..Default::default()
        };
        assert_eq!(pod_selector(&job(Some(selector))), "controller-uid=abc");
        assert_eq!(pod_selector(&job(None)), "job-name=collect-1");
    }

    #[test]
    fn test_select_pod_prefers_succeeded() {
        let pods = vec![
            pod("a", "Failed"),
            pod("b", "Succeeded"),
            pod("c", "Running"),
        ];
        let selected = select_pod(pods).unwrap();
        assert_eq!(selected.metadata.name.as_deref(), Some("b"));
        assert!(select_pod(Vec::new()).is_none());
    }

    #[tokio::test]
    async fn test_read_named_container() {
        let cluster = FakeCluster::new();
        let output = reader().read_to_string(&cluster, &job(None)).await.unwrap();
        assert_eq!(output, "collected output");
        assert_eq!(
            cluster.calls(),
            vec![
                Call::ListPods("job-name=collect-1".to_string()),
                Call::ContainerLogs("collector-pod".to_string(), "node-collector".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_waits_for_pod_to_appear() {
        let cluster = FakeCluster {
            empty_pod_lists: 2.into(),
            ..FakeCluster::new()
        };
        reader().read_to_string(&cluster, &job(None)).await.unwrap();
        let lookups = cluster
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::ListPods(_)))
            .count();
        assert_eq!(lookups, 3);
    }

    #[tokio::test]
    async fn test_pod_not_found() {
        let cluster = FakeCluster {
            pods: Vec::new(),
            ..FakeCluster::new()
        };
        let result = reader().read_to_string(&cluster, &job(None)).await;
        assert!(matches!(result, Err(LogsError::PodNotFound(..))));
        assert!(!cluster.calls().iter().any(|c| matches!(c, Call::ContainerLogs(..))));
    }

    #[tokio::test]
    async fn test_log_stream_error() {
        let cluster = FakeCluster {
            failing: vec!["container_logs"],
            ..FakeCluster::new()
        };
        let result = reader().read_to_string(&cluster, &job(None)).await;
        assert!(matches!(result, Err(LogsError::LogStream(pod, _)) if pod == "collector-pod"));
    }
}
