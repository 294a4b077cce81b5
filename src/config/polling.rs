use std::time::Duration;

use duration_string::DurationString;
use serde::{Deserialize, Deserializer};

/// How the completion runner polls job status.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PollingConfig {
    #[serde(
        deserialize_with = "deserialize_duration",
        default = "default_initial_wait"
    )]
    pub initial_wait: Duration,

    #[serde(
        deserialize_with = "deserialize_duration",
        default = "default_poll_interval"
    )]
    pub poll_interval: Duration,

    #[serde(
        deserialize_with = "deserialize_duration",
        default = "default_error_wait"
    )]
    pub error_wait: Duration,

    /// Consecutive status lookup failures tolerated before giving up.
    #[serde(default = "default_max_errors")]
    pub max_errors: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_wait: default_initial_wait(),
            poll_interval: default_poll_interval(),
            error_wait: default_error_wait(),
            max_errors: default_max_errors(),
        }
    }
}

/// Bounds the search for the pod a job created.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PodLookupConfig {
    #[serde(
        deserialize_with = "deserialize_duration",
        default = "default_pod_poll_interval"
    )]
    pub poll_interval: Duration,

    #[serde(
        deserialize_with = "deserialize_duration",
        default = "default_pod_max_wait"
    )]
    pub max_wait: Duration,
}

impl Default for PodLookupConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_pod_poll_interval(),
            max_wait: default_pod_max_wait(),
        }
    }
}

const fn default_initial_wait() -> Duration {
    Duration::from_secs(2)
}
const fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}
const fn default_error_wait() -> Duration {
    Duration::from_secs(5)
}
const fn default_max_errors() -> u64 {
    5
}
const fn default_pod_poll_interval() -> Duration {
    Duration::from_secs(1)
}
const fn default_pod_max_wait() -> Duration {
    Duration::from_secs(30)
}

pub(crate) fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    DurationString::deserialize(deserializer).map(Duration::from)
}

pub(crate) fn deserialize_optional_duration<'de, D>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<DurationString>::deserialize(deserializer).map(|d| d.map(Duration::from))
}
