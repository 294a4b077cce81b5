pub mod polling;
mod raw;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::instrument;

use self::raw::RawConfig;
pub use self::raw::ConfigParseError;
use crate::collector::CollectorConfig;

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("Failed to read config file '{0}': {1}")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(#[from] ConfigParseError),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub collector: CollectorConfig,
    /// Extra job templates, one `<name>.yaml` per template
    pub template_dir: Option<PathBuf>,
    pub concurrency: usize,
}

impl Config {
    #[instrument("config/new_from_file", skip_all, fields(config_path = %path.display()))]
    pub async fn new_from_file(path: &Path) -> Result<Self, ConfigLoadError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigLoadError::Read(path.to_path_buf(), e))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigLoadError> {
        let raw: RawConfig = serde_yaml::from_str(content)?;
        Ok(Config::try_from(raw)?)
    }
}
