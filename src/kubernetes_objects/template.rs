use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};

use super::NODE_COLLECTOR_NAME;

const BUILTIN_NODE_COLLECTOR: &str = include_str!("templates/node-collector.yaml");

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Job template '{0}' not found")]
    NotFound(String),

    #[error("Job template '{0}' is empty")]
    Empty(String),

    #[error("Failed to read job template directory '{0}': {1}")]
    ReadDir(PathBuf, #[source] std::io::Error),

    #[error("Failed to read job template '{0}': {1}")]
    ReadFile(PathBuf, #[source] std::io::Error),
}

/// Named job manifests, resolved by string identifier.
///
/// Holds the raw YAML only; decoding into a `Job` happens in the job builder.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, String>,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        let mut templates = BTreeMap::new();
        templates.insert(
            NODE_COLLECTOR_NAME.to_string(),
            BUILTIN_NODE_COLLECTOR.to_string(),
        );
        TemplateRegistry { templates }
    }
}

impl TemplateRegistry {
    pub fn empty() -> Self {
        TemplateRegistry {
            templates: BTreeMap::new(),
        }
    }

    /// Registers a template, replacing any previous one with the same name.
    pub fn insert(&mut self, name: impl Into<String>, manifest: impl Into<String>) {
        self.templates.insert(name.into(), manifest.into());
    }

    pub fn get(&self, name: &str) -> Result<&str, TemplateError> {
        let manifest = self
            .templates
            .get(name)
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;
        if manifest.trim().is_empty() {
            return Err(TemplateError::Empty(name.to_string()));
        }
        Ok(manifest)
    }

    /// Adds every `<name>.yaml` / `<name>.yml` file of `dir` on top of the built-in templates.
    #[instrument("template_registry/load_dir", skip_all, fields(template_dir = %dir.display()))]
    pub async fn load_dir(dir: &Path) -> Result<Self, TemplateError> {
        let mut registry = TemplateRegistry::default();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| TemplateError::ReadDir(dir.to_path_buf(), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| TemplateError::ReadDir(dir.to_path_buf(), e))?
        {
            let path = entry.path();
            let is_yaml = matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("yaml") | Some("yml")
            );
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if !is_yaml {
                continue;
            }
            let manifest = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| TemplateError::ReadFile(path.clone(), e))?;
            debug!("Loaded job template '{}' from '{}'.", name, path.display());
            registry.insert(name, manifest);
        }

        Ok(registry)
    }
}
