use std::collections::{BTreeMap, BTreeSet};

use self::cancellation::Cancellation;
use self::cli::{Cli, OutputFormat, SubCommands};
use self::cluster::KubeCluster;
use self::collector::{CollectError, Collector};
use self::error::report_span_trace;
use self::kubernetes_objects::template::{TemplateError, TemplateRegistry};
use clap::Parser;
use futures::{StreamExt, stream};
use thiserror::Error;
use tracing::{error, info};
use tracing_error::ExtractSpanTrace;
use tracing_error::SpanTrace;

pub mod cancellation;
pub(crate) mod cli;
pub mod cluster;
pub mod collector;
pub mod config;
pub mod error;
pub mod kubernetes_objects;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to load config.\n{0}")]
    ConfigError(#[from] config::ConfigLoadError),

    #[error("Failed to load job templates.\n{0}")]
    TemplateError(#[from] TemplateError),

    #[error("Failed to initialize kubernetes client.\n{0}")]
    KubeClientError(#[from] kube::Error),

    #[error("Collection stopped due to following error:\n{0}")]
    CollectError(#[from] CollectError),

    #[error("Collection failed on {0} of {1} nodes")]
    PartialCollectError(usize, usize),

    #[error("Failed to encode output.\n{0}")]
    OutputError(#[from] serde_json::Error),
}

impl ExtractSpanTrace for AppError {
    fn span_trace(&self) -> Option<&SpanTrace> {
        match self {
            AppError::CollectError(e) => e.span_trace(),
            _ => None,
        }
    }
}

pub async fn app() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = config::Config::new_from_file(&cli.config).await?;

    info!("Config Loaded.");

    let templates = match &config.template_dir {
        Some(dir) => TemplateRegistry::load_dir(dir).await?,
        None => TemplateRegistry::default(),
    };

    let client = kube::Client::try_default().await?;

    info!("Kubernetes Client Initialized.");

    let cluster = KubeCluster::new(client);

    match cli.subcommand {
        SubCommands::Collect { nodes, output } => {
            let collector = Collector::new(cluster, config.collector, templates)
                .with_cancellation(Cancellation::from_signals());
            collect(&collector, nodes, config.concurrency, output).await?;
        }
        SubCommands::Apply { node, name } => {
            let collector_config = match name {
                Some(name) => config.collector.with_name(name),
                None => config.collector,
            };
            let collector = Collector::new(cluster, collector_config, templates);
            let job = collector.apply(&node).await?;
            println!("{}", job.metadata.name.unwrap_or_default());
        }
        SubCommands::Cleanup {} => {
            let collector = Collector::new(cluster, config.collector, templates);
            collector.cleanup().await;
        }
    }

    Ok(())
}

async fn collect(
    collector: &Collector<KubeCluster>,
    nodes: Vec<String>,
    concurrency: usize,
    format: OutputFormat,
) -> Result<(), AppError> {
    let nodes: BTreeSet<String> = nodes.into_iter().collect();
    let total = nodes.len();
    let results: BTreeMap<String, Result<String, CollectError>> = stream::iter(nodes)
        .map(|node| async move {
            let result = collector.apply_and_collect(&node).await;
            (node, result)
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let mut outputs = BTreeMap::new();
    for (node, result) in results {
        match result {
            Ok(output) => {
                outputs.insert(node, output);
            }
            Err(e) => {
                error!("Collection on node '{}' failed: {}", node, e);
                report_span_trace(&e);
            }
        }
    }
    let failed = total - outputs.len();

    match format {
        OutputFormat::Text => {
            for (node, output) in &outputs {
                if total > 1 {
                    println!("=== {node} ===");
                }
                print!("{output}");
            }
        }
        OutputFormat::Json => {
            // Node collector output is usually JSON already; keep anything else as a string.
            let encoded: BTreeMap<String, serde_json::Value> = outputs
                .into_iter()
                .map(|(node, output)| {
                    let value = serde_json::from_str(&output)
                        .unwrap_or(serde_json::Value::String(output));
                    (node, value)
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&encoded)?);
        }
    }

    if failed > 0 {
        return Err(AppError::PartialCollectError(failed, total));
    }
    Ok(())
}
