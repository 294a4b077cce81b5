use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(version, about = "Runs short-lived collection jobs on cluster nodes")]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub(crate) subcommand: SubCommands,

    #[clap(
        short,
        long,
        default_value = "/etc/node-collector/config.yaml",
        global = true
    )]
    pub(crate) config: PathBuf,
}

#[derive(Debug, Clone, Subcommand)]
pub(crate) enum SubCommands {
    /// Run a collection job on each node, print its output and tear it down
    Collect {
        #[clap(short, long = "node", required = true)]
        nodes: Vec<String>,

        #[clap(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// Submit a collection job without waiting for it
    Apply {
        #[clap(short, long)]
        node: String,

        /// Overrides the configured job name
        #[clap(long)]
        name: Option<String>,
    },

    /// Delete the collector namespace
    Cleanup {},
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}
