use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Policy engine for cloud resource governance")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log filter directive
    #[arg(long, global = true, env = "WARDEN_LOG", default_value = "warn")]
    pub log: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate and execute a policy file
    Run(RunArgs),
    /// Validate a policy file without executing it
    Validate(ValidateArgs),
    /// Show the report fields of registered resource types
    ReportFields(ReportFieldsArgs),
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Summary,
    Json,
    Yaml,
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// Policy file (YAML or JSON)
    pub policies: PathBuf,

    /// Resource fixture file feeding the provider session
    #[arg(long)]
    pub resources: Option<PathBuf>,

    /// Region the session reports
    #[arg(long, env = "WARDEN_REGION", default_value = "us-east-1")]
    pub region: String,

    /// Account id the session reports
    #[arg(long, env = "WARDEN_ACCOUNT", default_value = "000000000000")]
    pub account_id: String,

    /// Report what actions would do without touching the provider
    #[arg(long)]
    pub dry_run: bool,

    /// Directory for the on-disk resource cache
    #[arg(long, env = "WARDEN_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Cache TTL in minutes; 0 disables caching
    #[arg(long, default_value_t = 15)]
    pub cache_period: u64,

    /// Worker pool size for action batches
    #[arg(long, default_value_t = 3)]
    pub workers: usize,

    /// Upper bound on per-batch resource count
    #[arg(long, default_value_t = 20)]
    pub batch_size: usize,

    /// Overall per-policy deadline in seconds
    #[arg(long)]
    pub deadline: Option<u64>,

    /// Output format for the run report
    #[arg(short, long, default_value = "summary")]
    pub output: OutputFormat,
}

#[derive(clap::Args)]
pub struct ValidateArgs {
    /// Policy file (YAML or JSON)
    pub policies: PathBuf,
}

#[derive(clap::Args)]
pub struct ReportFieldsArgs {
    /// Limit to one resource type
    pub resource_type: Option<String>,
}
