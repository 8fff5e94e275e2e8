mod cli;
mod commands;
mod load;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

pub const EXIT_OK: i32 = 0;
/// The policy document failed validation.
pub const EXIT_POLICY: i32 = 1;
/// The run completed with policy or action failures.
pub const EXIT_EXECUTION: i32 = 2;
/// Bad invocation, unreadable files, broken configuration.
pub const EXIT_CONFIG: i32 = 3;
pub const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    let result = match &cli.command {
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Validate(args) => commands::validate::validate(args),
        Commands::ReportFields(args) => commands::fields::report_fields(args),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            output::print_error(&format!("{e:#}"));
            std::process::exit(EXIT_CONFIG);
        }
    }
}

fn init_tracing(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
}
