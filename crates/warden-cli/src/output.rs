use colored::Colorize;

use warden_cache::CacheStatsSnapshot;
use warden_engine::{MetricsSnapshot, PolicyReport, RunState, Stage};

use crate::cli::OutputFormat;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_reports(
    reports: &[PolicyReport],
    metrics: &MetricsSnapshot,
    cache: &CacheStatsSnapshot,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(reports)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(reports)?),
        OutputFormat::Summary => print_summary(reports, metrics, cache),
    }
    Ok(())
}

fn print_summary(reports: &[PolicyReport], metrics: &MetricsSnapshot, cache: &CacheStatsSnapshot) {
    for report in reports {
        match (&report.error, report.state) {
            (Some(error), _) => {
                print!(
                    "{} {} ({}) failed at {} [{}]: {}",
                    "✗".red(),
                    report.policy.bold(),
                    report.resource_type,
                    stage_name(error.stage),
                    error.error_kind,
                    error.message
                );
                if let Some(permission) = &error.permission {
                    print!(" (requires {permission})");
                }
                println!();
            }
            (None, RunState::Skipped) => {
                println!(
                    "{} {} ({}) skipped, conditions not met",
                    "-".yellow(),
                    report.policy.bold(),
                    report.resource_type
                );
            }
            _ => {
                let mark = if report.actions_clean() {
                    "✓".green()
                } else {
                    "!".yellow()
                };
                print!(
                    "{} {} ({}) matched {}",
                    mark,
                    report.policy.bold(),
                    report.resource_type,
                    report.matched
                );
                for action in &report.actions {
                    print!(
                        ", {} {}/{}",
                        action.action,
                        action.outcome.succeeded.len(),
                        action.outcome.succeeded.len() + action.outcome.failed.len()
                    );
                }
                println!();
                for action in &report.actions {
                    for failure in &action.outcome.failed {
                        println!(
                            "    {} {} on {} [{}]: {}",
                            "✗".red(),
                            action.action,
                            failure.id,
                            failure.error_kind,
                            failure.message
                        );
                    }
                }
            }
        }
    }
    println!(
        "{} enumerated, {} matched, {} action failures, {} policies failed, cache {}h/{}m",
        metrics.resources_enumerated,
        metrics.resources_matched,
        metrics.actions_failed,
        metrics.policies_failed,
        cache.hits,
        cache.misses
    );
}

fn stage_name(stage: Stage) -> &'static str {
    match stage {
        Stage::Validate => "validate",
        Stage::Enumerate => "enumerate",
        Stage::Filter => "filter",
        Stage::Act => "act",
    }
}
