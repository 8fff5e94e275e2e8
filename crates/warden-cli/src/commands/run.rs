use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use warden_cache::{FileCache, MemoryCache, NoCache, SharedCache};
use warden_engine::{
    EngineMetrics, ExecutionConfig, LogTransport, ManagerTable, PolicyRunner, PolicySet,
    PolicyValidator, ResourceRegistry, register_builtin,
};
use warden_provider::ProviderSession;

use crate::cli::RunArgs;
use crate::load::{load_document, session_from_fixture};
use crate::output::{print_error, print_reports};
use crate::{EXIT_EXECUTION, EXIT_INTERRUPTED, EXIT_OK, EXIT_POLICY};

pub async fn run(args: &RunArgs) -> Result<i32> {
    let doc = load_document(&args.policies)?;
    let fixture = args
        .resources
        .as_deref()
        .map(load_document)
        .transpose()?;
    let session = Arc::new(session_from_fixture(
        &args.region,
        &args.account_id,
        fixture.as_ref(),
    )?);

    let registry = Arc::new(ResourceRegistry::new("resource"));
    register_builtin(&registry, Arc::new(LogTransport))?;
    registry.freeze();
    let validator = Arc::new(PolicyValidator::new(Arc::clone(&registry))?);

    if let Err(err) = validator.validate(&doc) {
        for violation in err.violations() {
            print_error(&format!("{}: {}", violation.path, violation.reason));
        }
        if err.violations().is_empty() {
            print_error(&err.to_string());
        }
        return Ok(EXIT_POLICY);
    }
    let set = PolicySet::from_value(&doc)?;

    let config = ExecutionConfig {
        batch_size: args.batch_size,
        workers: args.workers,
        deadline: args.deadline.map(Duration::from_secs),
        dry_run: args.dry_run,
        ..ExecutionConfig::default()
    };
    let cache = build_cache(args);
    let table = Arc::new(ManagerTable::new(
        registry,
        session as Arc<dyn ProviderSession>,
        Arc::clone(&cache),
        config,
    ));
    let runner = PolicyRunner::new(table, validator, Arc::new(EngineMetrics::new()));

    let reports = tokio::select! {
        reports = runner.run_set(&set) => reports,
        _ = tokio::signal::ctrl_c() => {
            print_error("interrupted");
            return Ok(EXIT_INTERRUPTED);
        }
    };

    print_reports(&reports, &runner.metrics().snapshot(), &cache.stats(), args.output)?;
    if reports.iter().any(|r| r.is_failure() || !r.actions_clean()) {
        Ok(EXIT_EXECUTION)
    } else {
        Ok(EXIT_OK)
    }
}

fn build_cache(args: &RunArgs) -> SharedCache {
    if args.cache_period == 0 {
        return Arc::new(NoCache::new());
    }
    let ttl = Duration::from_secs(args.cache_period * 60);
    match &args.cache_dir {
        Some(dir) => Arc::new(FileCache::new(dir).with_ttl(ttl)),
        None => Arc::new(MemoryCache::new().with_ttl(ttl)),
    }
}
