use anyhow::Result;
use colored::Colorize;
use std::sync::Arc;

use warden_engine::{LogTransport, ResourcePlugin, ResourceRegistry, register_builtin};

use crate::cli::ReportFieldsArgs;
use crate::output::print_error;
use crate::{EXIT_CONFIG, EXIT_OK};

pub fn report_fields(args: &ReportFieldsArgs) -> Result<i32> {
    let registry = ResourceRegistry::new("resource");
    register_builtin(&registry, Arc::new(LogTransport))?;

    match &args.resource_type {
        Some(name) => {
            let Some(plugin) = registry.get(name) else {
                print_error(&format!("unknown resource type {name:?}"));
                return Ok(EXIT_CONFIG);
            };
            print_plugin(name, &plugin);
        }
        None => {
            for (name, plugin) in registry.snapshot() {
                print_plugin(&name, &plugin);
            }
        }
    }
    Ok(EXIT_OK)
}

fn print_plugin(name: &str, plugin: &ResourcePlugin) {
    println!("{}", name.cyan().bold());
    println!("  fields:  {}", plugin.descriptor.default_report_fields.join(", "));
    println!("  filters: {}", plugin.filters.names().join(", "));
    println!("  actions: {}", plugin.actions.names().join(", "));
}
