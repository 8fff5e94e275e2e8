use anyhow::Result;
use std::sync::Arc;

use warden_engine::{LogTransport, PolicyValidator, ResourceRegistry, register_builtin};

use crate::cli::ValidateArgs;
use crate::load::load_document;
use crate::output::{print_error, print_success};
use crate::{EXIT_OK, EXIT_POLICY};

pub fn validate(args: &ValidateArgs) -> Result<i32> {
    let doc = load_document(&args.policies)?;

    let registry = Arc::new(ResourceRegistry::new("resource"));
    register_builtin(&registry, Arc::new(LogTransport))?;
    registry.freeze();
    let validator = PolicyValidator::new(registry)?;

    match validator.validate(&doc) {
        Ok(()) => {
            print_success(&format!("{} is valid", args.policies.display()));
            Ok(EXIT_OK)
        }
        Err(err) => {
            for violation in err.violations() {
                print_error(&format!("{}: {}", violation.path, violation.reason));
            }
            if err.violations().is_empty() {
                print_error(&err.to_string());
            }
            Ok(EXIT_POLICY)
        }
    }
}
