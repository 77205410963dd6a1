//! CLI command implementations.
//!
//! Commands return `anyhow::Result<i32>`: errors propagate with `?` and
//! are mapped to the exit-code contract exactly once, in `main`.

pub mod audit;
pub mod config_cmd;
pub mod inspect;
pub mod render;
pub mod run;
pub mod scan;

use crate::exit_codes;
use bugpack_core::BundleError;

/// Map a bundle error to the CLI exit code contract.
fn exit_code_for(error: &BundleError) -> i32 {
    match error {
        BundleError::NotFound(_) => exit_codes::BUNDLE_NOT_FOUND,
        BundleError::Corrupt(_)
        | BundleError::Parse { .. }
        | BundleError::Schema(_)
        | BundleError::Integrity
        | BundleError::UnsupportedVersion(_)
        | BundleError::Security(_) => exit_codes::VALIDATION_FAILED,
        _ => exit_codes::GENERAL_ERROR,
    }
}

/// Map a propagated CLI error to an exit code, looking through any
/// context layers for a typed bundle error.
pub fn exit_code_for_error(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<BundleError>() {
        Some(bundle_error) => exit_code_for(bundle_error),
        None => exit_codes::GENERAL_ERROR,
    }
}
