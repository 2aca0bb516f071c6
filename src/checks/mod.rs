//! Credential checks
//!
//! Each check is independent and individually reportable: one validation
//! invocation runs all of them and aggregates their findings, so a single
//! run reports every problem at once. Severity is resolved through the
//! environment's strictness policy; cross-artifact consistency is an error
//! in every environment.

pub mod consistency;
pub mod coverage;
pub mod existence;
pub mod placeholder;
pub mod renderability;
pub mod strength;

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::Result;
use crate::fsio::StoreLock;
use crate::pipeline::Layout;
use crate::render;
use crate::schema::StackSchema;
use crate::secrets::SecretStore;
use crate::validation::{StrictnessPolicy, ValidationReport};

/// Read-only context shared by every check
pub struct CheckContext<'a> {
    /// The validated schema
    pub schema: &'a StackSchema,
    /// Environment under validation
    pub env_name: &'a str,
    /// Canonical store, when it exists on disk
    pub store: Option<SecretStore>,
    /// Parsed combined rendered file, when it exists on disk
    pub rendered: Option<BTreeMap<String, String>>,
    /// Canonical store path
    pub store_path: PathBuf,
    /// Combined rendered file path
    pub rendered_path: PathBuf,
    /// Resolved strictness policy
    pub policy: StrictnessPolicy,
}

/// Trait for credential checks
pub trait CredentialCheck {
    /// Which check this is
    fn kind(&self) -> crate::validation::CheckKind;

    /// Apply this check, adding findings to the report
    fn run(&self, ctx: &CheckContext<'_>, report: &mut ValidationReport);
}

/// The full check set, in reporting order.
pub fn all_checks() -> Vec<Box<dyn CredentialCheck>> {
    vec![
        Box::new(existence::ExistenceCheck),
        Box::new(strength::StrengthCheck),
        Box::new(placeholder::PlaceholderCheck),
        Box::new(consistency::ConsistencyCheck),
        Box::new(renderability::RenderabilityCheck),
        Box::new(coverage::CoverageCheck),
    ]
}

/// Validate the credentials of one environment.
///
/// Reads the canonical store and the rendered combined file from disk
/// (read-only; nothing is generated here), runs every check, and returns
/// the aggregate report. Callers must block deployment whenever the report
/// carries any error, in any environment.
///
/// Contends on the environment's store lock first, so validation never
/// reads a store that a destructive operation is tearing down.
pub fn validate_credentials(
    schema: &StackSchema,
    env_name: &str,
    strict: bool,
    layout: &Layout,
) -> Result<ValidationReport> {
    let lock = StoreLock::acquire(&layout.secret_store_path(env_name))?;
    validate_credentials_guarded(schema, env_name, strict, layout, &lock)
}

/// Lock-free variant for callers that already hold the store lock.
pub(crate) fn validate_credentials_guarded(
    schema: &StackSchema,
    env_name: &str,
    strict: bool,
    layout: &Layout,
    _lock: &StoreLock,
) -> Result<ValidationReport> {
    schema.environment(env_name)?;
    let policy = StrictnessPolicy::for_environment(env_name, strict);
    let store_path = layout.secret_store_path(env_name);
    let rendered_path = layout.combined_env_path(env_name);

    let store = SecretStore::load(&store_path)?;
    let rendered = if rendered_path.exists() {
        let text = std::fs::read_to_string(&rendered_path)?;
        Some(render::parse_env_file(&text))
    } else {
        None
    };

    let ctx = CheckContext {
        schema,
        env_name,
        store,
        rendered,
        store_path,
        rendered_path,
        policy,
    };

    let mut report = ValidationReport::new(env_name);
    for check in all_checks() {
        check.run(&ctx, &mut report);
    }
    tracing::info!(
        environment = env_name,
        errors = report.errors().len(),
        warnings = report.warnings().len(),
        "credential validation finished"
    );
    Ok(report)
}
