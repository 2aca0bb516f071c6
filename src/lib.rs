//! Stackforge
//!
//! A declarative deployment-configuration compiler and
//! credential-consistency validator. One schema document describing
//! services, environments, profiles, and healthcheck templates is compiled
//! into a base compose artifact plus per-environment overlays; credentials
//! are generated exactly once per environment with a cryptographically
//! secure source and persisted as one canonical store; per-service
//! configuration is rendered from the same canonical store; and a set of
//! independent checks guarantees that every generated artifact agrees with
//! every other one.
//!
//! ## Architecture
//!
//! 1. **Schema** (`schema`): typed, validated representation of the
//!    declarative document. Validation runs strictly before merge logic.
//!
//! 2. **Compiler** (`compiler`): deterministic emission of the base
//!    artifact and environment overlays, with key-wins environment-variable
//!    merging and healthcheck template expansion.
//!
//! 3. **Secrets** (`secrets`): once-per-environment credential generation,
//!    canonical JSON store with owner-only permissions, advisory locking,
//!    explicit rotation.
//!
//! 4. **Renderer** (`render`): strict single-pass substitution; unresolved
//!    references are hard failures, collected across services.
//!
//! 5. **Checks** (`validation`, `checks`): existence, strength,
//!    placeholder, cross-artifact consistency, renderability, and coverage
//!    checks under a per-environment strictness policy.
//!
//! 6. **Ops** (`ops`): destructive operations behind an explicit
//!    state machine with a typed confirmation token.
//!
//! 7. **Pipeline** (`pipeline`): the statically ordered stage list
//!    validate -> compile -> secrets -> render -> credentials, threading
//!    the in-memory secret store through every stage.
//!
//! ## Example
//!
//! ```rust,no_run
//! use stackforge::{Layout, Pipeline};
//!
//! fn main() -> stackforge::Result<()> {
//!     let layout = Layout::rooted_at(std::path::Path::new("/srv/acme"));
//!     let pipeline = Pipeline::load(layout)?;
//!     let report = pipeline.run("development")?;
//!     if !report.validation.is_deployable() {
//!         for finding in &report.validation.findings {
//!             eprintln!("[{}] {}: {}", finding.severity, finding.check, finding.message);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod checks;
pub mod compiler;
pub mod error;
pub mod fsio;
pub mod ops;
pub mod pipeline;
pub mod render;
pub mod schema;
pub mod secrets;
pub mod validation;

pub use checks::validate_credentials;
pub use compiler::{compile, merge_env_entries, CompiledArtifacts, ComposeArtifact};
pub use error::{Result, StackError, TemplateIssue};
pub use ops::{
    reset, CommandRunner, DockerRunner, WipeOrchestrator, WipePhase, WipePlan, WipeReport,
    CONFIRMATION_TOKEN,
};
pub use pipeline::{ExitCode, Layout, Pipeline, PipelineReport};
pub use render::{render_environment, RenderedOutput};
pub use schema::{
    EnvironmentDefinition, HealthCheckTemplate, SecretKind, SecretSpec, ServiceDefinition,
    StackSchema,
};
pub use secrets::{load_or_generate, rotate, SecretRecord, SecretStore};
pub use validation::{
    CheckKind, CredentialPolicy, Finding, Severity, StrictnessMode, StrictnessPolicy,
    ValidationReport,
};

/// Library version (from Cargo.toml)
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
