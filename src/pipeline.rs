//! Stage orchestration
//!
//! The setup pipeline is a statically ordered stage list:
//! validate -> compile -> secrets -> render -> credentials. The canonical
//! secret store is loaded or generated exactly once per run and the
//! in-memory value is threaded into every downstream stage; no stage
//! re-invokes generation, which structurally rules out divergent secret
//! sets within a run.

use std::path::{Path, PathBuf};

use crate::checks;
use crate::compiler::{self, CompiledArtifacts};
use crate::error::{Result, StackError};
use crate::fsio::StoreLock;
use crate::render::{self, RenderedOutput};
use crate::schema::StackSchema;
use crate::secrets;
use crate::validation::ValidationReport;

/// Filesystem contract for one pipeline invocation
#[derive(Debug, Clone)]
pub struct Layout {
    /// Schema document path
    pub schema_path: PathBuf,
    /// Directory receiving compiled artifacts and rendered files
    pub output_dir: PathBuf,
    /// Directory holding canonical secret stores
    pub secrets_dir: PathBuf,
}

impl Layout {
    pub fn new(
        schema_path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        secrets_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            schema_path: schema_path.into(),
            output_dir: output_dir.into(),
            secrets_dir: secrets_dir.into(),
        }
    }

    /// Conventional layout rooted at one directory.
    pub fn rooted_at(root: &Path) -> Self {
        Self::new(
            root.join("stack.yaml"),
            root.join("generated"),
            root.join("secrets"),
        )
    }

    /// Base artifact path
    pub fn base_artifact_path(&self) -> PathBuf {
        self.output_dir.join("compose.base.yaml")
    }

    /// Per-environment overlay artifact path
    pub fn overlay_artifact_path(&self, env_name: &str) -> PathBuf {
        self.output_dir.join(format!("compose.{}.yaml", env_name))
    }

    /// Canonical secret store path for an environment
    pub fn secret_store_path(&self, env_name: &str) -> PathBuf {
        self.secrets_dir.join(format!("{}.secrets.json", env_name))
    }

    /// Rendered per-service configuration path
    pub fn service_env_path(&self, env_name: &str, service: &str) -> PathBuf {
        self.output_dir
            .join(env_name)
            .join("env")
            .join(format!("{}.env", service))
    }

    /// Combined legacy file path for older consumers
    pub fn combined_env_path(&self, env_name: &str) -> PathBuf {
        self.output_dir.join(env_name).join(".env")
    }
}

/// Everything one pipeline run produced
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Environment the run targeted
    pub environment: String,
    /// Compiled artifacts
    pub artifacts: CompiledArtifacts,
    /// Keys held by the canonical store used for the run
    pub secret_keys: Vec<String>,
    /// Rendered output
    pub rendered: RenderedOutput,
    /// Credential validation result
    pub validation: ValidationReport,
}

/// The setup pipeline for one schema and filesystem layout
pub struct Pipeline {
    schema: StackSchema,
    layout: Layout,
}

impl Pipeline {
    pub fn new(schema: StackSchema, layout: Layout) -> Self {
        Self { schema, layout }
    }

    /// Construct by loading the schema from the layout's schema path.
    pub fn load(layout: Layout) -> Result<Self> {
        let schema = StackSchema::load(&layout.schema_path)?;
        Ok(Self { schema, layout })
    }

    /// The schema this pipeline operates on
    pub fn schema(&self) -> &StackSchema {
        &self.schema
    }

    /// Validate the schema without producing any output.
    pub fn validate_schema(&self) -> Result<()> {
        self.schema.validate()
    }

    /// Run the full stage list for one environment.
    ///
    /// Returns `Ok` with the report even when credential validation found
    /// errors; callers must consult [`ValidationReport::is_deployable`]
    /// and block service startup whenever it is false.
    pub fn run(&self, env_name: &str) -> Result<PipelineReport> {
        self.run_strict(env_name, false)
    }

    /// Run with the strictness flag forced on.
    ///
    /// Holds the environment's store lock for the whole stage list. A
    /// destructive operation holds the same lock while it tears the
    /// environment down, so a run started mid-wipe fails before compiling
    /// and writes nothing.
    pub fn run_strict(&self, env_name: &str, strict: bool) -> Result<PipelineReport> {
        tracing::info!(environment = env_name, "pipeline starting");
        self.schema.validate()?;
        self.schema.environment(env_name)?;
        let lock = StoreLock::acquire(&self.layout.secret_store_path(env_name))?;
        let artifacts = compiler::compile(&self.schema, env_name, &self.layout)?;
        let store = secrets::load_or_generate_guarded(&self.schema, env_name, &self.layout, &lock)?;
        let rendered = render::render_environment(&self.schema, env_name, &store, &self.layout)?;
        let validation =
            checks::validate_credentials_guarded(&self.schema, env_name, strict, &self.layout, &lock)?;
        tracing::info!(
            environment = env_name,
            deployable = validation.is_deployable(),
            "pipeline finished"
        );
        Ok(PipelineReport {
            environment: env_name.to_string(),
            secret_keys: store.keys().into_iter().map(String::from).collect(),
            artifacts,
            rendered,
            validation,
        })
    }
}

/// Exit-code convention for the wrapper that fronts this library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// All stages succeeded and the environment is deployable
    Success = 0,
    /// Credential validation found blocking errors
    ValidationFailure = 1,
    /// Malformed or inconsistent schema
    SchemaError = 2,
    /// Operator cancelled a destructive operation
    Cancelled = 3,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Map a pipeline outcome to the wrapper's exit code. Failures outside
    /// the convention's schema/cancel categories count as validation
    /// failures: they also block deployment.
    pub fn from_outcome(outcome: &Result<PipelineReport>) -> Self {
        match outcome {
            Ok(report) if report.validation.is_deployable() => ExitCode::Success,
            Ok(_) => ExitCode::ValidationFailure,
            Err(StackError::Schema(_)) | Err(StackError::Parse(_)) => ExitCode::SchemaError,
            Err(StackError::Cancelled) => ExitCode::Cancelled,
            Err(_) => ExitCode::ValidationFailure,
        }
    }
}
