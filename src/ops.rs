//! Destructive operations orchestrator
//!
//! Wipes an environment's runtime state through an explicit finite-state
//! machine: `Idle -> AwaitingConfirmation -> (Cancelled | Executing) ->
//! Done`. Enumeration of affected resources is read-only and happens
//! before any prompt; deletion requires the exact typed confirmation
//! token, not a yes/no flag. Teardown runs in a fixed order and holds the
//! environment's store lock for its full duration, so no compile, render,
//! or validate can run against the environment mid-wipe.
//!
//! Container-runtime invocations go through the [`CommandRunner`] trait so
//! tests can substitute a scripted runner; every invocation carries a
//! timeout and raises a distinct timeout error rather than hanging.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{Result, StackError};
use crate::fsio::StoreLock;
use crate::pipeline::{Layout, Pipeline, PipelineReport};
use crate::schema::StackSchema;

/// The typed token an operator must supply before any deletion
pub const CONFIRMATION_TOKEN: &str = "DELETE";

/// Default deadline for a single runtime invocation
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Phases of a destructive operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WipePhase {
    Idle,
    AwaitingConfirmation,
    Cancelled,
    Executing,
    Done,
}

/// Read-only enumeration of the resources a wipe would remove
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WipePlan {
    /// Stack-namespaced containers
    pub containers: Vec<String>,
    /// Stack-named volumes
    pub volumes: Vec<String>,
    /// Stack networks
    pub networks: Vec<String>,
}

impl WipePlan {
    /// Total resource count
    pub fn len(&self) -> usize {
        self.containers.len() + self.volumes.len() + self.networks.len()
    }

    /// True when the wipe would remove nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Captured output of one runtime invocation
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Abstraction over the container runtime binary
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the runtime binary with `args`, bounded by `timeout`.
    async fn run(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput>;
}

/// Runner shelling out to docker (or podman)
pub struct DockerRunner {
    binary: String,
}

impl DockerRunner {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    /// Use another docker-compatible binary, e.g. podman.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for DockerRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for DockerRunner {
    async fn run(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let operation = format!("{} {}", self.binary, args.join(" "));
        tracing::debug!(command = %operation, "invoking container runtime");
        let future = tokio::process::Command::new(&self.binary)
            .args(args)
            .output();
        let output = tokio::time::timeout(timeout, future)
            .await
            .map_err(|_| StackError::Timeout {
                operation: operation.clone(),
                seconds: timeout.as_secs(),
            })?
            .map_err(|e| StackError::Command {
                command: operation.clone(),
                detail: e.to_string(),
            })?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
        })
    }
}

/// Counts of resources removed by a completed wipe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WipeReport {
    pub containers_removed: usize,
    pub volumes_removed: usize,
    pub networks_removed: usize,
}

/// The destructive-operations state machine for one stack/environment
pub struct WipeOrchestrator<'a, R: CommandRunner> {
    stack: String,
    env_name: String,
    runner: &'a R,
    layout: &'a Layout,
    timeout: Duration,
    phase: WipePhase,
    plan: Option<WipePlan>,
}

impl<'a, R: CommandRunner> WipeOrchestrator<'a, R> {
    pub fn new(schema: &StackSchema, env_name: &str, runner: &'a R, layout: &'a Layout) -> Self {
        Self {
            stack: schema.stack.clone(),
            env_name: env_name.to_string(),
            runner,
            layout,
            timeout: COMMAND_TIMEOUT,
            phase: WipePhase::Idle,
            plan: None,
        }
    }

    /// Current phase
    pub fn phase(&self) -> WipePhase {
        self.phase
    }

    fn expect_phase(&self, expected: WipePhase, operation: &str) -> Result<()> {
        if self.phase != expected {
            return Err(StackError::internal(format!(
                "{} is not legal in phase {:?}",
                operation, self.phase
            )));
        }
        Ok(())
    }

    /// Enumerate affected resources. Read-only; mutates nothing. Moves the
    /// machine from `Idle` to `AwaitingConfirmation`.
    pub async fn plan(&mut self) -> Result<&WipePlan> {
        self.expect_phase(WipePhase::Idle, "plan")?;
        let containers = self
            .query(&[
                "ps",
                "-a",
                "--filter",
                &format!("label=com.docker.compose.project={}", self.stack),
                "--format",
                "{{.Names}}",
            ])
            .await?;
        let volumes = self
            .query(&[
                "volume",
                "ls",
                "--filter",
                &format!("name={}_", self.stack),
                "--format",
                "{{.Name}}",
            ])
            .await?;
        let networks = self
            .query(&[
                "network",
                "ls",
                "--filter",
                &format!("name={}_", self.stack),
                "--format",
                "{{.Name}}",
            ])
            .await?;
        self.phase = WipePhase::AwaitingConfirmation;
        Ok(self.plan.insert(WipePlan {
            containers,
            volumes,
            networks,
        }))
    }

    /// Record the operator's response. Anything other than the exact
    /// confirmation token cancels the operation with zero resources
    /// touched.
    pub fn confirm(&mut self, token: &str) -> Result<()> {
        self.expect_phase(WipePhase::AwaitingConfirmation, "confirm")?;
        if token != CONFIRMATION_TOKEN {
            self.phase = WipePhase::Cancelled;
            tracing::info!(environment = %self.env_name, "wipe cancelled by operator");
            return Err(StackError::Cancelled);
        }
        self.phase = WipePhase::Executing;
        Ok(())
    }

    /// Execute the teardown in fixed order: stop and remove containers,
    /// remove volumes, remove networks, prune orphans. Holds the store
    /// lock for the whole duration.
    pub async fn execute(&mut self) -> Result<WipeReport> {
        self.expect_phase(WipePhase::Executing, "execute")?;
        let plan = self
            .plan
            .clone()
            .ok_or_else(|| StackError::internal("executing without a plan"))?;
        let _lock = StoreLock::acquire(&self.layout.secret_store_path(&self.env_name))?;
        tracing::warn!(
            environment = %self.env_name,
            containers = plan.containers.len(),
            volumes = plan.volumes.len(),
            networks = plan.networks.len(),
            "executing wipe"
        );

        let mut report = WipeReport::default();
        for name in &plan.containers {
            self.mutate(&["stop", name]).await?;
            self.mutate(&["rm", "-f", name]).await?;
            report.containers_removed += 1;
        }
        for name in &plan.volumes {
            self.mutate(&["volume", "rm", "-f", name]).await?;
            report.volumes_removed += 1;
        }
        for name in &plan.networks {
            self.mutate(&["network", "rm", name]).await?;
            report.networks_removed += 1;
        }
        self.mutate(&["container", "prune", "-f"]).await?;

        self.phase = WipePhase::Done;
        Ok(report)
    }

    async fn query(&self, args: &[&str]) -> Result<Vec<String>> {
        let output = self.runner.run(args, self.timeout).await?;
        if !output.success {
            return Err(StackError::Command {
                command: args.join(" "),
                detail: output.stderr,
            });
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn mutate(&self, args: &[&str]) -> Result<()> {
        let output = self.runner.run(args, self.timeout).await?;
        if !output.success {
            return Err(StackError::Command {
                command: args.join(" "),
                detail: output.stderr,
            });
        }
        Ok(())
    }
}

/// Reset: wipe followed unconditionally, once, by the full
/// compile -> secret-load -> render -> validate pipeline. Strictly
/// sequential, no retry loop, no re-entry into the wipe.
pub async fn reset<R: CommandRunner>(
    schema: &StackSchema,
    env_name: &str,
    token: &str,
    runner: &R,
    layout: &Layout,
) -> Result<(WipeReport, PipelineReport)> {
    let mut wipe = WipeOrchestrator::new(schema, env_name, runner, layout);
    wipe.plan().await?;
    wipe.confirm(token)?;
    let wipe_report = wipe.execute().await?;
    let pipeline_report = Pipeline::new(schema.clone(), layout.clone()).run(env_name)?;
    Ok((wipe_report, pipeline_report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted runner recording every invocation
    struct FakeRunner {
        calls: Mutex<Vec<String>>,
        /// stdout returned for query-style calls, keyed by first arg
        listings: fn(&[&str]) -> String,
    }

    impl FakeRunner {
        fn new(listings: fn(&[&str]) -> String) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                listings,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn mutating_calls(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|c| {
                    !c.starts_with("ps") && !c.contains(" ls ") && !c.ends_with(" ls")
                })
                .collect()
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, args: &[&str], _timeout: Duration) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(args.join(" "));
            Ok(CommandOutput {
                stdout: (self.listings)(args),
                stderr: String::new(),
                success: true,
            })
        }
    }

    fn one_of_each(args: &[&str]) -> String {
        match args[0] {
            "ps" => "acme-postgres-1\n".to_string(),
            "volume" if args[1] == "ls" => "acme_pgdata\n".to_string(),
            "network" if args[1] == "ls" => "acme_backend\n".to_string(),
            _ => String::new(),
        }
    }

    fn schema() -> StackSchema {
        StackSchema::parse_str(
            r#"
stack: acme
services:
  postgres:
    image: postgres:16
environments:
  development:
    services: [postgres]
"#,
        )
        .unwrap()
    }

    fn layout(temp: &TempDir) -> Layout {
        Layout::new(
            temp.path().join("stack.yaml"),
            temp.path().join("out"),
            temp.path().join("secrets"),
        )
    }

    #[tokio::test]
    async fn test_plan_is_read_only() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let runner = FakeRunner::new(one_of_each);
        let schema = schema();
        let mut wipe = WipeOrchestrator::new(&schema, "development", &runner, &layout);
        let plan = wipe.plan().await.unwrap();
        assert_eq!(plan.containers, vec!["acme-postgres-1"]);
        assert_eq!(plan.volumes, vec!["acme_pgdata"]);
        assert_eq!(plan.networks, vec!["acme_backend"]);
        assert_eq!(wipe.phase(), WipePhase::AwaitingConfirmation);
        assert!(runner.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_wipe_removes_nothing() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let runner = FakeRunner::new(one_of_each);
        let schema = schema();
        let mut wipe = WipeOrchestrator::new(&schema, "development", &runner, &layout);
        wipe.plan().await.unwrap();
        let err = wipe.confirm("no").unwrap_err();
        assert!(matches!(err, StackError::Cancelled));
        assert_eq!(wipe.phase(), WipePhase::Cancelled);
        assert!(runner.mutating_calls().is_empty());
        // Cancelled is terminal: execution is not legal
        assert!(wipe.execute().await.is_err());
    }

    #[tokio::test]
    async fn test_confirmed_wipe_runs_fixed_teardown_order() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let runner = FakeRunner::new(one_of_each);
        let schema = schema();
        let mut wipe = WipeOrchestrator::new(&schema, "development", &runner, &layout);
        wipe.plan().await.unwrap();
        wipe.confirm(CONFIRMATION_TOKEN).unwrap();
        let report = wipe.execute().await.unwrap();
        assert_eq!(report.containers_removed, 1);
        assert_eq!(report.volumes_removed, 1);
        assert_eq!(report.networks_removed, 1);
        assert_eq!(wipe.phase(), WipePhase::Done);

        let mutations = runner.mutating_calls();
        assert_eq!(
            mutations,
            vec![
                "stop acme-postgres-1",
                "rm -f acme-postgres-1",
                "volume rm -f acme_pgdata",
                "network rm acme_backend",
                "container prune -f",
            ]
        );
    }

    #[tokio::test]
    async fn test_confirm_before_plan_is_illegal() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let runner = FakeRunner::new(one_of_each);
        let schema = schema();
        let mut wipe = WipeOrchestrator::new(&schema, "development", &runner, &layout);
        assert!(wipe.confirm(CONFIRMATION_TOKEN).is_err());
        assert_eq!(wipe.phase(), WipePhase::Idle);
    }

    #[tokio::test]
    async fn test_reset_runs_pipeline_after_wipe() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let runner = FakeRunner::new(one_of_each);
        let schema = schema();
        let (wipe_report, pipeline_report) =
            reset(&schema, "development", CONFIRMATION_TOKEN, &runner, &layout)
                .await
                .unwrap();
        assert_eq!(wipe_report.containers_removed, 1);
        assert!(pipeline_report.validation.is_deployable());
        assert!(layout.base_artifact_path().exists());
    }

    #[tokio::test]
    async fn test_reset_with_wrong_token_cancels_before_pipeline() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let runner = FakeRunner::new(one_of_each);
        let schema = schema();
        let err = reset(&schema, "development", "yes", &runner, &layout)
            .await
            .unwrap_err();
        assert!(matches!(err, StackError::Cancelled));
        assert!(!layout.base_artifact_path().exists());
    }
}
