//! Compose compiler
//!
//! Compiles the validated schema into one base artifact plus an
//! environment-specific overlay artifact, following a layered-configuration
//! model: the external orchestrator applies the overlay on top of the base.
//!
//! Compilation is deterministic: the same schema and environment produce
//! byte-identical artifacts. All writes go through a temporary path and are
//! renamed into place only on full success.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::error::{Result, StackError};
use crate::fsio;
use crate::pipeline::Layout;
use crate::schema::{
    split_env_entry, HealthCheckTemplate, ResourceLimits, ServiceDefinition, StackSchema,
};

/// A compose document, base or overlay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeArtifact {
    /// Project name
    pub name: String,
    /// Services keyed by name
    pub services: BTreeMap<String, ComposeService>,
    /// Stack networks
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, ComposeNetwork>,
    /// Named volumes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, ComposeVolume>,
}

/// One service block within a compose document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<ComposeHealthcheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeployBlock>,
}

/// Concrete probe block, expanded from a healthcheck template reference
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComposeHealthcheck {
    pub test: Vec<String>,
    pub interval: String,
    pub timeout: String,
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_period: Option<String>,
}

impl From<&HealthCheckTemplate> for ComposeHealthcheck {
    fn from(t: &HealthCheckTemplate) -> Self {
        Self {
            test: t.test.clone(),
            interval: t.interval.clone(),
            timeout: t.timeout.clone(),
            retries: t.retries,
            start_period: t.start_period.clone(),
        }
    }
}

/// Deploy block carried only by overlays
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<DeployResources>,
}

/// Resource limits wrapper matching the compose deploy schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployResources {
    pub limits: ResourceLimits,
}

/// Network block; external stack networks carry only a driver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeNetwork {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
}

/// Named volume block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeVolume {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
}

/// Output of a successful compilation
#[derive(Debug, Clone)]
pub struct CompiledArtifacts {
    /// Resolved service set for the environment
    pub services: Vec<String>,
    /// Base artifact as written
    pub base: ComposeArtifact,
    /// Overlay artifact as written
    pub overlay: ComposeArtifact,
    /// Path of the base artifact
    pub base_path: PathBuf,
    /// Path of the overlay artifact
    pub overlay_path: PathBuf,
}

/// Merge override KEY=VALUE entries onto base entries.
///
/// Later value for a given key overrides, but the original first-seen key
/// ordering is preserved; new keys append in override order.
pub fn merge_env_entries(base: &[String], overrides: &[String]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut values: BTreeMap<String, String> = BTreeMap::new();
    for entry in base.iter().chain(overrides.iter()) {
        if let Some((key, value)) = split_env_entry(entry) {
            if !values.contains_key(key) {
                order.push(key.to_string());
            }
            values.insert(key.to_string(), value.to_string());
        }
    }
    order
        .into_iter()
        .map(|k| {
            let v = &values[&k];
            format!("{}={}", k, v)
        })
        .collect()
}

/// Compile the schema for one environment.
///
/// Validates the schema, resolves the environment's service set, merges
/// override deltas, expands healthcheck templates, checks that every
/// inter-service reference resolves within the combined artifact set, and
/// only then writes the base and overlay artifacts atomically.
pub fn compile(
    schema: &StackSchema,
    env_name: &str,
    layout: &Layout,
) -> Result<CompiledArtifacts> {
    schema.validate()?;
    let env = schema.environment(env_name)?;
    let resolved = schema.resolve_services(env_name)?;
    if resolved.is_empty() {
        return Err(StackError::schema(format!(
            "environment '{}' resolves to zero services",
            env_name
        )));
    }
    tracing::info!(
        environment = env_name,
        services = resolved.len(),
        "compiling artifacts"
    );

    // Inter-service references must resolve within the combined set
    let resolved_set: BTreeSet<&str> = resolved.iter().map(String::as_str).collect();
    for name in &resolved {
        for dep in &schema.services[name].depends_on {
            if !resolved_set.contains(dep.as_str()) {
                return Err(StackError::schema(format!(
                    "service '{}' depends on '{}', which is not part of environment '{}'",
                    name, dep, env_name
                )));
            }
        }
    }

    let mut base_services = BTreeMap::new();
    let mut overlay_services = BTreeMap::new();
    let mut named_volumes = BTreeMap::new();

    let mut override_entries = env.overrides.environment.clone();
    if let Some(debug) = env.overrides.debug {
        override_entries.push(format!("DEBUG={}", debug));
    }
    if let Some(level) = &env.overrides.log_level {
        override_entries.push(format!("LOG_LEVEL={}", level));
    }

    for name in &resolved {
        let service = &schema.services[name];
        base_services.insert(name.clone(), base_service_block(schema, service)?);
        for vol in &service.volumes {
            if let Some((volume_name, _)) = vol.split_once(':') {
                if !volume_name.starts_with('/') && !volume_name.starts_with('.') {
                    named_volumes.insert(volume_name.to_string(), ComposeVolume::default());
                }
            }
        }

        let merged_env = merge_env_entries(&service.environment, &override_entries);
        let replicas = env.overrides.replicas.get(name).copied();
        let resources = env.overrides.resources.clone();
        let deploy = if replicas.is_some() || resources.is_some() {
            Some(DeployBlock {
                replicas,
                resources: resources.map(|limits| DeployResources { limits }),
            })
        } else {
            None
        };
        overlay_services.insert(
            name.clone(),
            ComposeService {
                environment: merged_env,
                deploy,
                ..Default::default()
            },
        );
    }

    let networks: BTreeMap<String, ComposeNetwork> = schema
        .networks
        .iter()
        .map(|n| (n.clone(), ComposeNetwork::default()))
        .collect();

    let base = ComposeArtifact {
        name: schema.stack.clone(),
        services: base_services,
        networks,
        volumes: named_volumes,
    };
    let overlay = ComposeArtifact {
        name: schema.stack.clone(),
        services: overlay_services,
        networks: BTreeMap::new(),
        volumes: BTreeMap::new(),
    };

    // Serialize both documents before touching the filesystem so a failure
    // at any step leaves no partial output.
    let base_text = serde_yaml::to_string(&base)?;
    let overlay_text = serde_yaml::to_string(&overlay)?;

    let base_path = layout.base_artifact_path();
    let overlay_path = layout.overlay_artifact_path(env_name);
    fsio::write_atomic(&base_path, &base_text)?;
    fsio::write_atomic(&overlay_path, &overlay_text)?;
    tracing::info!(
        base = %base_path.display(),
        overlay = %overlay_path.display(),
        "artifacts written"
    );

    Ok(CompiledArtifacts {
        services: resolved,
        base,
        overlay,
        base_path,
        overlay_path,
    })
}

fn base_service_block(schema: &StackSchema, service: &ServiceDefinition) -> Result<ComposeService> {
    let healthcheck = match &service.healthcheck {
        Some(name) => {
            let template = schema.healthchecks.get(name).ok_or_else(|| {
                StackError::schema(format!("unknown healthcheck template '{}'", name))
            })?;
            Some(ComposeHealthcheck::from(template))
        }
        None => None,
    };
    Ok(ComposeService {
        image: Some(service.image.clone()),
        ports: service.ports.clone(),
        environment: service.environment.clone(),
        volumes: service.volumes.clone(),
        depends_on: service.depends_on.clone(),
        healthcheck,
        networks: schema.networks.clone(),
        deploy: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn schema() -> StackSchema {
        StackSchema::parse_str(
            r#"
stack: acme
networks: [backend]
profiles: [core]
healthchecks:
  standard:
    test: ["CMD-SHELL", "pg_isready -U app"]
    interval: 10s
    timeout: 5s
    retries: 3
secrets:
  POSTGRES_PASSWORD: { kind: password }
services:
  postgres:
    image: postgres:16
    environment:
      - POSTGRES_USER=app
      - POSTGRES_PASSWORD=${POSTGRES_PASSWORD}
    volumes: ["pgdata:/var/lib/postgresql/data"]
    healthcheck: standard
    profiles: [core]
  redis:
    image: redis:7
    profiles: [core]
    depends_on: [postgres]
environments:
  development:
    services: [postgres, redis]
    profiles: [core]
    overrides:
      debug: true
      log_level: debug
      environment: [POSTGRES_USER=dev]
      replicas: { redis: 2 }
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

    #[test]
    fn test_merge_env_entries_key_wins_preserving_order() {
        let base = vec!["A=1".to_string(), "B=2".to_string()];
        let overrides = vec!["B=3".to_string(), "C=4".to_string()];
        assert_eq!(merge_env_entries(&base, &overrides), vec!["A=1", "B=3", "C=4"]);
    }

    #[test]
    fn test_clean_compile_two_services() {
        let temp = TempDir::new().unwrap();
        let artifacts = compile(&schema(), "development", &layout(&temp)).unwrap();
        assert_eq!(artifacts.base.services.len(), 2);
        assert!(artifacts.base_path.exists());
        assert!(artifacts.overlay_path.exists());
    }

    #[test]
    fn test_healthcheck_template_expanded() {
        let temp = TempDir::new().unwrap();
        let artifacts = compile(&schema(), "development", &layout(&temp)).unwrap();
        let hc = artifacts.base.services["postgres"]
            .healthcheck
            .as_ref()
            .unwrap();
        assert_eq!(hc.retries, 3);
        assert_eq!(hc.interval, "10s");
    }

    #[test]
    fn test_overlay_carries_merged_environment_and_deploy() {
        let temp = TempDir::new().unwrap();
        let artifacts = compile(&schema(), "development", &layout(&temp)).unwrap();
        let pg = &artifacts.overlay.services["postgres"];
        assert_eq!(
            pg.environment,
            vec![
                "POSTGRES_USER=dev",
                "POSTGRES_PASSWORD=${POSTGRES_PASSWORD}",
                "DEBUG=true",
                "LOG_LEVEL=debug"
            ]
        );
        let redis = &artifacts.overlay.services["redis"];
        assert_eq!(redis.deploy.as_ref().unwrap().replicas, Some(2));
    }

    #[test]
    fn test_idempotent_compilation() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        compile(&schema(), "development", &layout).unwrap();
        let first = std::fs::read_to_string(layout.base_artifact_path()).unwrap();
        compile(&schema(), "development", &layout).unwrap();
        let second = std::fs::read_to_string(layout.base_artifact_path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_dangling_reference_writes_nothing() {
        let mut s = schema();
        s.environments
            .get_mut("development")
            .unwrap()
            .services
            .push("ghost".to_string());
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let err = compile(&s, "development", &layout).unwrap_err();
        assert!(matches!(err, StackError::Schema(_)));
        assert!(!layout.base_artifact_path().exists());
        assert!(!layout.overlay_artifact_path("development").exists());
    }

    #[test]
    fn test_depends_on_outside_environment_rejected() {
        let mut s = schema();
        // Strip postgres from the environment but keep redis -> postgres
        let env = s.environments.get_mut("development").unwrap();
        env.services = vec!["redis".to_string()];
        env.profiles.clear();
        s.services.get_mut("postgres").unwrap().profiles.clear();
        s.services.get_mut("redis").unwrap().profiles.clear();
        let temp = TempDir::new().unwrap();
        let err = compile(&s, "development", &layout(&temp)).unwrap_err();
        assert!(err.to_string().contains("depends on"));
    }
}
