//! Typed schema model for the deployment stack
//!
//! The schema is a single declarative YAML document describing services,
//! environments, profiles, healthcheck templates, declared secrets, and
//! stack-level networks. It is parsed into a strongly-typed representation
//! and validated strictly before any merge or emission logic runs, so
//! malformed input is rejected before merge semantics execute.
//!
//! Schema entities are authored once and read-only at compile time.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use crate::error::{Result, StackError};

/// The single declarative document describing the whole stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackSchema {
    /// Schema document version
    #[serde(default = "default_version")]
    pub version: String,
    /// Stack name, used to namespace containers/volumes/networks
    pub stack: String,
    /// Stack-level networks
    #[serde(default)]
    pub networks: Vec<String>,
    /// Declared profile tags
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Named reusable healthcheck probes
    #[serde(default)]
    pub healthchecks: BTreeMap<String, HealthCheckTemplate>,
    /// Schema-mandated secret keys and how to generate them
    #[serde(default)]
    pub secrets: BTreeMap<String, SecretSpec>,
    /// Service definitions, keyed by globally unique name
    pub services: BTreeMap<String, ServiceDefinition>,
    /// Environment definitions
    pub environments: BTreeMap<String, EnvironmentDefinition>,
}

fn default_version() -> String {
    "1".to_string()
}

/// A single service definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Service category (database, cache, application, ...)
    #[serde(default)]
    pub category: Option<String>,
    /// Image reference
    pub image: String,
    /// Port bindings, "host:container"
    #[serde(default)]
    pub ports: Vec<String>,
    /// Ordered KEY=VALUE environment entries; values may reference
    /// declared secrets as ${KEY}
    #[serde(default)]
    pub environment: Vec<String>,
    /// Required named volumes, "volume:/mount/path"
    #[serde(default)]
    pub volumes: Vec<String>,
    /// Healthcheck template reference
    #[serde(default)]
    pub healthcheck: Option<String>,
    /// Profile tags controlling conditional inclusion
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Services this one depends on
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Optional per-service configuration template rendered against the
    /// canonical secret store; when absent an env-file body is synthesized
    #[serde(default)]
    pub config_template: Option<String>,
}

/// Named reusable healthcheck probe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheckTemplate {
    /// Probe command, exec form
    pub test: Vec<String>,
    /// Interval between probes
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Per-probe timeout
    #[serde(default = "default_timeout")]
    pub timeout: String,
    /// Consecutive failures before a container is marked unhealthy
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Grace period before probing begins
    #[serde(default)]
    pub start_period: Option<String>,
}

fn default_interval() -> String {
    "30s".to_string()
}

fn default_timeout() -> String {
    "10s".to_string()
}

fn default_retries() -> u32 {
    3
}

/// What kind of credential a declared secret key holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretKind {
    /// Mixed-class password, 16-128 characters
    Password,
    /// Alphanumeric key, 32-128 characters
    Token,
}

/// Declaration of a schema-mandated secret key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretSpec {
    /// Credential kind
    #[serde(default = "default_secret_kind")]
    pub kind: SecretKind,
    /// Requested length; defaulted per kind when absent
    #[serde(default)]
    pub length: Option<usize>,
}

fn default_secret_kind() -> SecretKind {
    SecretKind::Password
}

impl Default for SecretSpec {
    fn default() -> Self {
        Self {
            kind: SecretKind::Password,
            length: None,
        }
    }
}

/// A single environment definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentDefinition {
    /// Explicitly included services
    #[serde(default)]
    pub services: Vec<String>,
    /// Active profile tags; services whose profiles intersect these are
    /// included in addition to the explicit list
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Override deltas applied on top of base service definitions
    #[serde(default)]
    pub overrides: OverrideDelta,
}

/// Environment-specific override deltas
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverrideDelta {
    /// Debug flag surfaced to services
    #[serde(default)]
    pub debug: Option<bool>,
    /// Log level surfaced to services
    #[serde(default)]
    pub log_level: Option<String>,
    /// KEY=VALUE entries merged key-wins onto base service environments
    #[serde(default)]
    pub environment: Vec<String>,
    /// Per-service replica counts
    #[serde(default)]
    pub replicas: BTreeMap<String, u32>,
    /// Resource limits applied to every service in the environment
    #[serde(default)]
    pub resources: Option<ResourceLimits>,
}

/// Resource limits for the overlay deploy block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceLimits {
    /// CPU limit, e.g. "0.50"
    #[serde(default)]
    pub cpus: Option<String>,
    /// Memory limit, e.g. "512m"
    #[serde(default)]
    pub memory: Option<String>,
}

/// Split a KEY=VALUE entry; returns None when malformed.
pub fn split_env_entry(entry: &str) -> Option<(&str, &str)> {
    let (key, value) = entry.split_once('=')?;
    if key.is_empty() {
        return None;
    }
    Some((key, value))
}

/// The ${VAR} reference pattern, compiled once.
pub(crate) fn variable_pattern() -> &'static regex::Regex {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| {
        // Static pattern, compile cannot fail
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap()
    })
}

/// Extract every ${VAR} reference from a string, in order of appearance.
pub fn variable_refs(text: &str) -> Vec<String> {
    variable_pattern()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

impl StackSchema {
    /// Parse a schema document from YAML text.
    pub fn parse_str(text: &str) -> Result<Self> {
        let schema: StackSchema = serde_yaml::from_str(text)?;
        Ok(schema)
    }

    /// Load and parse a schema document from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StackError::io(format!("{}: {}", path.display(), e)))?;
        Self::parse_str(&text)
    }

    /// Validate the schema as a whole. Runs strictly before merge logic;
    /// a failure here means zero artifacts are written.
    pub fn validate(&self) -> Result<()> {
        let mut problems: Vec<String> = Vec::new();

        if self.stack.trim().is_empty() {
            problems.push("stack name must not be empty".to_string());
        }
        if self.services.is_empty() {
            problems.push("schema declares no services".to_string());
        }

        let declared_profiles: BTreeSet<&str> =
            self.profiles.iter().map(String::as_str).collect();

        // Service names are map keys, so literal duplicates cannot parse;
        // still reject names that collide after case normalization.
        let mut normalized = HashSet::new();
        for name in self.services.keys() {
            if !is_valid_name(name) {
                problems.push(format!("invalid service name '{}'", name));
            }
            if !normalized.insert(name.to_lowercase()) {
                problems.push(format!("service name '{}' is not globally unique", name));
            }
        }

        for (name, service) in &self.services {
            if service.image.trim().is_empty() {
                problems.push(format!("service '{}' has an empty image reference", name));
            }
            if let Some(hc) = &service.healthcheck {
                if !self.healthchecks.contains_key(hc) {
                    problems.push(format!(
                        "service '{}' references unknown healthcheck template '{}'",
                        name, hc
                    ));
                }
            }
            for profile in &service.profiles {
                if !declared_profiles.contains(profile.as_str()) {
                    problems.push(format!(
                        "service '{}' uses undeclared profile '{}'",
                        name, profile
                    ));
                }
            }
            for dep in &service.depends_on {
                if !self.services.contains_key(dep) {
                    problems.push(format!(
                        "service '{}' depends on unknown service '{}'",
                        name, dep
                    ));
                }
            }
            for entry in &service.environment {
                match split_env_entry(entry) {
                    Some((_, value)) => {
                        for var in variable_refs(value) {
                            if !self.secrets.contains_key(&var) {
                                problems.push(format!(
                                    "service '{}' references undeclared secret '{}'",
                                    name, var
                                ));
                            }
                        }
                    }
                    None => problems.push(format!(
                        "service '{}' has malformed environment entry '{}'",
                        name, entry
                    )),
                }
            }
            if let Some(template) = &service.config_template {
                for var in variable_refs(template) {
                    let is_secret = self.secrets.contains_key(&var);
                    let is_default = service
                        .environment
                        .iter()
                        .filter_map(|e| split_env_entry(e))
                        .any(|(k, _)| k == var);
                    if !is_secret && !is_default {
                        problems.push(format!(
                            "service '{}' template references unresolvable variable '{}'",
                            name, var
                        ));
                    }
                }
            }
        }

        for (env_name, env) in &self.environments {
            for svc in &env.services {
                if !self.services.contains_key(svc) {
                    problems.push(format!(
                        "environment '{}' lists unknown service '{}'",
                        env_name, svc
                    ));
                }
            }
            for profile in &env.profiles {
                if !declared_profiles.contains(profile.as_str()) {
                    problems.push(format!(
                        "environment '{}' activates undeclared profile '{}'",
                        env_name, profile
                    ));
                }
            }
            for entry in &env.overrides.environment {
                if split_env_entry(entry).is_none() {
                    problems.push(format!(
                        "environment '{}' has malformed override entry '{}'",
                        env_name, entry
                    ));
                }
            }
            for svc in env.overrides.replicas.keys() {
                if !self.services.contains_key(svc) {
                    problems.push(format!(
                        "environment '{}' sets replicas for unknown service '{}'",
                        env_name, svc
                    ));
                }
            }
        }

        for (key, spec) in &self.secrets {
            if !is_valid_secret_key(key) {
                problems.push(format!("invalid secret key '{}'", key));
            }
            if let Some(len) = spec.length {
                let (min, max) = match spec.kind {
                    SecretKind::Password => (16, 128),
                    SecretKind::Token => (32, 128),
                };
                if len < min || len > max {
                    problems.push(format!(
                        "secret '{}' requests length {} outside {}-{}",
                        key, len, min, max
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(StackError::Schema(problems.join("; ")))
        }
    }

    /// Look up an environment by name.
    pub fn environment(&self, name: &str) -> Result<&EnvironmentDefinition> {
        self.environments
            .get(name)
            .ok_or_else(|| StackError::schema(format!("unknown environment '{}'", name)))
    }

    /// Secret keys required by the services of `env_name`: every ${VAR}
    /// referenced by an included service, in sorted order.
    pub fn required_secrets(&self, env_name: &str) -> Result<Vec<String>> {
        let resolved = self.resolve_services(env_name)?;
        let mut keys = BTreeSet::new();
        for name in &resolved {
            // resolve_services only returns declared services
            let service = &self.services[name];
            for entry in &service.environment {
                if let Some((_, value)) = split_env_entry(entry) {
                    for var in variable_refs(value) {
                        if self.secrets.contains_key(&var) {
                            keys.insert(var);
                        }
                    }
                }
            }
            if let Some(template) = &service.config_template {
                for var in variable_refs(template) {
                    if self.secrets.contains_key(&var) {
                        keys.insert(var);
                    }
                }
            }
        }
        Ok(keys.into_iter().collect())
    }

    /// Resolve the service set for an environment: the explicit list union
    /// services whose profile set intersects the active profiles.
    pub fn resolve_services(&self, env_name: &str) -> Result<Vec<String>> {
        let env = self.environment(env_name)?;
        let active: BTreeSet<&str> = env.profiles.iter().map(String::as_str).collect();
        let mut resolved: BTreeSet<String> = BTreeSet::new();
        for svc in &env.services {
            if !self.services.contains_key(svc) {
                return Err(StackError::schema(format!(
                    "environment '{}' lists unknown service '{}'",
                    env_name, svc
                )));
            }
            resolved.insert(svc.clone());
        }
        for (name, service) in &self.services {
            if service
                .profiles
                .iter()
                .any(|p| active.contains(p.as_str()))
            {
                resolved.insert(name.clone());
            }
        }
        Ok(resolved.into_iter().collect())
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
}

fn is_valid_secret_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        && !key.starts_with(|c: char| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_schema() -> &'static str {
        r#"
stack: acme
profiles: [core, debug]
healthchecks:
  standard:
    test: ["CMD-SHELL", "pg_isready -U app"]
    interval: 10s
    timeout: 5s
    retries: 3
secrets:
  POSTGRES_PASSWORD: { kind: password }
  API_TOKEN: { kind: token, length: 64 }
services:
  postgres:
    category: database
    image: postgres:16
    ports: ["5432:5432"]
    environment:
      - POSTGRES_USER=app
      - POSTGRES_PASSWORD=${POSTGRES_PASSWORD}
    volumes: ["pgdata:/var/lib/postgresql/data"]
    healthcheck: standard
    profiles: [core]
  redis:
    category: cache
    image: redis:7
    profiles: [core]
environments:
  development:
    services: [postgres, redis]
    profiles: [core, debug]
    overrides:
      debug: true
      log_level: debug
  production:
    services: [postgres, redis]
    profiles: [core]
"#
    }

    #[test]
    fn test_parse_and_validate_minimal() {
        let schema = StackSchema::parse_str(minimal_schema()).unwrap();
        schema.validate().unwrap();
        assert_eq!(schema.services.len(), 2);
        assert_eq!(schema.stack, "acme");
    }

    #[test]
    fn test_dangling_environment_service() {
        let mut schema = StackSchema::parse_str(minimal_schema()).unwrap();
        schema
            .environments
            .get_mut("development")
            .unwrap()
            .services
            .push("ghost".to_string());
        let err = schema.validate().unwrap_err();
        assert!(matches!(err, StackError::Schema(_)));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_dangling_healthcheck_reference() {
        let mut schema = StackSchema::parse_str(minimal_schema()).unwrap();
        schema.services.get_mut("redis").unwrap().healthcheck = Some("missing".to_string());
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_undeclared_profile_rejected() {
        let mut schema = StackSchema::parse_str(minimal_schema()).unwrap();
        schema
            .services
            .get_mut("redis")
            .unwrap()
            .profiles
            .push("rogue".to_string());
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_undeclared_secret_reference_rejected() {
        let mut schema = StackSchema::parse_str(minimal_schema()).unwrap();
        schema
            .services
            .get_mut("redis")
            .unwrap()
            .environment
            .push("REDIS_PASSWORD=${REDIS_PASSWORD}".to_string());
        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("REDIS_PASSWORD"));
    }

    #[test]
    fn test_resolve_services_profile_union() {
        let mut schema = StackSchema::parse_str(minimal_schema()).unwrap();
        // A service included only through its profile
        schema.services.insert(
            "debugger".to_string(),
            ServiceDefinition {
                image: "busybox:latest".to_string(),
                profiles: vec!["debug".to_string()],
                ..Default::default()
            },
        );
        schema.validate().unwrap();
        let dev = schema.resolve_services("development").unwrap();
        assert_eq!(dev, vec!["debugger", "postgres", "redis"]);
        let prod = schema.resolve_services("production").unwrap();
        assert_eq!(prod, vec!["postgres", "redis"]);
    }

    #[test]
    fn test_required_secrets_per_environment() {
        let schema = StackSchema::parse_str(minimal_schema()).unwrap();
        let keys = schema.required_secrets("development").unwrap();
        assert_eq!(keys, vec!["POSTGRES_PASSWORD"]);
    }

    #[test]
    fn test_unknown_environment() {
        let schema = StackSchema::parse_str(minimal_schema()).unwrap();
        assert!(schema.environment("qa").is_err());
    }

    #[test]
    fn test_secret_length_bounds_enforced() {
        let mut schema = StackSchema::parse_str(minimal_schema()).unwrap();
        schema.secrets.insert(
            "SHORT_KEY".to_string(),
            SecretSpec {
                kind: SecretKind::Token,
                length: Some(8),
            },
        );
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_variable_refs_extraction() {
        let refs = variable_refs("a=${FIRST} b=${SECOND} c=$NOT_A_REF");
        assert_eq!(refs, vec!["FIRST", "SECOND"]);
    }

    #[test]
    fn test_split_env_entry() {
        assert_eq!(split_env_entry("A=1"), Some(("A", "1")));
        assert_eq!(split_env_entry("A=x=y"), Some(("A", "x=y")));
        assert_eq!(split_env_entry("=1"), None);
        assert_eq!(split_env_entry("novalue"), None);
    }
}
