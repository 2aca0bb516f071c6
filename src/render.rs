//! Environment renderer
//!
//! Renders per-service configuration text from service templates plus the
//! canonical secret store, in a single substitution pass. Any reference
//! that cannot be resolved is a hard failure, never a silent empty
//! substitution; failures across all services are collected into one
//! [`StackError::Template`] before abort.
//!
//! Every template is rendered against the same canonical secret set that
//! the rest of the run uses: the store is passed in by the caller, never
//! re-loaded or re-generated here.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::compiler::merge_env_entries;
use crate::error::{Result, StackError, TemplateIssue};
use crate::fsio;
use crate::pipeline::Layout;
use crate::schema::{split_env_entry, variable_refs, StackSchema};
use crate::secrets::SecretStore;

/// Output of a successful render pass
#[derive(Debug, Clone)]
pub struct RenderedOutput {
    /// Rendered file per service
    pub service_files: BTreeMap<String, PathBuf>,
    /// Combined legacy env file for older consumers
    pub combined_path: PathBuf,
    /// Key to value content of the combined file
    pub combined: BTreeMap<String, String>,
}

/// Render one service's configuration text without writing anything.
///
/// Used both by the render stage and by the renderability check.
pub fn render_service_text(
    schema: &StackSchema,
    env_name: &str,
    service_name: &str,
    store: &SecretStore,
) -> std::result::Result<String, Vec<TemplateIssue>> {
    let service = match schema.services.get(service_name) {
        Some(s) => s,
        None => {
            return Err(vec![TemplateIssue {
                service: service_name.to_string(),
                variable: "<unknown service>".to_string(),
            }])
        }
    };
    let env = match schema.environments.get(env_name) {
        Some(e) => e,
        None => {
            return Err(vec![TemplateIssue {
                service: service_name.to_string(),
                variable: "<unknown environment>".to_string(),
            }])
        }
    };

    let mut override_entries = env.overrides.environment.clone();
    if let Some(debug) = env.overrides.debug {
        override_entries.push(format!("DEBUG={}", debug));
    }
    if let Some(level) = &env.overrides.log_level {
        override_entries.push(format!("LOG_LEVEL={}", level));
    }
    let merged = merge_env_entries(&service.environment, &override_entries);

    // Resolution context: canonical secrets first, then schema-declared
    // literal defaults from the merged environment entries.
    let mut context = store.as_env_map();
    for entry in &merged {
        if let Some((key, value)) = split_env_entry(entry) {
            if variable_refs(value).is_empty() {
                context.entry(key.to_string()).or_insert_with(|| value.to_string());
            }
        }
    }

    let template = match &service.config_template {
        Some(t) => t.clone(),
        None => {
            let mut body = String::new();
            for entry in &merged {
                body.push_str(entry);
                body.push('\n');
            }
            body
        }
    };

    substitute(&template, &context, service_name)
}

fn substitute(
    template: &str,
    context: &BTreeMap<String, String>,
    service_name: &str,
) -> std::result::Result<String, Vec<TemplateIssue>> {
    let mut missing = Vec::new();
    for var in variable_refs(template) {
        if !context.contains_key(&var)
            && !missing.iter().any(|i: &TemplateIssue| i.variable == var)
        {
            missing.push(TemplateIssue {
                service: service_name.to_string(),
                variable: var,
            });
        }
    }
    if !missing.is_empty() {
        return Err(missing);
    }
    // Single pass: values are substituted verbatim, never re-scanned
    let rendered = crate::schema::variable_pattern()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            context[&caps[1]].clone()
        });
    Ok(rendered.into_owned())
}

/// Render every service of an environment and write the per-service files
/// plus the combined legacy file.
pub fn render_environment(
    schema: &StackSchema,
    env_name: &str,
    store: &SecretStore,
    layout: &Layout,
) -> Result<RenderedOutput> {
    let resolved = schema.resolve_services(env_name)?;
    tracing::info!(
        environment = env_name,
        services = resolved.len(),
        "rendering configuration"
    );

    let mut rendered: BTreeMap<String, String> = BTreeMap::new();
    let mut issues: Vec<TemplateIssue> = Vec::new();
    for name in &resolved {
        match render_service_text(schema, env_name, name, store) {
            Ok(text) => {
                rendered.insert(name.clone(), text);
            }
            Err(mut service_issues) => issues.append(&mut service_issues),
        }
    }
    if !issues.is_empty() {
        return Err(StackError::Template(issues));
    }

    // Combined legacy file: every resolved key across services, first
    // writer wins in sorted service order; secrets always carry the
    // canonical value.
    let mut combined: BTreeMap<String, String> = store.as_env_map();
    for name in &resolved {
        for line in rendered[name].lines() {
            if let Some((key, value)) = split_env_entry(line) {
                combined.entry(key.to_string()).or_insert_with(|| value.to_string());
            }
        }
    }

    let mut service_files = BTreeMap::new();
    for (name, text) in &rendered {
        let path = layout.service_env_path(env_name, name);
        fsio::write_atomic(&path, text)?;
        service_files.insert(name.clone(), path);
    }

    let combined_path = layout.combined_env_path(env_name);
    let mut combined_text = String::new();
    for (key, value) in &combined {
        combined_text.push_str(&format!("{}={}\n", key, value));
    }
    fsio::write_atomic(&combined_path, &combined_text)?;

    Ok(RenderedOutput {
        service_files,
        combined_path,
        combined,
    })
}

/// Parse a rendered env file back into key/value pairs.
pub fn parse_env_file(text: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = split_env_entry(line) {
            map.entry(key.to_string()).or_insert_with(|| value.to_string());
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets;
    use tempfile::TempDir;

    fn schema() -> StackSchema {
        StackSchema::parse_str(
            r#"
stack: acme
profiles: [core]
secrets:
  POSTGRES_PASSWORD: { kind: password }
services:
  postgres:
    image: postgres:16
    environment:
      - POSTGRES_USER=app
      - POSTGRES_PASSWORD=${POSTGRES_PASSWORD}
    profiles: [core]
    config_template: |
      user=${POSTGRES_USER}
      password=${POSTGRES_PASSWORD}
  redis:
    image: redis:7
    environment:
      - REDIS_MAXMEMORY=64mb
    profiles: [core]
environments:
  development:
    services: [postgres, redis]
    overrides:
      log_level: debug
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
    fn test_render_substitutes_canonical_secrets() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let store = secrets::load_or_generate(&schema(), "development", &layout).unwrap();
        let out = render_environment(&schema(), "development", &store, &layout).unwrap();

        let pg_text =
            std::fs::read_to_string(&out.service_files["postgres"]).unwrap();
        assert!(pg_text.contains("user=app"));
        assert!(pg_text.contains(&format!(
            "password={}",
            store.get("POSTGRES_PASSWORD").unwrap()
        )));
    }

    #[test]
    fn test_combined_legacy_file_agrees_with_store() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let store = secrets::load_or_generate(&schema(), "development", &layout).unwrap();
        let out = render_environment(&schema(), "development", &store, &layout).unwrap();
        let text = std::fs::read_to_string(&out.combined_path).unwrap();
        let parsed = parse_env_file(&text);
        assert_eq!(
            parsed.get("POSTGRES_PASSWORD").map(String::as_str),
            store.get("POSTGRES_PASSWORD")
        );
        assert_eq!(parsed.get("LOG_LEVEL").map(String::as_str), Some("debug"));
    }

    #[test]
    fn test_unresolved_reference_is_hard_failure() {
        let mut s = schema();
        s.services.get_mut("postgres").unwrap().config_template =
            Some("password=${MISSING_SECRET}\n".to_string());
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let store = secrets::load_or_generate(&s, "development", &layout).unwrap();
        let err = render_environment(&s, "development", &store, &layout).unwrap_err();
        match err {
            StackError::Template(issues) => {
                assert_eq!(issues.len(), 1);
                assert_eq!(issues[0].variable, "MISSING_SECRET");
            }
            other => panic!("expected template error, got {other}"),
        }
    }

    #[test]
    fn test_failures_collected_across_services() {
        let mut s = schema();
        s.services.get_mut("postgres").unwrap().config_template =
            Some("a=${GONE_A}\n".to_string());
        s.services.get_mut("redis").unwrap().config_template =
            Some("b=${GONE_B}\n".to_string());
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let store = secrets::load_or_generate(&s, "development", &layout).unwrap();
        let err = render_environment(&s, "development", &store, &layout).unwrap_err();
        match err {
            StackError::Template(issues) => {
                let vars: Vec<&str> = issues.iter().map(|i| i.variable.as_str()).collect();
                assert!(vars.contains(&"GONE_A"));
                assert!(vars.contains(&"GONE_B"));
            }
            other => panic!("expected template error, got {other}"),
        }
    }

    #[test]
    fn test_synthesized_env_body_when_no_template() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let store = secrets::load_or_generate(&schema(), "development", &layout).unwrap();
        let text = render_service_text(&schema(), "development", "redis", &store).unwrap();
        assert!(text.contains("REDIS_MAXMEMORY=64mb"));
        assert!(text.contains("LOG_LEVEL=debug"));
    }

    #[test]
    fn test_parse_env_file_skips_comments() {
        let parsed = parse_env_file("# header\nA=1\n\nB=2\n");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["A"], "1");
    }
}
