//! Required-secret coverage check: every schema-mandated secret key for
//! the environment exists in the canonical store

use super::{CheckContext, CredentialCheck};
use crate::validation::{CheckKind, Finding, ValidationReport};

pub struct CoverageCheck;

impl CredentialCheck for CoverageCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Coverage
    }

    fn run(&self, ctx: &CheckContext<'_>, report: &mut ValidationReport) {
        let severity = ctx.policy.severity_for(CheckKind::Coverage);
        let required = match ctx.schema.required_secrets(ctx.env_name) {
            Ok(r) => r,
            Err(e) => {
                report.add(Finding::new(
                    severity,
                    CheckKind::Coverage,
                    "C601",
                    e.to_string(),
                ));
                return;
            }
        };
        for key in required {
            let present = ctx
                .store
                .as_ref()
                .is_some_and(|s| s.get(&key).is_some());
            if !present {
                report.add(
                    Finding::new(
                        severity,
                        CheckKind::Coverage,
                        "C602",
                        format!("required secret '{}' is absent from the canonical store", key),
                    )
                    .with_key(key),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::testutil::{context, schema, store_with};

    #[test]
    fn test_full_coverage_passes() {
        let schema = schema();
        let store = store_with(
            "development",
            &[("POSTGRES_PASSWORD", "x"), ("API_TOKEN", "y")],
        );
        let ctx = context(&schema, "development", Some(store), None);
        let mut report = ValidationReport::new("development");
        CoverageCheck.run(&ctx, &mut report);
        assert!(report.findings.is_empty());
    }

    #[test]
    fn test_missing_required_key_reported() {
        let schema = schema();
        let store = store_with("development", &[("POSTGRES_PASSWORD", "x")]);
        let ctx = context(&schema, "development", Some(store), None);
        let mut report = ValidationReport::new("development");
        CoverageCheck.run(&ctx, &mut report);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].key.as_deref(), Some("API_TOKEN"));
    }

    #[test]
    fn test_no_store_reports_every_required_key() {
        let schema = schema();
        let ctx = context(&schema, "development", None, None);
        let mut report = ValidationReport::new("development");
        CoverageCheck.run(&ctx, &mut report);
        assert_eq!(report.findings.len(), 2);
    }
}
