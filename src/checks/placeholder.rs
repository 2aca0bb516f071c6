//! Placeholder check: no value from the fixed denylist
//!
//! A placeholder is always reported in every environment; only its
//! severity depends on the policy.

use super::{CheckContext, CredentialCheck};
use crate::validation::{CheckKind, Finding, ValidationReport, PLACEHOLDER_DENYLIST};

pub struct PlaceholderCheck;

impl CredentialCheck for PlaceholderCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Placeholder
    }

    fn run(&self, ctx: &CheckContext<'_>, report: &mut ValidationReport) {
        let store = match &ctx.store {
            Some(s) => s,
            None => return,
        };
        let severity = ctx.policy.severity_for(CheckKind::Placeholder);
        for (key, record) in &store.records {
            let lower = record.value.to_lowercase();
            if let Some(hit) = PLACEHOLDER_DENYLIST.iter().find(|p| lower == **p) {
                report.add(
                    Finding::new(
                        severity,
                        CheckKind::Placeholder,
                        "C301",
                        format!("'{}' is the placeholder value '{}'", key, hit),
                    )
                    .with_key(key),
                );
            }
        }
    }
}
