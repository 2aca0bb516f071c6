//! Existence check: canonical store and rendered file both present

use super::{CheckContext, CredentialCheck};
use crate::validation::{CheckKind, Finding, ValidationReport};

pub struct ExistenceCheck;

impl CredentialCheck for ExistenceCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Existence
    }

    fn run(&self, ctx: &CheckContext<'_>, report: &mut ValidationReport) {
        let severity = ctx.policy.severity_for(CheckKind::Existence);
        if ctx.store.is_none() {
            report.add(Finding::new(
                severity,
                CheckKind::Existence,
                "C101",
                format!(
                    "canonical secret store missing for environment '{}': {}",
                    ctx.env_name,
                    ctx.store_path.display()
                ),
            ));
        }
        if ctx.rendered.is_none() {
            report.add(Finding::new(
                severity,
                CheckKind::Existence,
                "C102",
                format!(
                    "rendered configuration missing for environment '{}': {}",
                    ctx.env_name,
                    ctx.rendered_path.display()
                ),
            ));
        }
    }
}
