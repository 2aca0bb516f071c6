//! Cross-artifact consistency check
//!
//! For every key present in both the canonical store and the rendered
//! file, the values must be byte-identical. A mismatch is always an
//! error, never downgraded: it means divergent secret sets reached the
//! rendering pipeline, which is the exact shape of the documented
//! production incident.

use super::{CheckContext, CredentialCheck};
use crate::validation::{CheckKind, Finding, Severity, ValidationReport};

pub struct ConsistencyCheck;

impl CredentialCheck for ConsistencyCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Consistency
    }

    fn run(&self, ctx: &CheckContext<'_>, report: &mut ValidationReport) {
        let (store, rendered) = match (&ctx.store, &ctx.rendered) {
            (Some(s), Some(r)) => (s, r),
            _ => return, // absence is the existence check's finding
        };
        for (key, record) in &store.records {
            if let Some(rendered_value) = rendered.get(key) {
                if rendered_value.as_bytes() != record.value.as_bytes() {
                    report.add(
                        Finding::new(
                            Severity::Error,
                            CheckKind::Consistency,
                            "C401",
                            format!(
                                "'{}' differs between canonical store and rendered file",
                                key
                            ),
                        )
                        .with_key(key),
                    );
                }
            }
        }
    }
}
