//! Renderability check: every template renders with zero missing variables

use super::{CheckContext, CredentialCheck};
use crate::render;
use crate::validation::{CheckKind, Finding, ValidationReport};

pub struct RenderabilityCheck;

impl CredentialCheck for RenderabilityCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Renderability
    }

    fn run(&self, ctx: &CheckContext<'_>, report: &mut ValidationReport) {
        let store = match &ctx.store {
            Some(s) => s,
            None => return,
        };
        let severity = ctx.policy.severity_for(CheckKind::Renderability);
        let resolved = match ctx.schema.resolve_services(ctx.env_name) {
            Ok(r) => r,
            Err(e) => {
                report.add(Finding::new(
                    severity,
                    CheckKind::Renderability,
                    "C501",
                    e.to_string(),
                ));
                return;
            }
        };
        for service in &resolved {
            if let Err(issues) =
                render::render_service_text(ctx.schema, ctx.env_name, service, store)
            {
                for issue in issues {
                    report.add(
                        Finding::new(
                            severity,
                            CheckKind::Renderability,
                            "C502",
                            format!(
                                "service '{}' cannot render: unresolved '{}'",
                                issue.service, issue.variable
                            ),
                        )
                        .with_key(issue.variable),
                    );
                }
            }
        }
    }
}
