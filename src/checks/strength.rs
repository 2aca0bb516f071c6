//! Strength check: every required secret satisfies the credential policy

use super::{CheckContext, CredentialCheck};
use crate::schema::SecretKind;
use crate::secrets::{contains_weak_sequence, has_repeat_run};
use crate::validation::{CheckKind, Finding, ValidationReport};

pub struct StrengthCheck;

impl CredentialCheck for StrengthCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Strength
    }

    fn run(&self, ctx: &CheckContext<'_>, report: &mut ValidationReport) {
        let store = match &ctx.store {
            Some(s) => s,
            None => return, // reported by the existence check
        };
        let severity = ctx.policy.severity_for(CheckKind::Strength);
        let policy = &ctx.policy.credential;
        for (key, record) in &store.records {
            let kind = ctx
                .schema
                .secrets
                .get(key)
                .map(|s| s.kind)
                .unwrap_or(SecretKind::Password);
            let value = &record.value;
            match kind {
                SecretKind::Password => {
                    if value.len() < policy.min_password_length
                        || value.len() > policy.max_password_length
                    {
                        report.add(
                            Finding::new(
                                severity,
                                CheckKind::Strength,
                                "C201",
                                format!(
                                    "'{}' has length {} outside {}-{}",
                                    key,
                                    value.len(),
                                    policy.min_password_length,
                                    policy.max_password_length
                                ),
                            )
                            .with_key(key),
                        );
                    }
                    if policy.require_classes {
                        let missing: Vec<&str> = [
                            ("uppercase", value.chars().any(|c| c.is_ascii_uppercase())),
                            ("lowercase", value.chars().any(|c| c.is_ascii_lowercase())),
                            ("digit", value.chars().any(|c| c.is_ascii_digit())),
                            (
                                "symbol",
                                value.chars().any(|c| !c.is_ascii_alphanumeric()),
                            ),
                        ]
                        .iter()
                        .filter(|(_, present)| !*present)
                        .map(|(class, _)| *class)
                        .collect();
                        if !missing.is_empty() {
                            report.add(
                                Finding::new(
                                    severity,
                                    CheckKind::Strength,
                                    "C202",
                                    format!("'{}' lacks {} characters", key, missing.join(", ")),
                                )
                                .with_key(key),
                            );
                        }
                    }
                }
                SecretKind::Token => {
                    if value.len() < policy.min_token_length
                        || value.len() > policy.max_token_length
                    {
                        report.add(
                            Finding::new(
                                severity,
                                CheckKind::Strength,
                                "C203",
                                format!(
                                    "'{}' has length {} outside {}-{}",
                                    key,
                                    value.len(),
                                    policy.min_token_length,
                                    policy.max_token_length
                                ),
                            )
                            .with_key(key),
                        );
                    }
                    if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
                        report.add(
                            Finding::new(
                                severity,
                                CheckKind::Strength,
                                "C204",
                                format!("'{}' contains non-alphanumeric characters", key),
                            )
                            .with_key(key),
                        );
                    }
                }
            }
            if has_repeat_run(value, 3) {
                report.add(
                    Finding::new(
                        severity,
                        CheckKind::Strength,
                        "C205",
                        format!("'{}' contains 3+ repeated characters", key),
                    )
                    .with_key(key),
                );
            }
            if contains_weak_sequence(value) {
                report.add(
                    Finding::new(
                        severity,
                        CheckKind::Strength,
                        "C206",
                        format!("'{}' contains a common weak sequence", key),
                    )
                    .with_key(key),
                );
            }
        }
    }
}
