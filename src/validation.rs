//! Credential validation core types
//!
//! Findings are categorized per check, carry a severity resolved from the
//! environment's strictness policy, and are aggregated into a single
//! report for one invocation, so every problem is surfaced at once.

use serde::{Deserialize, Serialize};

/// Severity levels for validation findings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocks deployment
    Error,
    /// Surfaced but non-blocking
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// The independent checks the validator runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Canonical store and rendered file both present
    Existence,
    /// Every required secret satisfies the credential policy
    Strength,
    /// No placeholder values from the fixed denylist
    Placeholder,
    /// Store and rendered file agree byte-for-byte on shared keys
    Consistency,
    /// Every template renders with zero missing variables
    Renderability,
    /// Every schema-mandated secret key exists in the store
    Coverage,
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CheckKind::Existence => "existence",
            CheckKind::Strength => "strength",
            CheckKind::Placeholder => "placeholder",
            CheckKind::Consistency => "consistency",
            CheckKind::Renderability => "renderability",
            CheckKind::Coverage => "coverage",
        };
        write!(f, "{}", name)
    }
}

/// A single validation finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Severity resolved from the strictness policy
    pub severity: Severity,
    /// Which check produced this finding
    pub check: CheckKind,
    /// Unique code for this finding type
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Secret key the finding concerns, when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl Finding {
    /// Create a finding with an explicit severity
    pub fn new(
        severity: Severity,
        check: CheckKind,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            check,
            code: code.into(),
            message: message.into(),
            key: None,
        }
    }

    /// Attach the secret key this finding concerns
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Aggregated result of one validation invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Environment validated
    pub environment: String,
    /// All findings, in check order
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    /// Create an empty report for an environment
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            findings: Vec::new(),
        }
    }

    /// Add a finding
    pub fn add(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    /// All error-severity findings
    pub fn errors(&self) -> Vec<&Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .collect()
    }

    /// All warning-severity findings
    pub fn warnings(&self) -> Vec<&Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .collect()
    }

    /// Deployment must be blocked whenever the error count is nonzero,
    /// in any environment.
    pub fn is_deployable(&self) -> bool {
        self.errors().is_empty()
    }
}

/// Fixed placeholder denylist, matched case-insensitively
pub const PLACEHOLDER_DENYLIST: &[&str] = &[
    "changeme", "admin", "password", "secret", "default", "letmein", "123456", "test",
];

/// Per-environment strength rules for generated credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialPolicy {
    /// Minimum password length
    pub min_password_length: usize,
    /// Maximum password length
    pub max_password_length: usize,
    /// Minimum token length
    pub min_token_length: usize,
    /// Maximum token length
    pub max_token_length: usize,
    /// Require upper/lower/digit/symbol classes in passwords
    pub require_classes: bool,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            min_password_length: 16,
            max_password_length: 128,
            min_token_length: 32,
            max_token_length: 128,
            require_classes: true,
        }
    }
}

/// How strictly findings are graded for an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrictnessMode {
    /// Development: existence and consistency are errors, the rest warnings
    Lenient,
    /// Staging/production: every check is an error
    Strict,
}

/// Resolved strictness policy for one validation run
#[derive(Debug, Clone)]
pub struct StrictnessPolicy {
    /// Grading mode
    pub mode: StrictnessMode,
    /// Strength rules
    pub credential: CredentialPolicy,
}

impl StrictnessPolicy {
    /// Resolve the policy for an environment. Development environments get
    /// the lenient grading; everything else, and any run with the `strict`
    /// flag, gets the strict grading.
    pub fn for_environment(env_name: &str, strict: bool) -> Self {
        let mode = if strict {
            StrictnessMode::Strict
        } else {
            match env_name {
                "development" | "dev" | "local" => StrictnessMode::Lenient,
                _ => StrictnessMode::Strict,
            }
        };
        Self {
            mode,
            credential: CredentialPolicy::default(),
        }
    }

    /// Severity for a finding from `check`. Cross-artifact consistency is
    /// always an error regardless of environment: a mismatch signals that
    /// divergent secret sets reached the rendering pipeline.
    pub fn severity_for(&self, check: CheckKind) -> Severity {
        match (self.mode, check) {
            (_, CheckKind::Consistency) => Severity::Error,
            (_, CheckKind::Existence) => Severity::Error,
            (StrictnessMode::Strict, _) => Severity::Error,
            (StrictnessMode::Lenient, _) => Severity::Warning,
        }
    }
}
