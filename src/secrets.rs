//! Secret store manager
//!
//! Generates credentials once per environment with a cryptographically
//! secure source and persists them as one canonical JSON document per
//! environment with owner-only permissions. An existing store is always
//! the source of truth: it is loaded and returned unmodified, never
//! silently regenerated. Only explicit forced rotation replaces a store.
//!
//! The pipeline calls [`load_or_generate`] exactly once per run and threads
//! the in-memory store into every downstream stage, so divergent
//! regeneration cannot occur within a run; an advisory file lock guards
//! against two concurrent invocations generating for the same environment.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Result, StackError};
use crate::fsio::{self, StoreLock};
use crate::pipeline::Layout;
use crate::schema::{SecretKind, SecretSpec, StackSchema};

const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
const DIGITS: &[u8] = b"23456789";
const SYMBOLS: &[u8] = b"!@#%^&*+-_=?";
const ALNUM: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";

/// Sequences that must never appear in generated material
const WEAK_SEQUENCES: &[&str] = &["123", "abc", "qwerty", "password", "admin", "letmein"];

const DEFAULT_PASSWORD_LENGTH: usize = 24;
const DEFAULT_TOKEN_LENGTH: usize = 48;
const MAX_GENERATION_ATTEMPTS: usize = 200;

/// One generated credential
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretRecord {
    /// Secret key
    pub key: String,
    /// Secret value
    pub value: String,
    /// Generation timestamp
    pub generated_at: DateTime<Utc>,
    /// Owning environment
    pub environment: String,
}

/// The canonical secret set for one environment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretStore {
    /// Owning environment
    pub environment: String,
    /// Records keyed by secret key
    pub records: BTreeMap<String, SecretRecord>,
}

impl SecretStore {
    /// Value for a key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.records.get(key).map(|r| r.value.as_str())
    }

    /// All keys, in sorted order.
    pub fn keys(&self) -> Vec<&str> {
        self.records.keys().map(String::as_str).collect()
    }

    /// Key to value map for substitution.
    pub fn as_env_map(&self) -> BTreeMap<String, String> {
        self.records
            .iter()
            .map(|(k, r)| (k.clone(), r.value.clone()))
            .collect()
    }

    /// Load a store from its canonical path. `Ok(None)` when absent.
    pub fn load(path: &Path) -> Result<Option<SecretStore>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| StackError::io(format!("{}: {}", path.display(), e)))?;
        let store: SecretStore = serde_json::from_str(&text)?;
        Ok(Some(store))
    }

    /// Persist the store atomically with owner-only permissions.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fsio::write_atomic_secret(path, &text)
    }
}

/// Load the canonical store for an environment, generating it on first use.
///
/// Holds the advisory store lock across the exists-check and the write, so
/// two concurrent invocations cannot both generate.
pub fn load_or_generate(
    schema: &StackSchema,
    env_name: &str,
    layout: &Layout,
) -> Result<SecretStore> {
    let lock = StoreLock::acquire(&layout.secret_store_path(env_name))?;
    load_or_generate_guarded(schema, env_name, layout, &lock)
}

/// Lock-free variant for callers that already hold the store lock for the
/// environment. The guard reference proves the lock is held.
pub(crate) fn load_or_generate_guarded(
    schema: &StackSchema,
    env_name: &str,
    layout: &Layout,
    _lock: &StoreLock,
) -> Result<SecretStore> {
    let path = layout.secret_store_path(env_name);
    if let Some(store) = SecretStore::load(&path)? {
        tracing::info!(
            environment = env_name,
            keys = store.records.len(),
            "loaded canonical secret store"
        );
        return Ok(store);
    }
    let store = generate(schema, env_name)?;
    store.persist(&path)?;
    tracing::info!(
        environment = env_name,
        keys = store.records.len(),
        "generated canonical secret store"
    );
    Ok(store)
}

/// Forced rotation: generate a fresh set and replace the canonical store.
///
/// This is the only path that overwrites an existing store.
pub fn rotate(schema: &StackSchema, env_name: &str, layout: &Layout) -> Result<SecretStore> {
    let path = layout.secret_store_path(env_name);
    let _lock = StoreLock::acquire(&path)?;
    let store = generate(schema, env_name)?;
    store.persist(&path)?;
    tracing::warn!(environment = env_name, "secret store rotated");
    Ok(store)
}

fn generate(schema: &StackSchema, env_name: &str) -> Result<SecretStore> {
    schema.environment(env_name)?;
    let required = schema.required_secrets(env_name)?;
    let now = Utc::now();
    let mut records = BTreeMap::new();
    let mut rng = OsRng;
    for key in required {
        let spec = schema
            .secrets
            .get(&key)
            .cloned()
            .unwrap_or_default();
        let value = generate_value(&spec, &mut rng)?;
        records.insert(
            key.clone(),
            SecretRecord {
                key,
                value,
                generated_at: now,
                environment: env_name.to_string(),
            },
        );
    }
    Ok(SecretStore {
        environment: env_name.to_string(),
        records,
    })
}

/// Generate one credential value according to its spec.
pub fn generate_value(spec: &SecretSpec, rng: &mut (impl Rng + ?Sized)) -> Result<String> {
    match spec.kind {
        SecretKind::Password => {
            let length = spec.length.unwrap_or(DEFAULT_PASSWORD_LENGTH).clamp(16, 128);
            for _ in 0..MAX_GENERATION_ATTEMPTS {
                let candidate = password_candidate(length, rng);
                if !has_repeat_run(&candidate, 3) && !contains_weak_sequence(&candidate) {
                    return Ok(candidate);
                }
            }
            Err(StackError::internal(
                "password generation exhausted resampling attempts",
            ))
        }
        SecretKind::Token => {
            let length = spec.length.unwrap_or(DEFAULT_TOKEN_LENGTH).clamp(32, 128);
            for _ in 0..MAX_GENERATION_ATTEMPTS {
                let candidate: String = (0..length)
                    .map(|_| ALNUM[rng.gen_range(0..ALNUM.len())] as char)
                    .collect();
                if !has_repeat_run(&candidate, 3) && !contains_weak_sequence(&candidate) {
                    return Ok(candidate);
                }
            }
            Err(StackError::internal(
                "token generation exhausted resampling attempts",
            ))
        }
    }
}

/// One char from each required class, remainder from the full alphabet,
/// then shuffled so class positions are not predictable.
fn password_candidate(length: usize, rng: &mut (impl Rng + ?Sized)) -> String {
    let mut bytes: Vec<u8> = vec![
        UPPER[rng.gen_range(0..UPPER.len())],
        LOWER[rng.gen_range(0..LOWER.len())],
        DIGITS[rng.gen_range(0..DIGITS.len())],
        SYMBOLS[rng.gen_range(0..SYMBOLS.len())],
    ];
    let all: Vec<u8> = [UPPER, LOWER, DIGITS, SYMBOLS].concat();
    while bytes.len() < length {
        bytes.push(all[rng.gen_range(0..all.len())]);
    }
    bytes.shuffle(rng);
    String::from_utf8(bytes).unwrap_or_default()
}

/// True when any character repeats `run` or more times consecutively.
pub fn has_repeat_run(value: &str, run: usize) -> bool {
    let chars: Vec<char> = value.chars().collect();
    chars
        .windows(run)
        .any(|w| w.iter().all(|c| *c == w[0]))
}

/// True when the value contains a known weak sequence, case-insensitive.
pub fn contains_weak_sequence(value: &str) -> bool {
    let lower = value.to_lowercase();
    WEAK_SEQUENCES.iter().any(|seq| lower.contains(seq))
}
