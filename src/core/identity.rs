//! Deterministic task identities.
//!
//! An identity names a unit of work by what it computes: a readable slug of the
//! topic plus a short content hash of the parameters that shape the result.
//! Identities never include timestamps, random values or loop positions, so the
//! same logical request maps to the same identity across process restarts.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::TaskPoolError;

/// Hex characters of the content hash kept in derived identities.
const HASH_LEN: usize = 8;
/// Upper bound on the slug part, in characters.
const MAX_SLUG_LEN: usize = 48;
/// Domain separator for parameter hashing.
const HASH_DOMAIN: &[u8] = b"prometheus-task-identity-v1";

/// Stable name of a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskIdentity(String);

impl TaskIdentity {
    /// Wrap an identity the caller has already made deterministic.
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    /// Derive `<slug>-<hash>` from a topic and the parameters of the work.
    ///
    /// Parameters are hashed through their canonical JSON form (object keys
    /// sorted), so field or map ordering does not change the identity.
    ///
    /// # Errors
    ///
    /// Returns [`TaskPoolError::Identity`] if `params` cannot be serialized or
    /// the topic has no usable characters.
    pub fn derive<P: Serialize + ?Sized>(topic: &str, params: &P) -> Result<Self, TaskPoolError> {
        let slug = slugify(topic);
        if slug.is_empty() {
            return Err(TaskPoolError::Identity(format!(
                "topic `{topic}` has no alphanumeric characters"
            )));
        }
        let hash = content_hash(params)?;
        Ok(Self(format!("{slug}-{}", &hash[..HASH_LEN])))
    }

    /// Identity for an explicit retry of this unit.
    ///
    /// Failed units stay failed; retrying means minting a new identity on purpose.
    #[must_use]
    pub fn retry(&self, attempt: u32) -> Self {
        Self(format!("{}-retry-{attempt}", self.0))
    }

    /// Borrow the identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for TaskIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lowercase ASCII slug: alphanumerics kept, every other run collapsed to `-`.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len().min(MAX_SLUG_LEN));
    let mut pending_dash = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    slug.truncate(MAX_SLUG_LEN);
    slug.trim_end_matches('-').to_string()
}

/// Hex BLAKE3 digest of the canonical JSON encoding of `params`.
///
/// Object keys are sorted at every depth before encoding, so the digest does
/// not depend on field or map ordering, nor on whether serde_json's
/// `preserve_order` feature is enabled somewhere in the build.
///
/// # Errors
///
/// Returns [`TaskPoolError::Identity`] if `params` cannot be serialized.
pub fn content_hash<P: Serialize + ?Sized>(params: &P) -> Result<String, TaskPoolError> {
    let canonical = canonical_json(params)?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(HASH_DOMAIN);
    hasher.update(&canonical);
    Ok(hasher.finalize().to_hex().to_string())
}

fn canonical_json<P: Serialize + ?Sized>(params: &P) -> Result<Vec<u8>, TaskPoolError> {
    serde_json::to_value(params)
        .map(sort_keys)
        .and_then(|value| serde_json::to_vec(&value))
        .map_err(|e| TaskPoolError::Identity(format!("parameters not serializable: {e}")))
}

/// Rebuild `value` with every object's keys inserted in ascending order.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, sort_keys(value)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
