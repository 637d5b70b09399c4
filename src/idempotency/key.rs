use http::{HeaderMap, Method};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{IdempotencyError, Result};

/// Header carrying the client-supplied idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";

/// Methods that may carry side effects and are therefore intercepted.
pub const INTERCEPTED_METHODS: [Method; 2] = [Method::POST, Method::PUT];

/// Opaque client token identifying one logical operation across retries.
///
/// Keys share a single global namespace: equal keys on different paths or from
/// different clients address the same cache entry.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Returns `None` for blank input.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short SHA-256 prefix, safe to put in logs and metric labels.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        let hash = hasher.finalize();
        hex::encode(&hash[..6])
    }
}

// Keys are client secrets as far as logs are concerned.
impl fmt::Debug for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IdempotencyKey")
            .field(&self.fingerprint())
            .finish()
    }
}

/// Reads the idempotency key from request headers.
///
/// Absent or blank headers yield `Ok(None)`. A header value that is not
/// visible ASCII cannot be taken verbatim and is reported as a key
/// extraction failure.
pub fn extract_key(headers: &HeaderMap) -> Result<Option<IdempotencyKey>> {
    let Some(value) = headers.get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };

    let value = value.to_str().map_err(|e| {
        IdempotencyError::KeyExtraction(format!(
            "header '{}' is not valid text: {}",
            IDEMPOTENCY_KEY_HEADER, e
        ))
    })?;

    Ok(IdempotencyKey::new(value))
}

/// True for methods that may carry side effects.
pub fn is_intercepted_method(method: &Method) -> bool {
    INTERCEPTED_METHODS.contains(method)
}

/// True iff a key is present and the method is side-effecting.
pub fn should_intercept(method: &Method, key: Option<&IdempotencyKey>) -> bool {
    key.is_some() && is_intercepted_method(method)
}
