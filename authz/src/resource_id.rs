//! Syntactic validation of client supplied resource identifiers.
//!
//! Identifiers end up in file paths and outbound query strings, so anything
//! outside `[A-Za-z0-9_-]{1,50}` is rejected before any file-system or network
//! interaction happens.

use serde::Serialize;
use std::fmt;

use crate::error::{AuthzError, Result};

/// Maximum identifier length, in characters.
pub const MAX_RESOURCE_ID_LEN: usize = 50;

/// Returns true if `id` is a safe resource identifier.
///
/// Never panics; any input that is not accepted simply yields `false`.
pub fn validate(id: &str) -> bool {
    let len = id.chars().count();
    if len == 0 || len > MAX_RESOURCE_ID_LEN {
        return false;
    }
    if id.contains("..") {
        return false;
    }
    id.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A resource identifier that has passed [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Parse and validate a raw identifier.
    pub fn parse(raw: &str) -> Result<Self> {
        if validate(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(AuthzError::ResourceIdInvalid)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
