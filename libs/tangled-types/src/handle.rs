use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IdError;

/// A human-readable DNS-name alias for a DID, e.g. `alice.tangled.sh`.
///
/// Stored lowercased; a leading `@` is stripped on parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Handle(String);

impl Handle {
    pub fn new(s: impl AsRef<str>) -> Result<Self, IdError> {
        let raw = s.as_ref().trim_start_matches('@').to_ascii_lowercase();
        let valid = !raw.is_empty()
            && raw.len() <= 253
            && raw.contains('.')
            && !raw.starts_with('.')
            && !raw.ends_with('.')
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
        if valid {
            Ok(Self(raw))
        } else {
            Err(IdError::InvalidHandle(s.as_ref().to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Handle {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Handle {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Handle> for String {
    fn from(h: Handle) -> Self {
        h.0
    }
}

impl AsRef<str> for Handle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_strips_at() {
        assert_eq!(Handle::new("@Alice.Tangled.SH").unwrap().as_str(), "alice.tangled.sh");
    }

    #[test]
    fn rejects_bare_labels_and_junk() {
        for bad in ["", "alice", ".example.com", "example.com.", "exa mple.com"] {
            assert!(Handle::new(bad).is_err(), "accepted {bad:?}");
        }
    }
}
