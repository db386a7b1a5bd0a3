use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IdError;

/// A decentralized identifier, e.g. `did:plc:3pi27ml6d2xzyq5rdlfx2rfv`.
///
/// Treated as opaque beyond shape validation: `did:<method>:<identifier>`,
/// lowercase method, non-empty identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did(String);

impl Did {
    pub fn new(s: impl Into<String>) -> Result<Self, IdError> {
        let s = s.into();
        let mut parts = s.splitn(3, ':');
        let (scheme, method, ident) = (parts.next(), parts.next(), parts.next());
        match (scheme, method, ident) {
            (Some("did"), Some(method), Some(ident))
                if !method.is_empty()
                    && method.chars().all(|c| c.is_ascii_lowercase())
                    && !ident.is_empty() =>
            {
                Ok(Self(s))
            }
            _ => Err(IdError::InvalidDid(s)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The DID method, e.g. `plc` or `web`.
    pub fn method(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }

    /// Colon-free form usable in URL path segments by tooling that cannot
    /// carry colons: `did:plc:abc` becomes `did-plc-abc`.
    pub fn flattened(&self) -> String {
        self.0.replace(':', "-")
    }

    /// Inverse of [`Did::flattened`].
    pub fn from_flattened(s: &str) -> Result<Self, IdError> {
        let mut parts = s.splitn(3, '-');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("did"), Some(method), Some(ident)) => Self::new(format!("did:{method}:{ident}")),
            _ => Err(IdError::InvalidDid(s.to_owned())),
        }
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Did {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Did {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.0
    }
}

impl AsRef<str> for Did {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plc_and_web() {
        assert!(Did::new("did:plc:3pi27ml6d2xzyq5rdlfx2rfv").is_ok());
        assert!(Did::new("did:web:example.com").is_ok());
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "did:", "did:plc:", "plc:abc", "did:PLC:abc", "did::abc"] {
            assert!(Did::new(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn flatten_round_trip() {
        let did = Did::new("did:plc:abc123").unwrap();
        assert_eq!(did.flattened(), "did-plc-abc123");
        assert_eq!(Did::from_flattened("did-plc-abc123").unwrap(), did);
    }

    #[test]
    fn flattened_web_did_keeps_dots() {
        let did = Did::new("did:web:knot.example.com").unwrap();
        assert_eq!(
            Did::from_flattened(&did.flattened()).unwrap().as_str(),
            "did:web:knot.example.com"
        );
    }

    #[test]
    fn serde_is_transparent() {
        let did: Did = serde_json::from_str("\"did:plc:abc\"").unwrap();
        assert_eq!(serde_json::to_string(&did).unwrap(), "\"did:plc:abc\"");
    }
}
