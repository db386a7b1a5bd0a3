use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::did::Did;
use crate::error::IdError;

/// `at://<authority>/<collection>/<rkey>`, naming exactly one record.
///
/// The authority is usually a DID but may be a handle; it is kept verbatim.
/// Two AT-URIs are equal iff their string forms are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AtUri {
    authority: String,
    collection: String,
    rkey: String,
}

impl AtUri {
    pub fn new(
        authority: impl Into<String>,
        collection: impl Into<String>,
        rkey: impl Into<String>,
    ) -> Result<Self, IdError> {
        let (authority, collection, rkey) = (authority.into(), collection.into(), rkey.into());
        if authority.is_empty()
            || collection.is_empty()
            || rkey.is_empty()
            || [&authority, &collection, &rkey]
                .iter()
                .any(|p| p.contains('/') || p.contains(char::is_whitespace))
        {
            return Err(IdError::InvalidAtUri(format!(
                "at://{authority}/{collection}/{rkey}"
            )));
        }
        Ok(Self {
            authority,
            collection,
            rkey,
        })
    }

    pub fn parse(s: &str) -> Result<Self, IdError> {
        let rest = s
            .strip_prefix("at://")
            .ok_or_else(|| IdError::InvalidAtUri(s.to_owned()))?;
        let mut parts = rest.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(authority), Some(collection), Some(rkey)) => {
                Self::new(authority, collection, rkey)
            }
            _ => Err(IdError::InvalidAtUri(s.to_owned())),
        }
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// The authority parsed as a DID, when it is one.
    pub fn authority_did(&self) -> Option<Did> {
        Did::new(&self.authority).ok()
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn rkey(&self) -> &str {
        &self.rkey
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}/{}", self.authority, self.collection, self.rkey)
    }
}

impl FromStr for AtUri {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AtUri {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<AtUri> for String {
    fn from(uri: AtUri) -> Self {
        uri.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip() {
        let uri = AtUri::parse("at://did:plc:abc/sh.tangled.repo/3jzfcijpj2z2a").unwrap();
        assert_eq!(uri.authority(), "did:plc:abc");
        assert_eq!(uri.collection(), "sh.tangled.repo");
        assert_eq!(uri.rkey(), "3jzfcijpj2z2a");
        assert_eq!(uri.to_string(), "at://did:plc:abc/sh.tangled.repo/3jzfcijpj2z2a");
    }

    #[test]
    fn authority_may_be_a_handle() {
        let uri = AtUri::parse("at://alice.tangled.sh/sh.tangled.repo/abc").unwrap();
        assert!(uri.authority_did().is_none());
    }

    #[test]
    fn rejects_incomplete_uris() {
        for bad in [
            "at://did:plc:abc",
            "at://did:plc:abc/sh.tangled.repo",
            "https://did:plc:abc/c/r",
            "at:///c/r",
        ] {
            assert!(AtUri::parse(bad).is_err(), "accepted {bad:?}");
        }
    }
}
