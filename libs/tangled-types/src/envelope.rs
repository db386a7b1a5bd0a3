use serde::{Deserialize, Serialize};

use crate::did::Did;

/// The JSON envelope every event source yields:
/// `{rkey, nsid, did?, event: <record>}`.
///
/// The firehose fills `did` with the record's authority; knot and spindle
/// streams leave it empty because the source itself identifies the emitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub rkey: String,
    pub nsid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did: Option<Did>,
    pub event: serde_json::Value,
}

impl EventEnvelope {
    /// Parse the inner record into its typed shape.
    pub fn record<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.event.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trip() {
        let json = r#"{
            "rkey": "3jzfcijpj2z2a",
            "nsid": "sh.tangled.graph.follow",
            "did": "did:plc:alice",
            "event": {"subject": "did:plc:bob", "createdAt": "2026-01-02T03:04:05Z"}
        }"#;
        let env: EventEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(env.nsid, "sh.tangled.graph.follow");
        let rec: crate::records::FollowRecord = env.record().unwrap();
        assert_eq!(rec.subject.as_str(), "did:plc:bob");
    }

    #[test]
    fn did_is_optional() {
        let json = r#"{"rkey": "r", "nsid": "sh.tangled.git.ref.update", "event": {}}"#;
        let env: EventEnvelope = serde_json::from_str(json).unwrap();
        assert!(env.did.is_none());
    }
}
