//! DID ↔ handle ↔ PDS endpoint resolution with a TTL cache.
//!
//! `did:plc` resolves through the PLC directory; `did:web` through the
//! domain's well-known DID document. Handles resolve through
//! `/.well-known/atproto-did`.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Deserialize;
use url::Url;

use tangled_types::{Did, Handle};

use crate::error::ClientError;

const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub did: Did,
    pub handle: Option<Handle>,
    pub pds: Url,
}

#[derive(Debug, Deserialize)]
struct DidDocument {
    #[serde(default, rename = "alsoKnownAs")]
    also_known_as: Vec<String>,
    #[serde(default)]
    service: Vec<DidService>,
}

#[derive(Debug, Deserialize)]
struct DidService {
    id: String,
    #[serde(rename = "type")]
    service_type: String,
    #[serde(rename = "serviceEndpoint")]
    service_endpoint: String,
}

impl DidDocument {
    fn handle(&self) -> Option<Handle> {
        self.also_known_as
            .iter()
            .filter_map(|aka| aka.strip_prefix("at://"))
            .find_map(|h| Handle::new(h).ok())
    }

    fn pds(&self) -> Option<Url> {
        self.service
            .iter()
            .find(|s| {
                s.id.ends_with("#atproto_pds")
                    || s.service_type == "AtprotoPersonalDataServer"
            })
            .and_then(|s| Url::parse(&s.service_endpoint).ok())
    }
}

pub struct IdResolver {
    http: reqwest::Client,
    plc_directory: Url,
    dids: DashMap<Did, (ResolvedIdentity, Instant)>,
    handles: DashMap<Handle, (Did, Instant)>,
    ttl: Duration,
}

impl IdResolver {
    pub fn new(plc_directory: Url) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            plc_directory,
            dids: DashMap::new(),
            handles: DashMap::new(),
            ttl: DEFAULT_TTL,
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Canonical identity for a DID: its current handle and PDS endpoint.
    pub async fn resolve_did(&self, did: &Did) -> Result<ResolvedIdentity, ClientError> {
        if let Some(entry) = self.dids.get(did) {
            let (identity, fetched_at) = entry.value();
            if fetched_at.elapsed() < self.ttl {
                return Ok(identity.clone());
            }
        }

        let doc = self.fetch_document(did).await?;
        let pds = doc
            .pds()
            .ok_or_else(|| ClientError::Identity(format!("{did} has no PDS service entry")))?;
        let identity = ResolvedIdentity {
            did: did.clone(),
            handle: doc.handle(),
            pds,
        };
        self.dids.insert(did.clone(), (identity.clone(), Instant::now()));
        if let Some(handle) = &identity.handle {
            self.handles.insert(handle.clone(), (did.clone(), Instant::now()));
        }
        Ok(identity)
    }

    /// Handle → DID via the handle domain's well-known endpoint.
    pub async fn resolve_handle(&self, handle: &Handle) -> Result<Did, ClientError> {
        if let Some(entry) = self.handles.get(handle) {
            let (did, fetched_at) = entry.value();
            if fetched_at.elapsed() < self.ttl {
                return Ok(did.clone());
            }
        }

        let url = Url::parse(&format!("https://{handle}/.well-known/atproto-did"))?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Identity(format!(
                "handle {handle} did not resolve ({status})"
            )));
        }
        let body = response.text().await?;
        let did = Did::new(body.trim())
            .map_err(|e| ClientError::Identity(format!("handle {handle}: {e}")))?;
        self.handles.insert(handle.clone(), (did.clone(), Instant::now()));
        Ok(did)
    }

    async fn fetch_document(&self, did: &Did) -> Result<DidDocument, ClientError> {
        let url = match did.method() {
            "plc" => {
                // set_path: the DID's `did:` prefix must not be taken for a
                // URL scheme by join()
                let mut url = self.plc_directory.clone();
                url.set_path(&format!("/{}", did.as_str()));
                url
            }
            "web" => {
                let domain = did.as_str().trim_start_matches("did:web:");
                Url::parse(&format!("https://{domain}/.well-known/did.json"))?
            }
            other => {
                return Err(ClientError::Identity(format!(
                    "unsupported DID method {other:?}"
                )));
            }
        };
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Identity(format!(
                "document fetch for {did} failed ({status})"
            )));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_extracts_handle_and_pds() {
        let doc: DidDocument = serde_json::from_str(
            r##"{
                "alsoKnownAs": ["at://alice.tangled.sh"],
                "service": [{
                    "id": "#atproto_pds",
                    "type": "AtprotoPersonalDataServer",
                    "serviceEndpoint": "https://pds.example.com"
                }]
            }"##,
        )
        .unwrap();
        assert_eq!(doc.handle().unwrap().as_str(), "alice.tangled.sh");
        assert_eq!(doc.pds().unwrap().as_str(), "https://pds.example.com/");
    }

    #[test]
    fn document_without_pds_yields_none() {
        let doc: DidDocument = serde_json::from_str(r#"{"alsoKnownAs": []}"#).unwrap();
        assert!(doc.pds().is_none());
        assert!(doc.handle().is_none());
    }
}
