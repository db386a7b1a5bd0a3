//! Record CRUD against a user's PDS over XRPC:
//! `com.atproto.repo.putRecord` / `getRecord` / `deleteRecord`.
//!
//! The appview acts on behalf of the signed-in user; how the bearer token
//! is obtained (OAuth/session plumbing) is outside this crate; callers
//! hand over a ready [`PdsSession`].

use reqwest::Response;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use tangled_types::{AtUri, Did};

use crate::error::ClientError;

pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Everything needed to write into one user's repo.
#[derive(Clone)]
pub struct PdsSession {
    pub did: Did,
    pub endpoint: Url,
    pub access_token: SecretString,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PutRecordOutput {
    pub uri: AtUri,
    pub cid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetRecordOutput {
    pub uri: AtUri,
    #[serde(default)]
    pub cid: Option<String>,
    pub value: serde_json::Value,
}

#[derive(Clone)]
pub struct PdsClient {
    http: reqwest::Client,
}

impl PdsClient {
    pub fn new() -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }

    fn xrpc(endpoint: &Url, method: &str) -> Result<Url, ClientError> {
        Ok(endpoint.join(&format!("xrpc/{method}"))?)
    }

    async fn expect_ok(response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::Status { status, body })
        }
    }

    /// Write a record; the returned AT-URI is the authoritative identifier.
    /// `swap_cid` makes the write conditional on the current record CID
    /// (compare-and-swap for updates).
    pub async fn put_record(
        &self,
        session: &PdsSession,
        collection: &str,
        rkey: &str,
        record: &serde_json::Value,
        swap_cid: Option<&str>,
    ) -> Result<PutRecordOutput, ClientError> {
        let url = Self::xrpc(&session.endpoint, "com.atproto.repo.putRecord")?;
        let mut body = serde_json::json!({
            "repo": session.did,
            "collection": collection,
            "rkey": rkey,
            "record": record,
        });
        if let Some(cid) = swap_cid {
            body["swapRecord"] = serde_json::Value::String(cid.to_owned());
        }
        let response = self
            .http
            .post(url)
            .bearer_auth(session.access_token.expose_secret())
            .json(&body)
            .send()
            .await?;
        Ok(Self::expect_ok(response).await?.json().await?)
    }

    /// Anonymous read; records are public.
    pub async fn get_record(
        &self,
        endpoint: &Url,
        repo: &Did,
        collection: &str,
        rkey: &str,
    ) -> Result<GetRecordOutput, ClientError> {
        let mut url = Self::xrpc(endpoint, "com.atproto.repo.getRecord")?;
        url.query_pairs_mut()
            .append_pair("repo", repo.as_str())
            .append_pair("collection", collection)
            .append_pair("rkey", rkey);
        let response = self.http.get(url).send().await?;
        Ok(Self::expect_ok(response).await?.json().await?)
    }

    pub async fn delete_record(
        &self,
        session: &PdsSession,
        collection: &str,
        rkey: &str,
    ) -> Result<(), ClientError> {
        let url = Self::xrpc(&session.endpoint, "com.atproto.repo.deleteRecord")?;
        let body = serde_json::json!({
            "repo": session.did,
            "collection": collection,
            "rkey": rkey,
        });
        let response = self
            .http
            .post(url)
            .bearer_auth(session.access_token.expose_secret())
            .json(&body)
            .send()
            .await?;
        Self::expect_ok(response).await?;
        Ok(())
    }
}
