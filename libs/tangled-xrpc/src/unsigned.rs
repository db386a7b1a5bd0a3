//! Anonymous read-only queries against a knot. Responses are surfaced
//! nearly raw so callers can branch on status: a 404 means the knot does
//! not support the endpoint, a 400 a bad request.

use std::time::Duration;

use reqwest::Response;
use serde::Deserialize;
use url::Url;

use tangled_types::Did;

use crate::error::ClientError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// `/owner` gets a tighter limit: one second and at most 1 KiB of body.
const OWNER_TIMEOUT: Duration = Duration::from_secs(1);
const OWNER_MAX_BODY: usize = 1024;

/// Pull-submission capability flags advertised by a knot.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Capabilities {
    #[serde(default)]
    pub format_patch: bool,
    #[serde(default)]
    pub branch_submissions: bool,
    #[serde(default)]
    pub fork_submissions: bool,
    #[serde(default)]
    pub patch_submissions: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comparison {
    pub rev1: String,
    pub rev2: String,
    pub patch: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Branch {
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub hash: Option<String>,
}

#[derive(Clone)]
pub struct UnsignedClient {
    http: reqwest::Client,
    base: Url,
}

impl UnsignedClient {
    pub fn new(domain: &str, dev: bool) -> Result<Self, ClientError> {
        let scheme = if dev { "http" } else { "https" };
        let base = Url::parse(&format!("{scheme}://{domain}/"))?;
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self { http, base })
    }

    /// Raw GET; the response is returned whatever its status.
    pub async fn get_raw(&self, path: &str) -> Result<Response, ClientError> {
        // set_path instead of join: path segments may contain DIDs, whose
        // leading `did:` would otherwise parse as a URL scheme
        let mut url = self.base.clone();
        url.set_path(path);
        Ok(self.http.get(url).send().await?)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.get_raw(path).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }
        Ok(response.json().await?)
    }

    pub async fn capabilities(&self) -> Result<Capabilities, ClientError> {
        self.get_json("/capabilities").await
    }

    /// Owner proof: the knot answers with exactly the DID that operates it.
    /// Trimmed, 1 KiB cap, 1 s timeout.
    pub async fn owner(&self) -> Result<Did, ClientError> {
        let mut url = self.base.clone();
        url.set_path("/owner");
        let response = self.http.get(url).timeout(OWNER_TIMEOUT).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status,
                body: String::new(),
            });
        }

        let mut body = Vec::new();
        let mut response = response;
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            if body.len() > OWNER_MAX_BODY {
                return Err(ClientError::BadResponse(format!(
                    "/owner body exceeds {OWNER_MAX_BODY} bytes"
                )));
            }
        }
        let text = String::from_utf8(body)
            .map_err(|_| ClientError::BadResponse("/owner body is not UTF-8".to_owned()))?;
        Did::new(text.trim())
            .map_err(|e| ClientError::BadResponse(format!("/owner body is not a DID: {e}")))
    }

    pub async fn branches(&self, did: &Did, repo: &str) -> Result<Vec<Branch>, ClientError> {
        self.get_json(&format!("/{}/{}/branches", did.as_str(), repo)).await
    }

    pub async fn branch(&self, did: &Did, repo: &str, name: &str) -> Result<Branch, ClientError> {
        self.get_json(&format!("/{}/{}/branches/{}", did.as_str(), repo, name)).await
    }

    pub async fn default_branch(&self, did: &Did, repo: &str) -> Result<Branch, ClientError> {
        self.get_json(&format!("/{}/{}/branches/default", did.as_str(), repo)).await
    }

    pub async fn tags(&self, did: &Did, repo: &str) -> Result<Response, ClientError> {
        self.get_raw(&format!("/{}/{}/tags", did.as_str(), repo)).await
    }

    pub async fn tree(&self, did: &Did, repo: &str, r#ref: &str) -> Result<Response, ClientError> {
        self.get_raw(&format!("/{}/{}/tree/{}", did.as_str(), repo, r#ref)).await
    }

    pub async fn blob(
        &self,
        did: &Did,
        repo: &str,
        r#ref: &str,
        path: &str,
    ) -> Result<Response, ClientError> {
        self.get_raw(&format!("/{}/{}/blob/{}/{}", did.as_str(), repo, r#ref, path)).await
    }

    pub async fn log(&self, did: &Did, repo: &str, r#ref: &str) -> Result<Response, ClientError> {
        self.get_raw(&format!("/{}/{}/log/{}", did.as_str(), repo, r#ref)).await
    }

    pub async fn commit(&self, did: &Did, repo: &str, r#ref: &str) -> Result<Response, ClientError> {
        self.get_raw(&format!("/{}/{}/commit/{}", did.as_str(), repo, r#ref)).await
    }

    /// Knot-side compare between two revisions; yields the derived patch.
    pub async fn compare(
        &self,
        did: &Did,
        repo: &str,
        rev1: &str,
        rev2: &str,
    ) -> Result<Comparison, ClientError> {
        self.get_json(&format!("/{}/{}/compare/{}/{}", did.as_str(), repo, rev1, rev2)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_default_to_unsupported() {
        let caps: Capabilities = serde_json::from_str("{}").unwrap();
        assert!(!caps.format_patch);
        assert!(!caps.branch_submissions);
        assert!(!caps.fork_submissions);
        assert!(!caps.patch_submissions);

        let caps: Capabilities =
            serde_json::from_str(r#"{"format_patch": true, "patch_submissions": true}"#).unwrap();
        assert!(caps.format_patch);
        assert!(caps.patch_submissions);
        assert!(!caps.fork_submissions);
    }
}
