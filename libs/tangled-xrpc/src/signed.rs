//! HMAC-signed HTTP against a knot's mutating surface. One client per knot,
//! bound to that knot's registration secret.

use chrono::{SecondsFormat, Utc};
use reqwest::{Method, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use url::Url;

use tangled_types::Did;

use crate::error::ClientError;
use crate::signing;

pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct MergeRequest {
    pub branch: String,
    pub commit_message: String,
    pub commit_body: Option<String>,
    pub author_name: String,
    pub author_email: String,
    pub patch: String,
}

#[derive(Clone)]
pub struct SignedClient {
    http: reqwest::Client,
    base: Url,
    secret: SecretString,
}

impl SignedClient {
    pub fn new(domain: &str, secret: SecretString, dev: bool) -> Result<Self, ClientError> {
        let scheme = if dev { "http" } else { "https" };
        let base = Url::parse(&format!("{scheme}://{domain}/"))?;
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self { http, base, secret })
    }

    async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, ClientError> {
        // set_path instead of join: path segments may contain DIDs, whose
        // leading `did:` would otherwise parse as a URL scheme
        let mut url = self.base.clone();
        url.set_path(path);
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let sig = signing::signature(
            self.secret.expose_secret(),
            method.as_str(),
            url.path(),
            &timestamp,
        )?;

        let mut req = self
            .http
            .request(method, url)
            .header(signing::TIMESTAMP_HEADER, timestamp)
            .header(signing::SIGNATURE_HEADER, sig);
        if let Some(body) = body {
            req = req.json(body);
        }
        Ok(req.send().await?)
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

    /// Legacy HMAC-era bootstrap ping.
    pub async fn init(&self, did: &Did) -> Result<(), ClientError> {
        let body = serde_json::json!({ "did": did });
        Self::expect_ok(self.send(Method::POST, "/init", Some(&body)).await?).await?;
        Ok(())
    }

    pub async fn new_repo(
        &self,
        did: &Did,
        name: &str,
        default_branch: &str,
    ) -> Result<(), ClientError> {
        let body = serde_json::json!({
            "did": did,
            "name": name,
            "default_branch": default_branch,
        });
        Self::expect_ok(self.send(Method::PUT, "/repo/new", Some(&body)).await?).await?;
        Ok(())
    }

    pub async fn fork_repo(&self, did: &Did, source: &str, name: &str) -> Result<(), ClientError> {
        let body = serde_json::json!({ "did": did, "source": source, "name": name });
        Self::expect_ok(self.send(Method::POST, "/repo/fork", Some(&body)).await?).await?;
        Ok(())
    }

    pub async fn delete_repo(&self, did: &Did, name: &str) -> Result<(), ClientError> {
        let body = serde_json::json!({ "did": did, "name": name });
        Self::expect_ok(self.send(Method::DELETE, "/repo", Some(&body)).await?).await?;
        Ok(())
    }

    pub async fn merge(
        &self,
        did: &Did,
        repo: &str,
        request: &MergeRequest,
    ) -> Result<(), ClientError> {
        let path = format!("/{}/{}/merge", did.as_str(), repo);
        Self::expect_ok(self.send(Method::POST, &path, Some(request)).await?).await?;
        Ok(())
    }

    /// Dry-run merge; `Ok(true)` means the patch applies cleanly.
    pub async fn merge_check(
        &self,
        did: &Did,
        repo: &str,
        request: &MergeRequest,
    ) -> Result<bool, ClientError> {
        let path = format!("/{}/{}/merge/check", did.as_str(), repo);
        let response = self.send(Method::POST, &path, Some(request)).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::CONFLICT | StatusCode::BAD_REQUEST => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ClientError::Status { status, body })
            }
        }
    }

    /// Create a tracking ref so fork/branch pulls survive source rewrites.
    pub async fn hidden_ref(
        &self,
        did: &Did,
        repo: &str,
        src: &str,
        tgt: &str,
    ) -> Result<(), ClientError> {
        let path = format!("/{}/{}/hidden-ref/{}/{}", did.as_str(), repo, src, tgt);
        Self::expect_ok(self.send::<()>(Method::POST, &path, None).await?).await?;
        Ok(())
    }

    pub async fn set_default_branch(
        &self,
        did: &Did,
        repo: &str,
        branch: &str,
    ) -> Result<(), ClientError> {
        let path = format!("/{}/{}/branches/default", did.as_str(), repo);
        let body = serde_json::json!({ "branch": branch });
        Self::expect_ok(self.send(Method::PUT, &path, Some(&body)).await?).await?;
        Ok(())
    }

    /// Register an SSH key principal for a collaborator.
    pub async fn add_collaborator(
        &self,
        did: &Did,
        repo: &str,
        collaborator: &Did,
    ) -> Result<(), ClientError> {
        let path = format!("/{}/{}/collaborator/add", did.as_str(), repo);
        let body = serde_json::json!({ "did": collaborator });
        Self::expect_ok(self.send(Method::POST, &path, Some(&body)).await?).await?;
        Ok(())
    }

    pub async fn add_member(&self, did: &Did) -> Result<(), ClientError> {
        let body = serde_json::json!({ "did": did });
        Self::expect_ok(self.send(Method::PUT, "/member/add", Some(&body)).await?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_mode_uses_plain_http() {
        let client = SignedClient::new("localhost:6000", SecretString::from("s"), true).unwrap();
        assert_eq!(client.base.scheme(), "http");
        let client = SignedClient::new("knot.example.com", SecretString::from("s"), false).unwrap();
        assert_eq!(client.base.scheme(), "https");
    }
}
