//! Repository write-through proxy client.
//!
//! The proxy fetches source content from the content-management system
//! itself, so create and update requests carry no body: only the forwarded
//! credential and the resource path in the url.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, LOCATION};

use super::{check, join, link_target, success, ConvergenceRule, HttpClient, Outcome};
use crate::config::ConvergenceConfig;
use crate::core::error::Result;

/// What the proxy reports about a stored resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyResponse {
    /// Canonical uri of the stored resource
    pub location: Option<String>,

    /// Paired description resource, for binaries
    pub described_by: Option<String>,
}

#[async_trait]
pub trait WriteProxy: Send + Sync {
    /// `Converged` when the resource already exists and the proxy did not
    /// say where
    async fn create(&self, content_path: &str, authorization: &str) -> Result<Outcome<ProxyResponse>>;

    async fn update(&self, repo_path: &str, authorization: &str) -> Result<ProxyResponse>;

    async fn delete(&self, repo_path: &str, authorization: &str) -> Result<Outcome<()>>;

    /// The repository location a description resource describes
    async fn describes(&self, repo_path: &str, authorization: &str) -> Result<Option<String>>;
}

pub struct HttpWriteProxy {
    http: HttpClient,
    base_url: String,
    create_rule: ConvergenceRule,
    delete_rule: ConvergenceRule,
}

impl HttpWriteProxy {
    pub fn new(http: HttpClient, base_url: impl Into<String>, convergence: &ConvergenceConfig) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            create_rule: convergence.create.clone(),
            delete_rule: convergence.delete.clone(),
        }
    }

    fn stored(response: &reqwest::Response) -> ProxyResponse {
        ProxyResponse {
            location: response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            described_by: link_target(response, "describedby"),
        }
    }
}

#[async_trait]
impl WriteProxy for HttpWriteProxy {
    async fn create(&self, content_path: &str, authorization: &str) -> Result<Outcome<ProxyResponse>> {
        let request = self
            .http
            .inner()
            .post(join(&self.base_url, content_path))
            .header(AUTHORIZATION, authorization);
        let response = self.http.send("proxy.create", request).await?;

        // A conflict that names the stored resource is as good as a create
        let status = response.status();
        if !status.is_success() && self.create_rule.matches(status.as_u16()) {
            let stored = Self::stored(&response);
            return Ok(match stored.location {
                Some(_) => Outcome::Done(stored),
                None => Outcome::Converged,
            });
        }

        let response = success("proxy.create", response).await?;
        Ok(Outcome::Done(Self::stored(&response)))
    }

    async fn update(&self, repo_path: &str, authorization: &str) -> Result<ProxyResponse> {
        let request = self
            .http
            .inner()
            .put(join(&self.base_url, repo_path))
            .header(AUTHORIZATION, authorization);
        let response = self.http.send("proxy.update", request).await?;

        let response = success("proxy.update", response).await?;
        Ok(Self::stored(&response))
    }

    async fn delete(&self, repo_path: &str, authorization: &str) -> Result<Outcome<()>> {
        let request = self
            .http
            .inner()
            .delete(join(&self.base_url, repo_path))
            .header(AUTHORIZATION, authorization);
        let response = self.http.send("proxy.delete", request).await?;

        Ok(match check("proxy.delete", response, &self.delete_rule).await? {
            Outcome::Done(_) => Outcome::Done(()),
            Outcome::Converged => Outcome::Converged,
        })
    }

    async fn describes(&self, repo_path: &str, authorization: &str) -> Result<Option<String>> {
        let request = self
            .http
            .inner()
            .get(join(&self.base_url, repo_path))
            .header(AUTHORIZATION, authorization);
        let response = self.http.send("proxy.describes", request).await?;

        let response = success("proxy.describes", response).await?;
        Ok(link_target(&response, "describes"))
    }
}
