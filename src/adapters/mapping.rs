//! Path-mapping directory client.
//!
//! The directory is the authority for which content-management path maps to
//! which repository path.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{check, join, status_error, ConvergenceRule, HttpClient, Outcome};
use crate::config::ConvergenceConfig;
use crate::core::error::{Result, SyncError};

/// One association between the two namespaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    pub content_path: String,
    pub repo_path: String,
}

impl Mapping {
    pub fn new(content_path: impl Into<String>, repo_path: impl Into<String>) -> Self {
        Self {
            content_path: content_path.into(),
            repo_path: repo_path.into(),
        }
    }
}

#[async_trait]
pub trait MappingDirectory: Send + Sync {
    async fn register(&self, mapping: &Mapping, authorization: &str) -> Result<Outcome<()>>;

    async fn lookup_by_content_path(&self, content_path: &str, authorization: &str) -> Result<Option<Mapping>>;

    async fn lookup_by_repo_path(&self, repo_path: &str, authorization: &str) -> Result<Option<Mapping>>;

    async fn unregister(&self, content_path: &str, authorization: &str) -> Result<Outcome<()>>;
}

pub struct HttpMappingDirectory {
    http: HttpClient,
    base_url: String,
    register_rule: ConvergenceRule,
    unregister_rule: ConvergenceRule,
}

impl HttpMappingDirectory {
    pub fn new(http: HttpClient, base_url: impl Into<String>, convergence: &ConvergenceConfig) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            register_rule: convergence.register.clone(),
            unregister_rule: convergence.unregister.clone(),
        }
    }

    async fn lookup(&self, call: &str, namespace: &str, path: &str, authorization: &str) -> Result<Option<Mapping>> {
        let request = self
            .http
            .inner()
            .get(join(&self.base_url, namespace))
            .query(&[("path", path)])
            .header(AUTHORIZATION, authorization);
        let response = self.http.send(call, request).await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(call, status, &body));
        }

        let mapping = response
            .json::<Mapping>()
            .await
            .map_err(|e| SyncError::transient(call, format!("unreadable mapping: {e}")))?;
        Ok(Some(mapping))
    }
}

#[async_trait]
impl MappingDirectory for HttpMappingDirectory {
    async fn register(&self, mapping: &Mapping, authorization: &str) -> Result<Outcome<()>> {
        let request = self
            .http
            .inner()
            .post(self.base_url.as_str())
            .json(mapping)
            .header(AUTHORIZATION, authorization);
        let response = self.http.send("mapping.register", request).await?;

        Ok(match check("mapping.register", response, &self.register_rule).await? {
            Outcome::Done(_) => Outcome::Done(()),
            Outcome::Converged => Outcome::Converged,
        })
    }

    async fn lookup_by_content_path(&self, content_path: &str, authorization: &str) -> Result<Option<Mapping>> {
        self.lookup("mapping.lookup_content", "content", content_path, authorization)
            .await
    }

    async fn lookup_by_repo_path(&self, repo_path: &str, authorization: &str) -> Result<Option<Mapping>> {
        self.lookup("mapping.lookup_repository", "repository", repo_path, authorization)
            .await
    }

    async fn unregister(&self, content_path: &str, authorization: &str) -> Result<Outcome<()>> {
        let request = self
            .http
            .inner()
            .delete(join(&self.base_url, "content"))
            .query(&[("path", content_path)])
            .header(AUTHORIZATION, authorization);
        let response = self.http.send("mapping.unregister", request).await?;

        Ok(match check("mapping.unregister", response, &self.unregister_rule).await? {
            Outcome::Done(_) => Outcome::Done(()),
            Outcome::Converged => Outcome::Converged,
        })
    }
}

#[cfg(test)]
pub(crate) use memory::MemoryDirectory;
