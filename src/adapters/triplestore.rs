//! Triplestore and RDF source clients.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};

use super::{success, HttpClient};
use crate::core::error::{Result, SyncError};

/// Applies SPARQL update statements
#[async_trait]
pub trait Triplestore: Send + Sync {
    async fn update(&self, statement: &str, authorization: &str) -> Result<()>;
}

/// Fetches the RDF representation of a resource
#[async_trait]
pub trait RdfSource: Send + Sync {
    async fn fetch(&self, uri: &str, accept: &str, authorization: &str) -> Result<String>;
}

pub struct HttpTriplestore {
    http: HttpClient,
    endpoint: String,
}

impl HttpTriplestore {
    pub fn new(http: HttpClient, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Triplestore for HttpTriplestore {
    /// POSTs `update=<statement>` form-encoded
    async fn update(&self, statement: &str, authorization: &str) -> Result<()> {
        let request = self
            .http
            .inner()
            .post(self.endpoint.as_str())
            .header(AUTHORIZATION, authorization)
            .form(&[("update", statement)]);
        let response = self.http.send("triplestore.update", request).await?;
        success("triplestore.update", response).await?;
        Ok(())
    }
}

pub struct HttpRdfSource {
    http: HttpClient,
}

impl HttpRdfSource {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl RdfSource for HttpRdfSource {
    async fn fetch(&self, uri: &str, accept: &str, authorization: &str) -> Result<String> {
        let request = self
            .http
            .inner()
            .get(uri)
            .header(ACCEPT, accept)
            .header(AUTHORIZATION, authorization);
        let response = self.http.send("rdf.fetch", request).await?;

        success("rdf.fetch", response)
            .await?
            .text()
            .await
            .map_err(|e| SyncError::transient("rdf.fetch", e.to_string()))
    }
}
