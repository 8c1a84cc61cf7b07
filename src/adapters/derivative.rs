//! Derivative generator and upload clients.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_LOCATION, CONTENT_TYPE};

use super::{success, HttpClient};
use crate::core::error::{Result, SyncError};

/// Header carrying the opaque generator arguments
pub const ARGS_HEADER: &str = "X-Derivative-Args";

/// Header carrying the uri of the source the derivative is made from
pub const SOURCE_HEADER: &str = "X-Derivative-Source";

/// A generated derivative
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivative {
    pub bytes: Bytes,
    pub content_type: String,
}

#[async_trait]
pub trait DerivativeService: Send + Sync {
    async fn generate(
        &self,
        source_uri: &str,
        mimetype: &str,
        args: &str,
        authorization: &str,
    ) -> Result<Derivative>;
}

#[async_trait]
pub trait DerivativeSink: Send + Sync {
    async fn upload(
        &self,
        destination_uri: &str,
        file_upload_uri: &str,
        derivative: &Derivative,
        authorization: &str,
    ) -> Result<()>;
}

pub struct HttpDerivativeService {
    http: HttpClient,
    service_url: String,
}

impl HttpDerivativeService {
    pub fn new(http: HttpClient, service_url: impl Into<String>) -> Self {
        Self {
            http,
            service_url: service_url.into(),
        }
    }
}

#[async_trait]
impl DerivativeService for HttpDerivativeService {
    async fn generate(
        &self,
        source_uri: &str,
        mimetype: &str,
        args: &str,
        authorization: &str,
    ) -> Result<Derivative> {
        let request = self
            .http
            .inner()
            .get(self.service_url.as_str())
            .header(ACCEPT, mimetype)
            .header(ARGS_HEADER, args)
            .header(SOURCE_HEADER, source_uri)
            .header(AUTHORIZATION, authorization);
        let response = self.http.send("generator.get", request).await?;

        let response = success("generator.get", response).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(mimetype)
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::transient("generator.get", e.to_string()))?;

        Ok(Derivative {
            bytes,
            content_type,
        })
    }
}

pub struct HttpUploader {
    http: HttpClient,
}

impl HttpUploader {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl DerivativeSink for HttpUploader {
    async fn upload(
        &self,
        destination_uri: &str,
        file_upload_uri: &str,
        derivative: &Derivative,
        authorization: &str,
    ) -> Result<()> {
        let request = self
            .http
            .inner()
            .put(destination_uri)
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_TYPE, derivative.content_type.as_str())
            .header(CONTENT_LOCATION, file_upload_uri)
            .body(derivative.bytes.clone());
        let response = self.http.send("derivative.put", request).await?;
        success("derivative.put", response).await?;
        Ok(())
    }
}
