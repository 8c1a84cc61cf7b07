//! Derivative connector.
//!
//! Generate events name a source, a target mimetype and where the result
//! goes. The derivative is fetched from a generator service and PUT to the
//! destination. Nothing durable is written before the final PUT, so a run
//! that fails permanently has nothing to compensate.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::Wiring;
use crate::adapters::{Derivative, DerivativeService, DerivativeSink, HttpClient, HttpDerivativeService, HttpUploader};
use crate::core::error::{Result, SyncError};
use crate::core::retry::RedeliveryPolicy;
use crate::core::stage::{Exchange, Pipeline, Stage, Transition};
use crate::domain::{AttachmentContent, EventType};

pub const ACCEPTED: [EventType; 1] = [EventType::Generate];

#[derive(Debug, Clone)]
pub struct DerivativeSettings {
    pub service_url: String,
}

#[derive(Clone)]
pub struct DerivativeServices {
    pub generator: Arc<dyn DerivativeService>,
    pub sink: Arc<dyn DerivativeSink>,
}

impl DerivativeServices {
    pub fn http(http: &HttpClient, settings: &DerivativeSettings) -> Self {
        Self {
            generator: Arc::new(HttpDerivativeService::new(
                http.clone(),
                settings.service_url.clone(),
            )),
            sink: Arc::new(HttpUploader::new(http.clone())),
        }
    }
}

/// Validated generator instructions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivativeRequest {
    pub source_uri: String,
    pub destination_uri: String,
    pub mimetype: String,
    pub args: String,
    pub file_upload_uri: String,
}

impl DerivativeRequest {
    pub fn from_content(content: &AttachmentContent) -> Result<Self> {
        fn field(value: &Option<String>, name: &str) -> Result<String> {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
                .ok_or_else(|| SyncError::malformed(format!("attachment content has no {name}")))
        }

        Ok(Self {
            source_uri: field(&content.source_uri, "sourceUri")?,
            destination_uri: field(&content.destination_uri, "destinationUri")?,
            mimetype: field(&content.mimetype, "mimetype")?,
            args: content.args.clone().unwrap_or_default(),
            file_upload_uri: field(&content.file_upload_uri, "fileUploadUri")?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct DerivativeContext {
    pub request: Option<DerivativeRequest>,
    pub derivative: Option<Derivative>,
}

pub fn pipeline(wiring: &Wiring, services: DerivativeServices) -> Pipeline<DerivativeContext> {
    wiring
        .pipeline(&ACCEPTED)
        .stage(PrepareRequest)
        .stage(GenerateDerivative {
            generator: services.generator,
            redelivery: wiring.redelivery.clone(),
        })
        .stage(UploadDerivative {
            sink: services.sink,
            redelivery: wiring.redelivery.clone(),
        })
}

fn request(exchange: &Exchange<DerivativeContext>) -> Result<&DerivativeRequest> {
    exchange
        .context()
        .request
        .as_ref()
        .ok_or_else(|| SyncError::malformed("derivative request was never prepared"))
}

struct PrepareRequest;

#[async_trait]
impl Stage<DerivativeContext> for PrepareRequest {
    fn name(&self) -> &str {
        "prepare_request"
    }

    async fn process(&self, exchange: Exchange<DerivativeContext>) -> Result<Transition<DerivativeContext>> {
        let content = exchange
            .event()
            .content()
            .ok_or_else(|| SyncError::malformed("Generate event carries no attachment content"))?;
        let request = DerivativeRequest::from_content(content)?;

        debug!(source = %request.source_uri, mimetype = %request.mimetype, "Prepared derivative request");
        Ok(Transition::Continue(exchange.extend(|ctx| DerivativeContext {
            request: Some(request),
            ..ctx
        })))
    }
}

struct GenerateDerivative {
    generator: Arc<dyn DerivativeService>,
    redelivery: RedeliveryPolicy,
}

#[async_trait]
impl Stage<DerivativeContext> for GenerateDerivative {
    fn name(&self) -> &str {
        "generate_derivative"
    }

    async fn process(&self, exchange: Exchange<DerivativeContext>) -> Result<Transition<DerivativeContext>> {
        let request = request(&exchange)?;
        let authorization = exchange.authorization();

        let generator = &self.generator;
        let derivative = self
            .redelivery
            .attempt("generator.get", || {
                generator.generate(
                    &request.source_uri,
                    &request.mimetype,
                    &request.args,
                    authorization,
                )
            })
            .await?;

        debug!(bytes = derivative.bytes.len(), content_type = %derivative.content_type, "Derivative generated");
        Ok(Transition::Continue(exchange.extend(|ctx| DerivativeContext {
            derivative: Some(derivative),
            ..ctx
        })))
    }
}

struct UploadDerivative {
    sink: Arc<dyn DerivativeSink>,
    redelivery: RedeliveryPolicy,
}

#[async_trait]
impl Stage<DerivativeContext> for UploadDerivative {
    fn name(&self) -> &str {
        "upload_derivative"
    }

    async fn process(&self, exchange: Exchange<DerivativeContext>) -> Result<Transition<DerivativeContext>> {
        let request = request(&exchange)?;
        let derivative = exchange
            .context()
            .derivative
            .as_ref()
            .ok_or_else(|| SyncError::malformed("no derivative to upload"))?;
        let authorization = exchange.authorization();

        let sink = &self.sink;
        self.redelivery
            .attempt("derivative.put", || {
                sink.upload(
                    &request.destination_uri,
                    &request.file_upload_uri,
                    derivative,
                    authorization,
                )
            })
            .await?;

        info!(destination = %request.destination_uri, "Derivative uploaded");
        Ok(Transition::Complete(exchange))
    }
}
