//! Router orchestration.
//!
//! Turns the validated router plans into pipelines over a shared HTTP client
//! and a message bus, and runs each as a consumer pool on its input channel.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::adapters::HttpClient;
use crate::config::{AppConfig, ConfigError, RouterKind, RouterPlan};
use crate::connectors::{derivative, indexer, repository, Wiring};
use crate::connectors::{DerivativeServices, RepositoryServices, TriplestoreServices};
use crate::transport::{ConsumerPool, MessageBus};

use super::stage::MessageHandler;

/// Owns the validated configuration of every enabled router
pub struct Orchestrator {
    plans: Vec<RouterPlan>,
    http: HttpClient,
    bus: Arc<dyn MessageBus>,
}

impl Orchestrator {
    /// Validate `config` and build the shared HTTP client
    pub fn new(config: &AppConfig, bus: Arc<dyn MessageBus>) -> Result<Self, ConfigError> {
        let plans = config.plan()?;
        let http = HttpClient::new(&config.http)?;
        Ok(Self { plans, http, bus })
    }

    pub fn plans(&self) -> &[RouterPlan] {
        &self.plans
    }

    /// Build the pipeline for one router
    pub fn handler(&self, plan: &RouterPlan) -> Arc<dyn MessageHandler> {
        let wiring = Wiring::from_plan(plan, self.bus.clone());
        match &plan.kind {
            RouterKind::Repository(settings) => Arc::new(repository::pipeline(
                &wiring,
                settings,
                RepositoryServices::http(&self.http, settings),
            )),
            RouterKind::Triplestore(settings) => Arc::new(indexer::pipeline(
                &wiring,
                settings,
                TriplestoreServices::http(&self.http, settings),
            )),
            RouterKind::Derivative(settings) => Arc::new(derivative::pipeline(
                &wiring,
                DerivativeServices::http(&self.http, settings),
            )),
        }
    }

    /// Start a consumer pool for every router
    #[instrument(skip(self), fields(routers = self.plans.len()))]
    pub fn start(&self) -> Vec<ConsumerPool> {
        self.plans
            .iter()
            .map(|plan| {
                info!(
                    router = %plan.name,
                    kind = plan.kind.label(),
                    input = %plan.input,
                    "Starting router"
                );
                ConsumerPool::spawn(
                    self.handler(plan),
                    self.bus.consumer(&plan.input),
                    &plan.consumers,
                )
            })
            .collect()
    }
}
