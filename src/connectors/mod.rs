//! Event routers built from pipeline stages.
//!
//! - `repository`: keeps the repository and the path-mapping directory in
//!   step with content changes
//! - `indexer`: mirrors repository resources into a triplestore
//! - `derivative`: generates derivatives and writes them back

pub mod derivative;
pub mod indexer;
pub mod repository;

use std::sync::Arc;

use crate::config::RouterPlan;
use crate::core::retry::{DeadLetterChannel, RedeliveryPolicy};
use crate::core::stage::Pipeline;
use crate::domain::{EventFilter, EventType};
use crate::transport::MessageBus;

pub use derivative::{DerivativeContext, DerivativeServices, DerivativeSettings};
pub use indexer::{IndexContext, TriplestoreServices, TriplestoreSettings};
pub use repository::{RepositoryServices, RepositorySettings};

/// What every router needs besides its own services
#[derive(Clone)]
pub struct Wiring {
    pub name: String,
    pub media_type: String,
    pub redelivery: RedeliveryPolicy,
    pub output: Option<String>,
    pub dead_letter: Option<String>,
    pub bus: Arc<dyn MessageBus>,
}

impl Wiring {
    pub fn from_plan(plan: &RouterPlan, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            name: plan.name.clone(),
            media_type: plan.media_type.clone(),
            redelivery: plan.redelivery.clone(),
            output: plan.output.clone(),
            dead_letter: plan.dead_letter.clone(),
            bus,
        }
    }

    /// An empty pipeline accepting `accepted` event types
    pub fn pipeline<C>(&self, accepted: &[EventType]) -> Pipeline<C>
    where
        C: Default + Send + Sync + 'static,
    {
        Pipeline::new(
            self.name.clone(),
            EventFilter::new(self.media_type.clone(), accepted),
            DeadLetterChannel::new(self.dead_letter.clone(), self.bus.clone()),
        )
    }
}
