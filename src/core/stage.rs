//! Pipeline stages and the runner that drives them.
//!
//! A [`Pipeline`] decodes and classifies a message once, then passes an
//! [`Exchange`] through its stages in order. Each stage has a predicate
//! ([`Stage::should_handle`]) and a body that may call external services and
//! returns the exchange extended with whatever it resolved.
//!
//! The exchange keeps the original inbound message untouched. Outbound calls
//! receive only [`Exchange::authorization`]; anything forwarded to the next
//! channel is built by [`Exchange::forward`] from the original headers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn, Span};

use super::error::{Disposition, SyncError};
use super::retry::DeadLetterChannel;
use crate::domain::{Event, EventFilter, EventType, Message};

/// One run's view of a message: the original message, its decoded event and
/// the context stages have derived so far
#[derive(Debug, Clone)]
pub struct Exchange<C> {
    message: Arc<Message>,
    event: Arc<Event>,
    authorization: String,
    context: C,
}

impl<C> Exchange<C> {
    pub fn new(message: Message, event: Event, authorization: String, context: C) -> Self {
        Self {
            message: Arc::new(message),
            event: Arc::new(event),
            authorization,
            context,
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn event_type(&self) -> EventType {
        self.event.event_type
    }

    /// The only inbound header outbound calls receive
    pub fn authorization(&self) -> &str {
        &self.authorization
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    /// Replace the context with one derived from it
    pub fn extend(self, f: impl FnOnce(C) -> C) -> Self {
        Self {
            context: f(self.context),
            ..self
        }
    }

    /// The original message with every inbound header restored, plus
    /// `extra`
    pub fn forward(&self, extra: &[(&str, &str)]) -> Message {
        extra
            .iter()
            .fold(Message::clone(&self.message), |message, (name, value)| {
                message.with_header(*name, *value)
            })
    }
}

/// What a stage hands back to the runner
#[derive(Debug)]
pub enum Transition<C> {
    /// Continue with the next stage
    Continue(Exchange<C>),

    /// Terminal success; remaining stages are skipped
    Complete(Exchange<C>),
}

#[async_trait]
pub trait Stage<C>: Send + Sync {
    fn name(&self) -> &str;

    fn should_handle(&self, exchange: &Exchange<C>) -> bool {
        let _ = exchange;
        true
    }

    async fn process(&self, exchange: Exchange<C>) -> Result<Transition<C>, SyncError>;
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,

    /// The message never entered the stages (unparseable or unroutable)
    Dropped(String),

    /// A stage failed in a way retrying cannot fix
    Discarded(String),

    /// Handed to the dead-letter channel (or logged, without one)
    DeadLettered(String),

    /// The router is misconfigured
    Failed(String),
}

/// Anything a consumer pool can drive
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, message: Message) -> RunOutcome;
}

/// An ordered list of stages behind an event filter
pub struct Pipeline<C> {
    name: String,
    filter: EventFilter,
    stages: Vec<Box<dyn Stage<C>>>,
    dead_letter: DeadLetterChannel,
}

impl<C> Pipeline<C>
where
    C: Default + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, filter: EventFilter, dead_letter: DeadLetterChannel) -> Self {
        Self {
            name: name.into(),
            filter,
            stages: Vec::new(),
            dead_letter,
        }
    }

    pub fn stage(mut self, stage: impl Stage<C> + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Decode, classify and run every applicable stage
    #[instrument(skip_all, fields(router = %self.name, digest = %message.digest(), event_type))]
    pub async fn run(&self, message: Message) -> RunOutcome {
        let event = match Event::parse(&message.body) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping unparseable message");
                return RunOutcome::Dropped(e.to_string());
            }
        };
        Span::current().record("event_type", tracing::field::display(event.event_type));

        if let Err(rejection) = self.filter.classify(&message, &event) {
            debug!(%rejection, "Dropping unroutable message");
            return RunOutcome::Dropped(rejection.to_string());
        }

        // classify() guarantees a bearer credential is present
        let authorization = message.authorization().unwrap_or_default().to_string();
        let mut exchange = Exchange::new(message, event, authorization, C::default());

        for stage in &self.stages {
            if !stage.should_handle(&exchange) {
                continue;
            }
            debug!(stage = stage.name(), "Running stage");

            let original = exchange.message.clone();
            match stage.process(exchange).await {
                Ok(Transition::Continue(next)) => exchange = next,
                Ok(Transition::Complete(_)) => {
                    info!(stage = stage.name(), "Run converged");
                    return RunOutcome::Completed;
                }
                Err(e) => return self.fail(stage.name(), &original, e).await,
            }
        }

        RunOutcome::Completed
    }

    async fn fail(&self, stage: &str, original: &Message, failure: SyncError) -> RunOutcome {
        match failure.disposition() {
            Disposition::Drop => {
                warn!(stage, error = %failure, "Discarding message that cannot succeed");
                RunOutcome::Discarded(failure.to_string())
            }
            Disposition::DeadLetter => {
                self.dead_letter.route(&self.name, original, &failure).await;
                RunOutcome::DeadLettered(failure.to_string())
            }
            Disposition::Fatal => {
                error!(stage, error = %failure, "Router misconfigured");
                RunOutcome::Failed(failure.to_string())
            }
        }
    }
}

#[async_trait]
impl<C> MessageHandler for Pipeline<C>
where
    C: Default + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, message: Message) -> RunOutcome {
        self.run(message).await
    }
}
