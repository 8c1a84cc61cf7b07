//! repobridge - keeps a digital repository in step with a content-management
//! system
//!
//! Change events from the content-management system arrive on a message
//! bus. Each enabled router consumes one input channel and drives the
//! external services that mirror the change.
//!
//! # Architecture
//!
//! Every router is a [`core::Pipeline`] of stages:
//! - Events are decoded once and classified before any external call
//! - Each stage extends an immutable per-run context
//! - External calls are retried under a bounded redelivery policy, and the
//!   original message is dead-lettered when retries run out
//! - "Already done" responses converge to success
//!
//! # Modules
//!
//! - `adapters`: HTTP clients for the write proxy, path mapping, triplestore
//!   and derivative services
//! - `connectors`: the repository, triplestore and derivative routers
//! - `core`: errors, redelivery, path resolution, stages, orchestration
//! - `domain`: events, messages, per-run context
//! - `transport`: bus seam and consumer pools
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Validate a configuration
//! repobridge --config config.yaml check-config
//!
//! # Run recorded messages through every enabled router
//! repobridge --config config.yaml replay --input messages.jsonl --dead-letters dlq.jsonl
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod connectors;
pub mod core;
pub mod domain;
pub mod transport;

// Re-export main types at crate root for convenience
pub use config::{AppConfig, ConfigError, RouterPlan};
pub use crate::core::{Orchestrator, Pipeline, RunOutcome, SyncError};
pub use domain::{Event, EventType, Message, SyncContext};
pub use transport::{ConsumerPool, MemoryBus, MessageBus};
