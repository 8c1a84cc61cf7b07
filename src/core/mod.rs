//! Core orchestration logic.
//!
//! This module contains:
//! - SyncError: the failure taxonomy and its dispositions
//! - RedeliveryPolicy / DeadLetterChannel: bounded retry and overflow routing
//! - PathResolver: mapping between the two path namespaces
//! - Stage / Pipeline: the stage abstraction and its runner
//! - Orchestrator: builds and starts routers

pub mod error;
pub mod orchestrator;
pub mod resolver;
pub mod retry;
pub mod stage;

// Re-export commonly used types
pub use error::{Disposition, SyncError};
pub use orchestrator::Orchestrator;
pub use resolver::{normalize_base, resolve, PathResolver};
pub use retry::{DeadLetterChannel, RedeliveryPolicy};
pub use stage::{Exchange, MessageHandler, Pipeline, RunOutcome, Stage, Transition};
