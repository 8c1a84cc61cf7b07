//! Domain types for repobridge.
//!
//! This module contains the core data structures:
//! - Event: the decoded change notification
//! - Message: raw bus message (body + headers)
//! - SyncContext: per-run derived state of the repository router

pub mod context;
pub mod event;
pub mod message;

// Re-export commonly used types
pub use context::{SyncAction, SyncContext};
pub use event::{
    Actor, Attachment, AttachmentContent, Event, EventFilter, EventType, Link, Object, Rejection,
};
pub use message::Message;
