//! Error taxonomy for pipeline runs.
//!
//! Every failure a stage can produce is a [`SyncError`]. The redelivery
//! wrapper inspects [`SyncError::is_retryable`] once per attempt and the
//! pipeline runner inspects [`SyncError::disposition`] once per run; nothing
//! else branches on error kinds.

use thiserror::Error;

use crate::config::ConfigError;

/// Result alias used throughout the pipeline.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Errors produced while processing a message
#[derive(Debug, Error)]
pub enum SyncError {
    /// The message could not be decoded into a usable event
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// A required url entry was not present on the event object
    #[error("Missing property: no url with rel '{rel}'{}", media_suffix(.media_type))]
    MissingProperty {
        media_type: Option<String>,
        rel: String,
    },

    /// A uri did not start with the configured base
    #[error("Cannot resolve '{uri}' against base '{base}'")]
    Resolve { uri: String, base: String },

    /// Network error, timeout or 5xx from an external service
    #[error("Transient failure calling {call}: {message}")]
    Transient { call: String, message: String },

    /// The external service refused the request as structurally invalid
    #[error("{call} rejected the request with status {status}: {message}")]
    Rejected {
        call: String,
        status: u16,
        message: String,
    },

    /// A retryable failure outlived the redelivery budget
    #[error("{call} failed after {attempts} attempts: {source}")]
    Exhausted {
        call: String,
        attempts: u32,
        #[source]
        source: Box<SyncError>,
    },

    /// A required startup property is missing or invalid
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

fn media_suffix(media_type: &Option<String>) -> String {
    media_type
        .as_deref()
        .map(|m| format!(" and media type '{m}'"))
        .unwrap_or_default()
}

/// What the pipeline runner does with a failed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Log and discard; retrying can never help
    Drop,

    /// Route the original message to the dead-letter destination
    DeadLetter,

    /// The router itself is unusable
    Fatal,
}

impl SyncError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedEvent(message.into())
    }

    pub fn transient(call: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            call: call.into(),
            message: message.into(),
        }
    }

    /// Whether another attempt of the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            Self::MalformedEvent(_) | Self::MissingProperty { .. } | Self::Resolve { .. } => {
                Disposition::Drop
            }
            Self::Transient { .. } | Self::Rejected { .. } | Self::Exhausted { .. } => {
                Disposition::DeadLetter
            }
            Self::Configuration(_) => Disposition::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(SyncError::transient("proxy.create", "connection refused").is_retryable());
        assert!(!SyncError::malformed("bad json").is_retryable());
        assert!(!SyncError::Rejected {
            call: "proxy.create".to_string(),
            status: 400,
            message: String::new(),
        }
        .is_retryable());
    }

    #[test]
    fn test_dispositions() {
        assert_eq!(
            SyncError::Resolve {
                uri: "http://other/node/1".to_string(),
                base: "http://cms/".to_string(),
            }
            .disposition(),
            Disposition::Drop
        );

        let exhausted = SyncError::Exhausted {
            call: "triplestore.update".to_string(),
            attempts: 3,
            source: Box::new(SyncError::transient("triplestore.update", "503")),
        };
        assert_eq!(exhausted.disposition(), Disposition::DeadLetter);
        assert!(exhausted.to_string().contains("after 3 attempts"));

        assert_eq!(
            SyncError::from(ConfigError::Missing("repository.input".to_string())).disposition(),
            Disposition::Fatal
        );
    }

    #[test]
    fn test_missing_property_message() {
        let err = SyncError::MissingProperty {
            media_type: Some("text/html".to_string()),
            rel: "canonical".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Missing property: no url with rel 'canonical' and media type 'text/html'"
        );
    }
}
