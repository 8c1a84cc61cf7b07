//! Inbound change events.
//!
//! Events arrive as Activity Streams style JSON documents. They are decoded
//! once per message at the parse boundary into a closed [`EventType`] and
//! then flow through a pipeline as an immutable value.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::{Message, CONTENT_TYPE};
use crate::core::error::{Result, SyncError};

pub const REL_CANONICAL: &str = "canonical";
pub const REL_ALTERNATE: &str = "alternate";
pub const REL_DESCRIBES: &str = "describes";
pub const MEDIA_HTML: &str = "text/html";
pub const MEDIA_JSON_LD: &str = "application/ld+json";

/// The action an event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Create,
    Update,
    Delete,
    Generate,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Generate => "Generate",
        };
        f.write_str(name)
    }
}

/// A change notification from the content-management system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Opaque passthrough
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Base url of the repository instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// The resource acted on; absent only for pure Generate events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Object>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,

    /// Generator instructions; present for Generate events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

/// One url entry of an object or actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub rel: String,
    pub href: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Object {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    /// `urn:uuid:<uuid>` or a bare uuid
    pub id: String,

    #[serde(default)]
    pub url: Vec<Link>,

    #[serde(default)]
    pub is_new_version: bool,
}

impl Object {
    pub fn uuid(&self) -> Result<Uuid> {
        let raw = self.id.strip_prefix("urn:uuid:").unwrap_or(&self.id);
        Uuid::parse_str(raw)
            .map_err(|e| SyncError::malformed(format!("object id '{}' is not a uuid: {e}", self.id)))
    }

    /// Find the single url matching `rel` (and `media_type` when given).
    ///
    /// Zero matches is a [`SyncError::MissingProperty`]; several matches is
    /// malformed input.
    pub fn find_url(&self, media_type: Option<&str>, rel: &str) -> Result<&Link> {
        let mut matches = self.url.iter().filter(|link| {
            link.rel == rel && media_type.map_or(true, |m| link.media_type == m)
        });

        let found = matches.next().ok_or_else(|| SyncError::MissingProperty {
            media_type: media_type.map(str::to_string),
            rel: rel.to_string(),
        })?;

        if matches.next().is_some() {
            return Err(SyncError::malformed(format!(
                "object {} has more than one url with rel '{rel}'",
                self.id
            )));
        }

        Ok(found)
    }

    pub fn has_rel(&self, rel: &str) -> bool {
        self.url.iter().any(|link| link.rel == rel)
    }

    /// The html page of the resource in the content-management system
    pub fn canonical(&self) -> Result<&Link> {
        self.find_url(Some(MEDIA_HTML), REL_CANONICAL)
    }

    pub fn json_ld(&self) -> Result<&Link> {
        self.find_url(Some(MEDIA_JSON_LD), REL_ALTERNATE)
    }

    /// The file a media object describes; media types vary so only rel is
    /// matched
    pub fn describes(&self) -> Result<&Link> {
        self.find_url(None, REL_DESCRIBES)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Vec<Link>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub content: Option<AttachmentContent>,
}

/// Instructions for a derivative generator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentContent {
    pub source_uri: Option<String>,
    pub destination_uri: Option<String>,
    pub mimetype: Option<String>,
    /// Opaque generator arguments
    #[serde(default)]
    pub args: Option<String>,
    pub file_upload_uri: Option<String>,
    #[serde(rename = "fedoraUri", default)]
    pub repository_uri: Option<String>,
    #[serde(default)]
    pub source_field: Option<String>,
}

impl Event {
    /// Decode a message body and check the event has the parts its type needs
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let event: Event = serde_json::from_slice(bytes)
            .map_err(|e| SyncError::malformed(format!("cannot decode event: {e}")))?;

        match event.event_type {
            EventType::Generate => {
                if event.content().is_none() {
                    return Err(SyncError::malformed(
                        "Generate event carries no attachment content",
                    ));
                }
            }
            other => {
                if event.object.is_none() {
                    return Err(SyncError::malformed(format!("{other} event carries no object")));
                }
                // Generator instructions only belong on Generate events
                if event.content().is_some() {
                    return Err(SyncError::malformed(format!(
                        "{other} event carries attachment content"
                    )));
                }
            }
        }

        Ok(event)
    }

    /// The object, as a typed failure when absent
    pub fn object(&self) -> Result<&Object> {
        self.object
            .as_ref()
            .ok_or_else(|| SyncError::malformed(format!("{} event carries no object", self.event_type)))
    }

    pub fn content(&self) -> Option<&AttachmentContent> {
        self.attachment.as_ref().and_then(|a| a.content.as_ref())
    }
}

/// Why a message was not routed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MediaType(String),
    MissingAuthorization,
    Unroutable(EventType),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MediaType(found) => write!(f, "unexpected media type '{found}'"),
            Self::MissingAuthorization => f.write_str("missing bearer authorization"),
            Self::Unroutable(event_type) => write!(f, "{event_type} events are not handled here"),
        }
    }
}

/// Routing predicates a router applies before any external call
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub media_type: String,
    pub accepted: Vec<EventType>,
}

impl EventFilter {
    pub fn new(media_type: impl Into<String>, accepted: &[EventType]) -> Self {
        Self {
            media_type: media_type.into(),
            accepted: accepted.to_vec(),
        }
    }

    /// Conjunction of the routing predicates. Rejected messages are dropped
    /// without consuming any retry budget.
    pub fn classify(&self, message: &Message, event: &Event) -> Result<EventType, Rejection> {
        if let Some(declared) = message.header(CONTENT_TYPE) {
            let essence = declared.split(';').next().unwrap_or_default().trim();
            if !essence.eq_ignore_ascii_case(&self.media_type) {
                return Err(Rejection::MediaType(declared.to_string()));
            }
        }

        match message.authorization() {
            Some(value) if value.starts_with("Bearer ") => {}
            _ => return Err(Rejection::MissingAuthorization),
        }

        if !self.accepted.contains(&event.event_type) {
            return Err(Rejection::Unroutable(event.event_type));
        }

        Ok(event.event_type)
    }
}
