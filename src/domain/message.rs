//! Bus messages.
//!
//! A message is what the transport hands a router: the raw body bytes and
//! its string headers. The inbound message is never mutated; anything a
//! router forwards is derived from it with [`Message::with_header`].

use std::collections::BTreeMap;

use bytes::Bytes;
use sha2::{Digest, Sha256};

pub const AUTHORIZATION: &str = "Authorization";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_LOCATION: &str = "Content-Location";

/// A message as carried by the bus
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Header names keep the case they arrived with; lookups ignore case
    pub headers: BTreeMap<String, String>,

    /// Raw payload, preserved byte for byte
    pub body: Bytes,
}

impl Message {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Return a copy with `name` set, replacing any header of the same name
    /// regardless of case
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn authorization(&self) -> Option<&str> {
        self.header(AUTHORIZATION)
    }

    /// Correlation key for logs: first 16 hex chars of SHA-256 of the body
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.body);
        let hash = hex::encode(hasher.finalize());
        hash[..16].to_string()
    }
}
