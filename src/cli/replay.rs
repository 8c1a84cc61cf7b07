//! Offline replay of recorded bus messages.
//!
//! Envelopes are read from a JSONL file, published to an in-memory bus and
//! processed by every enabled router until the inputs drain. Whatever ends
//! up on a dead-letter destination is returned as records.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::AppConfig;
use crate::core::Orchestrator;
use crate::domain::Message;
use crate::transport::{MemoryBus, MessageBus};

/// One recorded message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub destination: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// A JSON string is taken verbatim; any other value is the event itself
    pub body: serde_json::Value,
}

impl Envelope {
    pub fn into_message(self) -> Result<Message> {
        let body = match self.body {
            serde_json::Value::String(raw) => Bytes::from(raw),
            other => Bytes::from(serde_json::to_vec(&other)?),
        };
        Ok(Message {
            headers: self.headers,
            body,
        })
    }
}

/// A message found on a dead-letter destination after replay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub destination: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub digest: String,
    pub recorded_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    fn new(destination: &str, message: Message) -> Self {
        Self {
            destination: destination.to_string(),
            digest: message.digest(),
            body: String::from_utf8_lossy(&message.body).into_owned(),
            headers: message.headers,
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ReplaySummary {
    pub published: usize,
    /// Messages left on output channels, per destination
    pub notifications: BTreeMap<String, usize>,
    pub dead_letters: Vec<DeadLetterRecord>,
}

/// Read envelopes from a JSONL file, skipping blank lines
pub fn read_envelopes(path: &Path) -> Result<Vec<Envelope>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open replay input: {}", path.display()))?;

    let mut envelopes = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let envelope: Envelope = serde_json::from_str(&line)
            .with_context(|| format!("Invalid envelope on line {}", index + 1))?;
        envelopes.push(envelope);
    }
    Ok(envelopes)
}

/// Run `envelopes` through every enabled router in `config`
pub async fn replay(config: &AppConfig, envelopes: Vec<Envelope>) -> Result<ReplaySummary> {
    let bus = Arc::new(MemoryBus::new());
    let orchestrator =
        Orchestrator::new(config, bus.clone()).context("Configuration is not valid")?;
    let pools = orchestrator.start();

    let mut summary = ReplaySummary::default();
    for envelope in envelopes {
        let destination = envelope.destination.clone();
        bus.publish(&destination, envelope.into_message()?)
            .await
            .with_context(|| format!("Failed to publish to {destination}"))?;
        summary.published += 1;
    }

    // Routers stop in plan order, so a notification on a later router's
    // input is still consumed
    for (plan, pool) in orchestrator.plans().iter().zip(pools) {
        bus.close(&plan.input);
        pool.join().await;
    }

    let dead_letter_destinations: BTreeSet<&str> = orchestrator
        .plans()
        .iter()
        .filter_map(|plan| plan.dead_letter.as_deref())
        .collect();
    for destination in dead_letter_destinations {
        summary.dead_letters.extend(
            bus.drain(destination)
                .into_iter()
                .map(|message| DeadLetterRecord::new(destination, message)),
        );
    }

    for plan in orchestrator.plans() {
        if let Some(output) = plan.output.as_deref() {
            let count = bus.drain(output).len();
            *summary.notifications.entry(output.to_string()).or_default() += count;
        }
    }

    info!(
        published = summary.published,
        dead_letters = summary.dead_letters.len(),
        "Replay finished"
    );
    Ok(summary)
}

/// Append dead-letter records to a JSONL file
pub fn write_dead_letters(path: &Path, records: &[DeadLetterRecord]) -> Result<()> {
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for record in records {
        serde_json::to_writer(&mut file, record)?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // Port 1 on localhost refuses connections
    const CONFIG: &str = r#"
http:
  connect_timeout_ms: 500
  socket_timeout_ms: 500
  connection_request_timeout_ms: 500
derivatives:
  - name: thumbnails
    input: queue:thumbnails
    dead_letter: queue:thumbnails-dlq
    redelivery:
      max_redeliveries: 1
      initial_delay_ms: 0
      max_delay_ms: 0
    service_url: http://127.0.0.1:1/convert
"#;

    const GENERATE: &str = r#"{"destination": "queue:thumbnails", "headers": {"Authorization": "Bearer T"}, "body": {"type": "Generate", "attachment": {"content": {"sourceUri": "http://repo/rest/a.jpg", "destinationUri": "http://cms/media/7", "mimetype": "image/png", "fileUploadUri": "public://a.png"}}}}"#;

    #[test]
    fn test_envelope_body_forms() {
        let raw: Envelope =
            serde_json::from_str(r#"{"destination": "q", "body": "{\"type\": \"Create\"}"}"#).unwrap();
        assert_eq!(raw.into_message().unwrap().body, r#"{"type": "Create"}"#);

        let structured: Envelope =
            serde_json::from_str(r#"{"destination": "q", "body": {"type": "Create"}}"#).unwrap();
        assert_eq!(structured.into_message().unwrap().body, r#"{"type":"Create"}"#);
    }

    #[test]
    fn test_read_envelopes_reports_bad_line() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("messages.jsonl");
        std::fs::write(&path, format!("{GENERATE}\n\nnot json\n")).unwrap();

        let err = read_envelopes(&path).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[tokio::test]
    async fn test_unreachable_generator_is_dead_lettered() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("messages.jsonl");
        std::fs::write(&input, format!("{GENERATE}\n")).unwrap();

        let config = AppConfig::from_yaml(CONFIG).unwrap();
        let envelopes = read_envelopes(&input).unwrap();
        let original = envelopes[0].clone().into_message().unwrap();

        let summary = replay(&config, envelopes).await.unwrap();
        assert_eq!(summary.published, 1);
        assert_eq!(summary.dead_letters.len(), 1);

        let record = &summary.dead_letters[0];
        assert_eq!(record.destination, "queue:thumbnails-dlq");
        assert_eq!(record.digest, original.digest());
        assert_eq!(record.body.as_bytes(), &original.body[..]);

        let output = temp.path().join("dlq.jsonl");
        write_dead_letters(&output, &summary.dead_letters).unwrap();
        let written = std::fs::read_to_string(&output).unwrap();
        assert_eq!(written.lines().count(), 1);
    }
}
