//! Triplestore indexer.
//!
//! Deletes drop every triple about the subject. Creates and updates replace
//! them with the repository's current RDF export in one statement.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use tracing::{debug, info};

use super::Wiring;
use crate::adapters::{HttpClient, HttpRdfSource, HttpTriplestore, RdfSource, Triplestore};
use crate::core::error::{Result, SyncError};
use crate::core::retry::RedeliveryPolicy;
use crate::core::stage::{Exchange, Pipeline, Stage, Transition};
use crate::domain::EventType;

pub const ACCEPTED: [EventType; 3] = [EventType::Create, EventType::Update, EventType::Delete];

#[derive(Debug, Clone)]
pub struct TriplestoreSettings {
    pub triplestore_url: String,
    pub named_graph: Option<String>,
    pub rdf_accept: String,
}

#[derive(Clone)]
pub struct TriplestoreServices {
    pub triplestore: Arc<dyn Triplestore>,
    pub rdf: Arc<dyn RdfSource>,
}

impl TriplestoreServices {
    pub fn http(http: &HttpClient, settings: &TriplestoreSettings) -> Self {
        Self {
            triplestore: Arc::new(HttpTriplestore::new(
                http.clone(),
                settings.triplestore_url.clone(),
            )),
            rdf: Arc::new(HttpRdfSource::new(http.clone())),
        }
    }
}

/// Per-run state of the indexer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexContext {
    /// Uri the triples are about
    pub subject: Option<String>,
}

/// `DELETE WHERE` for every triple about `subject`
pub fn delete_statement(subject: &str, named_graph: Option<&str>) -> String {
    match named_graph {
        Some(graph) => format!("DELETE WHERE {{ GRAPH <{graph}> {{ <{subject}> ?p ?o }} }}"),
        None => format!("DELETE WHERE {{ <{subject}> ?p ?o }}"),
    }
}

/// Delete then re-insert the subject's triples
pub fn index_statement(subject: &str, named_graph: Option<&str>, triples: &str) -> String {
    let triples = triples.trim();
    let insert = match named_graph {
        Some(graph) => format!("INSERT DATA {{ GRAPH <{graph}> {{ {triples} }} }}"),
        None => format!("INSERT DATA {{ {triples} }}"),
    };
    format!("{};\n{insert}", delete_statement(subject, named_graph))
}

/// The subject of a json-ld href: the same uri without its `_format`
/// parameter
pub fn subject_uri(href: &str) -> Result<String> {
    let mut url = Url::parse(href)
        .map_err(|e| SyncError::malformed(format!("json-ld url '{href}' is not a url: {e}")))?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "_format")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    Ok(url.to_string())
}

pub fn pipeline(
    wiring: &Wiring,
    settings: &TriplestoreSettings,
    services: TriplestoreServices,
) -> Pipeline<IndexContext> {
    wiring
        .pipeline(&ACCEPTED)
        .stage(ParseSubject)
        .stage(DeleteTriples {
            triplestore: services.triplestore.clone(),
            named_graph: settings.named_graph.clone(),
            redelivery: wiring.redelivery.clone(),
        })
        .stage(IndexTriples {
            triplestore: services.triplestore,
            rdf: services.rdf,
            named_graph: settings.named_graph.clone(),
            rdf_accept: settings.rdf_accept.clone(),
            redelivery: wiring.redelivery.clone(),
        })
}

struct ParseSubject;

#[async_trait]
impl Stage<IndexContext> for ParseSubject {
    fn name(&self) -> &str {
        "parse_subject"
    }

    async fn process(&self, exchange: Exchange<IndexContext>) -> Result<Transition<IndexContext>> {
        let subject = subject_uri(&exchange.event().object()?.json_ld()?.href)?;
        debug!(%subject, "Parsed index subject");
        Ok(Transition::Continue(exchange.extend(|_| IndexContext {
            subject: Some(subject),
        })))
    }
}

fn subject(exchange: &Exchange<IndexContext>) -> Result<&str> {
    exchange
        .context()
        .subject
        .as_deref()
        .ok_or_else(|| SyncError::malformed("index subject was never parsed"))
}

struct DeleteTriples {
    triplestore: Arc<dyn Triplestore>,
    named_graph: Option<String>,
    redelivery: RedeliveryPolicy,
}

#[async_trait]
impl Stage<IndexContext> for DeleteTriples {
    fn name(&self) -> &str {
        "delete_triples"
    }

    fn should_handle(&self, exchange: &Exchange<IndexContext>) -> bool {
        exchange.event_type() == EventType::Delete
    }

    async fn process(&self, exchange: Exchange<IndexContext>) -> Result<Transition<IndexContext>> {
        let subject = subject(&exchange)?;
        let statement = delete_statement(subject, self.named_graph.as_deref());
        let authorization = exchange.authorization();

        let triplestore = &self.triplestore;
        self.redelivery
            .attempt("triplestore.update", || {
                triplestore.update(&statement, authorization)
            })
            .await?;

        info!(subject, "Triples deleted");
        Ok(Transition::Complete(exchange))
    }
}

struct IndexTriples {
    triplestore: Arc<dyn Triplestore>,
    rdf: Arc<dyn RdfSource>,
    named_graph: Option<String>,
    rdf_accept: String,
    redelivery: RedeliveryPolicy,
}

#[async_trait]
impl Stage<IndexContext> for IndexTriples {
    fn name(&self) -> &str {
        "index_triples"
    }

    fn should_handle(&self, exchange: &Exchange<IndexContext>) -> bool {
        matches!(exchange.event_type(), EventType::Create | EventType::Update)
    }

    async fn process(&self, exchange: Exchange<IndexContext>) -> Result<Transition<IndexContext>> {
        let subject = subject(&exchange)?;
        let authorization = exchange.authorization();

        let rdf = &self.rdf;
        let accept = self.rdf_accept.as_str();
        let triples = self
            .redelivery
            .attempt("rdf.fetch", || rdf.fetch(subject, accept, authorization))
            .await?;

        let statement = index_statement(subject, self.named_graph.as_deref(), &triples);
        let triplestore = &self.triplestore;
        self.redelivery
            .attempt("triplestore.update", || {
                triplestore.update(&statement, authorization)
            })
            .await?;

        info!(subject, "Triples indexed");
        Ok(Transition::Complete(exchange))
    }
}
