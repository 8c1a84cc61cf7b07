//! Configuration for repobridge routers.
//!
//! Configuration sources (highest priority first):
//! 1. `--config <path>` on the command line
//! 2. `REPOBRIDGE_CONFIG` environment variable
//! 3. Default location (~/.repobridge/config.yaml)
//!
//! The raw YAML schema is validated once at startup into a list of
//! [`RouterPlan`]s. A router that is enabled but missing a required value
//! never activates.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::adapters::ConvergenceRule;
use crate::connectors::derivative::DerivativeSettings;
use crate::connectors::indexer::TriplestoreSettings;
use crate::connectors::repository::RepositorySettings;
use crate::core::resolver::normalize_base;
use crate::core::retry::RedeliveryPolicy;
use crate::transport::ConsumerSettings;

pub const CONFIG_ENV: &str = "REPOBRIDGE_CONFIG";

/// Configuration failures. All of them are fatal for the router concerned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required property '{0}'")]
    Missing(String),

    #[error("Invalid property '{key}': {reason}")]
    Invalid { key: String, reason: String },

    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Failed to build http client: {0}")]
    HttpClient(String),
}

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpSettings,

    /// Base url of the content-management system
    pub cms_base_url: Option<String>,

    #[serde(default)]
    pub repository: Option<RepositoryConfig>,

    #[serde(default)]
    pub triplestore: Option<TriplestoreConfig>,

    #[serde(default)]
    pub derivatives: Vec<DerivativeConfig>,
}

/// Pooled connection manager settings, shared by every stage of a router
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub connect_timeout_ms: u64,
    pub socket_timeout_ms: u64,
    /// Upper bound on waiting for a pooled connection
    pub connection_request_timeout_ms: u64,
    pub max_connections: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            socket_timeout_ms: 10_000,
            connection_request_timeout_ms: 10_000,
            max_connections: 20,
        }
    }
}

/// Settings every router section carries
#[derive(Debug, Clone, Deserialize)]
pub struct RouterSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Channel the router consumes from
    pub input: Option<String>,

    /// Channel for downstream notifications
    #[serde(default)]
    pub output: Option<String>,

    /// Overflow destination for permanently failed messages
    #[serde(default)]
    pub dead_letter: Option<String>,

    #[serde(default)]
    pub redelivery: RedeliveryPolicy,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Burst ceiling; defaults to `concurrency`
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    #[serde(default)]
    pub async_consumer: bool,

    /// Declared content type a message must carry (when it declares one)
    #[serde(default = "default_media_type")]
    pub media_type: String,
}

fn default_enabled() -> bool {
    true
}
fn default_concurrency() -> usize {
    1
}
fn default_media_type() -> String {
    "application/json".to_string()
}
fn default_base_header() -> String {
    "X-Repository-Base-Url".to_string()
}
fn default_rdf_accept() -> String {
    "application/n-triples".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    #[serde(flatten)]
    pub router: RouterSettings,
    pub proxy_base_url: Option<String>,
    pub mapping_base_url: Option<String>,
    /// Header that carries the repository base url on inbound messages
    #[serde(default = "default_base_header")]
    pub repository_base_header: String,
    /// Used when neither the header nor the event target names a base
    #[serde(default)]
    pub repository_base_url: Option<String>,
    #[serde(default)]
    pub convergence: ConvergenceConfig,
}

/// Status codes that mean "already in the desired state", per operation
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    pub create: ConvergenceRule,
    pub delete: ConvergenceRule,
    pub register: ConvergenceRule,
    pub unregister: ConvergenceRule,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            create: ConvergenceRule::new(&[409]),
            delete: ConvergenceRule::new(&[404, 410]),
            register: ConvergenceRule::new(&[409]),
            unregister: ConvergenceRule::new(&[404]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriplestoreConfig {
    #[serde(flatten)]
    pub router: RouterSettings,
    pub triplestore_url: Option<String>,
    #[serde(default)]
    pub named_graph: Option<String>,
    #[serde(default = "default_rdf_accept")]
    pub rdf_accept: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DerivativeConfig {
    pub name: String,
    #[serde(flatten)]
    pub router: RouterSettings,
    pub service_url: Option<String>,
}

/// A validated, enabled router ready to be wired
#[derive(Debug, Clone)]
pub struct RouterPlan {
    pub name: String,
    pub input: String,
    pub output: Option<String>,
    pub dead_letter: Option<String>,
    pub redelivery: RedeliveryPolicy,
    pub consumers: ConsumerSettings,
    pub media_type: String,
    pub kind: RouterKind,
}

#[derive(Debug, Clone)]
pub enum RouterKind {
    Repository(RepositorySettings),
    Triplestore(TriplestoreSettings),
    Derivative(DerivativeSettings),
}

impl RouterKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Repository(_) => "repository",
            Self::Triplestore(_) => "triplestore",
            Self::Derivative(_) => "derivative",
        }
    }
}

fn required(value: &Option<String>, key: impl Into<String>) -> Result<String, ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ConfigError::Missing(key.into())),
    }
}

impl RouterSettings {
    fn plan(&self, name: &str, kind: RouterKind) -> Result<RouterPlan, ConfigError> {
        let input = required(&self.input, format!("{name}.input"))?;

        if self.concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: format!("{name}.concurrency"),
                reason: "must be at least 1".to_string(),
            });
        }
        let max_concurrency = self.max_concurrency.unwrap_or(self.concurrency);
        if max_concurrency < self.concurrency {
            return Err(ConfigError::Invalid {
                key: format!("{name}.max_concurrency"),
                reason: format!(
                    "{} is below concurrency {}",
                    max_concurrency, self.concurrency
                ),
            });
        }
        self.redelivery
            .validate()
            .map_err(|reason| ConfigError::Invalid {
                key: format!("{name}.redelivery"),
                reason,
            })?;

        Ok(RouterPlan {
            name: name.to_string(),
            input,
            output: self.output.clone(),
            dead_letter: self.dead_letter.clone(),
            redelivery: self.redelivery.clone(),
            consumers: ConsumerSettings {
                concurrency: self.concurrency,
                max_concurrency,
                async_consumer: self.async_consumer,
            },
            media_type: self.media_type.clone(),
            kind,
        })
    }
}

impl AppConfig {
    /// Parse a config from YAML content
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load a config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Load from the explicit path, the environment, or the default location
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };
        Self::from_file(&path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.plan().map(|_| ())
    }

    /// Validate every enabled router. Fails on the first problem found.
    pub fn plan(&self) -> Result<Vec<RouterPlan>, ConfigError> {
        let mut plans = Vec::new();

        if let Some(repo) = self.repository.as_ref().filter(|r| r.router.enabled) {
            let settings = RepositorySettings {
                cms_base_url: normalize_base(&required(&self.cms_base_url, "cms_base_url")?),
                proxy_base_url: normalize_base(&required(
                    &repo.proxy_base_url,
                    "repository.proxy_base_url",
                )?),
                mapping_base_url: normalize_base(&required(
                    &repo.mapping_base_url,
                    "repository.mapping_base_url",
                )?),
                repository_base_header: repo.repository_base_header.clone(),
                repository_base_url: repo.repository_base_url.as_deref().map(normalize_base),
                convergence: repo.convergence.clone(),
            };
            plans.push(
                repo.router
                    .plan("repository", RouterKind::Repository(settings))?,
            );
        }

        if let Some(ts) = self.triplestore.as_ref().filter(|t| t.router.enabled) {
            let settings = TriplestoreSettings {
                triplestore_url: required(&ts.triplestore_url, "triplestore.triplestore_url")?,
                named_graph: ts.named_graph.clone().filter(|g| !g.trim().is_empty()),
                rdf_accept: ts.rdf_accept.clone(),
            };
            plans.push(ts.router.plan("triplestore", RouterKind::Triplestore(settings))?);
        }

        for (i, derivative) in self.derivatives.iter().enumerate() {
            if !derivative.router.enabled {
                continue;
            }
            if derivative.name.trim().is_empty() {
                return Err(ConfigError::Missing(format!("derivatives[{i}].name")));
            }
            let key = format!("derivatives.{}", derivative.name);
            let settings = DerivativeSettings {
                service_url: required(&derivative.service_url, format!("{key}.service_url"))?,
            };
            plans.push(derivative.router.plan(&key, RouterKind::Derivative(settings))?);
        }

        Ok(plans)
    }
}

/// Resolve the config path from the environment or the home directory
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    dirs::home_dir()
        .map(|home| home.join(".repobridge").join("config.yaml"))
        .ok_or_else(|| ConfigError::Missing(CONFIG_ENV.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const FULL_CONFIG: &str = r#"
http:
  connect_timeout_ms: 2000
  max_connections: 8
cms_base_url: http://cms
repository:
  input: queue:repository
  output: topic:repository-events
  dead_letter: queue:repository-dlq
  redelivery:
    max_redeliveries: 3
  concurrency: 2
  max_concurrency: 4
  async_consumer: true
  proxy_base_url: http://proxy:8000
  mapping_base_url: http://mapping:8000/paths
  convergence:
    delete:
      statuses: [404]
triplestore:
  input: queue:triplestore
  triplestore_url: http://blazegraph:8080/bigdata/sparql
  named_graph: http://example.org/graph
derivatives:
  - name: images
    input: queue:images
    service_url: http://generator:8000/convert
  - name: audio
    enabled: false
"#;

    #[test]
    fn test_full_config_plans_enabled_routers() {
        let config = AppConfig::from_yaml(FULL_CONFIG).unwrap();
        assert_eq!(config.http.connect_timeout_ms, 2000);
        assert_eq!(config.http.socket_timeout_ms, 10_000);

        let plans = config.plan().unwrap();
        let names: Vec<&str> = plans.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["repository", "triplestore", "derivatives.images"]);

        let repo = &plans[0];
        assert_eq!(repo.redelivery.max_redeliveries, 3);
        assert_eq!(repo.consumers.concurrency, 2);
        assert_eq!(repo.consumers.max_concurrency, 4);
        assert!(repo.consumers.async_consumer);
        assert_eq!(repo.dead_letter.as_deref(), Some("queue:repository-dlq"));

        match &repo.kind {
            RouterKind::Repository(settings) => {
                assert_eq!(settings.cms_base_url, "http://cms/");
                assert_eq!(settings.proxy_base_url, "http://proxy:8000/");
                assert_eq!(settings.repository_base_header, "X-Repository-Base-Url");
                assert!(settings.convergence.delete.matches(404));
                assert!(!settings.convergence.delete.matches(410));
                assert!(settings.convergence.create.matches(409));
            }
            other => panic!("unexpected router kind {}", other.label()),
        }

        match &plans[1].kind {
            RouterKind::Triplestore(settings) => {
                assert_eq!(settings.named_graph.as_deref(), Some("http://example.org/graph"));
                assert_eq!(settings.rdf_accept, "application/n-triples");
            }
            other => panic!("unexpected router kind {}", other.label()),
        }
    }

    #[test]
    fn test_missing_required_value_fails_fast() {
        let yaml = r#"
cms_base_url: http://cms
repository:
  input: queue:repository
  proxy_base_url: http://proxy
"#;
        let err = AppConfig::from_yaml(yaml).unwrap().plan().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref key) if key == "repository.mapping_base_url"));
    }

    #[test]
    fn test_disabled_router_is_not_validated() {
        let yaml = r#"
repository:
  enabled: false
"#;
        let plans = AppConfig::from_yaml(yaml).unwrap().plan().unwrap();
        assert!(plans.is_empty());
    }

    #[test]
    fn test_max_concurrency_below_concurrency_is_invalid() {
        let yaml = r#"
triplestore:
  input: queue:triplestore
  triplestore_url: http://ts/sparql
  concurrency: 4
  max_concurrency: 2
"#;
        let err = AppConfig::from_yaml(yaml).unwrap().plan().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "triplestore.max_concurrency"));
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", FULL_CONFIG).unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.derivatives.len(), 2);
        assert_eq!(config.cms_base_url.as_deref(), Some("http://cms"));
    }

    #[test]
    fn test_unreadable_file_is_config_error() {
        let err = AppConfig::from_file(Path::new("/nonexistent/repobridge.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
