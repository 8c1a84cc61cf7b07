//! Path resolution between the content-management and repository namespaces.
//!
//! Local resolution strips a configured base from a uri. Resolution that
//! needs the authoritative association between the two namespaces goes
//! through a [`MappingDirectory`].

use std::sync::Arc;

use tracing::debug;

use super::error::{Result, SyncError};
use super::retry::RedeliveryPolicy;
use crate::adapters::{Mapping, MappingDirectory, Outcome};

/// Ensure a base ends with exactly one `/`
pub fn normalize_base(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

/// Strip `base` from `uri`, yielding a resource-local path without a leading
/// separator
pub fn resolve(uri: &str, base: &str) -> Result<String> {
    let normalized = normalize_base(base);

    // The base itself, with or without its trailing separator, is the root
    if uri == normalized || uri == normalized.trim_end_matches('/') {
        return Ok(String::new());
    }

    uri.strip_prefix(&normalized)
        .map(|rest| rest.trim_start_matches('/').to_string())
        .ok_or_else(|| SyncError::Resolve {
            uri: uri.to_string(),
            base: normalized,
        })
}

/// Mapping-backed resolution with each remote call under the redelivery
/// policy
#[derive(Clone)]
pub struct PathResolver {
    directory: Arc<dyn MappingDirectory>,
    redelivery: RedeliveryPolicy,
}

impl PathResolver {
    pub fn new(directory: Arc<dyn MappingDirectory>, redelivery: RedeliveryPolicy) -> Self {
        Self {
            directory,
            redelivery,
        }
    }

    /// Idempotent: registering an existing pair is not an error
    pub async fn register(&self, mapping: &Mapping, authorization: &str) -> Result<()> {
        let directory = &self.directory;
        let outcome = self
            .redelivery
            .attempt("mapping.register", || directory.register(mapping, authorization))
            .await?;

        if let Outcome::Converged = outcome {
            debug!(
                content_path = %mapping.content_path,
                repo_path = %mapping.repo_path,
                "Mapping already registered"
            );
        }
        Ok(())
    }

    pub async fn repo_path_for(&self, content_path: &str, authorization: &str) -> Result<Option<String>> {
        let directory = &self.directory;
        let found = self
            .redelivery
            .attempt("mapping.lookup_content", || {
                directory.lookup_by_content_path(content_path, authorization)
            })
            .await?;
        Ok(found.map(|m| m.repo_path))
    }

    pub async fn content_path_for(&self, repo_path: &str, authorization: &str) -> Result<Option<String>> {
        let directory = &self.directory;
        let found = self
            .redelivery
            .attempt("mapping.lookup_repository", || {
                directory.lookup_by_repo_path(repo_path, authorization)
            })
            .await?;
        Ok(found.map(|m| m.content_path))
    }

    /// Removing an absent mapping converges to success
    pub async fn unregister(&self, content_path: &str, authorization: &str) -> Result<()> {
        let directory = &self.directory;
        let outcome = self
            .redelivery
            .attempt("mapping.unregister", || {
                directory.unregister(content_path, authorization)
            })
            .await?;

        if let Outcome::Converged = outcome {
            debug!(content_path, "Mapping already absent");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mapping::MemoryDirectory;

    #[test]
    fn test_normalize_base() {
        assert_eq!(normalize_base("http://cms"), "http://cms/");
        assert_eq!(normalize_base("http://cms/"), "http://cms/");
        assert_eq!(normalize_base("http://cms///"), "http://cms/");
    }

    #[test]
    fn test_resolve_strips_base() {
        assert_eq!(resolve("http://cms/node/2", "http://cms").unwrap(), "node/2");
        assert_eq!(resolve("http://cms/node/2", "http://cms/").unwrap(), "node/2");
        assert_eq!(
            resolve("http://repo/rest/node/5", "http://repo/rest/").unwrap(),
            "node/5"
        );
        assert_eq!(resolve("http://cms/", "http://cms").unwrap(), "");
    }

    #[test]
    fn test_resolve_requires_prefix() {
        let err = resolve("http://elsewhere/node/2", "http://cms").unwrap_err();
        assert!(matches!(err, SyncError::Resolve { ref base, .. } if base == "http://cms/"));

        // A shared string prefix is not a path prefix
        assert!(resolve("http://cms-staging/node/2", "http://cms").is_err());
    }

    #[tokio::test]
    async fn test_resolver_round_trip_through_directory() {
        let directory = Arc::new(MemoryDirectory::default());
        let resolver = PathResolver::new(directory.clone(), RedeliveryPolicy::immediate(0));
        let mapping = Mapping::new("node/2", "node/5");

        resolver.register(&mapping, "Bearer T").await.unwrap();
        // Re-registering the same pair has no observable effect
        resolver.register(&mapping, "Bearer T").await.unwrap();

        assert_eq!(
            resolver.repo_path_for("node/2", "Bearer T").await.unwrap().as_deref(),
            Some("node/5")
        );
        assert_eq!(
            resolver.content_path_for("node/5", "Bearer T").await.unwrap().as_deref(),
            Some("node/2")
        );

        resolver.unregister("node/2", "Bearer T").await.unwrap();
        resolver.unregister("node/2", "Bearer T").await.unwrap();
        assert_eq!(resolver.repo_path_for("node/2", "Bearer T").await.unwrap(), None);
    }
}
