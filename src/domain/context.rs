//! Per-run derived context for the repository sync router.
//!
//! A context is created empty when a run starts and is extended, never
//! mutated in place, as each stage resolves something new. It lives only for
//! the duration of one run.

use serde::Serialize;

use crate::core::error::{Result, SyncError};

/// Outcome reported downstream after a successful repository write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Created,
    Updated,
    Deleted,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncContext {
    /// Path of the resource in the content-management namespace
    pub content_path: Option<String>,

    /// Path of the file a media resource describes, for binaries
    pub file_path: Option<String>,

    /// Base url of the repository for this event
    pub repository_base: Option<String>,

    /// Repository path the run ended up writing
    pub repo_path: Option<String>,

    pub action: Option<SyncAction>,
}

impl SyncContext {
    pub fn with_paths(
        self,
        content_path: String,
        file_path: Option<String>,
        repository_base: String,
    ) -> Self {
        Self {
            content_path: Some(content_path),
            file_path,
            repository_base: Some(repository_base),
            ..self
        }
    }

    pub fn with_outcome(self, action: SyncAction, repo_path: Option<String>) -> Self {
        Self {
            action: Some(action),
            repo_path,
            ..self
        }
    }

    pub fn is_binary(&self) -> bool {
        self.file_path.is_some()
    }

    pub fn require_content_path(&self) -> Result<&str> {
        self.content_path
            .as_deref()
            .ok_or_else(|| SyncError::malformed("content path was never resolved"))
    }

    pub fn require_repository_base(&self) -> Result<&str> {
        self.repository_base
            .as_deref()
            .ok_or_else(|| SyncError::malformed("repository base was never resolved"))
    }

    /// The path a repository write acts on: the file for binaries, the
    /// resource itself otherwise
    pub fn subject_path(&self) -> Result<&str> {
        match self.file_path.as_deref() {
            Some(file_path) => Ok(file_path),
            None => self.require_content_path(),
        }
    }
}
