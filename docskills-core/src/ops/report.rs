//! Structured results of lifecycle operations
//!
//! The CLI renders these; nothing here prints.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::agents::{Agent, ArtifactState};
use crate::catalog::{LockfileEntry, RegistryEntry};
use crate::context::ContextSyncReport;

/// Per-item outcome of an install or update batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    /// Fetched and written for the first time (or re-installed with force)
    Installed { size: u64, dirs: Vec<PathBuf> },
    /// New content replaced the installed copy
    Updated { size: u64, dirs: Vec<PathBuf> },
    /// The source has not changed since the last fetch
    UpToDate,
    /// Already in the lockfile; install without force skips it
    AlreadyInstalled,
    /// No registry entry matches the requested name
    NotFound,
    /// Update was asked for a skill that is not installed
    NotInstalled,
    Failed { error: String },
}

impl ItemStatus {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ItemStatus::Installed { .. }
                | ItemStatus::Updated { .. }
                | ItemStatus::UpToDate
                | ItemStatus::AlreadyInstalled
        )
    }
}

/// One requested item of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    /// The name as given by the user
    pub requested: String,
    /// Resolved slug, when resolution succeeded
    pub slug: Option<String>,
    /// Display name, when known
    pub name: Option<String>,
    pub status: ItemStatus,
}

impl ItemReport {
    pub fn new(requested: impl Into<String>, status: ItemStatus) -> Self {
        Self {
            requested: requested.into(),
            slug: None,
            name: None,
            status,
        }
    }

    pub fn resolved(
        requested: impl Into<String>,
        slug: impl Into<String>,
        name: impl Into<String>,
        status: ItemStatus,
    ) -> Self {
        Self {
            requested: requested.into(),
            slug: Some(slug.into()),
            name: Some(name.into()),
            status,
        }
    }

    /// Best label for display
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.requested)
    }
}

/// Result of `install` or `update`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub items: Vec<ItemReport>,
    pub context: ContextSyncReport,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.status.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    /// The batch fails only when nothing requested succeeded
    pub fn is_success(&self) -> bool {
        self.items.is_empty() || self.succeeded() > 0
    }

    /// Slugs of items that succeeded
    pub fn successful_slugs(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|i| i.status.is_success())
            .filter_map(|i| i.slug.clone())
            .collect()
    }
}

/// Result of `remove`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveReport {
    pub slug: String,
    pub name: String,
    /// Agent directories a file was deleted from
    pub dirs: Vec<PathBuf>,
    pub context: ContextSyncReport,
}

/// An installed skill as shown by `list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedSkill {
    pub entry: LockfileEntry,
    pub stale: bool,
    pub age_days: i64,
    /// State of each configured agent's copy
    pub artifacts: Vec<(Agent, ArtifactState)>,
}

impl ListedSkill {
    /// Any configured agent's copy is missing or edited
    pub fn has_drift(&self) -> bool {
        self.artifacts
            .iter()
            .any(|(_, state)| *state != ArtifactState::Current)
    }
}

/// Result of `info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoReport {
    /// Registry entry, when the registry knows the name
    pub entry: Option<RegistryEntry>,
    /// Installed state, when installed
    pub installed: Option<ListedSkill>,
    /// Directory page for the library
    pub web_url: Option<String>,
    /// Set when the registry could not be loaded
    pub registry_error: Option<String>,
}

/// Result of `search`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReport {
    /// Matches, truncated to the requested limit
    pub results: Vec<RegistryEntry>,
    /// Matches before truncation
    pub total: usize,
    /// Category filter that was applied, if any
    pub categories: Option<Vec<String>>,
    /// Installed slugs, for marking results
    pub installed: BTreeSet<String>,
    /// Every category in the registry
    pub available_categories: Vec<String>,
}

/// Result of `init`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    pub config_path: PathBuf,
    pub agents: Vec<Agent>,
    pub categories: Vec<String>,
    /// Agent directories that did not exist before
    pub created_dirs: Vec<PathBuf>,
    pub lockfile_created: bool,
    pub context: ContextSyncReport,
}
