//! Lockfile management (.docskills/lock.json)
//!
//! Records exactly which skills are installed in a project, where each one
//! came from, and the validators and checksum of the content on disk.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{RegistryEntry, SkillFormat};
use crate::config::STATE_DIR;
use crate::fetch::{checksum, FetchResult, Validator};

/// Lockfile name inside [`STATE_DIR`]
pub const LOCK_FILE: &str = "lock.json";

/// Current lockfile schema version
pub const LOCKFILE_VERSION: u32 = 1;

/// Installed skills older than this are reported as stale
pub const STALE_AFTER_DAYS: i64 = 30;

/// The lockfile aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lockfile {
    /// Schema version
    pub version: u32,

    /// When the lockfile was last written
    pub updated_at: DateTime<Utc>,

    /// Installed skills keyed by slug
    pub entries: BTreeMap<String, LockfileEntry>,
}

/// One installed skill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockfileEntry {
    pub slug: String,

    pub format: SkillFormat,

    /// URL the content was fetched from
    pub source_url: String,

    pub etag: Option<String>,

    pub last_modified: Option<String>,

    /// Last successful fetch, including not-modified revalidations
    pub fetched_at: DateTime<Utc>,

    /// `sha256:<hex>` of the content on disk
    pub checksum: String,

    /// Content size in bytes
    pub size: u64,

    /// Display name at install time
    pub name: String,
}

impl LockfileEntry {
    /// Record freshly fetched content for a registry entry
    pub fn from_fetch(
        entry: &RegistryEntry,
        format: SkillFormat,
        source_url: &str,
        result: &FetchResult,
    ) -> Self {
        Self {
            slug: entry.slug.clone(),
            format,
            source_url: source_url.to_string(),
            etag: result.etag.clone(),
            last_modified: result.last_modified.clone(),
            fetched_at: Utc::now(),
            checksum: checksum(&result.content),
            size: result.content.len() as u64,
            name: entry.name.clone(),
        }
    }

    /// Apply a re-fetch of this entry
    ///
    /// New content replaces checksum, size and validators. A not-modified
    /// result only refreshes `fetched_at` and any validators the server sent.
    pub fn refreshed(&self, result: &FetchResult) -> Self {
        let mut next = self.clone();
        next.fetched_at = Utc::now();
        if result.not_modified {
            next.etag = result.etag.clone().or(next.etag);
            next.last_modified = result.last_modified.clone().or(next.last_modified);
        } else {
            next.etag = result.etag.clone();
            next.last_modified = result.last_modified.clone();
            next.checksum = checksum(&result.content);
            next.size = result.content.len() as u64;
        }
        next
    }

    /// Validators to send when revalidating this entry
    pub fn validator(&self) -> Validator {
        Validator {
            etag: self.etag.clone(),
            last_modified: self.last_modified.clone(),
        }
    }

    /// Whether the last fetch is older than [`STALE_AFTER_DAYS`]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.fetched_at > Duration::days(STALE_AFTER_DAYS)
    }

    /// Whole days since the last fetch
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.fetched_at).num_days().max(0)
    }
}

impl Default for Lockfile {
    fn default() -> Self {
        Self {
            version: LOCKFILE_VERSION,
            updated_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }
}

impl Lockfile {
    /// Lockfile location for a project
    pub fn path(project_dir: &Path) -> PathBuf {
        project_dir.join(STATE_DIR).join(LOCK_FILE)
    }

    /// Load a lockfile, treating a missing or unreadable file as empty
    pub fn load_from_path(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to read {}: {}", path.display(), e);
                }
                return Self::default();
            }
        };

        match serde_json::from_str::<Lockfile>(&content) {
            Ok(lockfile) => lockfile,
            Err(e) => {
                tracing::warn!(
                    "Ignoring unparsable lockfile {}: {}",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Atomically write the lockfile, stamping `updated_at`
    pub fn save_to_path(&mut self, path: &Path) -> Result<()> {
        self.version = LOCKFILE_VERSION;
        self.updated_at = Utc::now();

        let mut content =
            serde_json::to_string_pretty(self).context("Failed to serialize lockfile")?;
        content.push('\n');

        crate::io::write_atomic(path, content.as_bytes())
            .with_context(|| format!("Failed to write lockfile: {}", path.display()))
    }

    /// Insert or replace an entry under its slug
    pub fn upsert(&mut self, entry: LockfileEntry) {
        self.entries.insert(entry.slug.clone(), entry);
    }

    /// Remove an entry, returning it when present
    pub fn remove(&mut self, slug: &str) -> Option<LockfileEntry> {
        self.entries.remove(slug)
    }

    pub fn get(&self, slug: &str) -> Option<&LockfileEntry> {
        self.entries.get(slug)
    }

    /// Find an installed entry by slug (case-insensitive), then exact name
    pub fn find(&self, name: &str) -> Option<&LockfileEntry> {
        let wanted = name.trim();
        self.entries
            .values()
            .find(|e| e.slug.eq_ignore_ascii_case(wanted))
            .or_else(|| {
                let mut by_name = self.entries.values().filter(|e| e.name == wanted);
                match (by_name.next(), by_name.next()) {
                    (Some(entry), None) => Some(entry),
                    _ => None,
                }
            })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Read a project's lockfile; missing or corrupt files read as empty
pub fn read(project_dir: &Path) -> Lockfile {
    Lockfile::load_from_path(&Lockfile::path(project_dir))
}

/// Insert or replace `entry` and persist the lockfile
pub fn upsert(project_dir: &Path, entry: LockfileEntry) -> Result<()> {
    let path = Lockfile::path(project_dir);
    let mut lockfile = Lockfile::load_from_path(&path);
    lockfile.upsert(entry);
    lockfile.save_to_path(&path)
}

/// Remove `slug` and persist the lockfile; absent slugs are not an error
///
/// Returns whether an entry was removed.
pub fn remove(project_dir: &Path, slug: &str) -> Result<bool> {
    let path = Lockfile::path(project_dir);
    let mut lockfile = Lockfile::load_from_path(&path);
    if lockfile.remove(slug).is_none() {
        return Ok(false);
    }
    lockfile.save_to_path(&path)?;
    Ok(true)
}

/// Point lookup of an installed slug
pub fn get_entry(project_dir: &Path, slug: &str) -> Option<LockfileEntry> {
    read(project_dir).entries.remove(slug)
}

/// All installed entries in slug order
pub fn entries(project_dir: &Path) -> Vec<LockfileEntry> {
    read(project_dir).entries.into_values().collect()
}


#[cfg(test)]
pub(crate) use tests::make_test_entry;
