//! docskills catalog - registry discovery and installed-state tracking
//!
//! # Overview
//!
//! The catalog system allows users to:
//! - Search and browse the registry of libraries publishing `llms.txt`
//! - Resolve a name or slug to a single registry entry
//! - Track installed skills, their sources and validators via the lockfile
//!
//! # Architecture
//!
//! ```text
//! Registry (docskills.dev)
//!     │
//!     └── registry.json     ← Lists every library and its llms.txt URLs
//!            │
//!            ▼
//!     ~/.cache/docskills/registry.json   ← 24h cache
//!            │
//!            ▼
//!     docskills CLI
//!            │
//!            ▼
//!     .docskills/lock.json  ← Installed skills
//! ```

mod index;
pub mod lock;
mod registry;

pub use index::{RegistryEntry, RegistryIndex, SkillFormat};
pub use lock::{Lockfile, LockfileEntry, LOCKFILE_VERSION, STALE_AFTER_DAYS};
pub use registry::{RegistryClient, REGISTRY_CACHE_TTL};

#[cfg(test)]
pub(crate) use index::sample_registry_json;
#[cfg(test)]
pub(crate) use lock::make_test_entry;
