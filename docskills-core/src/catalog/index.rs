//! Registry document parsing, resolution and search
//!
//! The registry is a JSON array of entries, one per library. Malformed
//! entries are dropped individually; a document that is not an array is
//! rejected as a whole.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RegistryError;

/// Which artifact of an entry is installed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkillFormat {
    /// The concise `llms.txt`
    #[default]
    #[serde(rename = "llms-txt")]
    LlmsTxt,
    /// The expanded `llms-full.txt`
    #[serde(rename = "llms-full-txt")]
    LlmsFullTxt,
}

impl fmt::Display for SkillFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkillFormat::LlmsTxt => write!(f, "llms.txt"),
            SkillFormat::LlmsFullTxt => write!(f, "llms-full.txt"),
        }
    }
}

/// An installable entry in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    /// Stable unique key
    pub slug: String,

    /// Key of the library's page on the directory website
    pub web_slug: String,

    /// Display name
    pub name: String,

    /// Library website domain
    pub domain: String,

    pub description: String,

    /// URL of the concise artifact
    pub llms_txt_url: String,

    /// URL of the expanded artifact, when the library publishes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llms_full_txt_url: Option<String>,

    pub category: String,
}

impl RegistryEntry {
    fn is_well_formed(&self) -> bool {
        !self.slug.trim().is_empty()
            && !self.name.trim().is_empty()
            && !self.llms_txt_url.trim().is_empty()
    }

    /// Source URL for the requested format
    pub fn url_for(&self, format: SkillFormat) -> Option<&str> {
        match format {
            SkillFormat::LlmsTxt => Some(self.llms_txt_url.as_str()),
            SkillFormat::LlmsFullTxt => self
                .llms_full_txt_url
                .as_deref()
                .filter(|url| !url.trim().is_empty()),
        }
    }

    /// First line of the description
    pub fn short_description(&self) -> &str {
        self.description
            .lines()
            .next()
            .unwrap_or(&self.description)
            .trim()
    }
}

/// The loaded registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryIndex {
    entries: Vec<RegistryEntry>,
}

impl RegistryIndex {
    pub fn new(entries: Vec<RegistryEntry>) -> Self {
        Self { entries }
    }

    /// Parse and validate a registry document
    pub fn from_json(content: &str) -> Result<Self, RegistryError> {
        let document: serde_json::Value =
            serde_json::from_str(content).map_err(|e| RegistryError::Malformed {
                reason: e.to_string(),
            })?;

        let serde_json::Value::Array(items) = document else {
            return Err(RegistryError::Malformed {
                reason: "expected a JSON array of entries".to_string(),
            });
        };

        let total = items.len();
        let entries: Vec<RegistryEntry> = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<RegistryEntry>(item) {
                Ok(entry) if entry.is_well_formed() => Some(entry),
                Ok(entry) => {
                    tracing::debug!("Dropping registry entry with empty fields: {:?}", entry.slug);
                    None
                }
                Err(e) => {
                    tracing::debug!("Dropping malformed registry entry: {}", e);
                    None
                }
            })
            .collect();

        if entries.len() < total {
            tracing::warn!(
                "Ignored {} malformed registry entries out of {}",
                total - entries.len(),
                total
            );
        }

        Ok(Self { entries })
    }

    /// Serialize back to the registry document format
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.entries)
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<RegistryEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a user supplied name to exactly one entry
    ///
    /// Slugs match case-insensitively and take precedence. Names must match
    /// exactly, and more than one entry with that name resolves to nothing.
    pub fn resolve_slug(&self, name: &str) -> Option<&RegistryEntry> {
        let wanted = name.trim();
        if wanted.is_empty() {
            return None;
        }

        if let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.slug.eq_ignore_ascii_case(wanted))
        {
            return Some(entry);
        }

        let mut by_name = self.entries.iter().filter(|e| e.name == wanted);
        match (by_name.next(), by_name.next()) {
            (Some(entry), None) => Some(entry),
            _ => None,
        }
    }

    /// Ranked free-text search
    ///
    /// When `categories` is given, entries outside those categories are
    /// excluded first. Name and slug matches rank above description-only
    /// matches; within a rank the registry order is kept.
    pub fn search(&self, query: &str, categories: Option<&[String]>) -> Vec<&RegistryEntry> {
        let query = query.trim().to_lowercase();

        let mut ranked: Vec<(u8, &RegistryEntry)> = self
            .entries
            .iter()
            .filter(|entry| match categories {
                Some(categories) => categories
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(&entry.category)),
                None => true,
            })
            .filter_map(|entry| match_rank(entry, &query).map(|rank| (rank, entry)))
            .collect();

        // Stable sort keeps registry order within a rank
        ranked.sort_by_key(|(rank, _)| *rank);
        ranked.into_iter().map(|(_, entry)| entry).collect()
    }

    /// Distinct categories in registry order
    pub fn categories(&self) -> Vec<&str> {
        let mut categories: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if !categories.contains(&entry.category.as_str()) {
                categories.push(&entry.category);
            }
        }
        categories
    }
}

fn match_rank(entry: &RegistryEntry, query: &str) -> Option<u8> {
    if query.is_empty() {
        return Some(0);
    }

    let name = entry.name.to_lowercase();
    let slug = entry.slug.to_lowercase();

    if name == query || slug == query {
        Some(0)
    } else if name.contains(query) || slug.contains(query) {
        Some(1)
    } else if entry.description.to_lowercase().contains(query) {
        Some(2)
    } else {
        None
    }
}

#[cfg(test)]
mod index_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn sample_registry_json() -> &'static str {
        r#"[
  {
    "slug": "react",
    "webSlug": "react-dev",
    "name": "React",
    "domain": "react.dev",
    "description": "The library for web and native user interfaces",
    "llmsTxtUrl": "https://react.dev/llms.txt",
    "category": "frontend"
  },
  {
    "slug": "astro",
    "webSlug": "astro-build",
    "name": "Astro",
    "domain": "astro.build",
    "description": "Content-driven web framework, works with React components",
    "llmsTxtUrl": "https://docs.astro.build/llms.txt",
    "llmsFullTxtUrl": "https://docs.astro.build/llms-full.txt",
    "category": "frontend"
  },
  {
    "slug": "prisma",
    "webSlug": "prisma-io",
    "name": "Prisma",
    "domain": "prisma.io",
    "description": "Next-generation ORM for Node.js and TypeScript",
    "llmsTxtUrl": "https://www.prisma.io/docs/llms.txt",
    "category": "database"
  },
  {
    "slug": "react-query",
    "webSlug": "tanstack-query",
    "name": "TanStack Query",
    "domain": "tanstack.com",
    "description": "Powerful asynchronous state management",
    "llmsTxtUrl": "https://tanstack.com/query/llms.txt",
    "category": "frontend"
  }
]"#
    }

    fn sample_index() -> RegistryIndex {
        RegistryIndex::from_json(sample_registry_json()).unwrap()
    }

    #[test]
    fn test_parse_registry() {
        let index = sample_index();
        assert_eq!(index.len(), 4);

        let astro = index.resolve_slug("astro").unwrap();
        assert_eq!(astro.web_slug, "astro-build");
        assert_eq!(
            astro.url_for(SkillFormat::LlmsFullTxt),
            Some("https://docs.astro.build/llms-full.txt")
        );

        let react = index.resolve_slug("react").unwrap();
        assert_eq!(react.url_for(SkillFormat::LlmsFullTxt), None);
    }

    #[test]
    fn test_malformed_entries_are_dropped() {
        let json = r#"[
  {"slug": "ok", "webSlug": "ok", "name": "Ok", "domain": "ok.dev",
   "description": "fine", "llmsTxtUrl": "https://ok.dev/llms.txt", "category": "misc"},
  {"slug": "missing-url", "webSlug": "x", "name": "Missing", "domain": "x",
   "description": "no url", "category": "misc"},
  {"slug": "", "webSlug": "x", "name": "Empty", "domain": "x",
   "description": "empty slug", "llmsTxtUrl": "https://x/llms.txt", "category": "misc"},
  42
]"#;
        let index = RegistryIndex::from_json(json).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.entries()[0].slug, "ok");
    }

    #[test]
    fn test_non_array_document_is_rejected() {
        let err = RegistryIndex::from_json(r#"{"entries": []}"#).unwrap_err();
        assert!(matches!(err, RegistryError::Malformed { .. }));

        let err = RegistryIndex::from_json("not json at all").unwrap_err();
        assert!(matches!(err, RegistryError::Malformed { .. }));
    }

    #[test]
    fn test_resolve_slug_is_case_insensitive() {
        let index = sample_index();
        assert_eq!(index.resolve_slug("REACT").unwrap().slug, "react");
        assert_eq!(index.resolve_slug("  Prisma ").unwrap().slug, "prisma");
    }

    #[test]
    fn test_resolve_falls_back_to_exact_name() {
        let index = sample_index();
        assert_eq!(index.resolve_slug("TanStack Query").unwrap().slug, "react-query");
        // Names are not matched case-insensitively or fuzzily
        assert!(index.resolve_slug("tanstack query").is_none());
        assert!(index.resolve_slug("nonexistent-zzz").is_none());
        assert!(index.resolve_slug("").is_none());
    }

    #[test]
    fn test_ambiguous_name_is_not_found() {
        let mut entries = sample_index().into_entries();
        let mut duplicate = entries[0].clone();
        duplicate.slug = "react-legacy".to_string();
        entries.push(duplicate);
        let index = RegistryIndex::new(entries);

        assert!(index.resolve_slug("React").is_none());
        // Slug lookups are unaffected
        assert_eq!(index.resolve_slug("react-legacy").unwrap().slug, "react-legacy");
    }

    #[test]
    fn test_search_ranks_name_matches_first() {
        let index = sample_index();
        let results: Vec<&str> = index
            .search("react", None)
            .iter()
            .map(|e| e.slug.as_str())
            .collect();

        // exact slug, slug substring, then description-only
        assert_eq!(results, vec!["react", "react-query", "astro"]);
    }

    #[test]
    fn test_search_filters_categories_first() {
        let index = sample_index();
        let categories = vec!["Database".to_string()];

        let results = index.search("", Some(&categories));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].slug, "prisma");

        assert!(index.search("react", Some(&categories)).is_empty());
    }

    #[test]
    fn test_search_without_query_keeps_registry_order() {
        let index = sample_index();
        let results: Vec<&str> = index.search("", None).iter().map(|e| e.slug.as_str()).collect();
        assert_eq!(results, vec!["react", "astro", "prisma", "react-query"]);
    }

    #[test]
    fn test_categories() {
        assert_eq!(sample_index().categories(), vec!["frontend", "database"]);
    }

    #[test]
    fn test_json_roundtrip_preserves_entries() {
        let index = sample_index();
        let json = index.to_json().unwrap();
        assert_eq!(RegistryIndex::from_json(&json).unwrap(), index);
    }
}

#[cfg(test)]
pub(crate) use index_tests::sample_registry_json;
