//! Managed section of the project's CLAUDE.md
//!
//! A marker-delimited block lists every installed skill so agents know the
//! files exist. The block is regenerated from the lockfile after each
//! mutating command; everything outside the markers is left as written.
//!
//! The file is split into three regions before rewriting:
//!
//! ```text
//! prefix                     ← kept verbatim
//! <!-- docskills:start -->
//! ...managed...              ← regenerated
//! <!-- docskills:end -->
//! suffix                     ← kept verbatim
//! ```
//!
//! A start marker without an end marker means a previous edit went wrong;
//! everything from the start marker on is treated as managed and replaced.

use anyhow::{Context, Result};
use std::path::Path;

use crate::agents::{skill_file_name, Agent};
use crate::catalog::{lock, LockfileEntry};

/// Markdown file holding the managed section
pub const CONTEXT_FILE: &str = "CLAUDE.md";

pub const START_MARKER: &str = "<!-- docskills:start -->";
pub const END_MARKER: &str = "<!-- docskills:end -->";

/// How the existing file content is laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout<'a> {
    /// No start marker
    Unmanaged,
    /// Both markers present
    Managed { prefix: &'a str, suffix: &'a str },
    /// Start marker without an end marker
    Unterminated { prefix: &'a str },
}

fn split(content: &str) -> Layout<'_> {
    let Some(start) = content.find(START_MARKER) else {
        return Layout::Unmanaged;
    };

    let body_start = start + START_MARKER.len();
    match content[body_start..].find(END_MARKER) {
        Some(offset) => Layout::Managed {
            prefix: &content[..start],
            suffix: &content[body_start + offset + END_MARKER.len()..],
        },
        None => Layout::Unterminated {
            prefix: &content[..start],
        },
    }
}

/// Result of rewriting file content
#[derive(Debug, Clone, PartialEq, Eq)]
struct Rewrite {
    content: String,
    /// An unterminated section was repaired
    repaired: bool,
}

/// Replace, append or strip the managed section
///
/// `section` is `None` when nothing is installed.
fn rewrite(content: &str, section: Option<&str>) -> Rewrite {
    let layout = split(content);
    let repaired = matches!(layout, Layout::Unterminated { .. });

    let content = match (layout, section) {
        (Layout::Unmanaged, Some(section)) => {
            if content.trim().is_empty() {
                format!("{section}\n")
            } else {
                format!("{}\n\n{section}\n", content.trim_end())
            }
        }
        (Layout::Managed { prefix, suffix }, Some(section)) => {
            format!("{prefix}{section}{suffix}")
        }
        (Layout::Unterminated { prefix }, Some(section)) => format!("{prefix}{section}\n"),
        (Layout::Unmanaged, None) => content.to_string(),
        (Layout::Managed { prefix, suffix }, None) => join_around(prefix, suffix),
        (Layout::Unterminated { prefix }, None) => join_around(prefix, ""),
    };

    Rewrite { content, repaired }
}

/// Join the text around a removed section without leaving a gap
fn join_around(prefix: &str, suffix: &str) -> String {
    let head = prefix.trim_end();
    let tail = suffix.trim_start_matches(['\n', '\r']);

    match (head.is_empty(), tail.trim().is_empty()) {
        (true, true) => String::new(),
        (true, false) => tail.to_string(),
        (false, true) => format!("{head}\n"),
        (false, false) => format!("{head}\n\n{tail}"),
    }
}

/// Render the managed section for the installed entries
///
/// Paths point at the copy in `agent`'s directory.
pub fn render_section<'a>(
    entries: impl IntoIterator<Item = &'a LockfileEntry>,
    agent: Agent,
) -> String {
    let mut section = String::new();
    section.push_str(START_MARKER);
    section.push_str("\n## Library documentation\n\n");
    section.push_str(
        "Up-to-date documentation for these libraries is installed in this project.\n\
         Read the matching file before writing code that uses the library.\n\n",
    );
    for entry in entries {
        section.push_str(&format!(
            "- **{}**: `{}/docs/{}`\n",
            entry.name,
            agent.root_dir(),
            skill_file_name(&entry.slug)
        ));
    }
    section.push_str(END_MARKER);
    section
}

/// What the sync did to the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSync {
    /// The file did not exist and was created
    Created,
    /// The file was rewritten
    Updated,
    /// The file already matched
    Unchanged,
    /// Nothing installed and no file to clean up
    Skipped,
    /// An I/O error prevented the sync; see the warnings
    Failed,
}

/// Outcome of a context sync, including downgraded errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSyncReport {
    pub outcome: ContextSync,
    pub warnings: Vec<String>,
}

/// Bring the managed section of CLAUDE.md in line with the lockfile
///
/// Never fails: I/O errors become warnings in the report.
pub fn sync_claude_md(project_dir: &Path, agents: &[Agent]) -> ContextSyncReport {
    let mut warnings = Vec::new();
    match try_sync(project_dir, agents, &mut warnings) {
        Ok(outcome) => ContextSyncReport { outcome, warnings },
        Err(e) => {
            tracing::warn!("Failed to update {}: {:#}", CONTEXT_FILE, e);
            warnings.push(format!("Could not update {CONTEXT_FILE}: {e:#}"));
            ContextSyncReport {
                outcome: ContextSync::Failed,
                warnings,
            }
        }
    }
}

fn try_sync(project_dir: &Path, agents: &[Agent], warnings: &mut Vec<String>) -> Result<ContextSync> {
    let path = project_dir.join(CONTEXT_FILE);
    let existed = path.exists();
    let existing = if existed {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        String::new()
    };

    let lockfile = lock::read(project_dir);
    let agent = agents.first().copied().unwrap_or(Agent::Claude);
    let section = (!lockfile.is_empty()).then(|| render_section(lockfile.entries.values(), agent));

    let rewrite = rewrite(&existing, section.as_deref());
    if rewrite.repaired {
        let message = format!(
            "{CONTEXT_FILE} had a '{START_MARKER}' marker without '{END_MARKER}'; \
             replaced everything after the start marker"
        );
        tracing::warn!("{}", message);
        warnings.push(message);
    }

    if !existed && rewrite.content.is_empty() {
        return Ok(ContextSync::Skipped);
    }
    if existed && rewrite.content == existing {
        return Ok(ContextSync::Unchanged);
    }

    crate::io::write_atomic(&path, rewrite.content.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;

    tracing::debug!("Updated managed section in {}", path.display());
    Ok(if existed {
        ContextSync::Updated
    } else {
        ContextSync::Created
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::make_test_entry;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn section(names: &[&str]) -> String {
        let entries: Vec<LockfileEntry> = names.iter().map(|n| make_test_entry(n, n)).collect();
        render_section(&entries, Agent::Claude)
    }

    #[test]
    fn test_split_layouts() {
        assert_eq!(split("# Notes\n"), Layout::Unmanaged);
        assert_eq!(
            split(&format!("a\n{START_MARKER}\nx\n{END_MARKER}\nb\n")),
            Layout::Managed {
                prefix: "a\n",
                suffix: "\nb\n"
            }
        );
        assert_eq!(
            split(&format!("a\n{START_MARKER}\nx\n")),
            Layout::Unterminated { prefix: "a\n" }
        );
    }

    #[test]
    fn test_render_section_lists_entries() {
        let rendered = section(&["astro", "react"]);
        assert!(rendered.starts_with(START_MARKER));
        assert!(rendered.ends_with(END_MARKER));
        assert!(rendered.contains("- **astro**: `.claude/docs/astro.md`\n"));
        assert!(rendered.contains("- **react**: `.claude/docs/react.md`\n"));
    }

    #[test]
    fn test_append_to_existing_content() {
        let s = section(&["react"]);
        let result = rewrite("# Project\n\nSome notes.\n", Some(&s));
        assert_eq!(result.content, format!("# Project\n\nSome notes.\n\n{s}\n"));
        assert!(!result.repaired);
    }

    #[test]
    fn test_replace_preserves_surrounding_content() {
        let old = format!("# Top\n\n{START_MARKER}\nold\n{END_MARKER}\n\n## Bottom\n");
        let s = section(&["react"]);
        let result = rewrite(&old, Some(&s));
        assert_eq!(result.content, format!("# Top\n\n{s}\n\n## Bottom\n"));
    }

    #[test]
    fn test_unterminated_section_is_repaired() {
        let old = format!("# Top\n\n{START_MARKER}\nhalf written");
        let s = section(&["react"]);
        let result = rewrite(&old, Some(&s));
        assert_eq!(result.content, format!("# Top\n\n{s}\n"));
        assert!(result.repaired);
    }

    #[test]
    fn test_rewrite_is_stable() {
        let s = section(&["astro", "react"]);
        for start in [
            String::new(),
            "# Project\n".to_string(),
            format!("# Top\n{START_MARKER}\nbroken"),
            format!("{START_MARKER}\nold\n{END_MARKER}\ntrailer"),
        ] {
            let once = rewrite(&start, Some(&s)).content;
            let twice = rewrite(&once, Some(&s)).content;
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_strip_section_when_empty() {
        let old = format!("# Top\n\n{START_MARKER}\nold\n{END_MARKER}\n\n## Bottom\n");
        assert_eq!(rewrite(&old, None).content, "# Top\n\n## Bottom\n");

        let only_section = format!("{START_MARKER}\nold\n{END_MARKER}\n");
        assert_eq!(rewrite(&only_section, None).content, "");

        assert_eq!(rewrite("# Just notes\n", None).content, "# Just notes\n");
    }

    #[test]
    fn test_sync_creates_file_and_is_stable() {
        let temp_dir = TempDir::new().unwrap();
        lock::upsert(temp_dir.path(), make_test_entry("react", "# React")).unwrap();

        let report = sync_claude_md(temp_dir.path(), &[Agent::Claude]);
        assert_eq!(report.outcome, ContextSync::Created);
        let first = std::fs::read(temp_dir.path().join(CONTEXT_FILE)).unwrap();

        let report = sync_claude_md(temp_dir.path(), &[Agent::Claude]);
        assert_eq!(report.outcome, ContextSync::Unchanged);
        let second = std::fs::read(temp_dir.path().join(CONTEXT_FILE)).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_sync_without_entries_does_not_create_file() {
        let temp_dir = TempDir::new().unwrap();
        let report = sync_claude_md(temp_dir.path(), &[Agent::Claude]);
        assert_eq!(report.outcome, ContextSync::Skipped);
        assert!(!temp_dir.path().join(CONTEXT_FILE).exists());
    }

    #[test]
    fn test_sync_removes_section_after_last_uninstall() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONTEXT_FILE);
        std::fs::write(&path, "# Project rules\n").unwrap();

        lock::upsert(temp_dir.path(), make_test_entry("react", "# React")).unwrap();
        assert_eq!(
            sync_claude_md(temp_dir.path(), &[Agent::Cursor]).outcome,
            ContextSync::Updated
        );
        assert!(std::fs::read_to_string(&path)
            .unwrap()
            .contains("`.cursor/docs/react.md`"));

        lock::remove(temp_dir.path(), "react").unwrap();
        assert_eq!(
            sync_claude_md(temp_dir.path(), &[Agent::Cursor]).outcome,
            ContextSync::Updated
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Project rules\n");
    }

    #[test]
    fn test_sync_reports_repair_warning() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(CONTEXT_FILE),
            format!("# Rules\n\n{START_MARKER}\nleftover"),
        )
        .unwrap();
        lock::upsert(temp_dir.path(), make_test_entry("react", "# React")).unwrap();

        let report = sync_claude_md(temp_dir.path(), &[Agent::Claude]);
        assert_eq!(report.outcome, ContextSync::Updated);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains(END_MARKER));
    }

    #[test]
    fn test_sync_io_failure_is_a_warning() {
        let temp_dir = TempDir::new().unwrap();
        // A directory where the file should be makes reading fail
        std::fs::create_dir_all(temp_dir.path().join(CONTEXT_FILE)).unwrap();
        lock::upsert(temp_dir.path(), make_test_entry("react", "# React")).unwrap();

        let report = sync_claude_md(temp_dir.path(), &[Agent::Claude]);
        assert_eq!(report.outcome, ContextSync::Failed);
        assert!(!report.warnings.is_empty());
    }
}
