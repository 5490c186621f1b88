//! Agent storage
//!
//! Materializes installed skills into the directory each AI coding agent
//! reads from. Every agent gets the same file, named after the slug.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::fetch::checksum;

/// A supported AI coding agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Agent {
    Claude,
    Cursor,
    Codex,
    Windsurf,
}

impl Agent {
    pub const ALL: [Agent; 4] = [Agent::Claude, Agent::Cursor, Agent::Codex, Agent::Windsurf];

    pub fn id(&self) -> &'static str {
        match self {
            Agent::Claude => "claude",
            Agent::Cursor => "cursor",
            Agent::Codex => "codex",
            Agent::Windsurf => "windsurf",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Agent::Claude => "Claude Code",
            Agent::Cursor => "Cursor",
            Agent::Codex => "Codex",
            Agent::Windsurf => "Windsurf",
        }
    }

    /// The agent's own project directory, used for detection
    pub fn root_dir(&self) -> &'static str {
        match self {
            Agent::Claude => ".claude",
            Agent::Cursor => ".cursor",
            Agent::Codex => ".codex",
            Agent::Windsurf => ".windsurf",
        }
    }

    /// Project-relative directory skills are written to
    pub fn skills_dir(&self) -> PathBuf {
        Path::new(self.root_dir()).join("docs")
    }

    /// Project-relative path of a skill's file
    pub fn skill_path(&self, slug: &str) -> PathBuf {
        self.skills_dir().join(skill_file_name(slug))
    }

    /// Agents whose root directory exists in the project
    pub fn detect(project_dir: &Path) -> Vec<Agent> {
        Agent::ALL
            .into_iter()
            .filter(|agent| project_dir.join(agent.root_dir()).is_dir())
            .collect()
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Agent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Agent::ALL
            .into_iter()
            .find(|agent| agent.id().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let known: Vec<&str> = Agent::ALL.iter().map(|a| a.id()).collect();
                format!("Unknown agent '{}'. Supported agents: {}", s, known.join(", "))
            })
    }
}

/// File name a skill is stored under
pub fn skill_file_name(slug: &str) -> String {
    format!("{slug}.md")
}

/// Reject slugs that could escape the agent directory
fn validate_slug(slug: &str) -> Result<()> {
    let unsafe_slug = slug.is_empty()
        || slug == "."
        || slug.contains("..")
        || slug.contains('/')
        || slug.contains('\\');
    if unsafe_slug {
        bail!("Invalid skill slug '{}'", slug);
    }
    Ok(())
}

/// State of one agent's copy of a skill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    /// Present and matching the lockfile checksum
    Current,
    Missing,
    /// Present but edited or replaced since install
    Modified,
}

/// Writes and removes skill files for a set of agents
#[derive(Debug, Clone)]
pub struct AgentStorage {
    project_dir: PathBuf,
    agents: Vec<Agent>,
}

impl AgentStorage {
    pub fn new(project_dir: impl Into<PathBuf>, agents: Vec<Agent>) -> Self {
        Self {
            project_dir: project_dir.into(),
            agents,
        }
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Write `content` for every configured agent
    ///
    /// Returns the project-relative directories written to. Files that
    /// already hold `content` are left untouched.
    pub fn write(&self, slug: &str, content: &str) -> Result<Vec<PathBuf>> {
        validate_slug(slug)?;

        let mut touched = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            let path = self.project_dir.join(agent.skill_path(slug));

            let unchanged = std::fs::read(&path)
                .map(|existing| existing == content.as_bytes())
                .unwrap_or(false);
            if !unchanged {
                crate::io::write_atomic(&path, content.as_bytes()).with_context(|| {
                    format!("Failed to write {} skill file {}", agent.display_name(), path.display())
                })?;
            }

            touched.push(agent.skills_dir());
        }

        Ok(touched)
    }

    /// Delete the skill from every agent directory that has it
    ///
    /// All known agents are checked, so copies left in directories of agents
    /// no longer configured are cleaned up too. Returns the directories a file
    /// was removed from.
    pub fn remove(&self, slug: &str) -> Result<Vec<PathBuf>> {
        validate_slug(slug)?;

        let mut touched = Vec::new();
        for agent in Agent::ALL {
            let path = self.project_dir.join(agent.skill_path(slug));
            match std::fs::remove_file(&path) {
                Ok(()) => touched.push(agent.skills_dir()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to remove {}", path.display()))
                }
            }
        }

        Ok(touched)
    }

    /// Compare each configured agent's copy against the expected checksum
    pub fn inspect(&self, slug: &str, expected_checksum: &str) -> Vec<(Agent, ArtifactState)> {
        self.agents
            .iter()
            .map(|agent| {
                let path = self.project_dir.join(agent.skill_path(slug));
                let state = match std::fs::read_to_string(&path) {
                    Ok(content) if checksum(&content) == expected_checksum => ArtifactState::Current,
                    Ok(_) => ArtifactState::Modified,
                    Err(_) => ArtifactState::Missing,
                };
                (*agent, state)
            })
            .collect()
    }

    /// Whether any configured agent's copy is missing or modified
    pub fn has_drift(&self, slug: &str, expected_checksum: &str) -> bool {
        self.inspect(slug, expected_checksum)
            .iter()
            .any(|(_, state)| *state != ArtifactState::Current)
    }
}
