//! Process settings and per-project configuration
//!
//! `Settings` comes from the environment and applies to the whole process.
//! `ProjectConfig` lives in `.docskills/config.yaml` inside a project and
//! selects the agents skills are materialized for.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::agents::Agent;

/// Default registry document
pub const DEFAULT_REGISTRY_URL: &str = "https://docskills.dev/api/registry.json";

/// Default telemetry endpoint
pub const DEFAULT_TELEMETRY_URL: &str = "https://docskills.dev/api/telemetry";

/// Base URL of the library pages on the directory website
pub const DIRECTORY_URL: &str = "https://docskills.dev/sites";

/// Project-local state directory
pub const STATE_DIR: &str = ".docskills";

/// Project config file name inside [`STATE_DIR`]
pub const CONFIG_FILE: &str = "config.yaml";

const ENV_REGISTRY_URL: &str = "DOCSKILLS_REGISTRY_URL";
const ENV_CACHE_DIR: &str = "DOCSKILLS_CACHE_DIR";
const ENV_TELEMETRY_URL: &str = "DOCSKILLS_TELEMETRY_URL";
const ENV_TELEMETRY_DISABLED: &str = "DOCSKILLS_TELEMETRY_DISABLED";
const ENV_DO_NOT_TRACK: &str = "DO_NOT_TRACK";
const ENV_CI: &str = "CI";

/// Process-wide settings resolved from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// URL of the registry JSON document
    pub registry_url: String,

    /// Directory holding the registry cache
    pub cache_dir: PathBuf,

    /// Telemetry endpoint
    pub telemetry_url: String,

    /// False when the user opted out of telemetry
    pub telemetry_enabled: bool,

    /// Running under a CI system
    pub ci: bool,
}

impl Settings {
    /// Resolve settings from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let registry_url =
            non_empty(ENV_REGISTRY_URL).unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string());
        let telemetry_url =
            non_empty(ENV_TELEMETRY_URL).unwrap_or_else(|| DEFAULT_TELEMETRY_URL.to_string());
        let cache_dir = non_empty(ENV_CACHE_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(default_cache_dir);

        let opted_out = [ENV_TELEMETRY_DISABLED, ENV_DO_NOT_TRACK]
            .iter()
            .any(|key| lookup(key).map(|v| is_truthy(&v)).unwrap_or(false));

        Self {
            registry_url,
            cache_dir,
            telemetry_url,
            telemetry_enabled: !opted_out,
            ci: lookup(ENV_CI).map(|v| is_truthy(&v)).unwrap_or(false),
        }
    }

    /// Registry cache file
    pub fn registry_cache_path(&self) -> PathBuf {
        self.cache_dir.join("registry.json")
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "docskills", "docskills")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("docskills"))
}

/// Project configuration (.docskills/config.yaml)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Agents that receive installed skills
    #[serde(default)]
    pub agents: Vec<Agent>,

    /// Categories `search` is restricted to unless `--all-categories` is given
    #[serde(default)]
    pub categories: Vec<String>,
}

impl ProjectConfig {
    /// Config file location for a project
    pub fn path(project_dir: &Path) -> PathBuf {
        project_dir.join(STATE_DIR).join(CONFIG_FILE)
    }

    /// Load the project config, `None` when the project has none
    pub fn load(project_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(project_dir);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read project config: {}", path.display()))?;

        let config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse project config: {}", path.display()))?;

        Ok(Some(config))
    }

    /// Load the project config or fall back to defaults
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        Ok(Self::load(project_dir)?.unwrap_or_default())
    }

    /// Write the config to the project
    pub fn save(&self, project_dir: &Path) -> Result<()> {
        let path = Self::path(project_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content =
            serde_yaml_ng::to_string(self).context("Failed to serialize project config")?;

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write project config: {}", path.display()))?;

        Ok(())
    }

    /// Agents to materialize skills for
    ///
    /// Configured agents win. Otherwise every agent whose root directory
    /// exists in the project, and Claude when none does.
    pub fn resolved_agents(&self, project_dir: &Path) -> Vec<Agent> {
        if !self.agents.is_empty() {
            let mut agents: Vec<Agent> = Vec::with_capacity(self.agents.len());
            for agent in &self.agents {
                if !agents.contains(agent) {
                    agents.push(*agent);
                }
            }
            return agents;
        }

        let detected = Agent::detect(project_dir);
        if detected.is_empty() {
            vec![Agent::Claude]
        } else {
            detected
        }
    }
}
