//! Skill lifecycle operations
//!
//! `install` and `update` run as batches. Every fetch of a batch goes out
//! concurrently through the shared fetch gate, the results are then persisted
//! one at a time in request order, and CLAUDE.md is synced once after the
//! whole batch has landed. Each command emits a single telemetry event.
//!
//! A failing item never aborts its batch; it is reported and the batch as a
//! whole only fails when nothing succeeded. Lockfile write errors are the
//! exception and abort the command.
//!
//! The telemetry event goes out after the command body has finished, so a
//! command that fails still reports once.

mod report;

pub use report::{
    BatchReport, InfoReport, InitReport, ItemReport, ItemStatus, ListedSkill, RemoveReport,
    SearchReport,
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use crate::agents::{Agent, AgentStorage};
use crate::catalog::{lock, Lockfile, LockfileEntry, RegistryClient, RegistryEntry, SkillFormat};
use crate::config::{ProjectConfig, Settings, DIRECTORY_URL};
use crate::context::{sync_claude_md, ContextSyncReport};
use crate::error::FetchError;
use crate::fetch::{FetchResult, Fetcher, Validator};
use crate::telemetry::{Telemetry, TelemetryEvent};

/// Options for [`SkillManager::install`]
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Install the expanded `llms-full.txt` artifact
    pub full: bool,
    /// Re-fetch skills that are already installed
    pub force: bool,
}

/// Options for [`SkillManager::search`]
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Restrict to these categories, overriding the project config
    pub categories: Vec<String>,
    /// Ignore every category restriction
    pub all_categories: bool,
    /// Maximum number of results, 0 for no limit
    pub limit: usize,
    /// Bypass the registry cache
    pub refresh: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            categories: Vec::new(),
            all_categories: false,
            limit: 10,
            refresh: false,
        }
    }
}

/// Options for [`SkillManager::init`]
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Agents to configure; detected when empty
    pub agents: Vec<Agent>,
    pub categories: Vec<String>,
    /// Overwrite an existing project config
    pub force: bool,
}

enum Step<P> {
    Done(ItemReport),
    Fetch {
        url: String,
        validator: Option<Validator>,
        plan: P,
    },
}

enum Landed<P> {
    Done(ItemReport),
    Fetched(P, Result<FetchResult, FetchError>),
}

struct InstallPlan {
    requested: String,
    entry: RegistryEntry,
    url: String,
}

struct UpdatePlan {
    requested: String,
    installed: LockfileEntry,
    drift: bool,
}

/// Runs lifecycle commands against one project
pub struct SkillManager {
    project_dir: PathBuf,
    config: ProjectConfig,
    agents: Vec<Agent>,
    registry: RegistryClient,
    fetcher: Fetcher,
    telemetry: Telemetry,
}

impl SkillManager {
    pub fn new(
        project_dir: impl Into<PathBuf>,
        registry: RegistryClient,
        fetcher: Fetcher,
        telemetry: Telemetry,
    ) -> Result<Self> {
        let project_dir = project_dir.into();
        let config = ProjectConfig::load_or_default(&project_dir)?;
        Ok(Self::with_config(
            project_dir,
            config,
            registry,
            fetcher,
            telemetry,
        ))
    }

    /// Manager using `config` instead of the project's config file
    pub fn with_config(
        project_dir: impl Into<PathBuf>,
        config: ProjectConfig,
        registry: RegistryClient,
        fetcher: Fetcher,
        telemetry: Telemetry,
    ) -> Self {
        let project_dir = project_dir.into();
        let agents = config.resolved_agents(&project_dir);

        tracing::debug!(
            project = %project_dir.display(),
            agents = ?agents,
            "skill manager ready"
        );

        Self {
            project_dir,
            config,
            agents,
            registry,
            fetcher,
            telemetry,
        }
    }

    /// Manager backed by the real network, configured from `settings`
    pub fn from_settings(project_dir: impl Into<PathBuf>, settings: &Settings) -> Result<Self> {
        let fetcher = Fetcher::with_http()?;
        let registry = RegistryClient::from_settings(settings, fetcher.clone());
        let telemetry = Telemetry::from_settings(settings);
        Self::new(project_dir, registry, fetcher, telemetry)
    }

    /// Manager for `init`
    ///
    /// The existing config file is not read, so `init --force` can replace
    /// one that no longer parses.
    pub fn for_init(project_dir: impl Into<PathBuf>, settings: &Settings) -> Result<Self> {
        let fetcher = Fetcher::with_http()?;
        let registry = RegistryClient::from_settings(settings, fetcher.clone());
        let telemetry = Telemetry::from_settings(settings);
        Ok(Self::with_config(
            project_dir,
            ProjectConfig::default(),
            registry,
            fetcher,
            telemetry,
        ))
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Agents skills are materialized for
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    fn storage(&self) -> AgentStorage {
        AgentStorage::new(self.project_dir.clone(), self.agents.clone())
    }

    fn sync_context(&self) -> ContextSyncReport {
        sync_claude_md(&self.project_dir, &self.agents)
    }

    fn track(&self, event: &str, skills: Vec<String>) {
        self.telemetry.track(
            TelemetryEvent::new(event)
                .with_skills(skills)
                .with_agents(&self.agents),
        );
    }

    /// Report a finished command; a failed one carries no skills
    fn track_outcome<T>(
        &self,
        event: &str,
        outcome: &Result<T>,
        skills: impl FnOnce(&T) -> Vec<String>,
    ) {
        let skills = outcome.as_ref().map(skills).unwrap_or_default();
        self.track(event, skills);
    }

    async fn fetch_all<P>(&self, steps: Vec<Step<P>>) -> Vec<Landed<P>> {
        join_all(steps.into_iter().map(|step| async move {
            match step {
                Step::Done(report) => Landed::Done(report),
                Step::Fetch {
                    url,
                    validator,
                    plan,
                } => {
                    let result = self.fetcher.fetch(&url, validator.as_ref()).await;
                    Landed::Fetched(plan, result)
                }
            }
        }))
        .await
    }

    /// Install skills by name or slug
    pub async fn install(&self, names: &[String], options: &InstallOptions) -> Result<BatchReport> {
        let outcome = self.install_batch(names, options).await;
        self.track_outcome("install", &outcome, BatchReport::successful_slugs);
        outcome
    }

    async fn install_batch(&self, names: &[String], options: &InstallOptions) -> Result<BatchReport> {
        let index = self
            .registry
            .load_registry()
            .await
            .context("Failed to load the skill registry")?;
        let lockfile = lock::read(&self.project_dir);
        let format = if options.full {
            SkillFormat::LlmsFullTxt
        } else {
            SkillFormat::LlmsTxt
        };

        let mut seen = HashSet::new();
        let mut steps = Vec::new();
        for name in unique_names(names) {
            let Some(entry) = index.resolve_slug(&name) else {
                tracing::info!(name = %name, "not in registry");
                steps.push(Step::Done(ItemReport::new(name, ItemStatus::NotFound)));
                continue;
            };

            // Two names resolving to the same skill are one item
            if !seen.insert(entry.slug.clone()) {
                continue;
            }

            if !options.force && lockfile.get(&entry.slug).is_some() {
                steps.push(Step::Done(ItemReport::resolved(
                    name,
                    &entry.slug,
                    &entry.name,
                    ItemStatus::AlreadyInstalled,
                )));
                continue;
            }

            let Some(url) = entry.url_for(format) else {
                let error = format!("{} does not publish {}", entry.name, format);
                steps.push(Step::Done(ItemReport::resolved(
                    name,
                    &entry.slug,
                    &entry.name,
                    ItemStatus::Failed { error },
                )));
                continue;
            };

            steps.push(Step::Fetch {
                url: url.to_string(),
                validator: None,
                plan: InstallPlan {
                    requested: name,
                    entry: entry.clone(),
                    url: url.to_string(),
                },
            });
        }

        let storage = self.storage();
        let mut items = Vec::with_capacity(steps.len());
        for landed in self.fetch_all(steps).await {
            let (plan, result) = match landed {
                Landed::Done(report) => {
                    items.push(report);
                    continue;
                }
                Landed::Fetched(plan, result) => (plan, result),
            };

            let status = match result {
                Ok(result) if result.not_modified => ItemStatus::Failed {
                    error: format!("{} answered 304 to an unconditional request", plan.url),
                },
                Ok(result) => match storage.write(&plan.entry.slug, &result.content) {
                    Ok(dirs) => {
                        let entry = LockfileEntry::from_fetch(&plan.entry, format, &plan.url, &result);
                        lock::upsert(&self.project_dir, entry)?;
                        tracing::info!(slug = %plan.entry.slug, size = result.content.len(), "installed");
                        ItemStatus::Installed {
                            size: result.content.len() as u64,
                            dirs,
                        }
                    }
                    Err(e) => ItemStatus::Failed {
                        error: format!("{e:#}"),
                    },
                },
                Err(e) => {
                    tracing::warn!(slug = %plan.entry.slug, "{}", e);
                    ItemStatus::Failed {
                        error: e.to_string(),
                    }
                }
            };

            items.push(ItemReport::resolved(
                plan.requested,
                plan.entry.slug,
                plan.entry.name,
                status,
            ));
        }

        Ok(BatchReport {
            items,
            context: self.sync_context(),
        })
    }

    /// Revalidate installed skills, or only `name` when given
    ///
    /// Each skill is re-fetched from the URL recorded in the lockfile with its
    /// stored validators. A skill whose agent copies are missing or edited is
    /// fetched unconditionally so the copies can be restored, as is every
    /// skill when `force` is set.
    pub async fn update(&self, name: Option<&str>, force: bool) -> Result<BatchReport> {
        let outcome = self.update_batch(name, force).await;
        self.track_outcome("update", &outcome, |report| {
            report.items.iter().filter_map(|i| i.slug.clone()).collect()
        });
        outcome
    }

    async fn update_batch(&self, name: Option<&str>, force: bool) -> Result<BatchReport> {
        let lockfile = lock::read(&self.project_dir);
        let storage = self.storage();

        let targets: Vec<(String, LockfileEntry)> = match name {
            Some(name) => match lockfile.find(name) {
                Some(entry) => vec![(name.to_string(), entry.clone())],
                None => Vec::new(),
            },
            None => lockfile
                .entries
                .values()
                .map(|entry| (entry.slug.clone(), entry.clone()))
                .collect(),
        };

        let mut steps = Vec::with_capacity(targets.len().max(1));
        if let (Some(name), true) = (name, targets.is_empty()) {
            steps.push(Step::Done(ItemReport::new(name, ItemStatus::NotInstalled)));
        }

        for (requested, installed) in targets {
            let drift = storage.has_drift(&installed.slug, &installed.checksum);
            if drift {
                tracing::info!(slug = %installed.slug, "agent copies drifted, fetching unconditionally");
            }

            let validator = Some(installed.validator())
                .filter(|v| !force && !drift && !v.is_empty());

            steps.push(Step::Fetch {
                url: installed.source_url.clone(),
                validator,
                plan: UpdatePlan {
                    requested,
                    installed,
                    drift,
                },
            });
        }

        let mut items = Vec::with_capacity(steps.len());
        for landed in self.fetch_all(steps).await {
            let (plan, result) = match landed {
                Landed::Done(report) => {
                    items.push(report);
                    continue;
                }
                Landed::Fetched(plan, result) => (plan, result),
            };

            let previous = &plan.installed;
            let status = match result {
                Ok(result) if result.not_modified => {
                    lock::upsert(&self.project_dir, previous.refreshed(&result))?;
                    tracing::debug!(slug = %previous.slug, "not modified");
                    ItemStatus::UpToDate
                }
                Ok(result) => match storage.write(&previous.slug, &result.content) {
                    Ok(dirs) => {
                        let next = previous.refreshed(&result);
                        let changed = next.checksum != previous.checksum;
                        lock::upsert(&self.project_dir, next)?;

                        if changed || plan.drift {
                            tracing::info!(slug = %previous.slug, changed, "updated");
                            ItemStatus::Updated {
                                size: result.content.len() as u64,
                                dirs,
                            }
                        } else {
                            ItemStatus::UpToDate
                        }
                    }
                    Err(e) => ItemStatus::Failed {
                        error: format!("{e:#}"),
                    },
                },
                Err(e) => {
                    tracing::warn!(slug = %previous.slug, "{}", e);
                    ItemStatus::Failed {
                        error: e.to_string(),
                    }
                }
            };

            items.push(ItemReport::resolved(
                plan.requested,
                &previous.slug,
                &previous.name,
                status,
            ));
        }

        Ok(BatchReport {
            items,
            context: self.sync_context(),
        })
    }

    /// The installed entry matching `name`, if any
    pub fn installed(&self, name: &str) -> Option<LockfileEntry> {
        lock::read(&self.project_dir).find(name).cloned()
    }

    /// Remove an installed skill from every agent directory and the lockfile
    pub fn remove(&self, name: &str) -> Result<RemoveReport> {
        let outcome = self.remove_installed(name);
        self.track_outcome("remove", &outcome, |report| vec![report.slug.clone()]);
        outcome
    }

    fn remove_installed(&self, name: &str) -> Result<RemoveReport> {
        let Some(entry) = self.installed(name) else {
            bail!("'{}' is not installed", name);
        };

        let dirs = self.storage().remove(&entry.slug)?;
        lock::remove(&self.project_dir, &entry.slug)?;
        tracing::info!(slug = %entry.slug, removed_from = dirs.len(), "removed");

        Ok(RemoveReport {
            slug: entry.slug,
            name: entry.name,
            dirs,
            context: self.sync_context(),
        })
    }

    /// Installed skills with staleness and drift, ordered by slug
    pub fn list(&self) -> Vec<ListedSkill> {
        let now = Utc::now();
        let storage = self.storage();
        let skills = lock::entries(&self.project_dir)
            .into_iter()
            .map(|entry| describe(&storage, entry, now))
            .collect();

        self.track("list", Vec::new());
        skills
    }

    /// Registry details and installed state of one skill
    ///
    /// An installed skill is still described when the registry cannot be
    /// loaded; otherwise registry failures are errors.
    pub async fn info(&self, name: &str) -> Result<InfoReport> {
        let outcome = self.describe_skill(name).await;
        self.track_outcome("info", &outcome, |report| {
            report
                .entry
                .as_ref()
                .map(|e| e.slug.clone())
                .or_else(|| report.installed.as_ref().map(|s| s.entry.slug.clone()))
                .into_iter()
                .collect()
        });
        outcome
    }

    async fn describe_skill(&self, name: &str) -> Result<InfoReport> {
        let installed = self.installed(name);

        let (entry, registry_error) = match self.registry.load_registry().await {
            Ok(index) => {
                let entry = index
                    .resolve_slug(name)
                    .or_else(|| {
                        installed
                            .as_ref()
                            .and_then(|e| index.resolve_slug(&e.slug))
                    })
                    .cloned();
                (entry, None)
            }
            Err(e) if installed.is_some() => {
                tracing::warn!("Registry unavailable: {}", e);
                (None, Some(e.to_string()))
            }
            Err(e) => return Err(e).context("Failed to load the skill registry"),
        };

        if entry.is_none() && installed.is_none() {
            bail!("No skill named '{}' in the registry", name);
        }

        let web_url = entry
            .as_ref()
            .map(|e| format!("{}/{}", DIRECTORY_URL, e.web_slug));
        let storage = self.storage();
        let installed = installed.map(|e| describe(&storage, e, Utc::now()));

        Ok(InfoReport {
            entry,
            installed,
            web_url,
            registry_error,
        })
    }

    /// Search the registry
    ///
    /// Categories given in `options` win over the project config's; with
    /// `all_categories` neither applies.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchReport> {
        let outcome = self.search_registry(query, options).await;
        self.track_outcome("search", &outcome, |_| Vec::new());
        outcome
    }

    async fn search_registry(&self, query: &str, options: &SearchOptions) -> Result<SearchReport> {
        let index = if options.refresh {
            self.registry.load_registry_fresh().await
        } else {
            self.registry.load_registry().await
        }
        .context("Failed to load the skill registry")?;

        let categories = if options.all_categories {
            None
        } else if !options.categories.is_empty() {
            Some(options.categories.clone())
        } else if !self.config.categories.is_empty() {
            Some(self.config.categories.clone())
        } else {
            None
        };

        let matches = index.search(query, categories.as_deref());
        let total = matches.len();
        let limit = if options.limit == 0 {
            usize::MAX
        } else {
            options.limit
        };
        let results: Vec<RegistryEntry> = matches.into_iter().take(limit).cloned().collect();

        tracing::debug!(query, total, shown = results.len(), "search");

        Ok(SearchReport {
            results,
            total,
            categories,
            installed: lock::read(&self.project_dir)
                .entries
                .into_keys()
                .collect::<BTreeSet<_>>(),
            available_categories: index.categories().into_iter().map(String::from).collect(),
        })
    }

    /// Set up the project: config, agent directories, lockfile and CLAUDE.md
    pub fn init(&self, options: &InitOptions) -> Result<InitReport> {
        let outcome = self.init_project(options);
        let agents = match &outcome {
            Ok(report) => report.agents.as_slice(),
            Err(_) => self.agents.as_slice(),
        };
        self.telemetry
            .track(TelemetryEvent::new("init").with_agents(agents));
        outcome
    }

    fn init_project(&self, options: &InitOptions) -> Result<InitReport> {
        let config_path = ProjectConfig::path(&self.project_dir);
        if config_path.exists() && !options.force {
            bail!(
                "{} already exists. Use --force to overwrite it.",
                config_path.display()
            );
        }

        let mut config = ProjectConfig {
            agents: options.agents.clone(),
            categories: options.categories.clone(),
        };
        let agents = config.resolved_agents(&self.project_dir);
        config.agents = agents.clone();
        config.save(&self.project_dir)?;

        let mut created_dirs = Vec::new();
        for agent in &agents {
            let dir = self.project_dir.join(agent.skills_dir());
            if !dir.is_dir() {
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
                created_dirs.push(agent.skills_dir());
            }
        }

        let lock_path = Lockfile::path(&self.project_dir);
        let lockfile_created = !lock_path.exists();
        if lockfile_created {
            Lockfile::default().save_to_path(&lock_path)?;
        }

        let context = sync_claude_md(&self.project_dir, &agents);

        tracing::info!(agents = ?agents, "initialized project");

        Ok(InitReport {
            config_path,
            agents,
            categories: config.categories,
            created_dirs,
            lockfile_created,
            context,
        })
    }
}

fn describe(storage: &AgentStorage, entry: LockfileEntry, now: DateTime<Utc>) -> ListedSkill {
    ListedSkill {
        stale: entry.is_stale(now),
        age_days: entry.age_days(now),
        artifacts: storage.inspect(&entry.slug, &entry.checksum),
        entry,
    }
}

/// Trimmed, non-empty names with case-insensitive duplicates dropped
fn unique_names(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_lowercase()))
        .map(String::from)
        .collect()
}
