//! docskills CLI commands
//!
//! Provides commands for discovering, installing, and managing
//! documentation skills from the docskills registry.

use anyhow::Result;
use clap::Subcommand;
use std::io::{IsTerminal, Write};
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use docskills_core::agents::{Agent, ArtifactState};
use docskills_core::context::{ContextSync, ContextSyncReport, CONTEXT_FILE};
use docskills_core::ops::{
    BatchReport, InitOptions, InstallOptions, ItemStatus, ListedSkill, SearchOptions,
};
use docskills_core::{Settings, SkillManager};

/// How long pending telemetry may delay exit
const TELEMETRY_GRACE: Duration = Duration::from_millis(1500);

/// Widest description shown in tables
const DESCRIPTION_WIDTH: usize = 50;

#[derive(Subcommand, Debug)]
pub enum SkillsCommand {
    /// Install skills from the registry
    Install {
        /// Library names or slugs
        #[clap(required = true)]
        names: Vec<String>,

        /// Install the expanded llms-full.txt instead of llms.txt
        #[clap(long)]
        full: bool,

        /// Re-fetch skills that are already installed
        #[clap(long)]
        force: bool,
    },

    /// Re-fetch installed skills whose source changed
    Update {
        /// Skill to update (updates all if omitted)
        name: Option<String>,

        /// Fetch unconditionally, ignoring stored validators
        #[clap(long)]
        force: bool,
    },

    /// Remove an installed skill
    Remove {
        /// Skill name or slug
        name: String,

        /// Do not ask for confirmation
        #[clap(long, short)]
        yes: bool,
    },

    /// List installed skills
    List {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Show details about a skill
    Info {
        /// Skill name or slug
        name: String,

        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Search the registry
    Search {
        /// Search query (matches name, slug and description)
        query: String,

        /// Restrict to categories (comma-separated)
        #[clap(long = "category", value_delimiter = ',')]
        categories: Vec<String>,

        /// Ignore every category restriction, including --category
        #[clap(long)]
        all_categories: bool,

        /// Maximum number of results
        #[clap(long, default_value_t = 10)]
        limit: usize,

        /// Output results as JSON
        #[clap(long)]
        json: bool,

        /// Force refresh of the registry (bypass cache)
        #[clap(long)]
        refresh: bool,
    },

    /// Set up docskills in this project
    Init {
        /// Agents to install skills for (comma-separated)
        #[clap(long = "agent", value_delimiter = ',')]
        agents: Vec<Agent>,

        /// Default search categories (comma-separated)
        #[clap(long = "category", value_delimiter = ',')]
        categories: Vec<String>,

        /// Overwrite an existing configuration
        #[clap(long)]
        force: bool,
    },
}

impl SkillsCommand {
    pub async fn execute(self, project_dir: &Path, settings: &Settings) -> Result<ExitCode> {
        let manager = if matches!(self, SkillsCommand::Init { .. }) {
            SkillManager::for_init(project_dir, settings)?
        } else {
            SkillManager::from_settings(project_dir, settings)?
        };

        let result = match self {
            SkillsCommand::Install { names, full, force } => {
                execute_install(&manager, &names, full, force).await
            }
            SkillsCommand::Update { name, force } => {
                execute_update(&manager, name.as_deref(), force).await
            }
            SkillsCommand::Remove { name, yes } => execute_remove(&manager, &name, yes),
            SkillsCommand::List { json } => execute_list(&manager, json),
            SkillsCommand::Info { name, json } => execute_info(&manager, &name, json).await,
            SkillsCommand::Search {
                query,
                categories,
                all_categories,
                limit,
                json,
                refresh,
            } => {
                let options = SearchOptions {
                    categories,
                    all_categories,
                    limit,
                    refresh,
                };
                execute_search(&manager, &query, &options, json).await
            }
            SkillsCommand::Init {
                agents,
                categories,
                force,
            } => execute_init(
                &manager,
                &InitOptions {
                    agents,
                    categories,
                    force,
                },
            ),
        };

        manager.telemetry().flush(TELEMETRY_GRACE).await;
        result
    }
}

async fn execute_install(
    manager: &SkillManager,
    names: &[String],
    full: bool,
    force: bool,
) -> Result<ExitCode> {
    let report = manager
        .install(names, &InstallOptions { full, force })
        .await?;

    print_batch(&report, "install");
    Ok(batch_exit_code(&report))
}

async fn execute_update(manager: &SkillManager, name: Option<&str>, force: bool) -> Result<ExitCode> {
    let report = manager.update(name, force).await?;

    if report.items.is_empty() {
        println!("No skills installed.");
        println!("\nRun 'docskills search <query>' to find available skills.");
        return Ok(ExitCode::SUCCESS);
    }

    print_batch(&report, "update");
    Ok(batch_exit_code(&report))
}

fn print_batch(report: &BatchReport, verb: &str) {
    for item in &report.items {
        let label = item.label();
        match &item.status {
            ItemStatus::Installed { size, dirs } => println!(
                "Installed {label} ({}) -> {}",
                format_size(*size),
                join_paths(dirs)
            ),
            ItemStatus::Updated { size, dirs } => println!(
                "Updated {label} ({}) -> {}",
                format_size(*size),
                join_paths(dirs)
            ),
            ItemStatus::UpToDate => println!("{label} is up to date"),
            ItemStatus::AlreadyInstalled => {
                println!("{label} is already installed (use --force to re-fetch)")
            }
            ItemStatus::NotFound => eprintln!(
                "'{}' not found in the registry. Try 'docskills search {}'",
                item.requested, item.requested
            ),
            ItemStatus::NotInstalled => eprintln!("'{}' is not installed", item.requested),
            ItemStatus::Failed { error } => eprintln!("Failed to {verb} {label}: {error}"),
        }
    }

    print_context(&report.context);

    if report.items.len() > 1 {
        println!(
            "\n{} of {} succeeded",
            report.succeeded(),
            report.items.len()
        );
    }
}

fn batch_exit_code(report: &BatchReport) -> ExitCode {
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_context(report: &ContextSyncReport) {
    for warning in &report.warnings {
        eprintln!("Warning: {warning}");
    }
    match report.outcome {
        ContextSync::Created => println!("Created {CONTEXT_FILE}"),
        ContextSync::Updated => println!("Updated {CONTEXT_FILE}"),
        _ => {}
    }
}

/// Prompt only when a person is at both ends of the terminal
fn is_interactive() -> bool {
    std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N]: ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    let input = input.trim().to_lowercase();

    Ok(input == "y" || input == "yes")
}

fn execute_remove(manager: &SkillManager, name: &str, yes: bool) -> Result<ExitCode> {
    if !yes && is_interactive() {
        if let Some(entry) = manager.installed(name) {
            if !confirm(&format!("Remove {} ({})?", entry.name, entry.slug))? {
                println!("Cancelled");
                return Ok(ExitCode::SUCCESS);
            }
        }
    }

    let report = manager.remove(name)?;

    if report.dirs.is_empty() {
        println!("Removed {} (no files were present)", report.name);
    } else {
        println!("Removed {} from {}", report.name, join_paths(&report.dirs));
    }
    print_context(&report.context);

    Ok(ExitCode::SUCCESS)
}

/// Table row for installed skills
#[derive(Tabled)]
struct InstalledRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Slug")]
    slug: String,
    #[tabled(rename = "Format")]
    format: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Fetched")]
    fetched: String,
    #[tabled(rename = "Status")]
    status: String,
}

fn skill_status(skill: &ListedSkill) -> String {
    let mut notes = Vec::new();
    if skill.stale {
        notes.push(format!("stale ({}d)", skill.age_days));
    }
    for (agent, state) in &skill.artifacts {
        match state {
            ArtifactState::Current => {}
            ArtifactState::Missing => notes.push(format!("missing for {agent}")),
            ArtifactState::Modified => notes.push(format!("modified for {agent}")),
        }
    }

    if notes.is_empty() {
        "ok".to_string()
    } else {
        notes.join(", ")
    }
}

fn listed_json(skill: &ListedSkill) -> serde_json::Value {
    let artifacts: serde_json::Map<String, serde_json::Value> = skill
        .artifacts
        .iter()
        .map(|(agent, state)| {
            let state = match state {
                ArtifactState::Current => "current",
                ArtifactState::Missing => "missing",
                ArtifactState::Modified => "modified",
            };
            (agent.id().to_string(), serde_json::Value::from(state))
        })
        .collect();

    serde_json::json!({
        "slug": skill.entry.slug,
        "name": skill.entry.name,
        "format": skill.entry.format,
        "sourceUrl": skill.entry.source_url,
        "fetchedAt": skill.entry.fetched_at,
        "size": skill.entry.size,
        "checksum": skill.entry.checksum,
        "stale": skill.stale,
        "ageDays": skill.age_days,
        "drift": skill.has_drift(),
        "artifacts": artifacts,
    })
}

fn execute_list(manager: &SkillManager, json_output: bool) -> Result<ExitCode> {
    let skills = manager.list();

    if json_output {
        let json: Vec<serde_json::Value> = skills.iter().map(listed_json).collect();
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(ExitCode::SUCCESS);
    }

    if skills.is_empty() {
        println!("No skills installed.");
        println!("\nRun 'docskills search <query>' to find available skills.");
        return Ok(ExitCode::SUCCESS);
    }

    println!("Installed skills:\n");

    let table_rows: Vec<InstalledRow> = skills
        .iter()
        .map(|skill| InstalledRow {
            name: skill.entry.name.clone(),
            slug: skill.entry.slug.clone(),
            format: skill.entry.format.to_string(),
            size: format_size(skill.entry.size),
            fetched: skill.entry.fetched_at.format("%Y-%m-%d").to_string(),
            status: skill_status(skill),
        })
        .collect();

    let table = Table::new(&table_rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();

    println!("{table}");

    if skills.iter().any(|s| s.stale) {
        println!("\nRun 'docskills update' to refresh stale skills.");
    }
    if skills.iter().any(|s| s.has_drift()) {
        println!("\nSome agent copies are missing or edited. Run 'docskills update' to restore them.");
    }

    Ok(ExitCode::SUCCESS)
}

async fn execute_info(manager: &SkillManager, name: &str, json_output: bool) -> Result<ExitCode> {
    let info = manager.info(name).await?;

    if let Some(error) = &info.registry_error {
        eprintln!("Warning: registry unavailable ({error}); showing installed state only");
    }

    if json_output {
        let output = serde_json::json!({
            "entry": info.entry,
            "webUrl": info.web_url,
            "installed": info.installed.as_ref().map(listed_json),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!();
    if let Some(entry) = &info.entry {
        println!("Skill:    {}", entry.name);
        println!("Slug:     {}", entry.slug);
        println!("Category: {}", entry.category);
        println!("Domain:   {}", entry.domain);
        println!();
        println!("Description:");
        for line in entry.description.lines() {
            println!("  {line}");
        }
        println!();
        println!("Sources:");
        println!("  llms.txt:      {}", entry.llms_txt_url);
        if let Some(full) = &entry.llms_full_txt_url {
            println!("  llms-full.txt: {full}");
        }
        if let Some(web_url) = &info.web_url {
            println!();
            println!("More: {web_url}");
        }
    }

    println!();
    match &info.installed {
        Some(skill) => {
            println!("Installed:");
            println!("  Format:  {}", skill.entry.format);
            println!("  Source:  {}", skill.entry.source_url);
            println!("  Size:    {}", format_size(skill.entry.size));
            println!(
                "  Fetched: {} ({} days ago)",
                skill.entry.fetched_at.format("%Y-%m-%d %H:%M UTC"),
                skill.age_days
            );
            println!("  Status:  {}", skill_status(skill));
        }
        None => {
            if let Some(entry) = &info.entry {
                println!("Not installed. Install with:");
                println!("  docskills install {}", entry.slug);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Table row for search results
#[derive(Tabled)]
struct SearchResultRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Slug")]
    slug: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Installed")]
    installed: String,
    #[tabled(rename = "Description")]
    description: String,
}

async fn execute_search(
    manager: &SkillManager,
    query: &str,
    options: &SearchOptions,
    json_output: bool,
) -> Result<ExitCode> {
    let report = manager.search(query, options).await?;

    if json_output {
        let json_results: Vec<serde_json::Value> = report
            .results
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "slug": entry.slug,
                    "name": entry.name,
                    "description": entry.description,
                    "category": entry.category,
                    "domain": entry.domain,
                    "hasFull": entry.llms_full_txt_url.is_some(),
                    "installed": report.installed.contains(&entry.slug),
                })
            })
            .collect();

        println!("{}", serde_json::to_string_pretty(&json_results)?);
        return Ok(ExitCode::SUCCESS);
    }

    if report.results.is_empty() {
        println!("No skills found.");
        if let Some(categories) = &report.categories {
            println!(
                "\nSearched categories: {}. Use --all-categories to search everything.",
                categories.join(", ")
            );
        }
        if !report.available_categories.is_empty() {
            println!(
                "Available categories: {}",
                report.available_categories.join(", ")
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    println!("Found {} skill(s):\n", report.total);

    let table_rows: Vec<SearchResultRow> = report
        .results
        .iter()
        .map(|entry| SearchResultRow {
            name: entry.name.clone(),
            slug: entry.slug.clone(),
            category: entry.category.clone(),
            installed: if report.installed.contains(&entry.slug) {
                "yes".to_string()
            } else {
                String::new()
            },
            description: truncate(entry.short_description(), DESCRIPTION_WIDTH),
        })
        .collect();

    let table = Table::new(&table_rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();

    println!("{table}");

    if report.total > report.results.len() {
        println!(
            "\nShowing {} of {}. Use --limit to see more.",
            report.results.len(),
            report.total
        );
    }

    Ok(ExitCode::SUCCESS)
}

fn execute_init(manager: &SkillManager, options: &InitOptions) -> Result<ExitCode> {
    let report = manager.init(options)?;

    println!(
        "Initialized docskills in {}",
        manager.project_dir().display()
    );
    println!("  Config: {}", report.config_path.display());

    let agents: Vec<&str> = report.agents.iter().map(|a| a.display_name()).collect();
    println!("  Agents: {}", agents.join(", "));
    if !report.categories.is_empty() {
        println!("  Default categories: {}", report.categories.join(", "));
    }
    for dir in &report.created_dirs {
        println!("  Created {}", dir.display());
    }
    if report.lockfile_created {
        println!("  Created empty lockfile");
    }
    print_context(&report.context);

    println!("\nNext: docskills search <query>");

    Ok(ExitCode::SUCCESS)
}

fn join_paths(paths: &[std::path::PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;

    let bytes_f = bytes as f64;
    if bytes_f >= MB {
        format!("{:.1} MB", bytes_f / MB)
    } else if bytes_f >= KB {
        format!("{:.1} KB", bytes_f / KB)
    } else {
        format!("{bytes} B")
    }
}

/// Shorten to `width` characters, marking the cut with "..."
fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{kept}...")
}
