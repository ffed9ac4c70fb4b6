//! Command-line interface for partline.
//!
//! Provides commands for planning and running the parts lifecycle,
//! cleaning step results, inspecting state and the lifecycle journal.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::config;
use crate::core::LifecycleManager;
use crate::domain::{Action, ActionKind, Step};

/// partline - build a prime tree from a declarative set of parts
#[derive(Parser, Debug)]
#[command(name = "partline")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Project file holding the `parts` mapping
    #[arg(short = 'f', long, global = true, default_value = "parts.yaml", env = "PARTLINE_PARTS_FILE")]
    pub parts_file: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the actions needed to reach a step
    Plan {
        /// Target step (pull, build, stage, prime)
        step: Step,

        /// Parts to process (all parts if omitted)
        parts: Vec<String>,

        /// Also list actions that would be skipped
        #[arg(short, long)]
        verbose: bool,
    },

    /// Plan and execute the actions needed to reach a step
    Run {
        /// Target step (pull, build, stage, prime)
        step: Step,

        /// Parts to process (all parts if omitted)
        parts: Vec<String>,
    },

    /// Remove step results
    Clean {
        /// First step to clean; later steps are cleaned too
        #[arg(short, long, default_value = "pull")]
        step: Step,

        /// Parts to clean (all parts if omitted)
        parts: Vec<String>,
    },

    /// Show the recorded state of every part
    Status,

    /// Show the lifecycle journal
    History {
        /// Maximum number of events to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Refresh package lists
    Refresh {
        /// Also refresh the host's build package list
        #[arg(long)]
        system: bool,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Plan { step, parts, verbose } => plan(&self.parts_file, step, &parts, verbose).await,
            Commands::Run { step, parts } => run(&self.parts_file, step, &parts).await,
            Commands::Clean { step, parts } => clean(&self.parts_file, step, &parts).await,
            Commands::Status => show_status(&self.parts_file).await,
            Commands::History { limit } => show_history(&self.parts_file, limit).await,
            Commands::Refresh { system } => refresh(&self.parts_file, system).await,
            Commands::Config => show_config(),
        }
    }
}

/// Load the project file and construct a lifecycle manager
async fn load_manager(parts_file: &Path) -> Result<LifecycleManager> {
    let cfg = config::config()?;

    let path = if parts_file.is_absolute() {
        parts_file.to_path_buf()
    } else {
        cfg.work_dir.join(parts_file)
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read parts file: {}", path.display()))?;
    let project: serde_yaml::Value = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse parts file: {}", path.display()))?;

    let manager = LifecycleManager::new(&project, cfg.lifecycle_options()).await?;
    for warning in manager.state_warnings() {
        warn!("{}", warning);
    }

    Ok(manager)
}

fn part_refs(parts: &[String]) -> Vec<&str> {
    parts.iter().map(String::as_str).collect()
}

fn print_actions(actions: &[Action], verbose: bool) {
    let mut shown = 0;
    for action in actions {
        if action.kind == ActionKind::Skip && !verbose {
            continue;
        }
        println!("  {}", action);
        shown += 1;
    }

    if shown == 0 {
        println!("  (nothing to do)");
    }
}

async fn plan(parts_file: &Path, step: Step, parts: &[String], verbose: bool) -> Result<()> {
    let mut manager = load_manager(parts_file).await?;
    let actions = manager.plan(step, &part_refs(parts)).await?;

    println!("Actions to reach {}:", step);
    print_actions(&actions, verbose);

    Ok(())
}

async fn run(parts_file: &Path, step: Step, parts: &[String]) -> Result<()> {
    let mut manager = load_manager(parts_file).await?;
    let actions = manager.plan(step, &part_refs(parts)).await?;

    let mut ctx = manager.action_executor()?;
    for action in &actions {
        if action.is_noop() {
            continue;
        }
        eprintln!("[{}]", action);
        ctx.execute(action).await?;
    }
    ctx.finish();

    let executed = actions.iter().filter(|a| !a.is_noop()).count();
    eprintln!("\n[{} action(s) executed, {} skipped]", executed, actions.len() - executed);

    Ok(())
}

async fn clean(parts_file: &Path, step: Step, parts: &[String]) -> Result<()> {
    let mut manager = load_manager(parts_file).await?;
    manager.clean(step, &part_refs(parts)).await?;

    if parts.is_empty() {
        eprintln!("[Cleaned all parts from {}]", step);
    } else {
        eprintln!("[Cleaned {} from {}]", parts.join(", "), step);
    }

    Ok(())
}

async fn show_status(parts_file: &Path) -> Result<()> {
    let manager = load_manager(parts_file).await?;

    println!("{:<24} {:<10} {:<10} {:<10} {:<10}", "PART", "PULL", "BUILD", "STAGE", "PRIME");
    println!("{}", "-".repeat(66));

    for part in manager.graph().topological_order() {
        let states: Vec<&str> = Step::ALL
            .iter()
            .map(|step| match manager.step_record(&part.name, *step) {
                Some(record) if record.outdated => "outdated",
                Some(_) => "done",
                None => "-",
            })
            .collect();

        println!(
            "{:<24} {:<10} {:<10} {:<10} {:<10}",
            part.name, states[0], states[1], states[2], states[3]
        );
    }

    Ok(())
}

async fn show_history(parts_file: &Path, limit: usize) -> Result<()> {
    let manager = load_manager(parts_file).await?;
    let events = manager.journal().replay()?;

    if events.is_empty() {
        println!("No lifecycle events recorded");
        return Ok(());
    }

    let skip = events.len().saturating_sub(limit);
    for event in events.iter().skip(skip) {
        let mut line = format!(
            "{} {:<22} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            format!("{:?}", event.event_type),
            event.summary
        );
        if let Some(ms) = event.duration_ms {
            line.push_str(&format!(" ({}ms)", ms));
        }
        if let Some(error) = &event.error {
            line.push_str(&format!(" error: {}", error));
        }
        println!("{}", line);
    }

    Ok(())
}

async fn refresh(parts_file: &Path, system: bool) -> Result<()> {
    let manager = load_manager(parts_file).await?;
    manager.refresh_packages_list(system).await?;
    eprintln!("[Package lists refreshed]");
    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("partline configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Application:          {}", cfg.application_name);
    println!("Work directory:       {}", cfg.work_dir.display());
    println!("Cache directory:      {}", cfg.cache_dir.display());
    println!("Target architecture:  {}", cfg.arch);
    println!(
        "Base:                 {}",
        if cfg.base.is_empty() { "(none)" } else { cfg.base.as_str() }
    );
    println!("Parallel build count: {}", cfg.parallel_build_count);

    if !cfg.custom_args.is_empty() {
        println!();
        println!("Custom arguments:");
        for (k, v) in &cfg.custom_args {
            println!("  {}: {}", k, v);
        }
    }

    Ok(())
}
