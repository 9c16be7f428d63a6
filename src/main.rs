//! Livebind CLI - check and replay binding sets

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;

use livebind::{
    BindError, BindingEngine, BindingProgram, BindingSet, BoundValue, EngineConfig, EventLog,
    FixSuggestion, MemoryStore,
};

/// Pause between scripted writes so re-resolutions settle
const WRITE_SETTLE: Duration = Duration::from_millis(25);

#[derive(Parser)]
#[command(name = "livebind")]
#[command(about = "Livebind - live data bindings for faceplates")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse every binding in a file and list its dependencies
    Check {
        /// Path to a binding set (.yaml)
        file: PathBuf,
    },

    /// Activate a binding set against its store snapshot and replay its writes
    Run {
        /// Path to a binding set (.yaml)
        file: PathBuf,

        /// Print the event log as NDJSON instead of deliveries
        #[arg(long)]
        json: bool,

        /// Config file (defaults to ~/.config/livebind/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check { file } => check_bindings(&file),
        Commands::Run { file, json, config } => run_bindings(&file, json, config).await,
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        if let Some(suggestion) = e
            .downcast_ref::<BindError>()
            .and_then(|err| err.fix_suggestion())
        {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

fn load_set(file: &Path) -> anyhow::Result<BindingSet> {
    BindingSet::load(file)
        .map_err(anyhow::Error::new)
        .with_context(|| format!("loading {}", file.display()))
}

fn check_bindings(file: &Path) -> anyhow::Result<()> {
    let set = load_set(file)?;
    let mut failures = 0;

    for spec in &set.bindings {
        match BindingProgram::compile(spec) {
            Ok(program) => {
                let deps = program
                    .dependencies()
                    .iter()
                    .map(|p| p.canonical())
                    .collect::<Vec<_>>();
                println!(
                    "{} {} [{}] {}",
                    "✓".green(),
                    spec.key().bold(),
                    program.mode(),
                    if deps.is_empty() {
                        "(no dependencies)".dimmed().to_string()
                    } else {
                        deps.join(", ")
                    }
                );
            }
            Err(e) => {
                failures += 1;
                println!("{} {} {}", "✗".red(), spec.key().bold(), e);
                if let Some(suggestion) = e.fix_suggestion() {
                    println!("    {} {}", "Fix:".yellow(), suggestion);
                }
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} bindings failed to compile", failures, set.bindings.len());
    }
    println!("{} '{}' is valid ({} bindings)", "✓".green(), file.display(), set.bindings.len());
    Ok(())
}

async fn run_bindings(file: &Path, json: bool, config: Option<PathBuf>) -> anyhow::Result<()> {
    let set = load_set(file)?;
    let config = match config {
        Some(path) => EngineConfig::load_from(&path)?,
        None => EngineConfig::load()?,
    }
    .with_env();

    let store = MemoryStore::from_snapshot(&set.store);
    let log = EventLog::new();
    let engine = BindingEngine::with_retrying_store(store.clone(), config, Arc::new(log.clone()))?;
    let root = set.root.clone().unwrap_or_default();

    for spec in set.bindings.iter().cloned() {
        let key = spec.key();
        let quiet = json;
        engine
            .activate(spec, root.as_str(), move |value: BoundValue| {
                if !quiet {
                    println!("{} {} = {}", "→".cyan(), key.bold(), render(&value));
                }
            })
            .await?;
    }
    settle().await;

    for write in &set.writes {
        if !json {
            println!(
                "{} {}.{} := {}",
                "✎".yellow(),
                write.entity,
                write.field,
                write.value
            );
        }
        store.write(write.entity.as_str(), write.field.as_str(), write.value.clone());
        settle().await;
    }

    engine.shutdown().await;

    if json {
        let mut stdout = std::io::stdout().lock();
        log.write_ndjson(&mut stdout)?;
    }
    Ok(())
}

fn render(value: &BoundValue) -> String {
    match value {
        BoundValue::Unresolved => "<unresolved>".dimmed().to_string(),
        BoundValue::Value(v) => v.to_string(),
    }
}

async fn settle() {
    tokio::time::sleep(WRITE_SETTLE).await;
}
