//! `recur`: command-line front end for the lesson recurrence engine.
//!
//! Every command prints JSON on stdout. Logs go to stderr and are controlled
//! with `RUST_LOG`.

mod args;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use args::{Args, Commands};
use clap::Parser;
use lesson_recurrence::{
    decode, encode, last_occurrence, next_occurrence_after, occurrences, resolve_split, Action,
    EditRequest, EngineConfig, LessonChanges, Mutation, Scope, SplitPlan,
};
use serde_json::{json, Value};
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Args { config, command } = Args::parse();
    let config = match config {
        Some(path) => load_config(&path)?,
        None => EngineConfig::default(),
    };
    debug!(?config, "configuration loaded");

    let output = run(command, &config)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn load_config(path: &Path) -> Result<EngineConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    EngineConfig::from_json(&text).context("Failed to parse config file")
}

fn run(command: Commands, config: &EngineConfig) -> Result<Value> {
    match command {
        Commands::Decode { rule } => {
            let (anchor, options) = decode(&rule).context("Failed to decode rule")?;
            Ok(json!({ "anchor": anchor, "options": options }))
        }
        Commands::Encode { date, time, shape } => {
            let rule = encode(Some(date), Some(time), &shape.options(), true)
                .context("Failed to encode rule")?;
            Ok(json!({ "rule": rule }))
        }
        Commands::Expand { rule, limit } => {
            let dates = occurrences(&rule, limit).context("Failed to expand rule")?;
            Ok(json!({ "occurrences": dates }))
        }
        Commands::Last { rule } => {
            let last = last_occurrence(&rule).context("Failed to expand rule")?;
            Ok(json!({ "last": last }))
        }
        Commands::Next { rule, after } => {
            let next = next_occurrence_after(&rule, after).context("Failed to expand rule")?;
            Ok(json!({ "next": next }))
        }
        Commands::Split {
            rule,
            at,
            delete,
            shape,
        } => {
            let action = if delete {
                Action::Delete
            } else {
                Action::Edit(EditRequest {
                    changes: LessonChanges::default(),
                    recurrence: Some(shape.options()),
                    recurrence_changed: true,
                })
            };
            let plan = resolve_split(&rule, at, Mutation::new(action, Scope::Future))
                .context("Failed to resolve split")?;
            let materialized = match &plan {
                SplitPlan::Split {
                    replacement: Some(replacement),
                    ..
                } => occurrences(replacement, config.materialize_limit)
                    .context("Failed to expand replacement rule")?,
                _ => Vec::new(),
            };
            Ok(json!({ "plan": plan, "materialized": materialized }))
        }
    }
}
