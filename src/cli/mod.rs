//! Command-line interface for repobridge.
//!
//! Provides commands for validating a configuration and for replaying
//! recorded messages through the configured routers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{AppConfig, RouterKind, RouterPlan};

pub mod replay;

/// repobridge - keeps a digital repository in step with content changes
#[derive(Parser, Debug)]
#[command(name = "repobridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to $REPOBRIDGE_CONFIG, then ~/.repobridge/config.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the configuration and list the routers it enables
    CheckConfig,

    /// Run recorded messages through every enabled router
    Replay {
        /// JSONL file of {destination, headers, body} envelopes
        #[arg(short, long)]
        input: PathBuf,

        /// Write dead-lettered messages to this JSONL file
        #[arg(long)]
        dead_letters: Option<PathBuf>,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = AppConfig::load(self.config.as_deref()).context("Failed to load configuration")?;

        match self.command {
            Commands::CheckConfig => check_config(&config),
            Commands::Replay {
                input,
                dead_letters,
            } => run_replay(&config, input, dead_letters).await,
        }
    }
}

/// Validate and print the router summary
fn check_config(config: &AppConfig) -> Result<()> {
    let plans = config.plan().context("Configuration is not valid")?;

    if plans.is_empty() {
        println!("No routers enabled");
        return Ok(());
    }

    println!("{:<28} {:<12} {:<28} {:<8}", "ROUTER", "KIND", "INPUT", "WORKERS");
    println!("{}", "-".repeat(80));
    for plan in &plans {
        println!(
            "{:<28} {:<12} {:<28} {:<8}",
            plan.name,
            plan.kind.label(),
            plan.input,
            workers(plan)
        );
    }
    println!();

    for plan in &plans {
        println!("{}:", plan.name);
        println!("  Output:         {}", plan.output.as_deref().unwrap_or("(none)"));
        println!("  Dead letter:    {}", plan.dead_letter.as_deref().unwrap_or("(log and drop)"));
        println!("  Redeliveries:   {}", plan.redelivery.max_redeliveries);
        println!("  Media type:     {}", plan.media_type);
        match &plan.kind {
            RouterKind::Repository(settings) => {
                println!("  Proxy:          {}", settings.proxy_base_url);
                println!("  Mapping:        {}", settings.mapping_base_url);
                println!("  Base header:    {}", settings.repository_base_header);
            }
            RouterKind::Triplestore(settings) => {
                println!("  Triplestore:    {}", settings.triplestore_url);
                println!("  Named graph:    {}", settings.named_graph.as_deref().unwrap_or("(default)"));
            }
            RouterKind::Derivative(settings) => {
                println!("  Generator:      {}", settings.service_url);
            }
        }
    }

    Ok(())
}

fn workers(plan: &RouterPlan) -> String {
    let consumers = &plan.consumers;
    if consumers.async_consumer {
        format!("{}..{}", consumers.concurrency, consumers.max_concurrency)
    } else {
        consumers.concurrency.to_string()
    }
}

async fn run_replay(config: &AppConfig, input: PathBuf, dead_letters: Option<PathBuf>) -> Result<()> {
    let envelopes = replay::read_envelopes(&input)?;
    let summary = replay::replay(config, envelopes).await?;

    eprintln!("Published {} message(s)", summary.published);
    for (destination, count) in &summary.notifications {
        eprintln!("  {count} notification(s) on {destination}");
    }

    match dead_letters {
        Some(path) => {
            replay::write_dead_letters(&path, &summary.dead_letters)?;
            eprintln!(
                "{} dead letter(s) written to {}",
                summary.dead_letters.len(),
                path.display()
            );
        }
        None => eprintln!("{} dead letter(s)", summary.dead_letters.len()),
    }

    Ok(())
}
