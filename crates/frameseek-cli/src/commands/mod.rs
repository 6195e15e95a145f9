//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use frameseek_core::{FrameseekConfig, RetrievalService};
use frameseek_embedding::{OllamaClient, QdrantIndex};
use frameseek_redis::RedisKeyframeStore;

pub mod health;
pub mod refine;
pub mod search;

/// Frameseek - keyframe retrieval over video collections
#[derive(Parser)]
#[command(name = "frameseek")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a TOML config file
    #[arg(short, long, global = true, env = "FRAMESEEK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single keyframe search
    Search(search::SearchArgs),

    /// Search with iterative query refinement
    Refine(refine::RefineArgs),

    /// Check Ollama, Qdrant and Redis
    Health,
}

impl Cli {
    /// Whether stdout is reserved for a JSON document.
    pub fn json_output(&self) -> bool {
        match &self.command {
            Commands::Search(args) => args.json,
            Commands::Refine(args) => args.json,
            Commands::Health => false,
        }
    }

    pub async fn execute(self) -> Result<()> {
        let config = FrameseekConfig::load(self.config.as_deref())
            .context("Failed to load configuration")?;

        match self.command {
            Commands::Search(args) => search::execute(args, &config).await,
            Commands::Refine(args) => refine::execute(args, &config).await,
            Commands::Health => health::execute(&config).await,
        }
    }
}

/// Wire the configured engines into a retrieval service.
pub async fn connect_service(config: &FrameseekConfig) -> Result<RetrievalService> {
    let embedder = OllamaClient::from_config(&config.ollama);
    let index = QdrantIndex::from_config(&config.qdrant)?;
    let store = RedisKeyframeStore::connect(&config.redis)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis.url))?;

    Ok(RetrievalService::new(Arc::new(embedder), Arc::new(index), Arc::new(store))
        .with_timeouts(config.timeouts.call_timeouts()))
}
