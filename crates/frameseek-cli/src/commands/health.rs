//! Backend health checks.

use anyhow::Result;
use colored::Colorize;

use frameseek_core::FrameseekConfig;
use frameseek_embedding::{OllamaClient, QdrantIndex};
use frameseek_redis::RedisKeyframeStore;

pub async fn execute(config: &FrameseekConfig) -> Result<()> {
    println!("{}", "Frameseek Backend Status".bold());
    println!("{}", "─".repeat(40));

    let ollama = OllamaClient::from_config(&config.ollama);
    let ollama_ok = ollama.health_check().await.unwrap_or(false);
    print_status("ollama", ollama_ok, &config.ollama.url);

    let qdrant_ok = match QdrantIndex::from_config(&config.qdrant) {
        Ok(index) => index.health_check().await.unwrap_or(false),
        Err(_) => false,
    };
    print_status("qdrant", qdrant_ok, &config.qdrant.collection);

    let redis_ok = match RedisKeyframeStore::connect(&config.redis).await {
        Ok(store) => store.ping().await.is_ok(),
        Err(_) => false,
    };
    print_status("redis", redis_ok, &config.redis.url);

    println!("{}", "─".repeat(40));
    if !(ollama_ok && qdrant_ok && redis_ok) {
        anyhow::bail!("One or more backends are unavailable");
    }
    Ok(())
}

fn print_status(name: &str, ok: bool, detail: &str) {
    let indicator = if ok { "●".green() } else { "●".red() };
    let label = if ok { "ready".green() } else { "unavailable".red() };
    println!("  {} {:<8} {:<12} {}", indicator, name, label, detail.dimmed());
}
