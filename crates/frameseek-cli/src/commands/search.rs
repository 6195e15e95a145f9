//! Single-shot keyframe search.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use frameseek_core::{ExclusionSet, FrameseekConfig, SearchRequest};

use crate::output;

#[derive(Args)]
pub struct SearchArgs {
    /// Search query
    pub query: String,

    /// Number of results to return
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Minimum similarity score
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Keyframe keys to leave out (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<u64>,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: SearchArgs, config: &FrameseekConfig) -> Result<()> {
    let service = super::connect_service(config).await?;

    let request = SearchRequest::new(args.query, args.top_k.unwrap_or(config.search.top_k))
        .with_threshold(args.threshold.unwrap_or(config.search.score_threshold))
        .with_exclusion(args.exclude.into_iter().collect::<ExclusionSet>());

    let output = service.search(&request).await?;

    if args.json {
        return output::print_json(&serde_json::json!({
            "query": request.query,
            "results": output.responses(),
            "missing_metadata": output.missing_metadata,
        }));
    }

    output::print_results(&output.results);
    if output.is_degraded() {
        println!();
        println!(
            "{} {} keyframe(s) had no metadata: {:?}",
            "!".yellow(),
            output.missing_metadata.len(),
            output.missing_metadata
        );
    }
    Ok(())
}
