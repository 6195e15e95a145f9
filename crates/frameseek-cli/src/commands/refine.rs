//! Iterative refinement search.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use tracing::{info, warn};

use frameseek_core::agent::cancel_pair;
use frameseek_core::video::TranscriptIndex;
use frameseek_core::{
    rank_videos, FrameseekConfig, KeyframeResponse, ObjectIndex, QueryList, QueryReasoner,
    RefineRequest, RefinementAgent, Widen,
};
use frameseek_embedding::OllamaReasoner;

use crate::output;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Strategy {
    /// Keep the query and page past held results
    Widen,
    /// Let a local Ollama model reformulate the query
    Ollama,
    /// Walk through the --reformulation queries in order
    List,
}

#[derive(Args)]
pub struct RefineArgs {
    /// Search query
    pub query: String,

    /// Number of results to return
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Minimum similarity score
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Maximum refinement rounds after the initial search
    #[arg(long)]
    pub max_rounds: Option<usize>,

    /// How follow-up queries are chosen
    #[arg(long, value_enum, default_value = "widen")]
    pub strategy: Strategy,

    /// Follow-up query for the list strategy (repeatable)
    #[arg(long = "reformulation")]
    pub reformulations: Vec<String>,

    /// JSON file of detected objects per keyframe
    #[arg(long)]
    pub objects: Option<PathBuf>,

    /// Object label to look for in the best video (repeatable); defaults to the
    /// model's suggestion
    #[arg(long = "object")]
    pub object_labels: Vec<String>,

    /// JSON file of speech transcripts per video
    #[arg(long)]
    pub asr: Option<PathBuf>,

    /// Ask the reasoning model to answer the query from the final keyframes
    #[arg(long)]
    pub answer: bool,

    /// Fail unless refinement finished on its own
    #[arg(long)]
    pub strict: bool,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: RefineArgs, config: &FrameseekConfig) -> Result<()> {
    let service = Arc::new(super::connect_service(config).await?);

    let mut ollama: Option<Arc<OllamaReasoner>> = None;
    let reasoner: Arc<dyn QueryReasoner> = match args.strategy {
        Strategy::Widen => Arc::new(Widen),
        Strategy::List => {
            if args.reformulations.is_empty() {
                anyhow::bail!("The list strategy needs at least one --reformulation");
            }
            Arc::new(QueryList::new(args.reformulations.iter().cloned()))
        }
        Strategy::Ollama => {
            let r = Arc::new(OllamaReasoner::from_config(&config.ollama));
            ollama = Some(r.clone());
            r
        }
    };

    let top_k = args.top_k.unwrap_or(config.search.top_k);
    let request = RefineRequest::new(args.query.clone(), top_k)
        .with_threshold(args.threshold.unwrap_or(config.search.score_threshold))
        .with_max_rounds(args.max_rounds.unwrap_or(config.search.max_rounds));

    let (handle, signal) = cancel_pair();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current round");
            handle.cancel();
        }
    });

    let agent = RefinementAgent::new(service, reasoner);
    let outcome = agent.refine_with_cancel(&request, &signal).await;
    ctrl_c.abort();
    let outcome = outcome?;

    info!(
        query_id = %outcome.query_id,
        termination = %outcome.termination,
        rounds = outcome.rounds_taken(),
        "Refinement finished"
    );

    let targets = if args.object_labels.is_empty() {
        ollama.as_ref().map(|r| r.suggested_objects()).unwrap_or_default()
    } else {
        args.object_labels.clone()
    };
    let objects = match &args.objects {
        Some(path) => Some(
            ObjectIndex::load(path)
                .with_context(|| format!("Failed to load object labels from {}", path.display()))?,
        ),
        None => None,
    };

    // objects only narrow the frames of the best video, never the ranking
    let videos = rank_videos(&outcome.results);
    let best = videos.first().map(|video| match &objects {
        Some(index) => video.narrow_to_objects(index, &targets),
        None => video.clone(),
    });

    let transcript = match (&args.asr, &best) {
        (Some(path), Some(video)) => {
            let index = TranscriptIndex::load(path)
                .with_context(|| format!("Failed to load transcripts from {}", path.display()))?;
            video.frame_span().and_then(|(first, last)| {
                index.window(video.group_num, video.video_num, first, last)
            })
        }
        _ => None,
    };

    let answer = if args.answer {
        let answerer = match &ollama {
            Some(r) => r.clone(),
            None => Arc::new(OllamaReasoner::from_config(&config.ollama)),
        };
        let frames = best.as_ref().map(|v| v.keyframes.as_slice()).unwrap_or(&[]);
        Some(
            answerer
                .answer(&args.query, frames, objects.as_ref(), transcript.as_deref())
                .await
                .context("Failed to generate an answer")?,
        )
    } else {
        None
    };

    if args.json {
        let responses: Vec<KeyframeResponse> =
            outcome.results.iter().map(KeyframeResponse::from).collect();
        let best_frames: Vec<KeyframeResponse> = best
            .iter()
            .flat_map(|v| v.keyframes.iter().map(KeyframeResponse::from))
            .collect();
        output::print_json(&serde_json::json!({
            "query_id": outcome.query_id,
            "started_at": outcome.started_at,
            "termination": outcome.termination,
            "results": responses,
            "trace": outcome.trace,
            "best_video": best.as_ref().map(|v| v.path()),
            "best_frames": best_frames,
            "transcript": transcript,
            "answer": answer,
        }))?;
    } else {
        output::print_results(&outcome.results);
        println!();
        output::print_trace(&outcome.trace);
        println!();
        let termination = if outcome.is_incomplete() {
            outcome.termination.as_str().yellow()
        } else {
            outcome.termination.as_str().green()
        };
        println!("{}: {}", "Termination".bold(), termination);
        if let Some(video) = &best {
            output::print_video(video);
        }
        if let Some(text) = &transcript {
            println!("{}: {}", "Transcript".bold(), text);
        }
        if let Some(text) = &answer {
            println!("{}: {}", "Answer".bold(), text);
        }
    }

    if args.strict {
        outcome.require_complete()?;
    }
    Ok(())
}
