//! Terminal output formatting.

use anyhow::Result;
use colored::{ColoredString, Colorize};
use serde::Serialize;

use frameseek_core::video::VideoScore;
use frameseek_core::{Decision, RankedResult, RoundTrace};

/// Print any serializable value as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print ranked keyframes as a table.
pub fn print_results(results: &[RankedResult]) {
    if results.is_empty() {
        println!("{}", "No keyframes found.".dimmed());
        return;
    }

    println!("{:<4} {:<10} {:<26} {:>8}", "#", "Key", "Frame", "Score");
    println!("{}", "─".repeat(51));

    for (rank, result) in results.iter().enumerate() {
        println!(
            "{:<4} {:<10} {:<26} {:>8}",
            rank + 1,
            result.key(),
            result.keyframe.image_path(),
            score_colored(result.score)
        );
    }
}

/// Print the per-round refinement trace.
pub fn print_trace(trace: &[RoundTrace]) {
    println!("{}", "Rounds".bold());
    for entry in trace {
        let decision = match (&entry.decision, &entry.decision_error) {
            (_, Some(err)) => format!("decision failed: {}", err).red(),
            (Some(Decision::Continue(q)), _) => format!("continue → {}", q).cyan(),
            (Some(Decision::Stop), _) => "stop".green(),
            (None, _) => "-".dimmed(),
        };

        match &entry.search_error {
            Some(err) => println!(
                "  {} {} {}",
                format!("[{}]", entry.round).dimmed(),
                truncate(&entry.query, 40),
                format!("search failed: {}", err).red()
            ),
            None => println!(
                "  {} {} {} returned, {} new, {} excluded, {}ms  {}",
                format!("[{}]", entry.round).dimmed(),
                truncate(&entry.query, 40),
                entry.returned,
                entry.added,
                entry.excluded,
                entry.elapsed_ms,
                decision
            ),
        }
        if entry.missing_metadata > 0 {
            let note = format!("{} keyframe(s) missing metadata", entry.missing_metadata);
            println!("      {}", note.yellow());
        }
    }
}

/// Print the best-scoring video and its keyframes.
pub fn print_video(video: &VideoScore) {
    println!(
        "{}: {} {}",
        "Best video".bold(),
        video.path().cyan(),
        format!("(mean {:.3}, {} keyframes)", video.mean_score, video.keyframes.len()).dimmed()
    );
    let frames: Vec<String> = video
        .keyframes
        .iter()
        .map(|r| r.keyframe.keyframe_num.to_string())
        .collect();
    println!("  {}", frames.join(", "));
}

fn score_colored(score: f32) -> ColoredString {
    let text = format!("{:.4}", score);
    if score >= 0.7 {
        text.green()
    } else if score >= 0.4 {
        text.yellow()
    } else {
        text.normal()
    }
}

/// Truncate a string to max chars, adding "..." if needed.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
