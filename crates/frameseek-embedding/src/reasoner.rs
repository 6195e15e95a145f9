//! LLM query reasoner backed by Ollama's /api/generate.
//!
//! The model sees the original and current queries plus the best keyframes
//! held so far, and answers with a JSON object choosing whether another
//! round is worth running. The same client also writes the final answer
//! from the chosen keyframes, their object labels and the transcript.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use frameseek_core::config::OllamaConfig;
use frameseek_core::{Decision, ObjectIndex, QueryReasoner, RankedResult, RefinementContext};

/// Results shown to the model per round.
const PROMPT_RESULTS: usize = 10;

/// Transcript characters passed to the answer prompt.
const ANSWER_TRANSCRIPT_CHARS: usize = 4000;

/// Reply format requested from the model.
#[derive(Debug, Deserialize)]
struct ReasonerReply {
    action: String,
    #[serde(default)]
    refined_query: Option<String>,
    #[serde(default)]
    objects: Vec<String>,
}

/// Ollama generation client that decides refinement rounds.
///
/// Object suggestions belong to the run in progress: they are cleared when a
/// run starts at round 0, so use one reasoner per concurrent run.
pub struct OllamaReasoner {
    base_url: String,
    model: String,
    client: reqwest::Client,
    objects: Mutex<Vec<String>>,
}

impl OllamaReasoner {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            objects: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &OllamaConfig) -> Self {
        Self::new(
            &config.url,
            &config.reason_model,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Object labels the model suggested during the current run.
    pub fn suggested_objects(&self) -> Vec<String> {
        self.objects.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// Forget suggestions from a previous run.
    pub fn reset(&self) {
        if let Ok(mut held) = self.objects.lock() {
            held.clear();
        }
    }

    /// Keep the latest non-empty suggestion of this run.
    fn note_objects(&self, round: usize, objects: Vec<String>) {
        if let Ok(mut held) = self.objects.lock() {
            if round == 0 {
                held.clear();
            }
            if !objects.is_empty() {
                *held = objects;
            }
        }
    }

    /// Write a short answer to `query` from the final keyframes.
    pub async fn answer(
        &self,
        query: &str,
        frames: &[RankedResult],
        objects: Option<&ObjectIndex>,
        transcript: Option<&str>,
    ) -> Result<String> {
        let prompt = build_answer_prompt(query, frames, objects, transcript);
        let text = self.generate(&prompt, false).await?;
        if text.is_empty() {
            bail!("Model {} returned an empty answer", self.model);
        }
        Ok(text)
    }

    async fn generate(&self, prompt: &str, json: bool) -> Result<String> {
        let mut request_body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false
        });
        if json {
            request_body["format"] = serde_json::json!("json");
        }

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request_body)
            .send()
            .await
            .context("Failed to connect to Ollama")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if body.contains("model") && body.contains("not found") {
                bail!("Model '{}' not found. Pull it with: ollama pull {}", self.model, self.model);
            }
            bail!("Ollama API error ({}): {}", status, body);
        }

        let result: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(result["response"].as_str().unwrap_or("").trim().to_string())
    }
}

fn build_answer_prompt(
    query: &str,
    frames: &[RankedResult],
    objects: Option<&ObjectIndex>,
    transcript: Option<&str>,
) -> String {
    let mut evidence = String::new();
    for result in frames {
        let path = result.keyframe.image_path();
        let labels = objects.map(|o| o.labels_for(&path)).unwrap_or(&[]);
        let labels = if labels.is_empty() {
            "no objects detected".to_string()
        } else {
            labels.join(", ")
        };
        evidence.push_str(&format!("- {} (score {:.3}): {}\n", path, result.score, labels));
    }
    if evidence.is_empty() {
        evidence.push_str("(no keyframes)\n");
    }

    let speech = match transcript.map(str::trim).filter(|t| !t.is_empty()) {
        Some(text) => text.chars().take(ANSWER_TRANSCRIPT_CHARS).collect::<String>(),
        None => "(no transcript)".to_string(),
    };

    format!(
        r#"Answer the question using only the video evidence below.

Question: {query}

Keyframes from the best matching video, with detected objects:
{evidence}
Speech transcript around these keyframes:
{speech}

Give a short, direct answer. Say so if the evidence is not enough.
"#
    )
}

fn build_prompt(ctx: &RefinementContext<'_>) -> String {
    let mut held = String::new();
    for (rank, result) in ctx.results.iter().take(PROMPT_RESULTS).enumerate() {
        held.push_str(&format!(
            "{}. {} (score {:.3})\n",
            rank + 1,
            result.keyframe.image_path(),
            result.score
        ));
    }
    if held.is_empty() {
        held.push_str("(none)\n");
    }

    format!(
        r#"You refine text queries for searching keyframes of news videos.

Original query: {original}
Current query: {current}
Round: {round}

Best keyframes found so far:
{held}
Decide whether another search round could find better keyframes.
Reply with JSON only:
{{"action": "continue" or "stop", "refined_query": "<rephrased query>",
 "objects": ["<COCO object labels visible in the target scene>"]}}
"#,
        original = ctx.original_query,
        current = ctx.current_query,
        round = ctx.round,
        held = held,
    )
}

/// Turn a model reply into a decision, falling back to the current query
/// when a continue carries no usable reformulation.
fn parse_reply(text: &str, current_query: &str) -> Result<(Decision, Vec<String>)> {
    let body = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let reply: ReasonerReply = serde_json::from_str(body)
        .with_context(|| format!("Malformed reasoner reply: {body}"))?;

    let decision = match reply.action.trim().to_lowercase().as_str() {
        "stop" => Decision::Stop,
        "continue" => {
            let query = reply
                .refined_query
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .unwrap_or_else(|| current_query.to_string());
            Decision::Continue(query)
        }
        other => bail!("Unknown reasoner action: {other}"),
    };
    Ok((decision, reply.objects))
}

#[async_trait]
impl QueryReasoner for OllamaReasoner {
    async fn decide(&self, ctx: &RefinementContext<'_>) -> Result<Decision> {
        let prompt = build_prompt(ctx);
        let text = self.generate(&prompt, true).await?;
        let (decision, objects) = parse_reply(&text, ctx.current_query)?;

        debug!(round = ctx.round, decision = ?decision, objects = ?objects, "Reasoner decided");
        self.note_objects(ctx.round, objects);
        Ok(decision)
    }
}
