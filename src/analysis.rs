//! Workout progress analysis.
//!
//! The text comes from an OpenAI-compatible chat-completions endpoint when an
//! API key is configured. Any failure falls back to a locally rendered
//! markdown summary, so the route always answers.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use spin_sdk::http::{Request, Response};
use thiserror::Error;

use crate::auth::require_user;
use crate::config::AiConfig;
use crate::core::errors::ApiError;
use crate::core::helpers::json;
use crate::router::AppContext;
use crate::workouts::{self, WorkoutDetail};

pub const NO_DATA_MESSAGE: &str =
    "No workout data available to analyze. Complete some workouts to get AI insights.";

const PROMPT_WORKOUTS: usize = 20;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("missing api key: AI_API_KEY environment variable not set")]
    MissingApiKey,
    #[error("network error: {0}")]
    Transport(String),
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("empty completion")]
    Empty,
}

/// A single-prompt text completion backend.
#[async_trait(?Send)]
pub trait CompletionClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, CompletionError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl ChatResponse {
    fn text(self) -> Option<String> {
        self.choices.into_iter().next().map(|c| c.message.content)
    }
}

/// Chat-completions client. Uses reqwest natively and Spin's outbound HTTP
/// inside the component.
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    config: AiConfig,
    #[cfg(not(target_arch = "wasm32"))]
    http: reqwest::Client,
}

impl ChatCompletionsClient {
    pub fn new(config: AiConfig) -> Self {
        Self {
            config,
            #[cfg(not(target_arch = "wasm32"))]
            http: reqwest::Client::new(),
        }
    }

    fn request_body(&self, system: &str, prompt: &str) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: 0.4,
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    async fn post(&self, api_key: &str, body: &ChatRequest<'_>) -> Result<(u16, Vec<u8>), CompletionError> {
        let res = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let status = res.status().as_u16();
        let bytes = res
            .bytes()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;
        Ok((status, bytes.to_vec()))
    }

    #[cfg(target_arch = "wasm32")]
    async fn post(&self, api_key: &str, body: &ChatRequest<'_>) -> Result<(u16, Vec<u8>), CompletionError> {
        let payload = serde_json::to_vec(body).map_err(|e| CompletionError::Malformed(e.to_string()))?;
        let req = Request::builder()
            .method(spin_sdk::http::Method::Post)
            .uri(self.config.api_url.as_str())
            .header("authorization", format!("Bearer {}", api_key))
            .header("content-type", "application/json")
            .body(payload)
            .build();

        let res: Response = spin_sdk::http::send(req)
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;
        Ok((*res.status(), res.body().to_vec()))
    }
}

#[async_trait(?Send)]
impl CompletionClient for ChatCompletionsClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, CompletionError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(CompletionError::MissingApiKey)?;

        let (status, body) = self.post(api_key, &self.request_body(system, prompt)).await?;
        if !(200..300).contains(&status) {
            return Err(CompletionError::Http {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let parsed: ChatResponse =
            serde_json::from_slice(&body).map_err(|e| CompletionError::Malformed(e.to_string()))?;
        parsed.text().ok_or(CompletionError::Empty)
    }
}

/// Per-workout line fed to the model and to the local fallback.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkoutDigest {
    pub name: String,
    pub date: String,
    pub exercises: usize,
    pub volume: f64,
}

/// The most recent workouts, oldest first.
pub fn digest(details: &[WorkoutDetail]) -> Vec<WorkoutDigest> {
    let mut ordered: Vec<&WorkoutDetail> = details.iter().collect();
    ordered.sort_by_key(|d| (d.workout.start_time, d.workout.id));
    let skip = ordered.len().saturating_sub(PROMPT_WORKOUTS);

    ordered
        .into_iter()
        .skip(skip)
        .map(|d| WorkoutDigest {
            name: if d.workout.name.is_empty() {
                "Unnamed Workout".to_string()
            } else {
                d.workout.name.clone()
            },
            date: d.workout.start_time.format("%Y-%m-%d").to_string(),
            exercises: d.exercises.len(),
            volume: d.volume().round(),
        })
        .collect()
}

const SYSTEM_PROMPT: &str = "You are a supportive strength and conditioning coach. \
Answer in markdown with short sections and concrete recommendations.";

pub fn build_prompt(workouts: &[WorkoutDigest]) -> String {
    let lines: Vec<String> = workouts
        .iter()
        .map(|w| format!("- {} on {}: {} exercises, volume {}", w.name, w.date, w.exercises, w.volume))
        .collect();

    format!(
        "Analyze my recent training and suggest how to progress.\n\
         Cover consistency, volume trend and three to five recommendations.\n\n\
         Workouts (oldest first):\n{}",
        lines.join("\n")
    )
}

fn thinking_block_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?s)<(think|thinking)>.*?</(think|thinking)>").expect("Regex should compile")
    })
}

fn dangling_close_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"</(think|thinking)>").expect("Regex should compile"))
}

/// Removes reasoning the model left in its reply: closed `<think>` /
/// `<thinking>` blocks, anything before a stray closing tag, and an opening
/// tag that never closes.
pub fn strip_thinking(text: &str) -> String {
    let without_blocks = thinking_block_regex().replace_all(text, "");

    let after_close = match dangling_close_regex().find_iter(&without_blocks).last() {
        Some(m) => &without_blocks[m.end()..],
        None => &without_blocks[..],
    };

    let visible = match after_close.find("<think") {
        Some(open) => &after_close[..open],
        None => after_close,
    };
    visible.trim().to_string()
}

/// Markdown summary rendered without the model.
pub fn local_analysis(workouts: &[WorkoutDigest]) -> String {
    let latest = match workouts.last() {
        Some(w) => w,
        None => return NO_DATA_MESSAGE.to_string(),
    };

    let total = workouts.len();
    let total_volume: f64 = workouts.iter().map(|w| w.volume).sum();
    let average = (total_volume / total as f64).round();
    let verdict = if latest.volume > average {
        "is above your average - great work!"
    } else {
        "is below your average - consider adding more sets or intensity next time."
    };

    format!(
        "## Workout Analysis\n\n\
         Based on your {total} recorded workouts, here's an analysis of your fitness journey:\n\n\
         ### Consistency & Frequency\n\
         You've completed {total} workouts in your current program. This shows dedication to your fitness goals. \
         Try to maintain a consistent schedule of 3-4 workouts per week for optimal results.\n\n\
         ### Volume Progression\n\
         Your average workout volume is {average} units. Your latest workout \"{name}\" had a volume of {volume} units, which {verdict}\n\n\
         ### Recommendations\n\
         1. Focus on consistent weekly workout frequency\n\
         2. Consider tracking your rest periods to ensure optimal recovery\n\
         3. Gradually increase your workout volume over time\n\
         4. Include more variety in your exercises to prevent plateaus\n\
         5. Make sure to balance pushing and pulling movements for overall development\n\n\
         Keep up the great work! Consistency is key to reaching your fitness goals.\n",
        total = total,
        average = average,
        name = latest.name,
        volume = latest.volume,
        verdict = verdict,
    )
}

/// Asks the model for an analysis, falling back to [`local_analysis`] on
/// any failure or an empty cleaned reply.
pub async fn analyze(client: &dyn CompletionClient, workouts: &[WorkoutDigest]) -> String {
    if workouts.is_empty() {
        return NO_DATA_MESSAGE.to_string();
    }

    match client.complete(SYSTEM_PROMPT, &build_prompt(workouts)).await {
        Ok(reply) => {
            let cleaned = strip_thinking(&reply);
            if cleaned.is_empty() {
                tracing::warn!("completion was empty after cleanup, using local analysis");
                local_analysis(workouts)
            } else {
                cleaned
            }
        }
        Err(CompletionError::MissingApiKey) => {
            tracing::debug!("no AI key configured, using local analysis");
            local_analysis(workouts)
        }
        Err(e) => {
            tracing::warn!(error = %e, "completion failed, using local analysis");
            local_analysis(workouts)
        }
    }
}

#[derive(Serialize)]
struct AnalysisResponse {
    analysis: String,
}

// === HTTP Handlers ===

pub async fn workout_analysis(ctx: &AppContext<'_>, req: &Request) -> Result<Response, ApiError> {
    let user_id = require_user(ctx, req)?;

    let details = workouts::user_workout_details(ctx.store, user_id)?;
    let analysis = analyze(ctx.ai, &digest(&details)).await;

    json(200, &AnalysisResponse { analysis })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(Result<String, ()>);

    #[async_trait(?Send)]
    impl CompletionClient for Canned {
        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, CompletionError> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(()) => Err(CompletionError::Http {
                    status: 503,
                    body: "unavailable".to_string(),
                }),
            }
        }
    }

    fn sample() -> Vec<WorkoutDigest> {
        vec![
            WorkoutDigest { name: "Legs".to_string(), date: "2024-03-01".to_string(), exercises: 3, volume: 1000.0 },
            WorkoutDigest { name: "Push".to_string(), date: "2024-03-03".to_string(), exercises: 4, volume: 2000.0 },
        ]
    }

    #[test]
    fn strips_closed_and_dangling_thinking() {
        assert_eq!(strip_thinking("<think>plan</think>\n## Result"), "## Result");
        assert_eq!(strip_thinking("<thinking>a\nb</thinking>Answer"), "Answer");
        assert_eq!(strip_thinking("leaked reasoning</think>  Answer"), "Answer");
        assert_eq!(strip_thinking("Answer<think>never closed"), "Answer");
        assert_eq!(strip_thinking("Plain answer"), "Plain answer");
    }

    #[test]
    fn local_analysis_compares_latest_to_average() {
        let text = local_analysis(&sample());
        assert!(text.starts_with("## Workout Analysis"));
        assert!(text.contains("Based on your 2 recorded workouts"));
        assert!(text.contains("average workout volume is 1500 units"));
        assert!(text.contains("\"Push\" had a volume of 2000 units, which is above your average"));
    }

    #[tokio::test]
    async fn failures_fall_back_to_local_text() {
        let text = analyze(&Canned(Err(())), &sample()).await;
        assert_eq!(text, local_analysis(&sample()));

        let blank = analyze(&Canned(Ok("<think>only thoughts</think>".to_string())), &sample()).await;
        assert_eq!(blank, local_analysis(&sample()));
    }

    #[tokio::test]
    async fn successful_replies_are_cleaned() {
        let text = analyze(&Canned(Ok("<think>hmm</think>\nKeep lifting.".to_string())), &sample()).await;
        assert_eq!(text, "Keep lifting.");
    }

    #[tokio::test]
    async fn no_workouts_skips_the_model() {
        let text = analyze(&Canned(Ok("should not be used".to_string())), &[]).await;
        assert_eq!(text, NO_DATA_MESSAGE);
    }

    #[tokio::test]
    async fn missing_key_is_reported() {
        let client = ChatCompletionsClient::new(AiConfig::default());
        assert!(matches!(
            client.complete("s", "p").await,
            Err(CompletionError::MissingApiKey)
        ));
    }
}
