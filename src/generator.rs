//! Natural-language explanations from a chat-completions API.
//!
//! The default endpoint is Groq's OpenAI-compatible API. Responses can be
//! streamed (server-sent events) or fetched in one piece.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{error::GenerationError, types::CandidateMove};

/// Produces free-form text for a prompt.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Coaching prompt for one candidate move.
pub fn build_prompt(fen: &str, candidate: &CandidateMove) -> String {
    let sequence = candidate.pv.join(" → ");
    let mv = &candidate.uci;
    format!(
        "You are a chess coach helping a beginner understand a position.\n\
         \n\
         Position (FEN): {fen}\n\
         Recommended move: {mv}\n\
         Principal variation: {sequence}\n\
         Engine evaluation: {score}\n\
         \n\
         Please explain the following in simple, clear, beginner-friendly language (one sentence each):\n\
         \n\
         1. **Best Move Explanation**\n\
         \x20  Why is {mv} the best move in this position? Mention any tactical or positional advantage it provides.\n\
         \n\
         2. **Strategic Idea**\n\
         \x20  What is the long-term goal behind this move? (e.g., improve piece activity, king safety, center control)\n\
         \n\
         3. **Tactical Motif**\n\
         \x20  Is there a short-term tactical reason (e.g., fork, pin, discovered attack) that makes this move strong?",
        score = candidate.score,
    )
}

#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub stream: bool,
    pub timeout: Duration,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            model: "llama3-70b-8192".to_string(),
            temperature: 0.6,
            max_tokens: 128,
            top_p: 0.95,
            stream: true,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<Content>,
    #[serde(default)]
    delta: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client for Groq and compatible services.
pub struct GroqClient {
    http: reqwest::Client,
    settings: GeneratorSettings,
}

impl GroqClient {
    pub fn new(settings: GeneratorSettings) -> Result<Self, GenerationError> {
        if settings.api_key.is_none() {
            warn!("GROQ_API_KEY is not set; explanation requests will fail");
        }
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self { http, settings })
    }

    async fn fetch_whole(&self, response: reqwest::Response) -> Result<String, GenerationError> {
        let body: ChatResponse = serde_json::from_slice(&response.bytes().await?)?;
        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default())
    }

    async fn fetch_stream(&self, response: reqwest::Response) -> Result<String, GenerationError> {
        let mut events = SseText::default();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            if events.push(&chunk?)? {
                break;
            }
        }
        Ok(events.text)
    }
}

#[async_trait]
impl TextGenerator for GroqClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(GenerationError::MissingApiKey)?;

        let request = ChatRequest {
            model: &self.settings.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            top_p: self.settings.top_p,
            stream: self.settings.stream,
        };

        let response = self
            .http
            .post(&self.settings.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let text = if self.settings.stream {
            self.fetch_stream(response).await?
        } else {
            self.fetch_whole(response).await?
        };
        debug!(chars = text.len(), "explanation generated");
        Ok(text)
    }
}

/// Accumulates `data:` events of a streamed completion.
#[derive(Default)]
struct SseText {
    pending: Vec<u8>,
    text: String,
}

impl SseText {
    /// Feed raw bytes; returns `true` once `[DONE]` arrives.
    fn push(&mut self, bytes: &[u8]) -> Result<bool, GenerationError> {
        self.pending.extend_from_slice(bytes);
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let Some(data) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                return Ok(true);
            }
            if data.is_empty() {
                continue;
            }
            let chunk: ChatResponse = serde_json::from_str(data)?;
            if let Some(piece) = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta)
                .and_then(|d| d.content)
            {
                self.text.push_str(&piece);
            }
        }
        Ok(false)
    }
}
