//! Generation backend client.
//!
//! One chat-completions call per output format. Every call goes through
//! [`generate_with_deadline`] so a stuck backend fails the request instead of
//! holding it open.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use hookory_models::{OutputFormat, ResolvedContext};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::GenerationConfig;
use crate::metrics;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation not configured: OPENAI_API_KEY is not set")]
    NotConfigured,

    #[error("Generation timed out after {0}s")]
    Timeout(u64),

    #[error("Generation failed: {0}")]
    Backend(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// One format to generate.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub format: OutputFormat,
    pub text: &'a str,
    pub context: &'a ResolvedContext,
    /// Ask for a fresh variation rather than the most likely output.
    pub regenerate: bool,
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Label stored with cached output.
    fn provider(&self) -> &str;

    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, GenerationError>;
}

/// Run `generator` with a hard deadline.
pub async fn generate_with_deadline(
    generator: &dyn ContentGenerator,
    request: GenerationRequest<'_>,
    deadline: Duration,
) -> Result<String, GenerationError> {
    let start = Instant::now();
    let result = match tokio::time::timeout(deadline, generator.generate(request)).await {
        Ok(result) => result,
        Err(_) => Err(GenerationError::Timeout(deadline.as_secs())),
    };

    let outcome = match &result {
        Ok(_) => "ok",
        Err(GenerationError::Timeout(_)) => "timeout",
        Err(_) => "error",
    };
    metrics::record_generation(
        request.format.as_str(),
        outcome,
        start.elapsed().as_secs_f64(),
    );
    if let Err(e) = &result {
        warn!(format = %request.format, error = %e, "Generation failed");
    }
    result
}

const SYSTEM_PROMPT: &str = "You are Hookory, an editor who turns long-form source material into LinkedIn posts. \
Stay grounded in the source and reuse its concrete details. Never invent facts, numbers or personal stories \
that the source does not support. Commit to one clear angle and write in short, plain sentences. \
Return only the post text with no preamble or markdown headings.";

fn user_prompt(request: &GenerationRequest<'_>) -> String {
    let ctx = request.context;
    let mut prompt = format!(
        "FORMAT: {}\n{}\n\nAUDIENCE: {}\nTONE: {}\n",
        request.format,
        request.format.instructions(),
        ctx.target_audience,
        ctx.tone_preset.as_str(),
    );
    if let Some(goal) = ctx.goal {
        prompt.push_str(&format!("GOAL: {}\n", goal.as_str()));
    }
    if let Some(style) = ctx.style {
        prompt.push_str(&format!("STYLE: {}\n", style.as_str()));
    }
    prompt.push_str(if ctx.emoji_on {
        "EMOJI: use a few relevant emoji.\n"
    } else {
        "EMOJI: do not use emoji.\n"
    });
    if request.regenerate {
        prompt.push_str("Write a different take from the obvious first draft: new hook, new structure.\n");
    }
    prompt.push_str("\nSOURCE:\n");
    prompt.push_str(request.text);
    prompt
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client.
pub struct OpenAiGenerator {
    client: Client,
    config: GenerationConfig,
}

impl OpenAiGenerator {
    pub fn new(config: GenerationConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    fn provider(&self) -> &str {
        "openai"
    }

    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, GenerationError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(GenerationError::NotConfigured)?;

        let prompt = user_prompt(&request);
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: if request.regenerate { 0.95 } else { 0.7 },
        };

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Backend(format!(
                "backend returned {}: {}",
                status, error_text
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Backend(format!("unreadable response: {}", e)))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GenerationError::Backend("empty completion".into()))?;

        info!(format = %request.format, model = %self.config.model, chars = text.len(), "Generated post");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookory_models::{GenerationContext, Goal};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Stuck;

    #[async_trait]
    impl ContentGenerator for Stuck {
        fn provider(&self) -> &str {
            "stuck"
        }

        async fn generate(&self, _: GenerationRequest<'_>) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
    }

    #[test]
    fn test_prompt_carries_context() {
        let ctx = GenerationContext {
            goal: Some(Goal::Leads),
            emoji_on: true,
            ..Default::default()
        }
        .resolve();
        let prompt = user_prompt(&GenerationRequest {
            format: OutputFormat::Carousel,
            text: "source body",
            context: &ctx,
            regenerate: false,
        });
        assert!(prompt.contains("FORMAT: carousel"));
        assert!(prompt.contains("AUDIENCE: General LinkedIn users"));
        assert!(prompt.contains("GOAL: leads"));
        assert!(prompt.contains("use a few relevant emoji"));
        assert!(prompt.ends_with("source body"));
    }

    #[tokio::test]
    async fn test_deadline_turns_into_timeout() {
        let ctx = GenerationContext::default().resolve();
        let err = generate_with_deadline(
            &Stuck,
            GenerationRequest {
                format: OutputFormat::MainPost,
                text: "t",
                context: &ctx,
                regenerate: false,
            },
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GenerationError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_openai_generator_reads_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("gpt-4o-mini"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "  A post.  "}}]
            })))
            .mount(&server)
            .await;

        let generator = OpenAiGenerator::new(GenerationConfig {
            api_key: Some("sk-test".into()),
            base_url: server.uri(),
            ..Default::default()
        })
        .unwrap();
        let ctx = GenerationContext::default().resolve();
        let text = generator
            .generate(GenerationRequest {
                format: OutputFormat::MainPost,
                text: "source",
                context: &ctx,
                regenerate: false,
            })
            .await
            .unwrap();
        assert_eq!(text, "A post.");
    }

    #[tokio::test]
    async fn test_backend_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let generator = OpenAiGenerator::new(GenerationConfig {
            api_key: Some("sk-test".into()),
            base_url: server.uri(),
            ..Default::default()
        })
        .unwrap();
        let ctx = GenerationContext::default().resolve();
        let err = generator
            .generate(GenerationRequest {
                format: OutputFormat::MainPost,
                text: "source",
                context: &ctx,
                regenerate: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Backend(_)));
    }
}
