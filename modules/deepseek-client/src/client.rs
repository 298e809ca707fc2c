use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, warn};

use crate::error::DeepSeekError;
use crate::types::*;
use crate::{GenerationRequest, GenerationResponse, TextGenerator};

const DEFAULT_MODEL: &str = "deepseek-chat";
const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 800;

pub struct DeepSeekClient {
    api_key: String,
    endpoint: String,
    model: String,
    http: reqwest::Client,
}

impl DeepSeekClient {
    pub fn new(api_key: &str, endpoint: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build DeepSeek HTTP client");
        Self {
            api_key: api_key.to_string(),
            endpoint: endpoint.to_string(),
            model: DEFAULT_MODEL.to_string(),
            http,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap, DeepSeekError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| DeepSeekError::Malformed(format!("invalid api key header: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn chat_once(&self, request: &ChatRequest) -> Result<ChatResponse, DeepSeekError> {
        debug!(model = %request.model, "DeepSeek chat request");

        let response = self
            .http
            .post(&self.endpoint)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeepSeekError::Timeout
                } else {
                    DeepSeekError::Request(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DeepSeekError::Api { status, body });
        }

        Ok(response.json().await?)
    }
}

/// Rough token estimate for responses that omit usage (~4 chars per token).
fn estimate_tokens(text: &str) -> u32 {
    (text.len() as u32 / 4).max(1)
}

#[async_trait]
impl TextGenerator for DeepSeekClient {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, DeepSeekError> {
        let wire = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user",
                    content: request.input.clone(),
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let mut backoff = Duration::from_millis(INITIAL_BACKOFF_MS);
        let mut last_err = None;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.chat_once(&wire).await {
                Ok(response) => {
                    let choice = response
                        .choices
                        .into_iter()
                        .next()
                        .ok_or_else(|| DeepSeekError::Malformed("no choices in response".into()))?;

                    let (input_tokens, output_tokens) = match response.usage {
                        Some(u) => (u.prompt_tokens, u.completion_tokens),
                        None => (
                            estimate_tokens(&request.input),
                            estimate_tokens(&choice.message.content),
                        ),
                    };

                    return Ok(GenerationResponse {
                        text: choice.message.content.trim().to_string(),
                        input_tokens,
                        output_tokens,
                    });
                }
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    warn!(attempt, error = %e, "DeepSeek call failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(DeepSeekError::Timeout))
    }
}
