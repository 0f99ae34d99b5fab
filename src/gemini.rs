//! Gemini API client
//!
//! Direct LLM integration for chat responses and summarization.
//! Uses a long-lived reqwest::Client for connection pooling and
//! applies bounded retries with exponential backoff on rate limits
//! and transient server errors.

use crate::error::ChatError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

const DEFAULT_BASE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

/// Retry policy for upstream calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    retry: RetryConfig,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        Self::with_retry(api_key, RetryConfig::default())
    }

    pub fn with_retry(api_key: String, retry: RetryConfig) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            retry,
        }
    }

    /// Generate a response, retrying rate limits and transient failures
    pub async fn generate(
        &self,
        prompt: &str,
        system_prompt: &str,
    ) -> crate::Result<(String, f32)> {
        if self.api_key.is_empty() {
            return Err(ChatError::Config(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let mut delay = self.retry.base_delay;

        for attempt in 1..=self.retry.max_attempts {
            match self.generate_once(prompt, system_prompt).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    warn!(
                        "Gemini call failed (attempt {}/{}), retrying in {}s: {}",
                        attempt,
                        self.retry.max_attempts,
                        delay.as_secs(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.retry.max_delay);
                }
                Err(e) => return Err(e),
            }
        }

        Err(ChatError::upstream_fatal("retry budget exhausted"))
    }

    async fn generate_once(
        &self,
        prompt: &str,
        system_prompt: &str,
    ) -> crate::Result<(String, f32)> {
        let url = format!("{}?key={}", self.base_url, self.api_key);

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.7,
                top_p: 0.95,
                top_k: 40,
                max_output_tokens: 4096,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: system_prompt.to_string(),
                }],
            },
        };

        info!("Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                // Transport errors (DNS, connect, timeout) are transient
                ChatError::upstream_retryable(format!("Gemini API error: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response ({}): {}", status, error_text);

            let message = format!("Gemini API returned {}: {}", status, error_text);
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(ChatError::upstream_retryable(message))
            } else {
                Err(ChatError::upstream_fatal(message))
            };
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            ChatError::upstream_fatal(format!("Gemini parse error: {}", e))
        })?;

        let answer = gemini_response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| ChatError::upstream_fatal("Empty response from Gemini"))?;

        let confidence = calculate_confidence(&gemini_response);

        info!("Gemini response received (confidence: {})", confidence);

        Ok((answer, confidence))
    }

    #[cfg(test)]
    fn set_base_url(&mut self, url: String) {
        self.base_url = url;
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
    #[serde(alias = "finishReason")]
    finish_reason: Option<String>,
}

/// Calculate response confidence from finish reason and length
fn calculate_confidence(response: &GeminiResponse) -> f32 {
    let base_confidence: f32 = 0.85;

    let Some(candidate) = response.candidates.first() else {
        return 0.5;
    };

    let finish_confidence = match candidate.finish_reason.as_deref() {
        Some("STOP") => 1.0,
        Some("LENGTH") => 0.8,
        Some("SAFETY") => 0.6,
        _ => 0.7,
    };

    let response_length = candidate
        .content
        .parts
        .first()
        .map(|p| p.text.len())
        .unwrap_or(0);

    let length_confidence = if response_length < 50 {
        0.6
    } else if response_length > 2000 {
        0.8
    } else {
        1.0
    };

    (base_confidence * finish_confidence * length_confidence)
        .min(0.98)
        .max(0.5)
}
