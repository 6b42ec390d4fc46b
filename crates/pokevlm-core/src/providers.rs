//! Vision-language model providers: Gemini `generateContent` or Chat Completions
//! (OpenAI, OpenRouter, local servers), behind the [`VisionReasoner`] seam.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::ReasonerError;

const IMAGE_MIME: &str = "image/png";

/// One image + prompt in, raw model text out.
#[async_trait]
pub trait VisionReasoner: Send + Sync {
    async fn infer(&self, prompt: &str, image: &[u8]) -> Result<String, ReasonerError>;
}

fn build_client(config: &Config) -> Result<reqwest::Client, ReasonerError> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?)
}

fn encode_image(image: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(image)
}

fn truncate(body: &str, max: usize) -> String {
    body.chars().take(max).collect()
}

/// Pick the provider implementation for this config.
pub fn build_reasoner(config: &Config) -> Result<Box<dyn VisionReasoner>, ReasonerError> {
    let reasoner: Box<dyn VisionReasoner> = if config.provider == "gemini" {
        Box::new(GeminiReasoner::new(config)?)
    } else {
        Box::new(ChatCompletionsReasoner::new(config)?)
    };
    info!(
        "Reasoner ready: provider={} model={}",
        config.provider, config.model
    );
    Ok(reasoner)
}

// ── Gemini ──

/// Google Generative Language API, image sent as inline data.
pub struct GeminiReasoner {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_output_tokens: u32,
}

impl GeminiReasoner {
    pub fn new(config: &Config) -> Result<Self, ReasonerError> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".into()),
            api_key: config.api_key.clone().unwrap_or_default(),
            model: config.model.clone(),
            max_output_tokens: config.max_output_tokens,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

fn gemini_request_body(prompt: &str, image: &[u8], max_output_tokens: u32) -> serde_json::Value {
    json!({
        "contents": [{
            "parts": [
                { "text": prompt },
                { "inline_data": { "mime_type": IMAGE_MIME, "data": encode_image(image) } }
            ]
        }],
        "generationConfig": { "maxOutputTokens": max_output_tokens }
    })
}

fn gemini_response_text(data: &serde_json::Value) -> Result<String, ReasonerError> {
    let candidate = match data
        .get("candidates")
        .and_then(|v| v.as_array())
        .and_then(|c| c.first())
    {
        Some(c) => c,
        None => {
            let reason = data["promptFeedback"]["blockReason"]
                .as_str()
                .unwrap_or("no candidates");
            return Err(ReasonerError::Blocked(reason.to_string()));
        }
    };

    let text: String = candidate["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|v| v.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.is_empty() {
        let reason = candidate
            .get("finishReason")
            .and_then(|v| v.as_str())
            .unwrap_or("empty response");
        return Err(ReasonerError::InvalidResponse(format!(
            "candidate has no text ({})",
            reason
        )));
    }
    Ok(text)
}

#[async_trait]
impl VisionReasoner for GeminiReasoner {
    async fn infer(&self, prompt: &str, image: &[u8]) -> Result<String, ReasonerError> {
        let body = gemini_request_body(prompt, image, self.max_output_tokens);
        debug!(
            "generateContent request: model={} image_bytes={}",
            self.model,
            image.len()
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Gemini HTTP {}: {}", status, truncate(&body, 500));
            return Err(ReasonerError::Http {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ReasonerError::InvalidResponse(e.to_string()))?;
        gemini_response_text(&data)
    }
}

// ── Chat Completions ──

/// Any OpenAI-compatible `/chat/completions` endpoint, image sent as a data URL.
pub struct ChatCompletionsReasoner {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    provider: String,
    max_tokens: u32,
}

impl ChatCompletionsReasoner {
    pub fn new(config: &Config) -> Result<Self, ReasonerError> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".into()),
            api_key: config.api_key.clone().unwrap_or_default(),
            model: config.model.clone(),
            provider: config.provider.clone(),
            max_tokens: config.max_output_tokens,
        })
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, ReasonerError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        Ok(self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?)
    }
}

fn completions_request_body(
    model: &str,
    prompt: &str,
    image: &[u8],
    max_tokens: u32,
) -> serde_json::Value {
    json!({
        "model": model,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "text", "text": prompt },
                {
                    "type": "image_url",
                    "image_url": { "url": format!("data:{};base64,{}", IMAGE_MIME, encode_image(image)) }
                }
            ]
        }],
        "max_tokens": max_tokens,
    })
}

/// Pull the assistant text out of a Chat Completions response.
fn completions_response_text(data: &serde_json::Value) -> Result<String, ReasonerError> {
    let content = &data["choices"][0]["message"]["content"];
    if let Some(text) = content.as_str() {
        return Ok(text.to_string());
    }
    // Some servers return content as a list of parts
    if let Some(parts) = content.as_array() {
        let text = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|v| v.as_str()))
            .collect::<Vec<_>>()
            .join("");
        if !text.is_empty() {
            return Ok(text);
        }
    }
    Err(ReasonerError::InvalidResponse(
        "Missing content in response".to_string(),
    ))
}

#[async_trait]
impl VisionReasoner for ChatCompletionsReasoner {
    async fn infer(&self, prompt: &str, image: &[u8]) -> Result<String, ReasonerError> {
        let body = completions_request_body(&self.model, prompt, image, self.max_tokens);
        debug!(
            "chat_completions request: model={} provider={} image_bytes={}",
            self.model,
            self.provider,
            image.len()
        );

        let mut response = self.post(&body).await?;
        let mut status = response.status();

        // Retry once on 500 errors (transient local-server issues)
        if status.as_u16() == 500 {
            let text = response.text().await.unwrap_or_default();
            warn!("API HTTP 500, retrying once: {}", truncate(&text, 200));
            tokio::time::sleep(Duration::from_secs(2)).await;
            response = self.post(&body).await?;
            status = response.status();
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("API HTTP {}: {}", status, truncate(&text, 500));
            return Err(ReasonerError::Http {
                status: status.as_u16(),
                body: truncate(&text, 200),
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ReasonerError::InvalidResponse(e.to_string()))?;
        completions_response_text(&data)
    }
}
