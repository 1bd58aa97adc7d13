// src/sonar.rs
//! Client for the Sonar chat-completions API.

use crate::error::{AppError, Result};
use crate::models::Citation;
use async_trait::async_trait;
use log::{debug, error, info};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "sonar-reasoning-pro";

const SYSTEM_PROMPT: &str = "You are a financial analysis assistant specializing in stock market data for beginners. \
Follow these guidelines: 1) Use simple, non-technical language accessible to new investors; \
2) Provide accurate, fact-based information with citations from reputable sources when available; \
3) Always follow the exact output format specified in the user prompt; \
4) If the user prompt requests JSON, ensure your response is valid, properly formatted JSON that exactly matches the requested structure. \
Your primary goal is to make financial information understandable while maintaining accuracy.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SonarAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

impl SonarAnswer {
    pub fn citation_urls(&self) -> Vec<String> {
        self.citations.iter().map(|c| c.url.clone()).collect()
    }
}

#[async_trait]
pub trait AnswerProvider: Send + Sync {
    async fn ask(&self, prompt: &str) -> Result<SonarAnswer>;
}

#[derive(Debug, Clone)]
pub struct SonarConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
}

pub struct SonarClient {
    client: Client,
    config: SonarConfig,
}

impl SonarClient {
    pub fn new(client: Client, config: SonarConfig) -> Self {
        Self { client, config }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    /// Flat list of URLs; anything else is ignored.
    #[serde(default)]
    citations: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl AnswerProvider for SonarClient {
    async fn ask(&self, prompt: &str) -> Result<SonarAnswer> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        debug!("Sending {} char prompt to {}", prompt.len(), self.config.model);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.api_base))
            .header(AUTHORIZATION, format!("Bearer {}", self.config.api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!("Sonar API error ({}): {}", status, text);
            return Err(AppError::Upstream(format!(
                "Sonar API error ({}): {}",
                status.as_u16(),
                text
            )));
        }

        let body: ChatResponse = response.json().await?;
        let raw = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::Upstream("Sonar response had no content".to_string()))?;

        let citations = citations_from_urls(&body.citations);
        info!(
            "Sonar answered with {} chars and {} citations",
            raw.len(),
            citations.len()
        );

        Ok(SonarAnswer {
            answer: strip_thinking(&raw).to_string(),
            citations,
        })
    }
}

/// Drops a reasoning preamble: keeps the text after the last `</think>`.
pub fn strip_thinking(raw: &str) -> &str {
    match raw.rfind("</think>") {
        Some(idx) => raw[idx + "</think>".len()..].trim(),
        None => raw.trim(),
    }
}

/// The provider only returns URLs, so each title is the URL itself.
pub fn citations_from_urls(value: &serde_json::Value) -> Vec<Citation> {
    value
        .as_array()
        .map(|urls| {
            urls.iter()
                .filter_map(|u| u.as_str())
                .map(|url| Citation {
                    title: url.to_string(),
                    url: url.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}
