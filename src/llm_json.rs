// src/llm_json.rs
//! Parsing of model output that was asked to be JSON.
//!
//! Models like to wrap the object in markdown fences or surround it with a
//! sentence or two. Parsing is tolerant about that wrapping and strict about
//! the object itself: the result must deserialize and pass [`Validate`].

use crate::models::{AiReview, StockAnalysis};
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("model returned an empty answer")]
    Empty,
    #[error("model answer is not valid JSON: {0}")]
    Syntax(#[from] serde_json::Error),
    #[error("model answer is missing required fields: {0}")]
    Invalid(String),
}

pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

impl Validate for AiReview {
    fn validate(&self) -> Result<(), String> {
        let mut missing = Vec::new();
        if self.personality.trim().is_empty() {
            missing.push("personality");
        }
        if self.review.trim().is_empty() {
            missing.push("review");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing.join(", "))
        }
    }
}

impl Validate for StockAnalysis {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Removes a leading ```` ```json ```` or ```` ``` ```` fence and a trailing
/// ```` ``` ```` fence.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    s = s.trim_start();
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

/// Outermost `{ ... }` span, if any.
fn object_span(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}

pub fn parse_llm_json<T>(raw: &str) -> Result<T, ParseError>
where
    T: DeserializeOwned + Validate,
{
    let cleaned = strip_code_fences(raw);
    if cleaned.is_empty() {
        return Err(ParseError::Empty);
    }

    let parsed = match serde_json::from_str::<T>(cleaned) {
        Ok(value) => value,
        Err(strict_err) => match object_span(cleaned) {
            Some(span) if span.len() < cleaned.len() => serde_json::from_str::<T>(span)?,
            _ => return Err(ParseError::Syntax(strict_err)),
        },
    };

    parsed.validate().map_err(ParseError::Invalid)?;
    Ok(parsed)
}
