// src/analysis.rs
//! Composes prompts, the answer provider and output parsing into the
//! payloads served by the AI endpoints.
//!
//! Provider failures propagate as errors. Output that cannot be parsed
//! degrades to a canned payload instead.

use crate::citations::inline_citations;
use crate::error::Result;
use crate::llm_json::parse_llm_json;
use crate::models::{AiReview, PortfolioContext, Position, StockAnalysis};
use crate::prompts;
use crate::sonar::{AnswerProvider, SonarAnswer};
use log::{info, warn};

const MOVEMENT_SOURCES: usize = 2;

pub async fn explain_movement(answers: &dyn AnswerProvider, symbol: &str) -> Result<SonarAnswer> {
    answers.ask(&prompts::movement_explanation(symbol)).await
}

/// Fills empty source lists from the provider's citations: the explanation
/// gets the first two, risk `i` gets citations `2i` and `2i + 1` (wrapping).
pub fn distribute_citations(analysis: &mut StockAnalysis, urls: &[String]) {
    if urls.is_empty() {
        return;
    }
    if analysis.movement_sources.is_empty() {
        analysis.movement_sources = urls.iter().take(MOVEMENT_SOURCES).cloned().collect();
    }
    let n = urls.len();
    for (i, risk) in analysis.risk_highlights.iter_mut().enumerate() {
        if !risk.sources.is_empty() {
            continue;
        }
        let start = (i * 2) % n;
        let mut sources = vec![urls[start].clone()];
        let next = &urls[(start + 1) % n];
        if *next != sources[0] {
            sources.push(next.clone());
        }
        risk.sources = sources;
    }
}

pub fn unavailable_analysis(urls: &[String]) -> StockAnalysis {
    StockAnalysis {
        movement_sources: urls.iter().take(MOVEMENT_SOURCES).cloned().collect(),
        ..Default::default()
    }
}

pub async fn stock_analysis(answers: &dyn AnswerProvider, symbol: &str) -> Result<StockAnalysis> {
    let response = answers.ask(&prompts::stock_analysis(symbol)).await?;
    let urls = response.citation_urls();

    match parse_llm_json::<StockAnalysis>(&response.answer) {
        Ok(mut analysis) => {
            distribute_citations(&mut analysis, &urls);
            analysis.movement_explanation_html = analysis
                .movement_explanation
                .as_deref()
                .map(|text| inline_citations(text, &analysis.movement_sources));
            info!(
                "Analysis for {}: {} risks, {} similar stocks",
                symbol,
                analysis.risk_highlights.len(),
                analysis.similar_stocks.len()
            );
            Ok(analysis)
        }
        Err(e) => {
            warn!("Failed to parse AI response for {}: {}", symbol, e);
            warn!("Raw AI response: {}", response.answer);
            Ok(unavailable_analysis(&urls))
        }
    }
}

pub async fn portfolio_review(
    answers: &dyn AnswerProvider,
    positions: &[Position],
) -> Result<AiReview> {
    let response = answers.ask(&prompts::portfolio_review(positions)).await?;

    match parse_llm_json::<AiReview>(&response.answer) {
        Ok(mut review) => {
            if review.citations.is_empty() {
                review.citations = response.citations;
            }
            let urls: Vec<&str> = review.citations.iter().map(|c| c.url.as_str()).collect();
            review.review_html = Some(inline_citations(&review.review, &urls));
            Ok(review)
        }
        Err(e) => {
            warn!("Failed to parse AI review: {}", e);
            warn!("Raw AI response: {}", response.answer);
            Ok(AiReview::unavailable())
        }
    }
}

pub async fn answer_question(
    answers: &dyn AnswerProvider,
    question: &str,
    portfolio: Option<&PortfolioContext>,
) -> Result<SonarAnswer> {
    answers.ask(&prompts::qna(question, portfolio)).await
}
