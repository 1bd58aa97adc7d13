// src/models.rs
use serde::{Deserialize, Serialize};

/// A holding as submitted by the user, before any quote lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionInput {
    pub symbol: String,
    pub shares: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_basis: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub shares: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_basis: Option<f64>,
    #[serde(default)]
    pub current_price: f64,
    #[serde(default)]
    pub previous_price: f64,
    #[serde(default)]
    pub daily_pct: f64,
    #[serde(default)]
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioOverview {
    #[serde(default)]
    pub total_value: f64,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub total_gain_loss: f64,
    #[serde(default)]
    pub total_gain_pct: f64,
    #[serde(default)]
    pub holdings_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub symbol: String,
    pub pct: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopPerformer {
    pub symbol: String,
    pub daily_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiReview {
    pub personality: String,
    pub review: String,
    pub citations: Vec<Citation>,
    pub diversify: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_html: Option<String>,
}

impl AiReview {
    /// Sent with the enriched portfolio while the real review is generated.
    pub fn pending() -> Self {
        Self::canned("Analyzing...", "AI analysis is being generated in the background.")
    }

    pub fn unavailable() -> Self {
        Self::canned(
            "Conservative Investor",
            "Unable to generate AI analysis at this time.",
        )
    }

    pub fn failed() -> Self {
        Self::canned("Analysis Failed", "AI analysis could not be completed.")
    }

    fn canned(personality: &str, review: &str) -> Self {
        Self {
            personality: personality.to_string(),
            review: review.to_string(),
            citations: Vec::new(),
            diversify: Vec::new(),
            review_html: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskHighlight {
    pub text: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarStock {
    pub ticker: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAnalysis {
    #[serde(default)]
    pub movement_explanation: Option<String>,
    #[serde(default)]
    pub movement_sources: Vec<String>,
    #[serde(default)]
    pub risk_highlights: Vec<RiskHighlight>,
    #[serde(default)]
    pub similar_stocks: Vec<SimilarStock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement_explanation_html: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioRequest {
    pub positions: Vec<PositionInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioReviewRequest {
    pub positions: Vec<Position>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioResponse {
    pub positions: Vec<Position>,
    pub overview: PortfolioOverview,
    pub allocation: Vec<Allocation>,
    pub top_performers: Vec<TopPerformer>,
    pub ai_review: AiReview,
}

/// Portfolio snapshot a client may attach to a question.
#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioContext {
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default)]
    pub overview: PortfolioOverview,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QnaRequest {
    /// Kept loose so a non-string question answers 400 with a clear message.
    #[serde(default)]
    pub question: serde_json::Value,
    #[serde(default)]
    pub portfolio_data: Option<PortfolioContext>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrictQuery {
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartQuery {
    pub months: Option<u32>,
    pub interval: Option<String>,
}
