// src/portfolio.rs
//! Portfolio enrichment: price every position, then aggregate.

use crate::error::{AppError, Result};
use crate::models::{
    AiReview, Allocation, PortfolioOverview, PortfolioResponse, Position, PositionInput,
    TopPerformer,
};
use crate::quote::{normalize_symbol, QuoteProvider};
use futures::future::join_all;
use log::{error, info, warn};

const TOP_PERFORMERS: usize = 3;

/// How a failed ticker lookup affects the whole request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupPolicy {
    /// Drop positions whose lookup failed.
    Lenient,
    /// Fail the request, listing every ticker that could not be priced.
    Strict,
}

/// Percentage change from `previous` to `current`; `0.0` when there is no
/// usable previous price.
pub fn daily_pct(current: f64, previous: f64) -> f64 {
    if previous > 0.0 && previous.is_finite() && current.is_finite() {
        (current - previous) / previous * 100.0
    } else {
        0.0
    }
}

/// Share counts and cost bases must be finite and non-negative.
pub fn validate_inputs(inputs: &[PositionInput]) -> Result<()> {
    for input in inputs {
        if !input.shares.is_finite() || input.shares < 0.0 {
            return Err(AppError::InvalidInput(format!(
                "Invalid share count for {}",
                input.symbol.trim()
            )));
        }
        if let Some(cost) = input.cost_basis {
            if !cost.is_finite() || cost < 0.0 {
                return Err(AppError::InvalidInput(format!(
                    "Invalid cost basis for {}",
                    input.symbol.trim()
                )));
            }
        }
    }
    Ok(())
}

async fn price_position(provider: &dyn QuoteProvider, input: &PositionInput) -> Option<Position> {
    let symbol = match normalize_symbol(&input.symbol) {
        Ok(symbol) => symbol,
        Err(e) => {
            warn!("Skipping position: {}", e);
            return None;
        }
    };
    match provider.quote_summary(&symbol).await {
        Ok(quote) => {
            let value = input.shares * quote.price;
            if !value.is_finite() {
                warn!("Value of {} {} is out of range", input.shares, symbol);
                return None;
            }
            Some(Position {
                value,
                daily_pct: daily_pct(quote.price, quote.previous_close),
                current_price: quote.price,
                previous_price: quote.previous_close,
                cost_basis: input.cost_basis,
                shares: input.shares,
                symbol,
            })
        }
        Err(e) => {
            error!("Error fetching quote for {}: {}", symbol, e);
            None
        }
    }
}

/// Looks up every position concurrently and waits for all of them.
/// Malformed symbols and out-of-range values count as failed lookups.
pub async fn price_positions(
    provider: &dyn QuoteProvider,
    inputs: &[PositionInput],
    policy: LookupPolicy,
) -> Result<Vec<Position>> {
    let priced = join_all(inputs.iter().map(|p| price_position(provider, p))).await;

    let invalid: Vec<String> = inputs
        .iter()
        .zip(priced.iter())
        .filter(|(_, p)| p.is_none())
        .map(|(input, _)| input.symbol.trim().to_uppercase())
        .collect();

    if policy == LookupPolicy::Strict && !invalid.is_empty() {
        return Err(AppError::InvalidTickers(invalid));
    }
    if !invalid.is_empty() {
        info!("Skipping {} positions without quotes: {}", invalid.len(), invalid.join(", "));
    }

    Ok(priced.into_iter().flatten().collect())
}

pub fn overview(positions: &[Position]) -> PortfolioOverview {
    let total_value: f64 = positions.iter().map(|p| p.value).sum();
    let yesterday_value: f64 = positions.iter().map(|p| p.shares * p.previous_price).sum();
    let total_cost: f64 = positions
        .iter()
        .filter_map(|p| p.cost_basis.map(|c| c * p.shares))
        .sum();
    let total_gain_loss = total_value - yesterday_value;

    PortfolioOverview {
        total_value,
        total_cost,
        total_gain_loss,
        total_gain_pct: if yesterday_value > 0.0 {
            total_gain_loss / yesterday_value * 100.0
        } else {
            0.0
        },
        holdings_count: positions.len(),
    }
}

pub fn allocation(positions: &[Position], total_value: f64) -> Vec<Allocation> {
    positions
        .iter()
        .map(|p| Allocation {
            symbol: p.symbol.clone(),
            pct: if total_value > 0.0 {
                p.value / total_value * 100.0
            } else {
                0.0
            },
            value: p.value,
        })
        .collect()
}

pub fn top_performers(positions: &[Position]) -> Vec<TopPerformer> {
    let mut sorted: Vec<&Position> = positions.iter().collect();
    sorted.sort_by(|a, b| b.daily_pct.total_cmp(&a.daily_pct));
    sorted
        .into_iter()
        .take(TOP_PERFORMERS)
        .map(|p| TopPerformer {
            symbol: p.symbol.clone(),
            daily_pct: p.daily_pct,
        })
        .collect()
}

/// Prices the positions and assembles the dashboard payload. The AI review
/// is a placeholder; clients fetch the real one separately.
pub async fn analyze_portfolio(
    provider: &dyn QuoteProvider,
    inputs: &[PositionInput],
    policy: LookupPolicy,
) -> Result<PortfolioResponse> {
    validate_inputs(inputs)?;
    let positions = price_positions(provider, inputs, policy).await?;
    let overview = overview(&positions);
    let totals = [
        overview.total_value,
        overview.total_cost,
        overview.total_gain_loss,
        overview.total_gain_pct,
    ];
    if !totals.iter().all(|v| v.is_finite()) {
        return Err(AppError::InvalidInput(
            "Portfolio value is out of range".to_string(),
        ));
    }
    let allocation = allocation(&positions, overview.total_value);
    let top_performers = top_performers(&positions);

    info!(
        "Priced {}/{} positions, total value {:.2}",
        positions.len(),
        inputs.len(),
        overview.total_value
    );

    Ok(PortfolioResponse {
        positions,
        overview,
        allocation,
        top_performers,
        ai_review: AiReview::pending(),
    })
}
