// src/quote.rs
//! Quote adapter: the provider seam plus the normalised shapes handed to
//! the dashboard.

use crate::error::{AppError, Result};
use crate::models::StockAnalysis;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Months, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Days of daily history returned with a ticker lookup.
pub const DEFAULT_HISTORY_DAYS: i64 = 30;

const MAX_SYMBOL_LEN: usize = 15;

/// Upper-cases a ticker and rejects anything that cannot be one.
pub fn normalize_symbol(raw: &str) -> Result<String> {
    let symbol = raw.trim().to_uppercase();
    let valid = !symbol.is_empty()
        && symbol.len() <= MAX_SYMBOL_LEN
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='));
    if valid {
        Ok(symbol)
    } else {
        Err(AppError::InvalidInput(format!("Invalid ticker symbol: {}", raw.trim())))
    }
}

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Current price and fundamentals for an upper-case ticker.
    async fn quote_summary(&self, symbol: &str) -> Result<QuoteSummary>;

    async fn chart(&self, symbol: &str, window: &ChartWindow) -> Result<Chart>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteSummary {
    pub symbol: String,
    pub name: Option<String>,
    pub currency: Option<String>,
    pub price: f64,
    pub previous_close: f64,
    pub market_cap: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub eps: Option<f64>,
    pub revenue: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub business_summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    pub result: Vec<ChartSeries>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    #[serde(default)]
    pub timestamp: Vec<i64>,
    #[serde(default)]
    pub indicators: ChartIndicators,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartIndicators {
    #[serde(default)]
    pub quote: Vec<ChartQuote>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartQuote {
    #[serde(default)]
    pub close: Vec<f64>,
    #[serde(default)]
    pub open: Vec<f64>,
    #[serde(default)]
    pub high: Vec<f64>,
    #[serde(default)]
    pub low: Vec<f64>,
    #[serde(default)]
    pub volume: Vec<u64>,
}

/// One bar as reported by a provider; any field may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawBar {
    pub timestamp: i64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<u64>,
}

impl Chart {
    /// Builds the single-series chart, dropping bars without a close so
    /// every array has the same length and holds plain numbers.
    pub fn from_bars<I: IntoIterator<Item = RawBar>>(bars: I) -> Self {
        let mut series = ChartSeries::default();
        let mut quote = ChartQuote::default();
        for bar in bars {
            let close = match bar.close {
                Some(c) if c.is_finite() => c,
                _ => continue,
            };
            series.timestamp.push(bar.timestamp);
            quote.close.push(close);
            quote.open.push(bar.open.filter(|v| v.is_finite()).unwrap_or(close));
            quote.high.push(bar.high.filter(|v| v.is_finite()).unwrap_or(close));
            quote.low.push(bar.low.filter(|v| v.is_finite()).unwrap_or(close));
            quote.volume.push(bar.volume.unwrap_or(0));
        }
        series.indicators.quote.push(quote);
        Chart {
            result: vec![series],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: String,
    pub close: f64,
}

/// Flattens a chart into `{date, close}` points. Tolerates an empty result,
/// a series without quote indicators and arrays of unequal length.
pub fn price_history(chart: &Chart) -> Vec<PricePoint> {
    let Some(series) = chart.result.first() else {
        return Vec::new();
    };
    let Some(quote) = series.indicators.quote.first() else {
        return Vec::new();
    };

    series
        .timestamp
        .iter()
        .zip(quote.close.iter())
        .filter(|(_, close)| close.is_finite())
        .filter_map(|(ts, close)| {
            DateTime::<Utc>::from_timestamp(*ts, 0).map(|dt| PricePoint {
                date: dt.format("%Y-%m-%d").to_string(),
                close: *close,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Daily,
    Weekly,
    Monthly,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Daily => "1d",
            Interval::Weekly => "1wk",
            Interval::Monthly => "1mo",
        }
    }
}

impl FromStr for Interval {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1d" => Ok(Interval::Daily),
            "1wk" => Ok(Interval::Weekly),
            "1mo" => Ok(Interval::Monthly),
            other => Err(AppError::InvalidInput(format!(
                "Unsupported interval: {} (expected 1d, 1wk or 1mo)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval: Interval,
}

impl ChartWindow {
    pub fn last_days(days: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - Duration::days(days),
            end,
            interval: Interval::Daily,
        }
    }

    pub fn last_months(months: u32, interval: Interval) -> Self {
        let end = Utc::now();
        let start = end
            .checked_sub_months(Months::new(months))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Self {
            start,
            end,
            interval,
        }
    }

    /// An end in the future is clamped to now.
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>, interval: Interval) -> Self {
        let now = Utc::now();
        Self {
            start,
            end: end.min(now),
            interval,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StockSnapshot {
    pub quote: QuoteSummary,
    pub chart: Chart,
}

/// Quote summary plus the last month of daily bars.
pub async fn fetch_stock(provider: &dyn QuoteProvider, symbol: &str) -> Result<StockSnapshot> {
    let ticker = symbol.trim().to_uppercase();
    info!("Fetching quote and chart for {}", ticker);

    let window = ChartWindow::last_days(DEFAULT_HISTORY_DAYS);
    let (quote, chart) = futures::try_join!(
        provider.quote_summary(&ticker),
        provider.chart(&ticker, &window)
    )?;

    info!(
        "Got {} historical data points for {}",
        chart
            .result
            .first()
            .map(|s| s.timestamp.len())
            .unwrap_or(0),
        ticker
    );
    Ok(StockSnapshot { quote, chart })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fundamentals {
    #[serde(rename = "marketCap")]
    pub market_cap: String,
    #[serde(rename = "peRatio")]
    pub pe_ratio: String,
    #[serde(rename = "revenueTTM")]
    pub revenue_ttm: String,
    #[serde(rename = "epsTTM")]
    pub eps_ttm: String,
    #[serde(rename = "dividendYield")]
    pub dividend_yield: String,
}

impl From<&QuoteSummary> for Fundamentals {
    fn from(q: &QuoteSummary) -> Self {
        Self {
            market_cap: q.market_cap.map(compact_number).unwrap_or_else(na),
            pe_ratio: q.pe_ratio.map(|v| format!("{:.2}", v)).unwrap_or_else(na),
            revenue_ttm: q
                .revenue
                .map(|v| format!("${}", compact_number(v)))
                .unwrap_or_else(na),
            eps_ttm: q.eps.map(|v| format!("${:.2}", v)).unwrap_or_else(na),
            dividend_yield: q
                .dividend_yield
                .map(|v| format!("{:.2}%", v * 100.0))
                .unwrap_or_else(na),
        }
    }
}

fn na() -> String {
    "N/A".to_string()
}

/// `2.8e12` -> `"2.80T"`.
pub fn compact_number(value: f64) -> String {
    let abs = value.abs();
    let (scaled, suffix) = if abs >= 1e12 {
        (value / 1e12, "T")
    } else if abs >= 1e9 {
        (value / 1e9, "B")
    } else if abs >= 1e6 {
        (value / 1e6, "M")
    } else if abs >= 1e3 {
        (value / 1e3, "K")
    } else {
        (value, "")
    };
    format!("{:.2}{}", scaled, suffix)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyInfo {
    pub name: String,
    pub business_summary: Option<String>,
}

/// Fast first phase of the ticker page. The AI fields are left empty and
/// filled in by the client from the analysis endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerOverview {
    pub symbol: String,
    pub quote: QuoteSummary,
    pub chart: Chart,
    pub price_history: Vec<PricePoint>,
    pub fundamentals: Fundamentals,
    pub company_info: CompanyInfo,
    #[serde(flatten)]
    pub analysis: StockAnalysis,
}

impl From<StockSnapshot> for TickerOverview {
    fn from(snapshot: StockSnapshot) -> Self {
        let StockSnapshot { quote, chart } = snapshot;
        let company_info = CompanyInfo {
            name: quote.name.clone().unwrap_or_else(|| quote.symbol.clone()),
            business_summary: quote.business_summary.clone(),
        };
        Self {
            symbol: quote.symbol.clone(),
            price_history: price_history(&chart),
            fundamentals: Fundamentals::from(&quote),
            company_info,
            quote,
            chart,
            analysis: StockAnalysis::default(),
        }
    }
}
