// src/yahoo.rs
//! Yahoo Finance implementation of [`QuoteProvider`].
//!
//! quoteSummary needs a session cookie plus a "crumb" token; both are
//! fetched lazily and cached until Yahoo answers 401.

use crate::error::{AppError, Result};
use crate::quote::{Chart, ChartWindow, QuoteProvider, QuoteSummary, RawBar};
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::header::{COOKIE, SET_COOKIE, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;
use urlencoding::encode;

const BROWSER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

const SUMMARY_MODULES: &str = "price,summaryDetail,defaultKeyStatistics,financialData,summaryProfile";

#[derive(Debug, Clone)]
pub struct YahooConfig {
    pub api_base: String,
    pub cookie_url: String,
}

impl Default for YahooConfig {
    fn default() -> Self {
        Self {
            api_base: "https://query1.finance.yahoo.com".to_string(),
            cookie_url: "https://fc.yahoo.com".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Crumb {
    cookie: String,
    crumb: String,
}

pub struct YahooClient {
    client: Client,
    config: YahooConfig,
    crumb: RwLock<Option<Crumb>>,
}

impl YahooClient {
    pub fn new(client: Client, config: YahooConfig) -> Self {
        Self {
            client,
            config,
            crumb: RwLock::new(None),
        }
    }

    async fn crumb(&self) -> Result<Crumb> {
        if let Some(crumb) = self.crumb.read().await.clone() {
            return Ok(crumb);
        }
        let fresh = self.fetch_crumb().await?;
        *self.crumb.write().await = Some(fresh.clone());
        Ok(fresh)
    }

    async fn fetch_crumb(&self) -> Result<Crumb> {
        debug!("Requesting Yahoo session cookie from {}", self.config.cookie_url);
        // The cookie endpoint answers 404 but still sets the cookie.
        let response = self
            .client
            .get(&self.config.cookie_url)
            .header(USER_AGENT, BROWSER_AGENT)
            .send()
            .await?;

        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split(';').next())
            .map(str::to_string)
            .ok_or_else(|| AppError::Upstream("Error parsing Yahoo session cookie".to_string()))?;

        let response = self
            .client
            .get(format!("{}/v1/test/getcrumb", self.config.api_base))
            .header(USER_AGENT, BROWSER_AGENT)
            .header(COOKIE, &cookie)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "Yahoo crumb request failed: HTTP {}",
                response.status()
            )));
        }

        let crumb = response.text().await?.trim().to_string();
        if crumb.is_empty() {
            return Err(AppError::Upstream("Yahoo returned an empty crumb".to_string()));
        }
        info!("Obtained Yahoo crumb");
        Ok(Crumb { cookie, crumb })
    }

    async fn invalidate_crumb(&self) {
        *self.crumb.write().await = None;
    }
}

#[async_trait]
impl QuoteProvider for YahooClient {
    async fn quote_summary(&self, symbol: &str) -> Result<QuoteSummary> {
        let crumb = self.crumb().await?;
        let url = format!(
            "{}/v10/finance/quoteSummary/{}",
            self.config.api_base,
            encode(symbol)
        );

        let response = self
            .client
            .get(&url)
            .header(USER_AGENT, BROWSER_AGENT)
            .header(COOKIE, &crumb.cookie)
            .query(&[("modules", SUMMARY_MODULES), ("crumb", crumb.crumb.as_str())])
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Err(AppError::TickerNotFound(symbol.to_string())),
            StatusCode::UNAUTHORIZED => {
                warn!("Yahoo rejected the cached crumb, it will be refreshed");
                self.invalidate_crumb().await;
                return Err(AppError::Upstream("Yahoo authentication failed".to_string()));
            }
            s => {
                return Err(AppError::Upstream(format!(
                    "Yahoo quoteSummary failed for {}: HTTP {}",
                    symbol, s
                )))
            }
        }

        let body: QuoteSummaryResponse = response.json().await?;
        body.into_quote_summary(symbol)
    }

    async fn chart(&self, symbol: &str, window: &ChartWindow) -> Result<Chart> {
        let url = format!("{}/v8/finance/chart/{}", self.config.api_base, encode(symbol));
        debug!(
            "Fetching {} chart for {} from {} to {}",
            window.interval.as_str(),
            symbol,
            window.start.format("%Y-%m-%d"),
            window.end.format("%Y-%m-%d")
        );

        let response = self
            .client
            .get(&url)
            .header(USER_AGENT, BROWSER_AGENT)
            .query(&[
                ("period1", window.start.timestamp().to_string()),
                ("period2", window.end.timestamp().to_string()),
                ("interval", window.interval.as_str().to_string()),
                ("events", "history".to_string()),
            ])
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Err(AppError::TickerNotFound(symbol.to_string())),
            s => {
                return Err(AppError::Upstream(format!(
                    "Yahoo chart failed for {}: HTTP {}",
                    symbol, s
                )))
            }
        }

        let body: ChartResponse = response.json().await?;
        body.into_chart(symbol)
    }
}

// Wire models. Yahoo wraps numbers as {"raw": 1.0, "fmt": "1.00"} or {}.

#[derive(Debug, Clone, Default, Deserialize)]
struct YahooValue {
    raw: Option<f64>,
}

fn raw(value: &Option<YahooValue>) -> Option<f64> {
    value.as_ref().and_then(|v| v.raw).filter(|v| v.is_finite())
}

#[derive(Debug, Deserialize)]
struct YahooErrorBody {
    code: Option<String>,
    description: Option<String>,
}

impl YahooErrorBody {
    fn into_error(self, symbol: &str) -> AppError {
        match self.code.as_deref() {
            Some("Not Found") => AppError::TickerNotFound(symbol.to_string()),
            _ => AppError::Upstream(format!(
                "Yahoo error for {}: {}",
                symbol,
                self.description.unwrap_or_else(|| "unknown".to_string())
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryResponse {
    quote_summary: QuoteSummaryEnvelope,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryEnvelope {
    result: Option<Vec<QuoteSummaryResult>>,
    error: Option<YahooErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryResult {
    price: Option<PriceModule>,
    summary_detail: Option<SummaryDetailModule>,
    default_key_statistics: Option<KeyStatisticsModule>,
    financial_data: Option<FinancialDataModule>,
    summary_profile: Option<SummaryProfileModule>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceModule {
    symbol: Option<String>,
    currency: Option<String>,
    short_name: Option<String>,
    long_name: Option<String>,
    regular_market_price: Option<YahooValue>,
    regular_market_previous_close: Option<YahooValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryDetailModule {
    market_cap: Option<YahooValue>,
    #[serde(rename = "trailingPE")]
    trailing_pe: Option<YahooValue>,
    dividend_yield: Option<YahooValue>,
    previous_close: Option<YahooValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyStatisticsModule {
    trailing_eps: Option<YahooValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinancialDataModule {
    current_price: Option<YahooValue>,
    total_revenue: Option<YahooValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryProfileModule {
    long_business_summary: Option<String>,
}

impl QuoteSummaryResponse {
    fn into_quote_summary(self, symbol: &str) -> Result<QuoteSummary> {
        let envelope = self.quote_summary;
        if let Some(err) = envelope.error {
            return Err(err.into_error(symbol));
        }
        let result = envelope
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| AppError::TickerNotFound(symbol.to_string()))?;

        let price = result.price.unwrap_or_default();
        let detail = result.summary_detail.unwrap_or_default();
        let stats = result.default_key_statistics.unwrap_or_default();
        let financial = result.financial_data.unwrap_or_default();

        let current = raw(&price.regular_market_price)
            .or_else(|| raw(&financial.current_price))
            .ok_or_else(|| AppError::TickerNotFound(symbol.to_string()))?;
        let previous = raw(&price.regular_market_previous_close)
            .or_else(|| raw(&detail.previous_close))
            .unwrap_or(0.0);

        Ok(QuoteSummary {
            symbol: price.symbol.unwrap_or_else(|| symbol.to_string()),
            name: price.long_name.or(price.short_name),
            currency: price.currency,
            price: current,
            previous_close: previous,
            market_cap: raw(&detail.market_cap),
            pe_ratio: raw(&detail.trailing_pe),
            eps: raw(&stats.trailing_eps),
            revenue: raw(&financial.total_revenue),
            dividend_yield: raw(&detail.dividend_yield),
            business_summary: result
                .summary_profile
                .and_then(|p| p.long_business_summary),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    result: Option<Vec<RawSeries>>,
    error: Option<YahooErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RawSeries {
    #[serde(default)]
    timestamp: Option<Vec<i64>>,
    #[serde(default)]
    indicators: RawIndicators,
}

#[derive(Debug, Default, Deserialize)]
struct RawIndicators {
    #[serde(default)]
    quote: Vec<RawQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct RawQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

impl ChartResponse {
    fn into_chart(self, symbol: &str) -> Result<Chart> {
        if let Some(err) = self.chart.error {
            return Err(err.into_error(symbol));
        }
        let series = self
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| AppError::TickerNotFound(symbol.to_string()))?;

        // A range without trading days has no timestamp array at all.
        let timestamps = series.timestamp.unwrap_or_default();
        let quote = series.indicators.quote.into_iter().next().unwrap_or_default();

        let at = |values: &[Option<f64>], i: usize| values.get(i).copied().flatten();
        let bars = timestamps.iter().enumerate().map(|(i, ts)| RawBar {
            timestamp: *ts,
            open: at(&quote.open, i),
            high: at(&quote.high, i),
            low: at(&quote.low, i),
            close: at(&quote.close, i),
            volume: quote.volume.get(i).copied().flatten(),
        });
        Ok(Chart::from_bars(bars))
    }
}
