use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use walletwise::api::{app, AppState};
use walletwise::error::{AppError, Result};
use walletwise::models::Citation;
use walletwise::quote::{Chart, ChartWindow, QuoteProvider, QuoteSummary, RawBar};
use walletwise::ratelimit::{RateLimitConfig, RateLimiter};
use walletwise::sonar::{AnswerProvider, SonarAnswer};
use warp::http::StatusCode;

#[derive(Default)]
struct FakeQuotes {
    quotes: HashMap<String, QuoteSummary>,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl FakeQuotes {
    fn with(mut self, symbol: &str, price: f64, previous: f64) -> Self {
        self.quotes.insert(
            symbol.to_string(),
            QuoteSummary {
                symbol: symbol.to_string(),
                name: Some(format!("{} Corp", symbol)),
                price,
                previous_close: previous,
                market_cap: Some(1.5e9),
                ..Default::default()
            },
        );
        self
    }
}

#[async_trait]
impl QuoteProvider for FakeQuotes {
    async fn quote_summary(&self, symbol: &str) -> Result<QuoteSummary> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(symbol.to_string());
        self.quotes
            .get(symbol)
            .cloned()
            .ok_or_else(|| AppError::TickerNotFound(symbol.to_string()))
    }

    async fn chart(&self, symbol: &str, _window: &ChartWindow) -> Result<Chart> {
        if !self.quotes.contains_key(symbol) {
            return Err(AppError::TickerNotFound(symbol.to_string()));
        }
        Ok(Chart::from_bars(vec![
            RawBar {
                timestamp: 1_700_000_000,
                close: Some(10.0),
                ..Default::default()
            },
            RawBar {
                timestamp: 1_700_086_400,
                close: Some(11.0),
                ..Default::default()
            },
        ]))
    }
}

struct FakeAnswers {
    answer: Option<SonarAnswer>,
    prompts: Mutex<Vec<String>>,
}

impl FakeAnswers {
    fn answering(answer: &str, urls: &[&str]) -> Self {
        Self {
            answer: Some(SonarAnswer {
                answer: answer.to_string(),
                citations: urls
                    .iter()
                    .map(|u| Citation {
                        title: u.to_string(),
                        url: u.to_string(),
                    })
                    .collect(),
            }),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            answer: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl AnswerProvider for FakeAnswers {
    async fn ask(&self, prompt: &str) -> Result<SonarAnswer> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answer
            .clone()
            .ok_or_else(|| AppError::Upstream("Sonar API error (503): unavailable".to_string()))
    }
}

fn state(quotes: Arc<FakeQuotes>, answers: Arc<FakeAnswers>) -> AppState {
    AppState {
        quotes,
        answers,
        limiter: None,
    }
}

fn default_quotes() -> Arc<FakeQuotes> {
    Arc::new(
        FakeQuotes::default()
            .with("AAPL", 110.0, 100.0)
            .with("MSFT", 400.0, 400.0)
            .with("ZERO", 5.0, 0.0),
    )
}

fn body(res: &warp::http::Response<warp::hyper::body::Bytes>) -> Value {
    serde_json::from_slice(res.body()).unwrap()
}

#[tokio::test]
async fn ticker_overview() {
    let api = app(state(default_quotes(), Arc::new(FakeAnswers::failing())));
    let res = warp::test::request()
        .path("/api/ticker/aapl")
        .reply(&api)
        .await;

    assert_eq!(res.status(), StatusCode::OK);
    let v = body(&res);
    assert_eq!(v["symbol"], "AAPL");
    assert_eq!(v["companyInfo"]["name"], "AAPL Corp");
    assert_eq!(v["fundamentals"]["marketCap"], "1.50B");
    assert_eq!(v["priceHistory"].as_array().unwrap().len(), 2);
    assert_eq!(
        v["chart"]["result"][0]["indicators"]["quote"][0]["close"],
        json!([10.0, 11.0])
    );
    assert!(v["movementExplanation"].is_null());
}

#[tokio::test]
async fn unknown_ticker_is_404() {
    let api = app(state(default_quotes(), Arc::new(FakeAnswers::failing())));
    let res = warp::test::request()
        .path("/api/ticker/NOPE")
        .reply(&api)
        .await;

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(body(&res)["error"], "Ticker not found: NOPE");
}

#[tokio::test]
async fn chart_window_query() {
    let api = app(state(default_quotes(), Arc::new(FakeAnswers::failing())));
    let res = warp::test::request()
        .path("/api/ticker/MSFT/chart?months=6&interval=1wk")
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body(&res)["priceHistory"][0]["date"], "2023-11-14");

    let res = warp::test::request()
        .path("/api/ticker/MSFT/chart?interval=5m")
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn lenient_portfolio_drops_invalid_ticker() {
    let api = app(state(default_quotes(), Arc::new(FakeAnswers::failing())));
    let res = warp::test::request()
        .method("POST")
        .path("/api/portfolio")
        .json(&json!({"positions": [
            {"symbol": "AAPL", "shares": 10},
            {"symbol": "BOGUS", "shares": 1},
            {"symbol": "msft", "shares": 2, "costBasis": 350}
        ]}))
        .reply(&api)
        .await;

    assert_eq!(res.status(), StatusCode::OK);
    let v = body(&res);
    let positions = v["positions"].as_array().unwrap();
    assert_eq!(positions.len(), 2);
    assert_eq!(positions[1]["symbol"], "MSFT");
    assert_eq!(positions[1]["costBasis"], 350.0);
    assert_eq!(v["overview"]["holdingsCount"], 2);
    assert_eq!(v["overview"]["totalValue"], 1900.0);
    assert_eq!(v["overview"]["totalCost"], 700.0);
    assert_eq!(v["topPerformers"][0]["symbol"], "AAPL");
    assert_eq!(v["aiReview"]["personality"], "Analyzing...");

    let pct_sum: f64 = v["allocation"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["pct"].as_f64().unwrap())
        .sum();
    assert!((pct_sum - 100.0).abs() < 1e-6);
}

#[tokio::test]
async fn strict_portfolio_rejects_invalid_ticker() {
    let api = app(state(default_quotes(), Arc::new(FakeAnswers::failing())));
    let res = warp::test::request()
        .method("POST")
        .path("/api/portfolio?strict=true")
        .json(&json!({"positions": [
            {"symbol": "AAPL", "shares": 10},
            {"symbol": "bogus", "shares": 1}
        ]}))
        .reply(&api)
        .await;

    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let v = body(&res);
    assert_eq!(v["invalid"], json!(["BOGUS"]));
    assert_eq!(v["error"], "Invalid tickers: BOGUS");
}

#[tokio::test]
async fn zero_previous_price_has_zero_daily_change() {
    let api = app(state(default_quotes(), Arc::new(FakeAnswers::failing())));
    let res = warp::test::request()
        .method("POST")
        .path("/api/portfolio")
        .json(&json!({"positions": [{"symbol": "ZERO", "shares": 3}]}))
        .reply(&api)
        .await;

    let v = body(&res);
    assert_eq!(v["positions"][0]["dailyPct"], 0.0);
    assert_eq!(v["overview"]["totalGainPct"], 0.0);
}

const TRAVERSAL: &str = "aapl/../../v1/test/getcrumb?x=";

#[tokio::test]
async fn malformed_symbols_never_reach_the_provider() {
    let quotes = default_quotes();
    let api = app(state(quotes.clone(), Arc::new(FakeAnswers::failing())));
    let res = warp::test::request()
        .method("POST")
        .path("/api/portfolio")
        .json(&json!({"positions": [
            {"symbol": TRAVERSAL, "shares": 1},
            {"symbol": "msft", "shares": 1}
        ]}))
        .reply(&api)
        .await;

    assert_eq!(res.status(), StatusCode::OK);
    let v = body(&res);
    assert_eq!(v["positions"].as_array().unwrap().len(), 1);
    assert_eq!(*quotes.seen.lock().unwrap(), vec!["MSFT".to_string()]);

    let res = warp::test::request()
        .method("POST")
        .path("/api/portfolio/upload?strict=true")
        .body(format!("{},1\nmsft,1\n", TRAVERSAL))
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body(&res)["invalid"], json!([TRAVERSAL.to_uppercase()]));
    assert!(quotes.seen.lock().unwrap().iter().all(|s| s == "MSFT"));
}

#[tokio::test]
async fn out_of_range_values_stay_finite() {
    let api = app(state(default_quotes(), Arc::new(FakeAnswers::failing())));

    // Each value overflows on its own and is dropped like a failed lookup.
    let res = warp::test::request()
        .method("POST")
        .path("/api/portfolio")
        .json(&json!({"positions": [
            {"symbol": "AAPL", "shares": 1e307},
            {"symbol": "MSFT", "shares": 1e307}
        ]}))
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let v = body(&res);
    assert_eq!(v["positions"], json!([]));
    assert_eq!(v["overview"]["totalValue"], 0.0);

    // Finite values whose sum overflows.
    let res = warp::test::request()
        .method("POST")
        .path("/api/portfolio")
        .json(&json!({"positions": [
            {"symbol": "AAPL", "shares": 1e306},
            {"symbol": "AAPL", "shares": 1e306}
        ]}))
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body(&res)["error"], "Portfolio value is out of range");
}

#[tokio::test]
async fn negative_shares_are_rejected() {
    let quotes = default_quotes();
    let api = app(state(quotes.clone(), Arc::new(FakeAnswers::failing())));
    let res = warp::test::request()
        .method("POST")
        .path("/api/portfolio")
        .json(&json!({"positions": [{"symbol": "AAPL", "shares": -3}]}))
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body(&res)["error"], "Invalid share count for AAPL");
    assert_eq!(quotes.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_portfolio_body_is_400() {
    let api = app(state(default_quotes(), Arc::new(FakeAnswers::failing())));
    let res = warp::test::request()
        .method("POST")
        .path("/api/portfolio")
        .header("content-type", "application/json")
        .body("{\"positions\": 5}")
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn header_only_csv_fails_before_lookups() {
    let quotes = default_quotes();
    let api = app(state(quotes.clone(), Arc::new(FakeAnswers::failing())));
    let res = warp::test::request()
        .method("POST")
        .path("/api/portfolio/upload")
        .body("symbol,shares,costBasis\n")
        .reply(&api)
        .await;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body(&res)["error"], "CSV has no data rows.");
    assert_eq!(quotes.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn csv_upload_is_enriched() {
    let api = app(state(default_quotes(), Arc::new(FakeAnswers::failing())));
    let res = warp::test::request()
        .method("POST")
        .path("/api/portfolio/upload")
        .body("Symbol,Shares,Cost\naapl,10,90\nmsft,oops\nmsft,1\n")
        .reply(&api)
        .await;

    assert_eq!(res.status(), StatusCode::OK);
    let v = body(&res);
    assert_eq!(v["positions"].as_array().unwrap().len(), 2);
    assert_eq!(v["positions"][0]["symbol"], "AAPL");
}

#[tokio::test]
async fn oversized_upload_is_413() {
    let api = app(state(default_quotes(), Arc::new(FakeAnswers::failing())));
    let big = "AAPL,1\n".repeat(200_000);
    let res = warp::test::request()
        .method("POST")
        .path("/api/portfolio/upload")
        .body(big)
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn ticker_ai_analysis_parses_fenced_json() {
    let answer = r#"```json
{
  "movementExplanation": "Strong iPhone sales [1] and a buyback [2].",
  "riskHighlights": [{"text": "Supply chain.", "sources": []}],
  "similarStocks": [{"ticker": "MSFT", "reason": "Big tech peer"}]
}
```"#;
    let answers = Arc::new(FakeAnswers::answering(answer, &["https://news.example/1"]));
    let api = app(state(default_quotes(), answers.clone()));
    let res = warp::test::request()
        .path("/api/ticker/aapl/ai-analysis")
        .reply(&api)
        .await;

    assert_eq!(res.status(), StatusCode::OK);
    let v = body(&res);
    assert_eq!(v["movementSources"], json!(["https://news.example/1"]));
    assert_eq!(v["riskHighlights"][0]["sources"], json!(["https://news.example/1"]));
    assert_eq!(v["similarStocks"][0]["ticker"], "MSFT");
    let html = v["movementExplanationHtml"].as_str().unwrap();
    assert!(html.contains(r#"href="https://news.example/1""#));
    assert!(!html.contains("[2]"));
    assert!(answers.last_prompt().starts_with("Analyze AAPL stock"));
}

#[tokio::test]
async fn ticker_ai_analysis_falls_back_on_bad_json() {
    let answers = Arc::new(FakeAnswers::answering(
        "Sorry, I cannot answer that.",
        &["https://a.example", "https://b.example", "https://c.example"],
    ));
    let api = app(state(default_quotes(), answers));
    let res = warp::test::request()
        .path("/api/ticker/AAPL/ai-analysis")
        .reply(&api)
        .await;

    assert_eq!(res.status(), StatusCode::OK);
    let v = body(&res);
    assert!(v["movementExplanation"].is_null());
    assert_eq!(
        v["movementSources"],
        json!(["https://a.example", "https://b.example"])
    );
    assert_eq!(v["riskHighlights"], json!([]));
}

#[tokio::test]
async fn ticker_ai_analysis_upstream_failure_is_500_with_empty_body() {
    let api = app(state(default_quotes(), Arc::new(FakeAnswers::failing())));
    let res = warp::test::request()
        .path("/api/ticker/AAPL/ai-analysis")
        .reply(&api)
        .await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let v = body(&res);
    assert!(v["movementExplanation"].is_null());
    assert_eq!(v["similarStocks"], json!([]));
}

#[tokio::test]
async fn movement_explanation_route() {
    let answers = Arc::new(FakeAnswers::answering("It rose on earnings [1].", &["https://a.example"]));
    let api = app(state(default_quotes(), answers.clone()));
    let res = warp::test::request()
        .path("/api/ticker/nvda/explanation")
        .reply(&api)
        .await;

    assert_eq!(res.status(), StatusCode::OK);
    let v = body(&res);
    assert_eq!(v["explanation"]["answer"], "It rose on earnings [1].");
    assert_eq!(v["explanation"]["citations"][0]["title"], "https://a.example");
    assert!(answers.last_prompt().contains("NVDA"));
}

#[tokio::test]
async fn portfolio_review_parses_and_links() {
    let answer = r#"{"personality": "Tech Fan", "review": "Concentrated in tech [1]. See also [3].", "citations": [{"title": "Diversify", "url": "https://learn.example"}], "diversify": ["JNJ", "XOM", "KO"]}"#;
    let answers = Arc::new(FakeAnswers::answering(answer, &[]));
    let api = app(state(default_quotes(), answers.clone()));
    let res = warp::test::request()
        .method("POST")
        .path("/api/portfolio/ai-analysis")
        .json(&json!({"positions": [{
            "symbol": "AAPL", "shares": 10, "currentPrice": 110, "previousPrice": 100,
            "dailyPct": 10, "value": 1100
        }]}))
        .reply(&api)
        .await;

    assert_eq!(res.status(), StatusCode::OK);
    let v = body(&res);
    assert_eq!(v["personality"], "Tech Fan");
    assert_eq!(v["diversify"], json!(["JNJ", "XOM", "KO"]));
    let html = v["reviewHtml"].as_str().unwrap();
    assert!(html.contains("https://learn.example"));
    assert!(!html.contains("[3]"));
    assert!(answers.last_prompt().contains("\"symbol\": \"AAPL\""));
}

#[tokio::test]
async fn review_markup_is_escaped() {
    let answer = r#"{"personality": "Tech Fan", "review": "<img src=x onerror=alert(1)> Tech heavy [1].", "citations": [{"title": "A", "url": "https://a.example"}], "diversify": []}"#;
    let api = app(state(
        default_quotes(),
        Arc::new(FakeAnswers::answering(answer, &[])),
    ));
    let res = warp::test::request()
        .method("POST")
        .path("/api/portfolio/ai-analysis")
        .json(&json!({"positions": []}))
        .reply(&api)
        .await;

    assert_eq!(res.status(), StatusCode::OK);
    let html = body(&res)["reviewHtml"].as_str().unwrap().to_string();
    assert!(!html.contains("<img"));
    assert!(html.starts_with("&lt;img src=x onerror=alert(1)&gt; Tech heavy <sup>"));
}

#[tokio::test]
async fn portfolio_review_fallbacks() {
    let answers = Arc::new(FakeAnswers::answering(r#"{"personality": "Saver"}"#, &[]));
    let api = app(state(default_quotes(), answers));
    let res = warp::test::request()
        .method("POST")
        .path("/api/portfolio/ai-analysis")
        .json(&json!({"positions": []}))
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body(&res)["personality"], "Conservative Investor");

    let api = app(state(default_quotes(), Arc::new(FakeAnswers::failing())));
    let res = warp::test::request()
        .method("POST")
        .path("/api/portfolio/ai-analysis")
        .json(&json!({"positions": []}))
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let v = body(&res);
    assert_eq!(v["personality"], "Analysis Failed");
    assert_eq!(v["review"], "AI analysis could not be completed.");
}

#[tokio::test]
async fn qna_validates_question() {
    let api = app(state(default_quotes(), Arc::new(FakeAnswers::answering("ok", &[]))));

    let res = warp::test::request()
        .method("POST")
        .path("/api/qna")
        .json(&json!({"question": 42}))
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body(&res)["error"], "Invalid question");

    let res = warp::test::request()
        .method("POST")
        .path("/api/qna")
        .json(&json!({}))
        .reply(&api)
        .await;
    assert_eq!(body(&res)["error"], "Invalid question");

    let res = warp::test::request()
        .method("POST")
        .path("/api/qna")
        .json(&json!({"question": "   "}))
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body(&res)["error"], "Please ask a question");
}

#[tokio::test]
async fn qna_answers_with_portfolio_context() {
    let answers = Arc::new(FakeAnswers::answering(
        "Index funds spread your money across many companies.",
        &["https://learn.example/index"],
    ));
    let api = app(state(default_quotes(), answers.clone()));
    let res = warp::test::request()
        .method("POST")
        .path("/api/qna")
        .json(&json!({
            "question": "Should I buy more AAPL?",
            "portfolioData": {
                "positions": [{"symbol": "AAPL", "shares": 10, "currentPrice": 110,
                               "previousPrice": 100, "dailyPct": 10, "value": 1100}],
                "overview": {"totalValue": 1100, "totalGainLoss": 100,
                             "totalGainPct": 10, "holdingsCount": 1}
            }
        }))
        .reply(&api)
        .await;

    assert_eq!(res.status(), StatusCode::OK);
    let v = body(&res);
    assert_eq!(v["citations"][0]["url"], "https://learn.example/index");
    let prompt = answers.last_prompt();
    assert!(prompt.contains("Portfolio Context"));
    assert!(prompt.contains("AAPL: 10 shares, $1,100 value"));
    assert!(prompt.contains("Question: Should I buy more AAPL?"));
}

#[tokio::test]
async fn qna_upstream_failure_is_500() {
    let api = app(state(default_quotes(), Arc::new(FakeAnswers::failing())));
    let res = warp::test::request()
        .method("POST")
        .path("/api/qna")
        .json(&json!({"question": "What is a dividend?"}))
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body(&res)["error"], "Internal server error");
}

#[tokio::test]
async fn rate_limiter_rejects_when_bucket_is_empty() {
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        tokens_per_interval: 1,
        interval: Duration::from_secs(60),
    }));
    let api = app(AppState {
        quotes: default_quotes(),
        answers: Arc::new(FakeAnswers::failing()),
        limiter: Some(limiter),
    });

    let first = warp::test::request()
        .path("/api/ticker/AAPL")
        .header("x-forwarded-for", "203.0.113.5")
        .reply(&api)
        .await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = warp::test::request()
        .path("/api/ticker/AAPL")
        .header("x-forwarded-for", "203.0.113.5")
        .reply(&api)
        .await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.headers()["X-RateLimit-Limit"], "1");
    assert_eq!(second.headers()["X-RateLimit-Remaining"], "0");
    assert!(second.headers().contains_key("Retry-After"));
    assert_eq!(body(&second)["error"], "Too many requests");

    let other_client = warp::test::request()
        .path("/api/ticker/AAPL")
        .header("x-forwarded-for", "198.51.100.9")
        .reply(&api)
        .await;
    assert_eq!(other_client.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_routes_do_not_spend_tokens() {
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        tokens_per_interval: 1,
        interval: Duration::from_secs(60),
    }));
    let api = app(AppState {
        quotes: default_quotes(),
        answers: Arc::new(FakeAnswers::failing()),
        limiter: Some(limiter),
    });

    for _ in 0..3 {
        let res = warp::test::request().path("/api/nothing").reply(&api).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
    let res = warp::test::request()
        .path("/api/ticker/AAPL")
        .reply(&api)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let api = app(state(default_quotes(), Arc::new(FakeAnswers::failing())));
    let res = warp::test::request().path("/api/nothing").reply(&api).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(body(&res)["error"], "Not found");
}
