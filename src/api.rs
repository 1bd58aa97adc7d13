// src/api.rs
use crate::analysis::{answer_question, explain_movement, portfolio_review, stock_analysis};
use crate::csv_import::{parse_portfolio_csv, MAX_CSV_BYTES};
use crate::error::{handle_rejection, AppError};
use crate::models::{
    AiReview, ChartQuery, PortfolioRequest, PortfolioReviewRequest, PositionInput, QnaRequest,
    StockAnalysis, StrictQuery,
};
use crate::portfolio::{analyze_portfolio, LookupPolicy};
use crate::quote::{
    fetch_stock, normalize_symbol, price_history, ChartWindow, Interval, QuoteProvider,
    TickerOverview,
};
use crate::ratelimit::{rate_limit, RateLimiter};
use crate::sonar::AnswerProvider;
use log::{error, info};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

const JSON_BODY_LIMIT: u64 = 256 * 1024;
const MAX_CHART_MONTHS: u32 = 120;

#[derive(Clone)]
pub struct AppState {
    pub quotes: Arc<dyn QuoteProvider>,
    pub answers: Arc<dyn AnswerProvider>,
    pub limiter: Option<Arc<RateLimiter>>,
}

/// Routes plus rejection handling and access logging.
pub fn app(state: AppState) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    routes(state)
        .recover(handle_rejection)
        .with(warp::log("walletwise::api"))
}

/// Every route checks the rate limit once its path and method have matched,
/// so unknown paths never spend a token.
pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let limited = rate_limit(state.limiter.clone());

    let ticker = warp::path!("ticker" / String)
        .and(warp::get())
        .and(limited.clone())
        .and(with_quotes(state.quotes.clone()))
        .and_then(ticker_handler);

    let chart = warp::path!("ticker" / String / "chart")
        .and(warp::get())
        .and(limited.clone())
        .and(warp::query::<ChartQuery>())
        .and(with_quotes(state.quotes.clone()))
        .and_then(chart_handler);

    let explanation = warp::path!("ticker" / String / "explanation")
        .and(warp::get())
        .and(limited.clone())
        .and(with_answers(state.answers.clone()))
        .and_then(explanation_handler);

    let ticker_ai = warp::path!("ticker" / String / "ai-analysis")
        .and(warp::get())
        .and(limited.clone())
        .and(with_answers(state.answers.clone()))
        .and_then(ticker_ai_handler);

    let portfolio = warp::path!("portfolio")
        .and(warp::post())
        .and(limited.clone())
        .and(warp::query::<StrictQuery>())
        .and(json_body::<PortfolioRequest>())
        .and(with_quotes(state.quotes.clone()))
        .and_then(portfolio_handler);

    let upload = warp::path!("portfolio" / "upload")
        .and(warp::post())
        .and(limited.clone())
        .and(warp::query::<StrictQuery>())
        .and(warp::body::content_length_limit(MAX_CSV_BYTES))
        .and(warp::body::bytes())
        .and(with_quotes(state.quotes.clone()))
        .and_then(upload_handler);

    let portfolio_ai = warp::path!("portfolio" / "ai-analysis")
        .and(warp::post())
        .and(limited.clone())
        .and(json_body::<PortfolioReviewRequest>())
        .and(with_answers(state.answers.clone()))
        .and_then(portfolio_ai_handler);

    let qna = warp::path!("qna")
        .and(warp::post())
        .and(limited.clone())
        .and(json_body::<QnaRequest>())
        .and(with_answers(state.answers.clone()))
        .and_then(qna_handler);

    warp::path("api").and(
        ticker
            .or(chart)
            .or(explanation)
            .or(ticker_ai)
            .or(portfolio)
            .or(upload)
            .or(portfolio_ai)
            .or(qna),
    )
}

fn with_quotes(
    quotes: Arc<dyn QuoteProvider>,
) -> impl Filter<Extract = (Arc<dyn QuoteProvider>,), Error = Infallible> + Clone {
    warp::any().map(move || quotes.clone())
}

fn with_answers(
    answers: Arc<dyn AnswerProvider>,
) -> impl Filter<Extract = (Arc<dyn AnswerProvider>,), Error = Infallible> + Clone {
    warp::any().map(move || answers.clone())
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(JSON_BODY_LIMIT).and(warp::body::json())
}

fn policy(query: &StrictQuery) -> LookupPolicy {
    if query.strict {
        LookupPolicy::Strict
    } else {
        LookupPolicy::Lenient
    }
}

async fn ticker_handler(
    symbol: String,
    quotes: Arc<dyn QuoteProvider>,
) -> Result<Response, Rejection> {
    let symbol = normalize_symbol(&symbol).map_err(warp::reject::custom)?;
    match fetch_stock(quotes.as_ref(), &symbol).await {
        Ok(snapshot) => {
            info!("Ticker data for {} retrieved successfully.", symbol);
            Ok(warp::reply::json(&TickerOverview::from(snapshot)).into_response())
        }
        Err(e) => {
            error!("Failed to fetch ticker {}: {}", symbol, e);
            Err(warp::reject::custom(AppError::TickerNotFound(symbol)))
        }
    }
}

async fn chart_handler(
    symbol: String,
    query: ChartQuery,
    quotes: Arc<dyn QuoteProvider>,
) -> Result<Response, Rejection> {
    let symbol = normalize_symbol(&symbol).map_err(warp::reject::custom)?;
    let interval = query
        .interval
        .as_deref()
        .unwrap_or("1d")
        .parse::<Interval>()
        .map_err(warp::reject::custom)?;
    let months = query.months.unwrap_or(1).clamp(1, MAX_CHART_MONTHS);
    let window = ChartWindow::last_months(months, interval);

    match quotes.chart(&symbol, &window).await {
        Ok(chart) => {
            let body = json!({
                "symbol": symbol,
                "priceHistory": price_history(&chart),
                "chart": chart,
            });
            Ok(warp::reply::json(&body).into_response())
        }
        Err(e) => {
            error!("Failed to fetch chart for {}: {}", symbol, e);
            Err(warp::reject::custom(AppError::TickerNotFound(symbol)))
        }
    }
}

async fn explanation_handler(
    symbol: String,
    answers: Arc<dyn AnswerProvider>,
) -> Result<Response, Rejection> {
    let symbol = normalize_symbol(&symbol).map_err(warp::reject::custom)?;
    let explanation = explain_movement(answers.as_ref(), &symbol)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&json!({ "symbol": symbol, "explanation": explanation })).into_response())
}

async fn ticker_ai_handler(
    symbol: String,
    answers: Arc<dyn AnswerProvider>,
) -> Result<Response, Rejection> {
    let symbol = normalize_symbol(&symbol).map_err(warp::reject::custom)?;
    match stock_analysis(answers.as_ref(), &symbol).await {
        Ok(analysis) => Ok(warp::reply::json(&analysis).into_response()),
        Err(e) => {
            error!("Error fetching AI analysis for {}: {}", symbol, e);
            Ok(warp::reply::with_status(
                warp::reply::json(&StockAnalysis::default()),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
            .into_response())
        }
    }
}

async fn enrich(
    quotes: Arc<dyn QuoteProvider>,
    positions: Vec<PositionInput>,
    query: StrictQuery,
) -> Result<Response, Rejection> {
    match analyze_portfolio(quotes.as_ref(), &positions, policy(&query)).await {
        Ok(response) => Ok(warp::reply::json(&response).into_response()),
        Err(e @ AppError::InvalidTickers(_)) => {
            info!("Rejecting portfolio: {}", e);
            Err(warp::reject::custom(e))
        }
        Err(e) => {
            error!("Failed to analyze portfolio: {}", e);
            Err(warp::reject::custom(e))
        }
    }
}

async fn portfolio_handler(
    query: StrictQuery,
    request: PortfolioRequest,
    quotes: Arc<dyn QuoteProvider>,
) -> Result<Response, Rejection> {
    enrich(quotes, request.positions, query).await
}

async fn upload_handler(
    query: StrictQuery,
    body: warp::hyper::body::Bytes,
    quotes: Arc<dyn QuoteProvider>,
) -> Result<Response, Rejection> {
    let text = std::str::from_utf8(&body).map_err(|_| {
        warp::reject::custom(AppError::InvalidInput("CSV must be UTF-8 text.".to_string()))
    })?;
    let positions = parse_portfolio_csv(text).map_err(warp::reject::custom)?;
    enrich(quotes, positions, query).await
}

async fn portfolio_ai_handler(
    request: PortfolioReviewRequest,
    answers: Arc<dyn AnswerProvider>,
) -> Result<Response, Rejection> {
    match portfolio_review(answers.as_ref(), &request.positions).await {
        Ok(review) => Ok(warp::reply::json(&review).into_response()),
        Err(e) => {
            error!("AI analysis error: {}", e);
            Ok(warp::reply::with_status(
                warp::reply::json(&AiReview::failed()),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
            .into_response())
        }
    }
}

async fn qna_handler(
    request: QnaRequest,
    answers: Arc<dyn AnswerProvider>,
) -> Result<Response, Rejection> {
    let question = request.question.as_str().ok_or_else(|| {
        warp::reject::custom(AppError::InvalidInput("Invalid question".to_string()))
    })?;
    if question.trim().is_empty() {
        return Err(warp::reject::custom(AppError::InvalidInput(
            "Please ask a question".to_string(),
        )));
    }

    let answer = answer_question(answers.as_ref(), question, request.portfolio_data.as_ref())
        .await
        .map_err(|e| {
            error!("Error in Sonar API: {}", e);
            warp::reject::custom(e)
        })?;
    Ok(warp::reply::json(&answer).into_response())
}
