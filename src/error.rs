// src/error.rs
use log::{error, warn};
use serde::Serialize;
use std::convert::Infallible;
use thiserror::Error;
use warp::http::{HeaderValue, StatusCode};
use warp::reject::Reject;
use warp::{Rejection, Reply};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Ticker not found: {0}")]
    TickerNotFound(String),

    /// Quote or LLM provider failed, including non-2xx answers.
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("Invalid tickers: {}", .0.join(", "))]
    InvalidTickers(Vec<String>),

    #[error("Too many requests")]
    RateLimited {
        limit: u32,
        remaining: u32,
        reset_ms: i64,
        retry_after_secs: u64,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::TickerNotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidTickers(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upstream(_)
            | AppError::Config(_)
            | AppError::Http(_)
            | AppError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Reject for AppError {}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    invalid: Option<&'a [String]>,
}

fn json_error(message: &str, invalid: Option<&[String]>, status: StatusCode) -> warp::reply::Response {
    let body = ErrorBody {
        error: message,
        invalid,
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

/// Turns every rejection into a JSON `{error}` body.
pub async fn handle_rejection(err: Rejection) -> std::result::Result<warp::reply::Response, Infallible> {
    if err.is_not_found() {
        return Ok(json_error("Not found", None, StatusCode::NOT_FOUND));
    }

    if let Some(e) = err.find::<AppError>() {
        return Ok(app_error_response(e));
    }

    if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        warn!("Rejected malformed body: {}", e);
        return Ok(json_error("Invalid request body", None, StatusCode::BAD_REQUEST));
    }

    if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        return Ok(json_error("File too large", None, StatusCode::PAYLOAD_TOO_LARGE));
    }

    if err.find::<warp::reject::LengthRequired>().is_some() {
        return Ok(json_error("Content-Length required", None, StatusCode::LENGTH_REQUIRED));
    }

    if err.find::<warp::reject::InvalidQuery>().is_some() {
        return Ok(json_error("Invalid query string", None, StatusCode::BAD_REQUEST));
    }

    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(json_error("Method not allowed", None, StatusCode::METHOD_NOT_ALLOWED));
    }

    if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        return Ok(json_error(
            "Unsupported media type",
            None,
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ));
    }

    error!("Unhandled rejection: {:?}", err);
    Ok(json_error(
        "Internal server error",
        None,
        StatusCode::INTERNAL_SERVER_ERROR,
    ))
}

fn app_error_response(e: &AppError) -> warp::reply::Response {
    match e {
        AppError::InvalidTickers(symbols) => {
            json_error(&e.to_string(), Some(symbols), e.status())
        }
        AppError::RateLimited {
            limit,
            remaining,
            reset_ms,
            retry_after_secs,
        } => {
            let mut res = json_error("Too many requests", None, e.status());
            let headers = res.headers_mut();
            headers.insert("X-RateLimit-Limit", HeaderValue::from(*limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(*remaining));
            headers.insert("X-RateLimit-Reset", HeaderValue::from(*reset_ms));
            headers.insert("Retry-After", HeaderValue::from(*retry_after_secs));
            res
        }
        AppError::TickerNotFound(_) | AppError::InvalidInput(_) => {
            json_error(&e.to_string(), None, e.status())
        }
        _ => {
            error!("Request failed: {}", e);
            json_error("Internal server error", None, e.status())
        }
    }
}
