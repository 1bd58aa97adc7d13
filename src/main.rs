// src/main.rs
use env_logger::Builder;
use log::{error, info, LevelFilter};
use reqwest::Client;
use std::sync::Arc;
use walletwise::api::{self, AppState};
use walletwise::config::Config;
use walletwise::ratelimit::RateLimiter;
use walletwise::sonar::SonarClient;
use walletwise::yahoo::YahooClient;

#[tokio::main]
async fn main() {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid environment: {}", e);
            std::process::exit(1);
        }
    };

    let client = match Client::builder().timeout(config.http_timeout).build() {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting WalletWise in {:?} mode...", config.env);

    let limiter = config.rate_limit.map(|limits| {
        info!(
            "Rate limiting to {} requests per {:?} per client",
            limits.tokens_per_interval, limits.interval
        );
        Arc::new(RateLimiter::new(limits))
    });

    let state = AppState {
        quotes: Arc::new(YahooClient::new(client.clone(), config.yahoo.clone())),
        answers: Arc::new(SonarClient::new(client, config.sonar.clone())),
        limiter,
    };

    info!("Server running on http://{}", config.bind_addr);
    warp::serve(api::app(state)).run(config.bind_addr).await;
}
