//! WalletWise: stock and portfolio explanations for beginner investors.
//!
//! Thin HTTP routes over two upstream services: a quote provider and the
//! Sonar answer API.

pub mod analysis;
pub mod api;
pub mod citations;
pub mod config;
pub mod csv_import;
pub mod error;
pub mod llm_json;
pub mod models;
pub mod portfolio;
pub mod prompts;
pub mod quote;
pub mod ratelimit;
pub mod sonar;
pub mod yahoo;
