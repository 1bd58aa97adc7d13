// src/csv_import.rs
//! Portfolio CSV ingestion: `symbol,shares[,costBasis]`, header optional.

use crate::error::{AppError, Result};
use crate::models::PositionInput;
use csv::{ReaderBuilder, StringRecord, Trim};
use log::{debug, info};

/// Largest upload accepted, in bytes.
pub const MAX_CSV_BYTES: u64 = 1024 * 1024;

pub const NO_DATA_ROWS: &str = "CSV has no data rows.";
pub const NO_VALID_POSITIONS: &str = "CSV has no valid positions.";

fn is_header(record: &StringRecord) -> bool {
    record
        .get(0)
        .map(|first| first.to_lowercase().starts_with("symbol"))
        .unwrap_or(false)
}

fn parse_row(record: &StringRecord) -> Option<PositionInput> {
    let cells: Vec<&str> = record.iter().filter(|c| !c.is_empty()).take(3).collect();
    let symbol = cells.first()?.to_uppercase();
    let shares = cells
        .get(1)
        .map_or(Some(0.0), |s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())?;
    let cost_basis = cells
        .get(2)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite());

    Some(PositionInput {
        symbol,
        shares,
        cost_basis,
    })
}

/// Turns uploaded CSV text into positions. Blank lines and a `symbol...`
/// header are skipped; rows with no ticker or a non-numeric share count are
/// dropped.
pub fn parse_portfolio_csv(text: &str) -> Result<Vec<PositionInput>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let mut data_rows = 0usize;
    let mut positions = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| AppError::InvalidInput(format!("Malformed CSV: {}", e)))?;
        if record.iter().all(str::is_empty) || is_header(&record) {
            continue;
        }
        data_rows += 1;
        match parse_row(&record) {
            Some(position) => positions.push(position),
            None => debug!("Dropping malformed CSV row: {:?}", record),
        }
    }

    if data_rows == 0 {
        return Err(AppError::InvalidInput(NO_DATA_ROWS.to_string()));
    }
    if positions.is_empty() {
        return Err(AppError::InvalidInput(NO_VALID_POSITIONS.to_string()));
    }

    info!(
        "Parsed {} positions from {} CSV data rows",
        positions.len(),
        data_rows
    );
    Ok(positions)
}
