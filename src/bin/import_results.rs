use std::collections::HashMap;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use price_scan::Settings;
use price_scan::models::RawPayload;
use price_scan::pipeline::normalize_and_write;
use price_scan::storage::{PgRecordStore, UpsertWriter, connect};
use price_scan::transform::parse_rows;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: import_results <scan_results.csv|scan_results.json>");
        return Ok(ExitCode::from(2));
    };

    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return Ok(ExitCode::from(2));
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let body = tokio::fs::read(&path)
        .await
        .with_context(|| format!("reading {path}"))?;
    let content_type = match Path::new(&path).extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => "application/json",
        _ => "text/csv",
    };
    let payload = RawPayload::new(Some(content_type.to_string()), body);
    let rows = parse_rows(&payload).with_context(|| format!("parsing {path}"))?;
    info!(path = %path, rows = rows.len(), "Loaded raw results");

    let db = &settings.database;
    let pool = connect(db).await?;
    let store = PgRecordStore::new(pool, db.target_ref(), db.seller_policy);
    store.ensure_table().await?;
    let writer = UpsertWriter::new(store, db.batch_size);

    let (batch, report) = normalize_and_write(&rows, &HashMap::new(), &writer).await;

    println!("\nImport Summary:");
    println!("File: {path}");
    println!("Result Rows: {}", rows.len());
    println!("Normalized Rows: {}", batch.rows.len());
    println!("Skipped / Duplicates: {} / {}", batch.skipped, batch.duplicates);
    println!("Rows Written: {}", report.succeeded.len());
    println!("Rows Failed: {}", report.failed.len());

    if report.is_complete() {
        Ok(ExitCode::SUCCESS)
    } else {
        for failure in &report.failed {
            error!(identifier = %failure.identifier, error = %failure.error, "Row was not written");
        }
        Ok(ExitCode::from(1))
    }
}
