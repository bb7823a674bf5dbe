use std::process::ExitCode;

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use price_scan::{ScanPipeline, Settings};

const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIG: u8 = 2;

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            init_tracing("info");
            error!(error = %e, "Invalid configuration");
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };
    init_tracing(&settings.log_level);

    let started = Utc::now();
    info!(
        base_url = %settings.service.base_url,
        limit = settings.scan.identifier_limit,
        target = %settings.database.target_ref(),
        "Starting price scan"
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    let pipeline = ScanPipeline::from_settings(&settings).await?;
    let summary = match pipeline.run(&cancel).await {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "Scan run failed");
            return Ok(ExitCode::from(EXIT_FAILURE));
        }
    };

    let elapsed = Utc::now() - started;
    println!("\nScan Summary:");
    println!("Started: {}", started.format("%Y-%m-%d %H:%M:%S"));
    if let Some(job) = &summary.job {
        println!("Job: {} ({:?})", job.id().map(|id| id.as_str()).unwrap_or("-"), job.state());
    }
    println!("Identifiers Selected: {}", summary.selected);
    println!("Result Rows: {}", summary.raw_rows);
    println!("Normalized Rows: {}", summary.normalized);
    println!("Skipped / Duplicates: {} / {}", summary.skipped, summary.duplicates);
    println!("Defaulted Fields: {}", summary.defaults);
    println!("Rows Written: {}", summary.report.succeeded.len());
    println!("Rows Failed: {}", summary.report.failed.len());
    for path in &summary.artifacts {
        println!("Artifact: {}", path.display());
    }
    println!("Total Time: {:.1} seconds", elapsed.num_milliseconds() as f64 / 1000.0);

    if summary.is_complete() {
        Ok(ExitCode::SUCCESS)
    } else {
        for failure in &summary.report.failed {
            error!(
                identifier = %failure.identifier,
                batch_index = failure.batch_index,
                error = %failure.error,
                "Row was not written"
            );
        }
        Ok(ExitCode::from(EXIT_FAILURE))
    }
}
