use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::Result;
use crate::models::{IdentifierRecord, NormalizedRow, RawResultRow, ScanJob};
use crate::services::{HttpScanApi, ScanApi, ScanOrchestrator};
use crate::storage::{
    ArtifactWriter, IdentifierSource, PgIdentifierSelector, PgRecordStore, RecordStore, UpsertWriter, WriteReport,
};
use crate::transform::{BatchInputBuilder, NormalizedBatch, Normalizer};

const STAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug, Default)]
pub struct RunSummary {
    pub selected: usize,
    pub job: Option<ScanJob>,
    pub raw_rows: usize,
    pub normalized: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub defaults: usize,
    pub report: WriteReport,
    pub artifacts: Vec<PathBuf>,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.report.is_complete()
    }
}

/// Sellers known from the selection, by identifier.
pub fn seller_index(records: &[IdentifierRecord]) -> HashMap<String, String> {
    records
        .iter()
        .filter_map(|r| {
            let seller = r.seller.as_deref()?.trim();
            (!seller.is_empty()).then(|| (r.identifier.to_uppercase(), seller.to_string()))
        })
        .collect()
}

/// Fill rows that came back without a seller from `sellers`.
pub fn fill_sellers(rows: &mut [NormalizedRow], sellers: &HashMap<String, String>) -> usize {
    let mut filled = 0;
    for row in rows.iter_mut().filter(|r| !r.has_seller()) {
        if let Some(seller) = sellers.get(&row.identifier) {
            row.seller = Some(seller.clone());
            filled += 1;
        }
    }
    filled
}

/// Normalize raw rows, fill sellers and upsert. Shared by the scan run and
/// the offline import.
pub async fn normalize_and_write<S: RecordStore>(
    rows: &[RawResultRow],
    sellers: &HashMap<String, String>,
    writer: &UpsertWriter<S>,
) -> (NormalizedBatch, WriteReport) {
    let normalizer = Normalizer::new(Utc::now().naive_utc());
    let mut batch = normalizer.normalize_all(rows);

    let filled = fill_sellers(&mut batch.rows, sellers);
    if filled > 0 {
        info!(filled, "Filled sellers from selection");
    }

    let report = writer.write(&batch.rows).await;
    (batch, report)
}

/// Selection, scan, normalization and upsert for one run.
pub struct ScanPipeline<Src, A, S> {
    selector: Src,
    builder: BatchInputBuilder,
    orchestrator: ScanOrchestrator<A>,
    writer: UpsertWriter<S>,
    artifacts: Option<ArtifactWriter>,
    limit: usize,
}

impl ScanPipeline<PgIdentifierSelector, HttpScanApi, PgRecordStore> {
    /// Connect to the database and the scanning service and make sure the
    /// target table exists.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let db = &settings.database;
        let pool = crate::storage::connect(db).await?;

        let selector = PgIdentifierSelector::new(pool.clone(), &db.source, db.enrichment.as_ref());
        let store = PgRecordStore::new(pool, db.target_ref(), db.seller_policy);
        store.ensure_table().await?;

        let api = HttpScanApi::new(settings.service.clone())?;
        let orchestrator = ScanOrchestrator::new(api, settings.orchestrator_config()?);

        Ok(Self::new(
            selector,
            orchestrator,
            UpsertWriter::new(store, db.batch_size),
            settings.scan.identifier_limit,
        )
        .with_builder(BatchInputBuilder::new(settings.scan.nominal_price))
        .with_artifacts(ArtifactWriter::new(&settings.output.dir)))
    }
}

impl<Src, A, S> ScanPipeline<Src, A, S>
where
    Src: IdentifierSource,
    A: ScanApi,
    S: RecordStore,
{
    pub fn new(selector: Src, orchestrator: ScanOrchestrator<A>, writer: UpsertWriter<S>, limit: usize) -> Self {
        Self {
            selector,
            builder: BatchInputBuilder::default(),
            orchestrator,
            writer,
            artifacts: None,
            limit,
        }
    }

    pub fn with_builder(mut self, builder: BatchInputBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Option<ArtifactWriter>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn orchestrator(&self) -> &ScanOrchestrator<A> {
        &self.orchestrator
    }

    pub fn writer(&self) -> &UpsertWriter<S> {
        &self.writer
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary> {
        let records = self.selector.select(self.limit).await?;
        let mut summary = RunSummary {
            selected: records.len(),
            ..RunSummary::default()
        };

        if records.is_empty() {
            info!("No identifiers selected, nothing to scan");
            return Ok(summary);
        }

        let payload = self.builder.build(&records)?;
        let completed = self.orchestrator.run(&payload, cancel).await?;
        let job_id = completed.job.require_id()?.clone();
        let stamp = Utc::now().format(STAMP_FORMAT).to_string();

        if let Some(artifacts) = &self.artifacts {
            match artifacts.save_raw(&job_id, &stamp, &completed.download.raw).await {
                Ok(path) => summary.artifacts.push(path),
                Err(e) => warn!(error = %e, "Could not save raw results"),
            }
        }

        let sellers = seller_index(&records);
        let (batch, report) = normalize_and_write(&completed.download.rows, &sellers, &self.writer).await;

        if let Some(artifacts) = &self.artifacts {
            match artifacts.save_normalized(&job_id, &stamp, &batch.rows).await {
                Ok(path) => summary.artifacts.push(path),
                Err(e) => warn!(error = %e, "Could not save normalized results"),
            }
        }

        summary.raw_rows = completed.download.rows.len();
        summary.normalized = batch.rows.len();
        summary.skipped = batch.skipped;
        summary.duplicates = batch.duplicates;
        summary.defaults = batch.defaults;
        summary.report = report;
        summary.job = Some(completed.job);

        info!(
            job_id = %job_id,
            selected = summary.selected,
            written = summary.report.succeeded.len(),
            failed = summary.report.failed.len(),
            "Scan run finished"
        );
        Ok(summary)
    }
}
