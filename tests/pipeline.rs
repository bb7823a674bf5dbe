use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use price_scan::models::{IdentifierRecord, JobId, JobSummary, NormalizedRow, RawPayload, ScanState};
use price_scan::services::{OrchestratorConfig, PollConfig, ScanApi, ScanOrchestrator, SubmitResponse};
use price_scan::storage::{IdentifierSource, RecordStore, UpsertWriter};
use price_scan::transform::BatchPayload;
use price_scan::utils::RetryPolicy;
use price_scan::{Error, Result, ScanPipeline};

struct TableSource {
    records: Vec<IdentifierRecord>,
}

#[async_trait]
impl IdentifierSource for TableSource {
    async fn select(&self, limit: usize) -> Result<Vec<IdentifierRecord>> {
        let mut records = self.records.clone();
        records.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        records.truncate(limit);
        Ok(records)
    }
}

#[derive(Default)]
struct ScriptedApi {
    submitted: Mutex<Option<String>>,
    statuses: Mutex<VecDeque<&'static str>>,
    results: Mutex<Option<RawPayload>>,
}

#[async_trait]
impl ScanApi for ScriptedApi {
    async fn submit(&self, payload: &BatchPayload, job_config: &Value) -> Result<SubmitResponse> {
        assert_eq!(job_config["mapping"], json!({"id": 0, "cost": 1}));
        let csv = String::from_utf8(payload.to_csv()?).map_err(|e| Error::InvalidResponse(e.to_string()))?;
        *self.submitted.lock().unwrap() = Some(csv);
        Ok(SubmitResponse::Identified(JobId::from("job-42")))
    }

    async fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        Ok(vec![JobSummary {
            id: JobId::from("job-41"),
            status: Some("done".into()),
            name: None,
        }])
    }

    async fn job_status(&self, job_id: &JobId) -> Result<Option<String>> {
        assert_eq!(job_id.as_str(), "job-42");
        Ok(self.statuses.lock().unwrap().pop_front().map(str::to_string))
    }

    async fn download(&self, _job_id: &JobId) -> Result<RawPayload> {
        self.results
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::InvalidState("results already downloaded".into()))
    }
}

/// Keyed table that keeps a non-empty stored seller, like the default
/// conflict clause.
#[derive(Default)]
struct KeyedTable {
    rows: Mutex<HashMap<String, NormalizedRow>>,
}

#[async_trait]
impl RecordStore for KeyedTable {
    async fn upsert_batch(&self, rows: &[NormalizedRow]) -> Result<()> {
        let mut table = self.rows.lock().unwrap();
        for row in rows {
            let mut incoming = row.clone();
            if let Some(existing) = table.get(&row.identifier) {
                if existing.has_seller() {
                    incoming.seller = existing.seller.clone();
                }
            }
            table.insert(incoming.identifier.clone(), incoming);
        }
        Ok(())
    }
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        poll: PollConfig {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(600),
        },
        retry: RetryPolicy::default(),
        job_config: json!({"mapping": {"id": 0, "cost": 1}, "options": {"marketplace_id": "US"}}),
    }
}

fn existing_row(identifier: &str, seller: &str) -> NormalizedRow {
    let then = NaiveDate::from_ymd_opt(2023, 12, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let mut row = NormalizedRow::zeroed(identifier, then);
    row.seller = Some(seller.to_string());
    row
}

#[tokio::test(start_paused = true)]
async fn limit_three_scan_runs_end_to_end() {
    let source = TableSource {
        records: vec![
            IdentifierRecord::new("X4"),
            IdentifierRecord::new("X3"),
            IdentifierRecord::new("X1").with_seller("T"),
            IdentifierRecord::new("X2").with_seller("U"),
        ],
    };

    let api = ScriptedApi::default();
    api.statuses.lock().unwrap().extend(["queued", "running", "done"]);
    *api.results.lock().unwrap() = Some(RawPayload::new(
        Some("text/csv".into()),
        "ASIN,Buybox Price,Weight,Category\nX1,$10.50,,Toys\nX2,abc,1.2,\nX3,,,Home\n",
    ));

    let table = KeyedTable::default();
    table
        .rows
        .lock()
        .unwrap()
        .insert("X2".into(), existing_row("X2", "Existing"));

    let orchestrator = ScanOrchestrator::new(api, config());
    let pipeline = ScanPipeline::new(source, orchestrator, UpsertWriter::new(table, 1000), 3);

    let summary = pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.selected, 3);
    let submitted = pipeline.orchestrator().api().submitted.lock().unwrap().clone().unwrap();
    assert_eq!(submitted.lines().count(), 4);
    assert!(submitted.starts_with("ASIN,PRICE\nX1,"));
    let job = summary.job.as_ref().unwrap();
    assert_eq!(job.id(), Some(&JobId::from("job-42")));
    assert_eq!(job.state(), ScanState::Succeeded);
    assert_eq!(job.last_status(), Some("done"));
    assert_eq!(summary.raw_rows, 3);
    assert_eq!(summary.normalized, 3);
    assert_eq!(summary.report.succeeded, vec!["X1", "X2", "X3"]);
    assert!(summary.is_complete());
    assert!(summary.artifacts.is_empty());

    let table = pipeline.writer().store().rows.lock().unwrap();
    assert_eq!(table.len(), 3);

    let x1 = &table["X1"];
    assert_eq!(x1.buy_box_price, "10.50".parse::<BigDecimal>().unwrap());
    assert_eq!(x1.package_weight, BigDecimal::from(0));
    assert_eq!(x1.category.as_deref(), Some("Toys"));
    assert_eq!(x1.seller.as_deref(), Some("T"));

    let x2 = &table["X2"];
    assert_eq!(x2.buy_box_price, BigDecimal::from(0));
    assert_eq!(x2.package_weight, "1.2".parse::<BigDecimal>().unwrap());
    assert_eq!(x2.seller.as_deref(), Some("Existing"));

    let x3 = &table["X3"];
    assert_eq!(x3.fba_fee, BigDecimal::from(0));
    assert_eq!(x3.seller, None);
}

#[tokio::test(start_paused = true)]
async fn submitted_payload_lists_the_selection_in_order() {
    let source = TableSource {
        records: vec![
            IdentifierRecord::new("X3"),
            IdentifierRecord::new("X1"),
            IdentifierRecord::new("X2"),
        ],
    };
    let api = ScriptedApi::default();
    api.statuses.lock().unwrap().push_back("completed");
    *api.results.lock().unwrap() = Some(RawPayload::new(Some("application/json".into()), "[]"));

    let orchestrator = ScanOrchestrator::new(api, config());
    let pipeline = ScanPipeline::new(source, orchestrator, UpsertWriter::new(KeyedTable::default(), 1000), 3);
    let summary = pipeline.run(&CancellationToken::new()).await.unwrap();

    let submitted = pipeline.orchestrator().api().submitted.lock().unwrap().clone();
    assert_eq!(
        submitted.as_deref(),
        Some("ASIN,PRICE\nX1,0.001\nX2,0.001\nX3,0.001\n")
    );
    assert_eq!(summary.normalized, 0);
    assert!(summary.is_complete());
}

#[tokio::test(start_paused = true)]
async fn empty_selection_never_contacts_the_service() {
    let api = ScriptedApi::default();
    let orchestrator = ScanOrchestrator::new(api, config());
    let pipeline = ScanPipeline::new(
        TableSource { records: Vec::new() },
        orchestrator,
        UpsertWriter::new(KeyedTable::default(), 1000),
        3,
    );

    let summary = pipeline.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.selected, 0);
    assert!(summary.job.is_none());
    assert!(pipeline.writer().store().rows.lock().unwrap().is_empty());
}
