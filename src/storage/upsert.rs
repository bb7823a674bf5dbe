use async_trait::async_trait;
use serde::Deserialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::models::NormalizedRow;
use crate::storage::postgres::{TableRef, quote_ident};

pub struct Column {
    pub name: &'static str,
    pub ddl: &'static str,
}

const fn column(name: &'static str, ddl: &'static str) -> Column {
    Column { name, ddl }
}

const NUMERIC: &str = "numeric NOT NULL DEFAULT 0";
const COUNT: &str = "bigint NOT NULL DEFAULT 0";
const TEXT: &str = "character varying";
const TIMESTAMP: &str = "timestamp without time zone";

pub const KEY_COLUMN: &str = "asin";
pub const SELLER_COLUMN: &str = "seller";

/// Target table columns, in bind order.
pub const COLUMNS: &[Column] = &[
    column(KEY_COLUMN, "character varying PRIMARY KEY"),
    column("buy_box_price", NUMERIC),
    column("package_weight", NUMERIC),
    column("fba_fee", NUMERIC),
    column("referral_fee", NUMERIC),
    column("shipping_cost", NUMERIC),
    column("sales_rank_drops", COUNT),
    column("category", TEXT),
    column("monthly_sold", NUMERIC),
    column("inbound_placement_fee", NUMERIC),
    column("return_rate", NUMERIC),
    column("error_text", TEXT),
    column("po_quantity", COUNT),
    column("po_subtotal", NUMERIC),
    column("avg_price_30d", NUMERIC),
    column("avg_price_90d", NUMERIC),
    column("avg_rank_30d", NUMERIC),
    column("avg_rank_90d", NUMERIC),
    column("created_at", TIMESTAMP),
    column("last_updated", TIMESTAMP),
    column(SELLER_COLUMN, TEXT),
];

/// How an upsert treats a seller already stored for the identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellerPolicy {
    /// Keep a non-empty stored seller; only fill it when null or empty.
    #[default]
    PreserveExisting,
    Overwrite,
}

/// `ON CONFLICT` clause for an insert aliased as `t`.
pub fn conflict_clause(policy: SellerPolicy) -> String {
    let assignments: Vec<String> = COLUMNS
        .iter()
        .filter(|c| c.name != KEY_COLUMN)
        .map(|c| {
            let name = quote_ident(c.name);
            match (c.name, policy) {
                (SELLER_COLUMN, SellerPolicy::PreserveExisting) => {
                    format!("{name} = COALESCE(NULLIF(TRIM(t.{name}), ''), EXCLUDED.{name})")
                }
                _ => format!("{name} = EXCLUDED.{name}"),
            }
        })
        .collect();

    format!(
        "ON CONFLICT ({}) DO UPDATE SET {}",
        quote_ident(KEY_COLUMN),
        assignments.join(", ")
    )
}

/// Statements that create the target table if missing and add any column
/// an older table lacks.
pub fn bootstrap_statements(table: &TableRef) -> Vec<String> {
    let definitions: Vec<String> = COLUMNS
        .iter()
        .map(|c| format!("{} {}", quote_ident(c.name), c.ddl))
        .collect();

    let mut statements = vec![
        format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&table.schema)),
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            table.qualified(),
            definitions.join(", ")
        ),
    ];
    statements.extend(COLUMNS.iter().filter(|c| c.name != KEY_COLUMN).map(|c| {
        format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
            table.qualified(),
            quote_ident(c.name),
            c.ddl
        )
    }));
    statements
}

/// Durable keyed storage for normalized rows.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Upsert all rows in one statement; either every row lands or none.
    async fn upsert_batch(&self, rows: &[NormalizedRow]) -> Result<()>;

    async fn upsert_row(&self, row: &NormalizedRow) -> Result<()> {
        self.upsert_batch(std::slice::from_ref(row)).await
    }
}

pub struct PgRecordStore {
    pool: PgPool,
    table: TableRef,
    conflict: String,
}

impl PgRecordStore {
    pub fn new(pool: PgPool, table: TableRef, policy: SellerPolicy) -> Self {
        Self {
            pool,
            table,
            conflict: conflict_clause(policy),
        }
    }

    pub async fn ensure_table(&self) -> Result<()> {
        for statement in bootstrap_statements(&self.table) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        info!(table = %self.table, "Target table ready");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn upsert_batch(&self, rows: &[NormalizedRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let columns: Vec<String> = COLUMNS.iter().map(|c| quote_ident(c.name)).collect();
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {} AS t ({}) ",
            self.table.qualified(),
            columns.join(", ")
        ));

        builder.push_values(rows, |mut b, row| {
            b.push_bind(row.identifier.clone())
                .push_bind(row.buy_box_price.clone())
                .push_bind(row.package_weight.clone())
                .push_bind(row.fba_fee.clone())
                .push_bind(row.referral_fee.clone())
                .push_bind(row.shipping_cost.clone())
                .push_bind(row.sales_rank_drops)
                .push_bind(row.category.clone())
                .push_bind(row.monthly_sold.clone())
                .push_bind(row.inbound_placement_fee.clone())
                .push_bind(row.return_rate.clone())
                .push_bind(row.error_text.clone())
                .push_bind(row.po_quantity)
                .push_bind(row.po_subtotal.clone())
                .push_bind(row.avg_price_30d.clone())
                .push_bind(row.avg_price_90d.clone())
                .push_bind(row.avg_rank_30d.clone())
                .push_bind(row.avg_rank_90d.clone())
                .push_bind(row.created_at)
                .push_bind(row.last_updated)
                .push_bind(row.seller.clone());
        });
        builder.push(" ");
        builder.push(&self.conflict);

        let result = builder.build().execute(&self.pool).await?;
        debug!(table = %self.table, rows = result.rows_affected(), "Upserted batch");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    pub identifier: String,
    pub batch_index: usize,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct WriteReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<RowFailure>,
    pub batches: usize,
    /// Batches that failed as a whole and were re-applied row by row.
    pub fallback_batches: usize,
}

impl WriteReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Batched writes with row-level fallback when a batch is rejected.
pub struct UpsertWriter<S> {
    store: S,
    batch_size: usize,
}

impl<S: RecordStore> UpsertWriter<S> {
    pub fn new(store: S, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn write(&self, rows: &[NormalizedRow]) -> WriteReport {
        let mut report = WriteReport::default();

        for (batch_index, chunk) in rows.chunks(self.batch_size).enumerate() {
            report.batches += 1;

            match self.store.upsert_batch(chunk).await {
                Ok(()) => {
                    report
                        .succeeded
                        .extend(chunk.iter().map(|r| r.identifier.clone()));
                }
                Err(e) => {
                    report.fallback_batches += 1;
                    warn!(
                        batch_index,
                        rows = chunk.len(),
                        error = %e,
                        "Batch upsert failed, retrying rows individually"
                    );
                    for row in chunk {
                        match self.store.upsert_row(row).await {
                            Ok(()) => report.succeeded.push(row.identifier.clone()),
                            Err(e) => {
                                error!(
                                    identifier = %row.identifier,
                                    batch_index,
                                    error = %e,
                                    "Row upsert failed"
                                );
                                report.failed.push(RowFailure {
                                    identifier: row.identifier.clone(),
                                    batch_index,
                                    error: e.to_string(),
                                });
                            }
                        }
                    }
                }
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            batches = report.batches,
            fallback_batches = report.fallback_batches,
            "Upsert finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;

    use crate::error::Error;

    /// In-memory table with the same conflict semantics as the SQL clause.
    #[derive(Default)]
    struct MemoryStore {
        policy: SellerPolicy,
        rows: Mutex<HashMap<String, NormalizedRow>>,
        rejected: HashSet<String>,
        batch_calls: Mutex<usize>,
    }

    impl MemoryStore {
        fn apply(&self, table: &mut HashMap<String, NormalizedRow>, row: &NormalizedRow) {
            let mut incoming = row.clone();
            if let (SellerPolicy::PreserveExisting, Some(existing)) = (self.policy, table.get(&row.identifier)) {
                if existing.has_seller() {
                    incoming.seller = existing.seller.clone();
                }
            }
            table.insert(incoming.identifier.clone(), incoming);
        }
    }

    #[async_trait]
    impl RecordStore for MemoryStore {
        async fn upsert_batch(&self, rows: &[NormalizedRow]) -> Result<()> {
            *self.batch_calls.lock().unwrap() += 1;
            if let Some(bad) = rows.iter().find(|r| self.rejected.contains(&r.identifier)) {
                return Err(Error::InvalidState(format!("numeric overflow for {}", bad.identifier)));
            }
            let mut table = self.rows.lock().unwrap();
            for row in rows {
                self.apply(&mut table, row);
            }
            Ok(())
        }
    }

    fn row(id: &str, seller: Option<&str>) -> NormalizedRow {
        let now = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut row = NormalizedRow::zeroed(id, now);
        row.seller = seller.map(str::to_string);
        row
    }

    #[test]
    fn conflict_clause_preserves_seller_by_default() {
        let clause = conflict_clause(SellerPolicy::PreserveExisting);
        assert!(clause.starts_with(r#"ON CONFLICT ("asin") DO UPDATE SET"#));
        assert!(clause.contains(r#""buy_box_price" = EXCLUDED."buy_box_price""#));
        assert!(clause.contains(r#""created_at" = EXCLUDED."created_at""#));
        assert!(clause.contains(r#""seller" = COALESCE(NULLIF(TRIM(t."seller"), ''), EXCLUDED."seller")"#));
        assert!(!clause.contains(r#""asin" = EXCLUDED"#));

        let overwrite = conflict_clause(SellerPolicy::Overwrite);
        assert!(overwrite.contains(r#""seller" = EXCLUDED."seller""#));
    }

    #[test]
    fn bootstrap_adds_missing_columns() {
        let statements = bootstrap_statements(&TableRef::new("Core Data", "test_united_state"));
        assert_eq!(statements[0], r#"CREATE SCHEMA IF NOT EXISTS "Core Data""#);
        assert!(statements[1].contains(r#""asin" character varying PRIMARY KEY"#));
        assert_eq!(statements.len(), 2 + COLUMNS.len() - 1);
        let avg_rank = r#"ADD COLUMN IF NOT EXISTS "avg_rank_90d" numeric NOT NULL DEFAULT 0"#;
        assert!(statements.iter().any(|s| s.ends_with(avg_rank)));
    }

    #[tokio::test]
    async fn bad_row_falls_back_to_row_by_row() {
        let store = MemoryStore {
            rejected: HashSet::from(["ID0500".to_string()]),
            ..MemoryStore::default()
        };
        let rows: Vec<_> = (0..1000).map(|i| row(&format!("ID{i:04}"), None)).collect();
        let writer = UpsertWriter::new(store, 1000);

        let report = writer.write(&rows).await;

        assert_eq!(report.succeeded.len(), 999);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].identifier, "ID0500");
        assert_eq!(report.failed[0].batch_index, 0);
        assert!(report.failed[0].error.contains("numeric overflow"));
        assert_eq!(report.fallback_batches, 1);
        assert!(!report.is_complete());
        assert_eq!(writer.store().rows.lock().unwrap().len(), 999);
    }

    #[tokio::test]
    async fn rows_are_written_in_batches() {
        let writer = UpsertWriter::new(MemoryStore::default(), 2);
        let rows: Vec<_> = ["A", "B", "C", "D", "E"].iter().map(|id| row(id, None)).collect();

        let report = writer.write(&rows).await;
        assert_eq!(report.batches, 3);
        assert_eq!(*writer.store().batch_calls.lock().unwrap(), 3);
        assert_eq!(report.succeeded, vec!["A", "B", "C", "D", "E"]);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn rewriting_is_idempotent_and_keeps_stored_seller() {
        let writer = UpsertWriter::new(MemoryStore::default(), 10);
        writer.write(&[row("A", Some("Acme")), row("B", Some("  "))]).await;

        let mut rerun = vec![row("A", Some("Other")), row("B", Some("Beta"))];
        rerun[0].fba_fee = BigDecimal::from(7);
        writer.write(&rerun).await;
        writer.write(&rerun).await;

        let table = writer.store().rows.lock().unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table["A"].seller.as_deref(), Some("Acme"));
        assert_eq!(table["A"].fba_fee, BigDecimal::from(7));
        assert_eq!(table["B"].seller.as_deref(), Some("Beta"));
    }

    #[tokio::test]
    async fn overwrite_policy_replaces_seller() {
        let store = MemoryStore {
            policy: SellerPolicy::Overwrite,
            ..MemoryStore::default()
        };
        let writer = UpsertWriter::new(store, 10);
        writer.write(&[row("A", Some("Acme"))]).await;
        writer.write(&[row("A", Some("Other"))]).await;
        assert_eq!(writer.store().rows.lock().unwrap()["A"].seller.as_deref(), Some("Other"));
    }
}
