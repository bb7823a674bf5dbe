use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::config::{EnrichmentTable, SourceTable};
use crate::error::Result;
use crate::models::IdentifierRecord;
use crate::storage::postgres::quote_ident;

/// Source of identifiers to scan.
#[async_trait]
pub trait IdentifierSource: Send + Sync {
    /// At most `limit` records ordered by identifier.
    async fn select(&self, limit: usize) -> Result<Vec<IdentifierRecord>>;
}

pub struct PgIdentifierSelector {
    pool: PgPool,
    sql: String,
}

impl PgIdentifierSelector {
    pub fn new(pool: PgPool, source: &SourceTable, enrichment: Option<&EnrichmentTable>) -> Self {
        let sql = selection_sql(source, enrichment);
        debug!(sql = %sql, "Prepared identifier selection");
        Self { pool, sql }
    }
}

#[async_trait]
impl IdentifierSource for PgIdentifierSelector {
    async fn select(&self, limit: usize) -> Result<Vec<IdentifierRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = sqlx::query_as::<_, IdentifierRecord>(&self.sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        info!(limit, selected = records.len(), "Selected identifiers");
        Ok(records)
    }
}

/// Distinct, trimmed, upper-cased identifiers from the source table, left
/// joined to at most one enrichment row each. Bound parameter `$1` is the
/// limit.
pub fn selection_sql(source: &SourceTable, enrichment: Option<&EnrichmentTable>) -> String {
    let key = format!("UPPER(TRIM(src.{}::text))", quote_ident(&source.identifier_column));

    let distinct = format!(
        "SELECT DISTINCT ON ({key}) {key} AS identifier \
         FROM {table} src \
         WHERE NULLIF(TRIM(src.{column}::text), '') IS NOT NULL \
         ORDER BY {key}",
        table = source.table_ref(),
        column = quote_ident(&source.identifier_column),
    );

    let join = match enrichment {
        Some(e) => format!(
            "LEFT JOIN LATERAL (\
             SELECT enr.{status}::text AS status, enr.{seller}::text AS seller \
             FROM {table} enr \
             WHERE UPPER(TRIM(enr.{id}::text)) = s.identifier \
             ORDER BY enr.{seller} NULLS LAST, enr.{status} NULLS LAST \
             LIMIT 1) e ON TRUE",
            status = quote_ident(&e.status_column),
            seller = quote_ident(&e.seller_column),
            id = quote_ident(&e.identifier_column),
            table = e.table_ref(),
        ),
        None => "LEFT JOIN LATERAL (SELECT NULL::text AS status, NULL::text AS seller) e ON TRUE".to_string(),
    };

    format!(
        "SELECT s.identifier, e.status, e.seller FROM ({distinct}) s {join} \
         ORDER BY s.identifier LIMIT $1"
    )
}
