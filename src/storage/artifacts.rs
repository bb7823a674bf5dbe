use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bigdecimal::BigDecimal;
use parquet::arrow::ArrowWriter;
use tracing::info;

use crate::error::Result;
use crate::models::{JobId, NormalizedRow, RawPayload};

/// Writes raw and normalized scan results next to each other for later
/// inspection or re-import.
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    /// `None` when `dir` is empty, which disables artifacts.
    pub fn new(dir: &str) -> Option<Self> {
        let dir = dir.trim();
        (!dir.is_empty()).then(|| Self { dir: PathBuf::from(dir) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn save_raw(&self, job_id: &JobId, stamp: &str, payload: &RawPayload) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self
            .dir
            .join(format!("scan_results_{job_id}_{stamp}.{}", payload.extension()));
        tokio::fs::write(&path, &payload.body).await?;

        info!(path = %path.display(), bytes = payload.body.len(), "Saved raw results");
        Ok(path)
    }

    pub async fn save_normalized(&self, job_id: &JobId, stamp: &str, rows: &[NormalizedRow]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self
            .dir
            .join(format!("scan_results_normalized_{job_id}_{stamp}.parquet"));
        write_parquet(rows, &path)?;

        info!(path = %path.display(), rows = rows.len(), "Saved normalized results");
        Ok(path)
    }
}

fn write_parquet(rows: &[NormalizedRow], path: &Path) -> Result<()> {
    let decimal_fields = [
        "buy_box_price",
        "package_weight",
        "fba_fee",
        "referral_fee",
        "shipping_cost",
        "monthly_sold",
        "inbound_placement_fee",
        "return_rate",
        "po_subtotal",
        "avg_price_30d",
        "avg_price_90d",
        "avg_rank_30d",
        "avg_rank_90d",
    ];

    let mut fields = vec![Field::new("identifier", DataType::Utf8, false)];
    // Decimals are stored as text to keep their exact scale.
    fields.extend(decimal_fields.iter().map(|name| Field::new(*name, DataType::Utf8, false)));
    fields.extend([
        Field::new("sales_rank_drops", DataType::Int64, false),
        Field::new("po_quantity", DataType::Int64, false),
        Field::new("category", DataType::Utf8, true),
        Field::new("error_text", DataType::Utf8, true),
        Field::new("seller", DataType::Utf8, true),
        Field::new("created_at", DataType::Int64, false),
        Field::new("last_updated", DataType::Int64, false),
    ]);
    let schema = Arc::new(Schema::new(fields));

    let decimals: [fn(&NormalizedRow) -> &BigDecimal; 13] = [
        |r| &r.buy_box_price,
        |r| &r.package_weight,
        |r| &r.fba_fee,
        |r| &r.referral_fee,
        |r| &r.shipping_cost,
        |r| &r.monthly_sold,
        |r| &r.inbound_placement_fee,
        |r| &r.return_rate,
        |r| &r.po_subtotal,
        |r| &r.avg_price_30d,
        |r| &r.avg_price_90d,
        |r| &r.avg_rank_30d,
        |r| &r.avg_rank_90d,
    ];

    let identifiers: StringArray = rows.iter().map(|r| Some(r.identifier.as_str())).collect();
    let mut columns: Vec<ArrayRef> = vec![Arc::new(identifiers)];
    for get in decimals {
        let values: StringArray = rows.iter().map(|r| Some(get(r).to_string())).collect();
        columns.push(Arc::new(values));
    }

    let sales_rank_drops: Int64Array = rows.iter().map(|r| Some(r.sales_rank_drops)).collect();
    let po_quantity: Int64Array = rows.iter().map(|r| Some(r.po_quantity)).collect();
    let category: StringArray = rows.iter().map(|r| r.category.as_deref()).collect();
    let error_text: StringArray = rows.iter().map(|r| r.error_text.as_deref()).collect();
    let seller: StringArray = rows.iter().map(|r| r.seller.as_deref()).collect();
    let created_at: Int64Array = rows
        .iter()
        .map(|r| Some(r.created_at.and_utc().timestamp()))
        .collect();
    let last_updated: Int64Array = rows
        .iter()
        .map(|r| Some(r.last_updated.and_utc().timestamp()))
        .collect();

    columns.push(Arc::new(sales_rank_drops));
    columns.push(Arc::new(po_quantity));
    columns.push(Arc::new(category));
    columns.push(Arc::new(error_text));
    columns.push(Arc::new(seller));
    columns.push(Arc::new(created_at));
    columns.push(Arc::new(last_updated));

    let batch = RecordBatch::try_new(schema.clone(), columns)?;

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}
