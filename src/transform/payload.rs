use std::sync::Arc;

use arrow::array::{Array, Float64Array, StringArray};
use arrow::csv::WriterBuilder;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::error::Result;
use crate::models::IdentifierRecord;

pub const IDENTIFIER_HEADER: &str = "ASIN";
pub const PRICE_HEADER: &str = "PRICE";
pub const DEFAULT_NOMINAL_PRICE: f64 = 0.001;

/// Ordered `(identifier, nominal price)` pairs ready for submission.
#[derive(Debug, Clone)]
pub struct BatchPayload {
    batch: RecordBatch,
}

impl BatchPayload {
    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn record_batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn identifiers(&self) -> Vec<&str> {
        self.batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .map(|ids| (0..ids.len()).map(|i| ids.value(i)).collect())
            .unwrap_or_default()
    }

    /// `ASIN,PRICE` header followed by one line per identifier.
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = WriterBuilder::new().with_header(true).build(Vec::new());
        writer.write(&self.batch)?;
        Ok(writer.into_inner())
    }
}

pub struct BatchInputBuilder {
    nominal_price: f64,
}

impl Default for BatchInputBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_NOMINAL_PRICE)
    }
}

impl BatchInputBuilder {
    pub fn new(nominal_price: f64) -> Self {
        Self { nominal_price }
    }

    pub fn with_price(mut self, nominal_price: f64) -> Self {
        self.nominal_price = nominal_price;
        self
    }

    pub fn build(&self, records: &[IdentifierRecord]) -> Result<BatchPayload> {
        let schema = Arc::new(Schema::new(vec![
            Field::new(IDENTIFIER_HEADER, DataType::Utf8, false),
            Field::new(PRICE_HEADER, DataType::Float64, false),
        ]));

        let identifiers: StringArray = records
            .iter()
            .map(|r| Some(r.identifier.as_str()))
            .collect();
        let prices: Float64Array = records.iter().map(|_| Some(self.nominal_price)).collect();

        let batch = RecordBatch::try_new(schema, vec![Arc::new(identifiers), Arc::new(prices)])?;
        Ok(BatchPayload { batch })
    }
}
