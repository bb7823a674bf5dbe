use std::collections::HashMap;
use std::str::FromStr;

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDateTime};
use tracing::{debug, info};

use crate::models::{NormalizedRow, RawResultRow};

const IDENTIFIER: &[&str] = &["ASIN", "asin", "Identifier", "identifier"];
const BUY_BOX_PRICE: &[&str] = &["Buybox Price", "Buybox Price New", "Lowest Price New FBA"];
const PACKAGE_WEIGHT: &[&str] = &["Weight", "Package Weight"];
const FBA_FEE: &[&str] = &["FBA Fees", "FBA Fee"];
const REFERRAL_FEE: &[&str] = &["Referral Fee"];
const SHIPPING_COST: &[&str] = &["Inbound Shipping", "Shipping Cost"];
const SALES_RANK_DROPS: &[&str] = &[
    "Sales Rank Drops 30d",
    "Sales Rank Drops 60d",
    "Sales Rank Drops 90d",
    "Sales Rank Drops 180d",
];
const CATEGORY: &[&str] = &["Category"];
const MONTHLY_SOLD: &[&str] = &["Amazon Monthly Sold", "Monthly Sold", "Estimated Monthly Sales"];
const INBOUND_PLACEMENT_FEE: &[&str] = &["Inbound Placement Fee"];
const RETURN_RATE: &[&str] = &["Return Rate"];
const ERROR_TEXT: &[&str] = &["Error", "Errors"];
const PO_QUANTITY: &[&str] = &["PO Quantity", "Quantity"];
const PO_SUBTOTAL: &[&str] = &["PO Subtotal", "Subtotal"];
const AVG_PRICE_30D: &[&str] = &["Average Price 30d", "Avg Price 30d"];
const AVG_PRICE_90D: &[&str] = &["Average Price 90d", "Avg Price 90d"];
const AVG_RANK_30D: &[&str] = &["Average BSR 30d", "Avg BSR 30d"];
const AVG_RANK_90D: &[&str] = &["Average BSR 90d", "Avg BSR 90d"];
const CREATED_AT: &[&str] = &["created_at", "Created At"];
const LAST_UPDATED: &[&str] = &["last_updated", "Last Updated"];
const SELLER: &[&str] = &["Seller"];

// Postgres `numeric` limits.
const MAX_INTEGER_DIGITS: i64 = 131_072;
const MAX_FRACTION_DIGITS: i64 = 16_383;
const MAX_NUMERIC_TEXT: usize = 1024;
const MAX_COUNT_DIGITS: i64 = 19;

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Outcome of normalizing a whole result set.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub rows: Vec<NormalizedRow>,
    /// Numeric fields that fell back to zero.
    pub defaults: usize,
    /// Rows dropped for lacking an identifier.
    pub skipped: usize,
    /// Earlier occurrences replaced by a later row with the same identifier.
    pub duplicates: usize,
}

/// Maps raw rows onto [`NormalizedRow`]. Never fails: anything missing or
/// unparsable becomes zero (numbers) or the processing time (timestamps).
pub struct Normalizer {
    now: NaiveDateTime,
}

struct Coercion<'a> {
    row: &'a RawResultRow,
    identifier: &'a str,
    defaults: usize,
}

impl Coercion<'_> {
    fn decimal(&mut self, field: &'static str, candidates: &[&str]) -> BigDecimal {
        let raw = self.row.first_text(candidates);
        match raw.as_deref().and_then(parse_decimal) {
            Some(value) => value,
            None => {
                self.defaulted(field, raw.as_deref());
                BigDecimal::from(0)
            }
        }
    }

    /// Counts are parsed as decimals and truncated toward zero. Values outside
    /// the `i64` range default like unparsable text.
    fn count(&mut self, field: &'static str, candidates: &[&str]) -> i64 {
        let raw = self.row.first_text(candidates);
        match raw.as_deref().and_then(parse_decimal).and_then(|v| truncate_count(&v)) {
            Some(value) => value,
            None => {
                self.defaulted(field, raw.as_deref());
                0
            }
        }
    }

    fn defaulted(&mut self, field: &'static str, raw: Option<&str>) {
        self.defaults += 1;
        debug!(
            event = "NormalizationDefault",
            identifier = self.identifier,
            field,
            raw = raw.unwrap_or(""),
            "Defaulting field to zero"
        );
    }
}

impl Normalizer {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.now
    }

    pub fn identifier(row: &RawResultRow) -> Option<String> {
        row.first_text(IDENTIFIER).map(|id| id.to_uppercase())
    }

    pub fn normalize(&self, row: &RawResultRow) -> NormalizedRow {
        self.normalize_counted(row).0
    }

    fn normalize_counted(&self, row: &RawResultRow) -> (NormalizedRow, usize) {
        let identifier = Self::identifier(row).unwrap_or_default();
        let mut c = Coercion {
            row,
            identifier: &identifier,
            defaults: 0,
        };

        let normalized = NormalizedRow {
            buy_box_price: c.decimal("buy_box_price", BUY_BOX_PRICE),
            package_weight: c.decimal("package_weight", PACKAGE_WEIGHT),
            fba_fee: c.decimal("fba_fee", FBA_FEE),
            referral_fee: c.decimal("referral_fee", REFERRAL_FEE),
            shipping_cost: c.decimal("shipping_cost", SHIPPING_COST),
            sales_rank_drops: c.count("sales_rank_drops", SALES_RANK_DROPS),
            category: row.first_text(CATEGORY),
            monthly_sold: c.decimal("monthly_sold", MONTHLY_SOLD),
            inbound_placement_fee: c.decimal("inbound_placement_fee", INBOUND_PLACEMENT_FEE),
            return_rate: c.decimal("return_rate", RETURN_RATE),
            error_text: row.first_text(ERROR_TEXT),
            po_quantity: c.count("po_quantity", PO_QUANTITY),
            po_subtotal: c.decimal("po_subtotal", PO_SUBTOTAL),
            avg_price_30d: c.decimal("avg_price_30d", AVG_PRICE_30D),
            avg_price_90d: c.decimal("avg_price_90d", AVG_PRICE_90D),
            avg_rank_30d: c.decimal("avg_rank_30d", AVG_RANK_30D),
            avg_rank_90d: c.decimal("avg_rank_90d", AVG_RANK_90D),
            created_at: self.timestamp(row, CREATED_AT),
            last_updated: self.timestamp(row, LAST_UPDATED),
            seller: row.first_text(SELLER),
            identifier: identifier.clone(),
        };
        let defaults = c.defaults;
        (normalized, defaults)
    }

    fn timestamp(&self, row: &RawResultRow, candidates: &[&str]) -> NaiveDateTime {
        row.first_text(candidates)
            .and_then(|raw| parse_timestamp(&raw))
            .unwrap_or(self.now)
    }

    /// Normalize every row, dropping rows without an identifier. When an
    /// identifier repeats, the last row wins but keeps the position of the
    /// first occurrence.
    pub fn normalize_all(&self, rows: &[RawResultRow]) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for row in rows {
            if Self::identifier(row).is_none() {
                batch.skipped += 1;
                continue;
            }
            let (normalized, defaults) = self.normalize_counted(row);
            batch.defaults += defaults;

            match positions.get(&normalized.identifier) {
                Some(&at) => {
                    batch.duplicates += 1;
                    batch.rows[at] = normalized;
                }
                None => {
                    positions.insert(normalized.identifier.clone(), batch.rows.len());
                    batch.rows.push(normalized);
                }
            }
        }

        info!(
            input = rows.len(),
            normalized = batch.rows.len(),
            skipped = batch.skipped,
            duplicates = batch.duplicates,
            defaults = batch.defaults,
            "Normalized scan results"
        );
        batch
    }
}

/// Strip currency symbols, thousands separators, percent signs and
/// whitespace, then parse. Values Postgres `numeric` cannot hold are
/// rejected before anything expands their exponent.
pub fn parse_decimal(raw: &str) -> Option<BigDecimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ',' | '%') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() || cleaned.len() > MAX_NUMERIC_TEXT {
        return None;
    }
    let value = BigDecimal::from_str(&cleaned).ok()?;
    let scale = value.as_bigint_and_exponent().1;
    let fits = (-MAX_INTEGER_DIGITS..=MAX_FRACTION_DIGITS).contains(&scale)
        && integer_digits(&value) <= MAX_INTEGER_DIGITS;
    fits.then_some(value)
}

/// Digits left of the decimal point, counting trailing zeros implied by a
/// negative scale.
fn integer_digits(value: &BigDecimal) -> i64 {
    let scale = value.as_bigint_and_exponent().1;
    value.digits() as i64 - scale
}

fn truncate_count(value: &BigDecimal) -> Option<i64> {
    if integer_digits(value) > MAX_COUNT_DIGITS {
        return None;
    }
    value.with_scale(0).to_i64()
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn unparsable_and_missing_numbers_become_zero() {
        let row = RawResultRow::new()
            .with("ASIN", "b0abc")
            .with("Buybox Price", "abc")
            .with("Weight", "");
        let normalized = Normalizer::new(now()).normalize(&row);

        assert_eq!(normalized.identifier, "B0ABC");
        assert_eq!(normalized.buy_box_price, BigDecimal::from(0));
        assert_eq!(normalized.package_weight, BigDecimal::from(0));
        assert_eq!(normalized.sales_rank_drops, 0);
        assert_eq!(normalized.created_at, now());
        assert_eq!(normalized.last_updated, now());
        assert!(normalized.category.is_none());
    }

    #[test]
    fn first_present_candidate_wins_and_text_is_cleaned() {
        let row = RawResultRow::new()
            .with("ASIN", "B001")
            .with("Buybox Price", " ")
            .with("Buybox Price New", "$1,299.50")
            .with("Lowest Price New FBA", "9.99")
            .with("FBA Fee", 3.21)
            .with("Return Rate", "4.5%")
            .with("Sales Rank Drops 60d", "17.9")
            .with("Quantity", -2.7)
            .with("Category", "Toys & Games")
            .with("Seller", "Acme");
        let n = Normalizer::new(now()).normalize(&row);

        assert_eq!(n.buy_box_price, dec("1299.50"));
        assert_eq!(n.fba_fee, dec("3.21"));
        assert_eq!(n.return_rate, dec("4.5"));
        assert_eq!(n.sales_rank_drops, 17);
        assert_eq!(n.po_quantity, -2);
        assert_eq!(n.category.as_deref(), Some("Toys & Games"));
        assert_eq!(n.seller.as_deref(), Some("Acme"));
    }

    #[test]
    fn out_of_range_numbers_default_and_are_counted() {
        let row = RawResultRow::new()
            .with("ASIN", "B001")
            .with("Buybox Price", "1e999999999")
            .with("Weight", "1e-999999999")
            .with("Sales Rank Drops 30d", "1e999999999")
            .with("Quantity", "1e20")
            .with("FBA Fee", "2.5e2");
        let (n, defaults) = Normalizer::new(now()).normalize_counted(&row);

        assert_eq!(n.buy_box_price, BigDecimal::from(0));
        assert_eq!(n.package_weight, BigDecimal::from(0));
        assert_eq!(n.sales_rank_drops, 0);
        assert_eq!(n.po_quantity, 0);
        assert_eq!(n.fba_fee, dec("250"));

        let in_range = RawResultRow::new()
            .with("ASIN", "B001")
            .with("Buybox Price", "1")
            .with("Weight", "1")
            .with("Sales Rank Drops 30d", "1")
            .with("Quantity", "1")
            .with("FBA Fee", "2.5e2");
        let baseline = Normalizer::new(now()).normalize_counted(&in_range).1;
        assert_eq!(defaults, baseline + 4);
    }

    #[test]
    fn counts_at_the_edge_of_i64() {
        let row = RawResultRow::new()
            .with("ASIN", "B001")
            .with("Sales Rank Drops 30d", "9223372036854775807")
            .with("Quantity", "1e18");
        let n = Normalizer::new(now()).normalize(&row);
        assert_eq!(n.sales_rank_drops, i64::MAX);
        assert_eq!(n.po_quantity, 1_000_000_000_000_000_000);
        assert_eq!(parse_decimal(&"9".repeat(2000)), None);
    }

    #[test]
    fn timestamps_in_each_accepted_format() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2024-03-09 08:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-09T08:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-09T10:30:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("09/03/2024"), None);

        let row = RawResultRow::new()
            .with("ASIN", "B001")
            .with("Created At", "2024-03-09 08:30:00")
            .with("last_updated", "yesterday");
        let n = Normalizer::new(now()).normalize(&row);
        assert_eq!(n.created_at, expected);
        assert_eq!(n.last_updated, now());
    }

    #[test]
    fn batch_drops_blank_identifiers_and_keeps_last_duplicate() {
        let rows = vec![
            RawResultRow::new().with("ASIN", "A1").with("Weight", "1"),
            RawResultRow::new().with("ASIN", "  ").with("Weight", "2"),
            RawResultRow::new().with("ASIN", "B2").with("Weight", "3"),
            RawResultRow::new().with("asin", "a1").with("Weight", "4"),
        ];
        let batch = Normalizer::new(now()).normalize_all(&rows);

        assert_eq!(batch.skipped, 1);
        assert_eq!(batch.duplicates, 1);
        let ids: Vec<_> = batch.rows.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["A1", "B2"]);
        assert_eq!(batch.rows[0].package_weight, dec("4"));
        assert!(batch.defaults > 0);
    }
}
