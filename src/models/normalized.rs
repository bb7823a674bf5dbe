use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;

/// Canonical scan result, keyed by `identifier`.
///
/// Every numeric field is always populated; absent or unparsable upstream
/// values are represented as zero, never as null.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub identifier: String,
    pub buy_box_price: BigDecimal,
    pub package_weight: BigDecimal,
    pub fba_fee: BigDecimal,
    pub referral_fee: BigDecimal,
    pub shipping_cost: BigDecimal,
    pub sales_rank_drops: i64,
    pub category: Option<String>,
    pub monthly_sold: BigDecimal,
    pub inbound_placement_fee: BigDecimal,
    pub return_rate: BigDecimal,
    pub error_text: Option<String>,
    pub po_quantity: i64,
    pub po_subtotal: BigDecimal,
    pub avg_price_30d: BigDecimal,
    pub avg_price_90d: BigDecimal,
    pub avg_rank_30d: BigDecimal,
    pub avg_rank_90d: BigDecimal,
    pub created_at: NaiveDateTime,
    pub last_updated: NaiveDateTime,
    pub seller: Option<String>,
}

impl NormalizedRow {
    /// A row with every numeric field at zero and both timestamps at `now`.
    pub fn zeroed(identifier: impl Into<String>, now: NaiveDateTime) -> Self {
        let zero = BigDecimal::from(0);
        Self {
            identifier: identifier.into(),
            buy_box_price: zero.clone(),
            package_weight: zero.clone(),
            fba_fee: zero.clone(),
            referral_fee: zero.clone(),
            shipping_cost: zero.clone(),
            sales_rank_drops: 0,
            category: None,
            monthly_sold: zero.clone(),
            inbound_placement_fee: zero.clone(),
            return_rate: zero.clone(),
            error_text: None,
            po_quantity: 0,
            po_subtotal: zero.clone(),
            avg_price_30d: zero.clone(),
            avg_price_90d: zero.clone(),
            avg_rank_30d: zero.clone(),
            avg_rank_90d: zero,
            created_at: now,
            last_updated: now,
            seller: None,
        }
    }

    pub fn has_seller(&self) -> bool {
        self.seller.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}
