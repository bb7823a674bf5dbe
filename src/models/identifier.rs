use serde::{Deserialize, Serialize};

/// One selected product identifier with its optional enrichment columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdentifierRecord {
    pub identifier: String,
    pub status: Option<String>,
    pub seller: Option<String>,
}

impl IdentifierRecord {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            status: None,
            seller: None,
        }
    }

    pub fn with_seller(mut self, seller: impl Into<String>) -> Self {
        self.seller = Some(seller.into());
        self
    }
}
