pub mod artifacts;
pub mod postgres;
pub mod selector;
pub mod upsert;

pub use artifacts::ArtifactWriter;
pub use postgres::{TableRef, connect};
pub use selector::{IdentifierSource, PgIdentifierSelector};
pub use upsert::{PgRecordStore, RecordStore, RowFailure, SellerPolicy, UpsertWriter, WriteReport};
