pub mod normalize;
pub mod payload;
pub mod results;

pub use normalize::{NormalizedBatch, Normalizer};
pub use payload::{BatchInputBuilder, BatchPayload};
pub use results::parse_rows;
