pub mod clients;
pub mod config;
pub mod error;
pub mod extractors;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod transform;
pub mod utils;

pub use config::Settings;
pub use error::{Error, Result};
pub use pipeline::{RunSummary, ScanPipeline};
pub use services::{ScanApi, ScanOrchestrator};
pub use storage::{IdentifierSource, RecordStore, UpsertWriter};
