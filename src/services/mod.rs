pub mod api;
pub mod orchestrator;

pub use api::{HttpScanApi, ScanApi, SubmitResponse};
pub use orchestrator::{CompletedScan, Download, OrchestratorConfig, PollConfig, ScanOrchestrator};
