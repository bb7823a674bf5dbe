mod identifier;
mod job;
mod normalized;
mod result;

pub use identifier::IdentifierRecord;
pub use job::{JobId, JobSummary, ScanJob, ScanState, StatusClass};
pub use normalized::NormalizedRow;
pub use result::{RawPayload, RawResultRow};
