pub mod response;

pub use response::{job_id_from_body, job_id_from_headers, job_id_from_location, job_items, job_status};
