use std::time::Duration;

use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use rquest::multipart::{Form, Part};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::clients::HttpClient;
use crate::config::ServiceSettings;
use crate::error::{Error, Result};
use crate::extractors::{job_id_from_body, job_id_from_headers, job_id_from_location, job_items, job_status};
use crate::models::{JobId, JobSummary, RawPayload};
use crate::transform::BatchPayload;

/// What the service told us after accepting a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResponse {
    Identified(JobId),
    /// Accepted, but no id could be read from the response.
    Acknowledged,
}

/// The four calls the orchestrator makes against the scanning service.
#[async_trait]
pub trait ScanApi: Send + Sync {
    async fn submit(&self, payload: &BatchPayload, job_config: &Value) -> Result<SubmitResponse>;
    async fn list_jobs(&self) -> Result<Vec<JobSummary>>;
    async fn job_status(&self, job_id: &JobId) -> Result<Option<String>>;
    async fn download(&self, job_id: &JobId) -> Result<RawPayload>;
}

pub struct HttpScanApi {
    client: HttpClient,
    settings: ServiceSettings,
}

impl HttpScanApi {
    pub fn new(settings: ServiceSettings) -> Result<Self> {
        let client = HttpClient::new(&settings)?;
        Ok(Self { client, settings })
    }

    fn job_path(template: &str, job_id: &JobId) -> String {
        template.replace("{job_id}", job_id.as_str())
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let response = self.client.send(self.client.get(path)).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| {
            error!(
                error = %e,
                body = %String::from_utf8_lossy(&body),
                path,
                "Failed to parse JSON response"
            );
            Error::InvalidResponse(format!("{path}: {e}"))
        })
    }
}

#[async_trait]
impl ScanApi for HttpScanApi {
    async fn submit(&self, payload: &BatchPayload, job_config: &Value) -> Result<SubmitResponse> {
        let csv = payload.to_csv()?;
        let csv_len = csv.len();
        let part = Part::bytes(csv)
            .file_name("scan_input.csv")
            .mime_str("text/csv")?;
        let form = Form::new()
            .part(self.settings.upload_file_field.clone(), part)
            .text("attributes", job_config.to_string());

        info!(
            identifiers = payload.len(),
            bytes = csv_len,
            path = %self.settings.scan_path,
            "Submitting scan"
        );

        let request = self.client.post(&self.settings.scan_path).multipart(form);
        let response = self.client.send(request).await?;
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        if let Some(id) = job_id_from_headers(&headers) {
            debug!(job_id = %id, "Job id read from response header");
            return Ok(SubmitResponse::Identified(id));
        }
        if let Ok(json) = serde_json::from_slice::<Value>(&body) {
            if let Some(id) = job_id_from_body(&json) {
                debug!(job_id = %id, "Job id read from response body");
                return Ok(SubmitResponse::Identified(id));
            }
        }
        if let Some(id) = job_id_from_location(&headers) {
            debug!(job_id = %id, "Job id read from Location header");
            return Ok(SubmitResponse::Identified(id));
        }

        debug!(
            body = %String::from_utf8_lossy(&body),
            "Submission accepted without a job id"
        );
        Ok(SubmitResponse::Acknowledged)
    }

    async fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        let path = format!("{}?page=1", self.settings.list_path);
        let body = self.get_json(&path).await?;
        let jobs = job_items(&body);
        debug!(count = jobs.len(), "Listed jobs");
        Ok(jobs)
    }

    async fn job_status(&self, job_id: &JobId) -> Result<Option<String>> {
        let path = Self::job_path(&self.settings.status_path_template, job_id);
        let body = self.get_json(&path).await?;
        Ok(job_status(&body))
    }

    async fn download(&self, job_id: &JobId) -> Result<RawPayload> {
        let path = Self::job_path(&self.settings.results_path_template, job_id);
        let request = if path.contains("/download") {
            self.client.post(&path)
        } else {
            self.client.get(&path)
        };
        let request = request.timeout(Duration::from_secs(self.settings.download_timeout_secs));

        let response = self.client.send(request).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;

        info!(
            job_id = %job_id,
            bytes = body.len(),
            content_type = content_type.as_deref().unwrap_or("unknown"),
            "Downloaded scan results"
        );

        Ok(RawPayload::new(content_type, body.to_vec()))
    }
}
