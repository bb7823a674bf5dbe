use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{JobId, JobSummary, RawPayload, RawResultRow, ScanJob, ScanState, StatusClass};
use crate::services::api::{ScanApi, SubmitResponse};
use crate::transform::BatchPayload;
use crate::transform::results::parse_rows;
use crate::utils::retry::{RetryPolicy, retry_with_backoff};

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub poll: PollConfig,
    pub retry: RetryPolicy,
    pub job_config: Value,
}

/// Raw results of a succeeded scan, both as received and parsed into rows.
#[derive(Debug, Clone)]
pub struct Download {
    pub raw: RawPayload,
    pub rows: Vec<RawResultRow>,
}

#[derive(Debug, Clone)]
pub struct CompletedScan {
    pub job: ScanJob,
    pub download: Download,
}

enum Wake<T> {
    Ready(T),
    Deadline,
    Cancelled,
}

/// Wait for `fut`, the deadline or cancellation, whichever comes first.
async fn race<T>(fut: impl Future<Output = T>, deadline: Instant, cancel: &CancellationToken) -> Wake<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Wake::Cancelled,
        _ = sleep_until(deadline) => Wake::Deadline,
        value = fut => Wake::Ready(value),
    }
}

/// Drives one scan through submit, id resolution, polling and download.
pub struct ScanOrchestrator<A> {
    api: A,
    config: OrchestratorConfig,
}

impl<A: ScanApi> ScanOrchestrator<A> {
    pub fn new(api: A, config: OrchestratorConfig) -> Self {
        Self { api, config }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    async fn list_jobs(&self, cancel: &CancellationToken) -> Result<Vec<JobSummary>> {
        retry_with_backoff(&self.config.retry, cancel, "list_jobs", || self.api.list_jobs()).await
    }

    /// Refuse to start while the service reports any unfinished job. The
    /// listing is returned as the baseline for id discovery.
    pub async fn check_active_jobs(&self, cancel: &CancellationToken) -> Result<Vec<JobSummary>> {
        let jobs = self.list_jobs(cancel).await?;

        if let Some(active) = jobs.iter().find(|job| job.is_active()) {
            warn!(
                job_id = %active.id,
                status = active.status.as_deref().unwrap_or(""),
                "Another scan is still running"
            );
            return Err(Error::ScanInProgress(format!(
                "job {} has status {}",
                active.id,
                active.status.as_deref().unwrap_or("")
            )));
        }

        debug!(baseline = jobs.len(), "No active scans");
        Ok(jobs)
    }

    /// Submissions are retried on rate limiting only; a connectivity failure
    /// may already have created a job.
    pub async fn submit(&self, payload: &BatchPayload, cancel: &CancellationToken) -> Result<SubmitResponse> {
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }
        let policy = self.config.retry.rate_limit_only();
        retry_with_backoff(&policy, cancel, "submit", || {
            self.api.submit(payload, &self.config.job_config)
        })
        .await
    }

    /// The single job present in `post` but not in `baseline`.
    pub fn resolve_id(baseline: &[JobSummary], post: &[JobSummary]) -> Result<JobId> {
        let known: HashSet<&JobId> = baseline.iter().map(|job| &job.id).collect();
        let mut seen = HashSet::new();
        let mut candidates: Vec<JobId> = post
            .iter()
            .map(|job| &job.id)
            .filter(|id| !known.contains(id) && seen.insert(*id))
            .cloned()
            .collect();

        if candidates.len() == 1 {
            if let Some(id) = candidates.pop() {
                return Ok(id);
            }
        }
        Err(Error::AmbiguousJobId { candidates })
    }

    /// Poll until the job reaches a terminal state. Only `Succeeded` returns
    /// `Ok`; every other outcome leaves the job in its terminal state and
    /// returns the matching error.
    pub async fn poll(&self, job: &mut ScanJob, cancel: &CancellationToken) -> Result<()> {
        let job_id = job.require_id()?.clone();
        let PollConfig { interval, timeout } = self.config.poll;
        let deadline = Instant::now() + timeout;

        info!(
            job_id = %job_id,
            interval_secs = interval.as_secs_f64(),
            timeout_secs = timeout.as_secs_f64(),
            "Polling scan status"
        );

        loop {
            let status = retry_with_backoff(&self.config.retry, cancel, "job_status", || {
                self.api.job_status(&job_id)
            });

            let status = match race(status, deadline, cancel).await {
                Wake::Ready(Ok(status)) => status,
                Wake::Ready(Err(Error::Cancelled)) | Wake::Cancelled => return Err(Self::abort(job, &job_id)),
                Wake::Ready(Err(e)) => return Err(e),
                Wake::Deadline => return Err(Self::time_out(job, &job_id)),
            };

            job.observe_status(status.clone());
            match status.as_deref().map(StatusClass::classify) {
                Some(StatusClass::Succeeded) => {
                    job.enter(ScanState::Succeeded)?;
                    info!(job_id = %job_id, status = status.as_deref().unwrap_or(""), "Scan completed");
                    return Ok(());
                }
                Some(StatusClass::Failed) => {
                    job.enter(ScanState::Failed)?;
                    let status = status.unwrap_or_default();
                    warn!(job_id = %job_id, status = %status, "Scan failed");
                    return Err(Error::ScanFailed { job_id, status });
                }
                _ => debug!(job_id = %job_id, status = ?status, "Scan still running"),
            }

            match race(sleep(interval), deadline, cancel).await {
                Wake::Ready(()) => {}
                Wake::Cancelled => return Err(Self::abort(job, &job_id)),
                Wake::Deadline => return Err(Self::time_out(job, &job_id)),
            }
        }
    }

    fn abort(job: &mut ScanJob, job_id: &JobId) -> Error {
        if let Err(e) = job.enter(ScanState::Aborted) {
            return e;
        }
        warn!(job_id = %job_id, "Polling cancelled");
        Error::ScanAborted { job_id: job_id.clone() }
    }

    fn time_out(job: &mut ScanJob, job_id: &JobId) -> Error {
        if let Err(e) = job.enter(ScanState::TimedOut) {
            return e;
        }
        warn!(job_id = %job_id, last_status = ?job.last_status(), "Scan did not finish in time");
        Error::ScanTimedOut {
            job_id: job_id.clone(),
            last_status: job.last_status().map(str::to_string),
        }
    }

    /// Fetch and parse results of a succeeded job.
    pub async fn download(&self, job: &ScanJob, cancel: &CancellationToken) -> Result<Download> {
        if job.state() != ScanState::Succeeded {
            return Err(Error::InvalidState(format!(
                "cannot download results of a job in state {:?}",
                job.state()
            )));
        }
        let job_id = job.require_id()?;

        let raw = retry_with_backoff(&self.config.retry, cancel, "download", || self.api.download(job_id))
            .await
            .map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                other => Error::DownloadFailed {
                    job_id: job_id.clone(),
                    reason: other.to_string(),
                },
            })?;

        let rows = parse_rows(&raw).map_err(|e| Error::DownloadFailed {
            job_id: job_id.clone(),
            reason: e.to_string(),
        })?;

        info!(job_id = %job_id, rows = rows.len(), "Parsed scan results");
        Ok(Download { raw, rows })
    }

    /// Full lifecycle: refuse if busy, submit, resolve the id, poll, download.
    pub async fn run(&self, payload: &BatchPayload, cancel: &CancellationToken) -> Result<CompletedScan> {
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }

        let baseline = self.check_active_jobs(cancel).await?;
        let mut job = ScanJob::created();

        match self.submit(payload, cancel).await? {
            SubmitResponse::Identified(id) => job.identify(id)?,
            SubmitResponse::Acknowledged => {
                job.begin_discovery()?;
                let post = self.list_jobs(cancel).await?;
                let id = Self::resolve_id(&baseline, &post)?;
                info!(job_id = %id, "Job id discovered from listing");
                job.identify(id)?;
            }
        }

        self.poll(&mut job, cancel).await?;
        let download = self.download(&job, cancel).await?;
        Ok(CompletedScan { job, download })
    }
}
