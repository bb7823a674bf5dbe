use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const COMPLETED_STATUSES: &[&str] = &["done", "completed", "complete", "finished", "success", "succeeded"];
const FAILED_STATUSES: &[&str] = &["failed", "error", "errored", "canceled", "cancelled"];

/// Identifier assigned to a scan by the external service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// How a free-text status reported by the service should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Succeeded,
    Failed,
    Running,
}

impl StatusClass {
    /// Case-insensitive match against the completed and failed vocabularies.
    /// Anything else, including statuses never seen before, is still running.
    pub fn classify(status: &str) -> Self {
        let normalized = status.trim().to_lowercase();
        if COMPLETED_STATUSES.contains(&normalized.as_str()) {
            StatusClass::Succeeded
        } else if FAILED_STATUSES.contains(&normalized.as_str()) {
            StatusClass::Failed
        } else {
            StatusClass::Running
        }
    }
}

/// One entry of the service's job listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub status: Option<String>,
    pub name: Option<String>,
}

impl JobSummary {
    /// A listed job counts as active only when it reports a status that is
    /// neither completed nor failed.
    pub fn is_active(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| StatusClass::classify(s) == StatusClass::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Created,
    Discovering,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
}

impl ScanState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScanState::Succeeded | ScanState::Failed | ScanState::TimedOut | ScanState::Aborted
        )
    }

    fn can_transition_to(self, next: ScanState) -> bool {
        use ScanState::*;
        match (self, next) {
            (Created, Discovering) | (Created, Running) | (Discovering, Running) => true,
            (Running, Succeeded) | (Running, Failed) | (Running, TimedOut) | (Running, Aborted) => true,
            _ => false,
        }
    }
}

/// Lifecycle of one submitted scan. The id, once known, never changes.
#[derive(Debug, Clone, Serialize)]
pub struct ScanJob {
    id: Option<JobId>,
    state: ScanState,
    last_status: Option<String>,
    created_at: DateTime<Utc>,
}

impl ScanJob {
    pub fn created() -> Self {
        Self {
            id: None,
            state: ScanState::Created,
            last_status: None,
            created_at: Utc::now(),
        }
    }

    /// A job that is already known to be running, e.g. one resumed by id.
    pub fn running(id: JobId) -> Self {
        Self {
            id: Some(id),
            state: ScanState::Running,
            last_status: None,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Option<&JobId> {
        self.id.as_ref()
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn last_status(&self) -> Option<&str> {
        self.last_status.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn require_id(&self) -> Result<&JobId> {
        self.id
            .as_ref()
            .ok_or_else(|| Error::InvalidState(format!("job in state {:?} has no id", self.state)))
    }

    pub(crate) fn begin_discovery(&mut self) -> Result<()> {
        self.enter(ScanState::Discovering)
    }

    /// Record the resolved id and move to `Running`.
    pub(crate) fn identify(&mut self, id: JobId) -> Result<()> {
        if let Some(existing) = &self.id {
            if *existing != id {
                return Err(Error::InvalidState(format!(
                    "job id already resolved to {existing}, refusing {id}"
                )));
            }
        }
        self.enter(ScanState::Running)?;
        self.id = Some(id);
        Ok(())
    }

    pub(crate) fn observe_status(&mut self, status: Option<String>) {
        if status.is_some() {
            self.last_status = status;
        }
    }

    pub(crate) fn enter(&mut self, next: ScanState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "cannot move from {:?} to {next:?}",
                self.state
            )));
        }
        self.state = next;
        Ok(())
    }
}
