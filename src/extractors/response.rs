//! Pulls job ids, statuses and listings out of the scanning service's
//! loosely-shaped responses.

use http::HeaderMap;
use http::header::LOCATION;
use serde_json::Value;

use crate::models::{JobId, JobSummary};

const ID_KEYS: &[&str] = &["id", "scan_id", "scanId", "job_id", "jobId"];
const CONTAINER_KEYS: &[&str] = &["data", "scan", "job", "upload", "file", "result"];
const HEADER_ID_PATTERNS: &[(&str, &str)] = &[("scan", "id"), ("job", "id"), ("upload", "id")];
const MAX_DEPTH: usize = 6;

/// First header whose name looks like `*scan*id*`, `*job*id*` or `*upload*id*`.
pub fn job_id_from_headers(headers: &HeaderMap) -> Option<JobId> {
    headers.iter().find_map(|(name, value)| {
        let name = name.as_str().to_lowercase();
        let matches = HEADER_ID_PATTERNS.iter().any(|(prefix, suffix)| {
            name.find(prefix)
                .is_some_and(|at| name[at + prefix.len()..].contains(suffix))
        });
        if !matches {
            return None;
        }
        let value = value.to_str().ok()?.trim();
        (!value.is_empty()).then(|| JobId::from(value))
    })
}

/// `Location: .../scans/{id}`.
pub fn job_id_from_location(headers: &HeaderMap) -> Option<JobId> {
    let location = headers.get(LOCATION)?.to_str().ok()?;
    let path = location.split(['?', '#']).next()?.trim_end_matches('/');
    let (rest, id) = path.rsplit_once('/')?;
    if rest.ends_with("/scans") || rest == "scans" {
        (!id.is_empty()).then(|| JobId::from(id))
    } else {
        None
    }
}

/// Depth-limited search of a response body for a job id.
pub fn job_id_from_body(body: &Value) -> Option<JobId> {
    find_id(body, 0)
}

fn find_id(value: &Value, depth: usize) -> Option<JobId> {
    if depth > MAX_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            for key in ID_KEYS {
                if let Some(id) = map.get(*key).and_then(|v| id_value(key, v)) {
                    return Some(id);
                }
            }
            for key in CONTAINER_KEYS {
                if let Some(id) = map.get(*key).and_then(|v| find_id(v, depth + 1)) {
                    return Some(id);
                }
            }
            map.iter()
                .filter(|(key, _)| key.as_str() != "mapping" && !CONTAINER_KEYS.contains(&key.as_str()))
                .find_map(|(_, v)| find_id(v, depth + 1))
        }
        Value::Array(items) => items.iter().find_map(|v| find_id(v, depth + 1)),
        _ => None,
    }
}

fn id_value(key: &str, value: &Value) -> Option<JobId> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(JobId::from(s.trim())),
        // A bare numeric `id` of 0 or 1 is the echoed column mapping.
        Value::Number(n) if key == "id" && matches!(n.as_u64(), Some(0 | 1)) => None,
        Value::Number(n) => Some(JobId::from(n.to_string())),
        _ => None,
    }
}

pub fn job_status(body: &Value) -> Option<String> {
    const PATHS: &[&[&str]] = &[
        &["status"],
        &["data", "status"],
        &["data", "attributes", "status"],
        &["attributes", "status"],
        &["state"],
        &["scan_status"],
        &["scanStatus"],
    ];

    PATHS.iter().find_map(|path| {
        let value = path.iter().try_fold(body, |v, key| v.get(*key))?;
        scalar_text(value)
    })
}

pub fn job_name(entry: &Value) -> Option<String> {
    ["name", "title"]
        .iter()
        .find_map(|key| entry.get(*key).and_then(scalar_text))
        .or_else(|| entry.get("attributes").and_then(|a| a.get("name")).and_then(scalar_text))
}

/// Listing entries from a top-level list, `{data: [...]}` or `{scans: [...]}`.
/// Entries without an id are skipped.
pub fn job_items(body: &Value) -> Vec<JobSummary> {
    let items = match body {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => ["data", "scans"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    };

    items
        .iter()
        .filter_map(|entry| {
            let id = ID_KEYS.iter().find_map(|key| entry.get(*key).and_then(|v| match v {
                Value::String(s) if !s.trim().is_empty() => Some(JobId::from(s.trim())),
                Value::Number(n) => Some(JobId::from(n.to_string())),
                _ => None,
            }))?;
            Some(JobSummary {
                id,
                status: job_status(entry),
                name: job_name(entry),
            })
        })
        .collect()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
