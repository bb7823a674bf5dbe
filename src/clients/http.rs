use std::time::Duration;

use chrono::{DateTime, Utc};
use http::StatusCode;
use http::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use rquest::{Client, RequestBuilder, Response};
use tracing::{debug, warn};

use crate::config::ServiceSettings;
use crate::error::{Error, Result};

const SCAN_IN_PROGRESS_MARKER: &str = "already have a scan in progress";
const BODY_SNIPPET_LEN: usize = 800;

/// Authenticated client for the scanning service. One instance, and so one
/// connection pool, is shared by every call of a run.
pub struct HttpClient {
    client: Client,
    base_url: String,
    headers: HeaderMap,
}

impl HttpClient {
    pub fn new(settings: &ServiceSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();

        let header_name = HeaderName::from_bytes(settings.api_key_header.as_bytes())
            .map_err(|e| Error::Config(format!("invalid api_key_header: {e}")))?;
        let credential = format!("{}{}", settings.api_key_prefix, settings.api_key);
        let mut header_value = HeaderValue::from_str(&credential)
            .map_err(|e| Error::Config(format!("invalid api key value: {e}")))?;
        header_value.set_sensitive(true);

        headers.insert(header_name, header_value);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        debug!(
            base_url = %settings.base_url,
            header = %settings.api_key_header,
            timeout_secs = settings.request_timeout_secs,
            "Creating scan service client"
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            headers,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.with_headers(self.client.get(self.url(path)))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.with_headers(self.client.post(self.url(path)))
    }

    fn with_headers(&self, mut request: RequestBuilder) -> RequestBuilder {
        for (key, value) in self.headers.iter() {
            request = request.header(key, value);
        }
        request
    }

    /// Send a request and map non-success statuses onto the error taxonomy:
    /// 429 becomes `RateLimited` (or `ScanInProgress` when the body says so),
    /// 5xx becomes `Connectivity`, anything else non-2xx becomes `Status`.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();

        debug!(
            status = status.as_u16(),
            url = %response.url(),
            "Response received"
        );

        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().to_string();
        let retry_after = retry_after(response.headers(), Utc::now());
        let body = response.bytes().await.unwrap_or_default();
        let snippet = body_snippet(&body);

        Err(classify_failure(status, retry_after, snippet, url))
    }
}

/// Map a non-success status onto the error taxonomy.
pub fn classify_failure(
    status: StatusCode,
    retry_after: Option<Duration>,
    snippet: String,
    url: String,
) -> Error {
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            if snippet.to_lowercase().contains(SCAN_IN_PROGRESS_MARKER) {
                warn!(url = %url, "Service reports a scan already in progress");
                return Error::ScanInProgress(snippet);
            }
            debug!(url = %url, retry_after = ?retry_after, "Rate limit exceeded");
            Error::RateLimited { retry_after }
        }
        s if s.is_server_error() => {
            Error::Connectivity(format!("HTTP {} from {url}: {snippet}", s.as_u16()))
        }
        s => Error::Status {
            status: s.as_u16(),
            url,
            body: snippet,
        },
    }
}

/// `Retry-After` as either delta-seconds or an HTTP date.
pub fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let secs = (at - now).num_seconds().max(1);
    Some(Duration::from_secs(secs as u64))
}

pub fn body_snippet(body: &[u8]) -> String {
    String::from_utf8_lossy(body).trim().chars().take(BODY_SNIPPET_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn settings() -> ServiceSettings {
        ServiceSettings {
            base_url: "https://scanner.example.test/api/v3/".into(),
            api_key: "k".into(),
            ..ServiceSettings::default()
        }
    }

    #[test]
    fn joins_base_url_and_paths() {
        let client = HttpClient::new(&settings()).unwrap();
        assert_eq!(client.url("/scans"), "https://scanner.example.test/api/v3/scans");
        assert_eq!(client.url("scans/7"), "https://scanner.example.test/api/v3/scans/7");
    }

    #[test]
    fn rejects_unusable_credential_header() {
        let bad = ServiceSettings {
            api_key_header: "bad header".into(),
            ..settings()
        };
        assert!(matches!(HttpClient::new(&bad), Err(Error::Config(_))));
    }

    fn classify(status: u16, retry_after: Option<Duration>, body: &str) -> Error {
        let status = StatusCode::from_u16(status).unwrap();
        let url = "https://scanner.example.test/scans".to_string();
        classify_failure(status, retry_after, body.to_string(), url)
    }

    #[test]
    fn busy_account_is_not_a_rate_limit() {
        let body = r#"{"message":"You Already Have A Scan In Progress."}"#;
        let err = classify(429, Some(Duration::from_secs(5)), body);
        assert!(matches!(err, Error::ScanInProgress(ref body) if body.contains("Scan In Progress")));
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn plain_429_carries_the_retry_hint() {
        let err = classify(429, Some(Duration::from_secs(12)), "slow down");
        assert!(matches!(err, Error::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(12)));

        let err = classify(429, None, "");
        assert!(matches!(err, Error::RateLimited { retry_after: None }));
    }

    #[test]
    fn server_errors_are_connectivity_and_others_are_status() {
        let err = classify(503, None, "maintenance");
        assert!(matches!(err, Error::Connectivity(ref msg) if msg.contains("503")));
        assert!(err.to_string().contains("maintenance"));
        assert!(err.is_connectivity());

        let err = classify(404, None, "no such scan");
        assert!(matches!(
            err,
            Error::Status { status: 404, ref body, .. } if body == "no such scan"
        ));
        assert!(!err.is_connectivity());
    }

    #[test]
    fn parses_retry_after_in_both_forms() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(retry_after(&headers, now), Some(Duration::from_secs(12)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:30 GMT"));
        assert_eq!(retry_after(&headers, now), Some(Duration::from_secs(30)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(retry_after(&headers, now), None);
        assert_eq!(retry_after(&HeaderMap::new(), now), None);
    }
}
