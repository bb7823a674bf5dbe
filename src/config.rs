use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{Error, Result};
use crate::services::orchestrator::{OrchestratorConfig, PollConfig};
use crate::storage::postgres::TableRef;
use crate::storage::upsert::{COLUMNS, SellerPolicy};
use crate::utils::retry::RetryPolicy;

/// Postgres accepts at most this many bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;
const MAX_POLL_SECS: f64 = 7.0 * 24.0 * 3600.0;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub service: ServiceSettings,
    #[serde(default)]
    pub scan: ScanSettings,
    pub database: DatabaseSettings,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceSettings {
    pub base_url: String,
    pub api_key: String,
    pub api_key_header: String,
    pub api_key_prefix: String,
    pub scan_path: String,
    pub upload_file_field: String,
    pub list_path: String,
    pub status_path_template: String,
    pub results_path_template: String,
    pub request_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub max_retries: u32,
    pub rate_limit_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            api_key_header: "Authorization".to_string(),
            api_key_prefix: "Bearer ".to_string(),
            scan_path: "/scans".to_string(),
            upload_file_field: "file".to_string(),
            list_path: "/scans".to_string(),
            status_path_template: "/scans/{job_id}".to_string(),
            results_path_template: "/scans/{job_id}/download?type=csv".to_string(),
            request_timeout_secs: 120,
            download_timeout_secs: 300,
            max_retries: 3,
            rate_limit_retries: 5,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 60_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScanSettings {
    pub identifier_limit: usize,
    pub nominal_price: f64,
    pub poll_interval_secs: f64,
    pub poll_timeout_secs: f64,
    pub marketplace: String,
    pub name: String,
    pub historical: bool,
    /// Full JSON job-configuration document; replaces the generated one.
    pub job_config: Option<String>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            identifier_limit: 1000,
            nominal_price: 0.001,
            poll_interval_secs: 3.0,
            poll_timeout_secs: 600.0,
            marketplace: "US".to_string(),
            name: "Automated Scan".to_string(),
            historical: false,
            job_config: None,
        }
    }
}

impl ScanSettings {
    /// The `attributes` document sent alongside the payload. The identifier
    /// sits in column 0 and the nominal price in column 1.
    pub fn job_config(&self) -> Result<Value> {
        let mut document = match self.job_config.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => serde_json::from_str::<Value>(raw)
                .map_err(|e| Error::Config(format!("scan.job_config is not valid JSON: {e}")))?,
            _ => json!({
                "mapping": { "id": 0, "cost": 1 },
                "options": { "marketplace_id": self.marketplace, "name": self.name },
            }),
        };

        if self.historical {
            let root = document
                .as_object_mut()
                .ok_or_else(|| Error::Config("scan.job_config must be a JSON object".to_string()))?;
            let options = root.entry("options").or_insert_with(|| json!({}));
            match options.as_object_mut() {
                Some(options) => {
                    options.insert("historical".to_string(), Value::Bool(true));
                }
                None => {
                    return Err(Error::Config(
                        "scan.job_config options must be a JSON object".to_string(),
                    ));
                }
            }
        }

        Ok(document)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceTable {
    pub schema: String,
    pub table: String,
    #[serde(default = "default_identifier_column")]
    pub identifier_column: String,
}

impl SourceTable {
    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.schema, &self.table)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentTable {
    pub schema: String,
    pub table: String,
    #[serde(default = "default_identifier_column")]
    pub identifier_column: String,
    #[serde(default = "default_status_column")]
    pub status_column: String,
    #[serde(default = "default_seller_column")]
    pub seller_column: String,
}

impl EnrichmentTable {
    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.schema, &self.table)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TargetTable {
    pub schema: String,
    pub table: String,
}

impl Default for TargetTable {
    fn default() -> Self {
        Self {
            schema: "Core Data".to_string(),
            table: "test_united_state".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    pub source: SourceTable,
    #[serde(default)]
    pub enrichment: Option<EnrichmentTable>,
    #[serde(default)]
    pub target: TargetTable,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub seller_policy: SellerPolicy,
}

impl DatabaseSettings {
    pub fn target_ref(&self) -> TableRef {
        TableRef::new(&self.target.schema, &self.target.table)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputSettings {
    /// Directory for raw and normalized artifacts; empty disables them.
    pub dir: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: "data".to_string(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_identifier_column() -> String {
    "asin".to_string()
}

fn default_status_column() -> String {
    "status".to_string()
}

fn default_seller_column() -> String {
    "seller".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_statement_timeout() -> u64 {
    60_000
}

fn default_max_connections() -> u32 {
    4
}

fn default_batch_size() -> usize {
    1000
}

impl Settings {
    /// Load `config/default.yaml` (if present) overlaid with `PRICE_SCAN_*`
    /// environment variables, then validate.
    pub fn new() -> Result<Self> {
        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("PRICE_SCAN")
                    .prefix_separator("_")
                    .separator("__"),
            );

        Self::from_config(builder.build()?)
    }

    /// Parse settings from an inline YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;
        Self::from_config(config)
    }

    fn from_config(config: Config) -> Result<Self> {
        let settings: Settings = config.try_deserialize()?;

        debug!(
            base_url = %settings.service.base_url,
            limit = settings.scan.identifier_limit,
            target = %settings.database.target_ref(),
            "Parsed settings"
        );

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let missing = |what: &str| Error::Config(format!("missing {what}"));

        if self.service.base_url.trim().is_empty() {
            return Err(missing("service.base_url"));
        }
        if self.service.api_key.trim().is_empty() {
            return Err(missing("service.api_key"));
        }
        if self.database.url.trim().is_empty() {
            return Err(missing("database.url"));
        }
        if self.scan.identifier_limit == 0 {
            return Err(Error::Config("scan.identifier_limit must be positive".to_string()));
        }
        let poll_in_range = |secs: f64| secs > 0.0 && secs <= MAX_POLL_SECS;
        if !poll_in_range(self.scan.poll_interval_secs) || !poll_in_range(self.scan.poll_timeout_secs) {
            return Err(Error::Config(format!(
                "scan.poll_interval_secs and scan.poll_timeout_secs must be within (0, {MAX_POLL_SECS}]"
            )));
        }
        let max_batch = MAX_BIND_PARAMS / COLUMNS.len();
        if self.database.batch_size == 0 || self.database.batch_size > max_batch {
            return Err(Error::Config(format!(
                "database.batch_size must be between 1 and {max_batch}"
            )));
        }
        self.scan.job_config()?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.service.max_retries,
            rate_limit_retries: self.service.rate_limit_retries,
            base_delay: Duration::from_millis(self.service.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.service.retry_max_delay_ms),
        }
    }

    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig> {
        let seconds = |name: &str, secs: f64| {
            Duration::try_from_secs_f64(secs).map_err(|e| Error::Config(format!("scan.{name}: {e}")))
        };
        Ok(OrchestratorConfig {
            poll: PollConfig {
                interval: seconds("poll_interval_secs", self.scan.poll_interval_secs)?,
                timeout: seconds("poll_timeout_secs", self.scan.poll_timeout_secs)?,
            },
            retry: self.retry_policy(),
            job_config: self.scan.job_config()?,
        })
    }
}
