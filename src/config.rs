use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::EtlError;
use crate::transform::TransformPolicy;

/// Configuration file structure for snowdrift.
///
/// Everything a run needs is carried here and handed to each stage
/// explicitly. Secrets may be left out of the file and supplied through the
/// environment (see `cli.rs`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub change_api: ChangeApiConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub mapping: MappingConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuthConfig {
    /// Azure AD tenant that issues the token
    pub tenant_id: String,

    pub client_id: String,

    pub client_secret: Option<String>,

    /// OAuth2 scope requested for the change API
    pub scope: String,

    /// Token authority host
    #[serde(default = "default_authority")]
    pub authority: String,

    /// Proceed with an empty token when the exchange fails
    #[serde(default)]
    pub continue_on_failure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChangeApiConfig {
    /// Change-management table endpoint
    pub url: String,

    /// Records requested per page (`sysparm_limit`)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Length of the extraction window ending now
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,

    /// IANA name of the timezone the window and run timestamp are expressed in
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Fields requested through `sysparm_fields`
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,

    /// Skip TLS certificate verification for the change API
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IndexConfig {
    /// Search cluster base URL
    #[serde(default = "default_index_url")]
    pub url: String,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Index receiving change documents and run metrics
    pub index_name: String,

    /// Index receiving operational notifications
    #[serde(default = "default_notification_index")]
    pub notification_index: String,

    /// Maximum documents per bulk request
    #[serde(default = "default_bulk_chunk_size")]
    pub bulk_chunk_size: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MappingConfig {
    /// Headerless CSV with columns Service, Tribe, Platform, Company
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelineConfig {
    #[serde(default)]
    pub transform_policy: TransformPolicy,

    /// Write a notification document when the token or fetch stage fails
    #[serde(default = "default_true")]
    pub notify_on_failure: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: None,
            scope: String::new(),
            authority: default_authority(),
            continue_on_failure: false,
        }
    }
}

impl Default for ChangeApiConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            page_size: default_page_size(),
            lookback_days: default_lookback_days(),
            timezone: default_timezone(),
            fields: default_fields(),
            accept_invalid_certs: false,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: default_index_url(),
            username: None,
            password: None,
            index_name: String::new(),
            notification_index: default_notification_index(),
            bulk_chunk_size: default_bulk_chunk_size(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transform_policy: TransformPolicy::default(),
            notify_on_failure: true,
        }
    }
}

fn default_authority() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_page_size() -> usize {
    100
}

fn default_lookback_days() -> i64 {
    1
}

/// Longest extraction window a run accepts.
pub const MAX_LOOKBACK_DAYS: i64 = 3650;

fn default_timezone() -> String {
    "CET".to_string()
}

fn default_index_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_notification_index() -> String {
    "maaps_prod_snow_changemanagement_mom".to_string()
}

fn default_bulk_chunk_size() -> usize {
    500
}

fn default_true() -> bool {
    true
}

fn default_fields() -> Vec<String> {
    [
        "number",
        "short_description",
        "type",
        "u_environment",
        "state",
        "start_date",
        "end_date",
        "close_code",
        "business_service",
        "u_outage_indicator",
        "parent",
        "priority",
        "cab_date",
        "cab_required",
        "closed_at",
        "cmdb_ci",
        "service_offering",
        "urgency",
        "justification",
        "implementation_plan",
        "risk_impact_analysis",
        "backout_plan",
        "test_plan",
        "work_start",
        "work_end",
        "business_service.parent",
        "business_service.parent.parent",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

impl ChangeApiConfig {
    /// Parse the configured timezone name.
    pub fn tz(&self) -> crate::error::Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| EtlError::Config(format!("Unknown timezone '{}': {e}", self.timezone)))
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./snowdrift.toml
    /// 3. ./snowdrift.json
    /// 4. ./snowdrift.yaml
    /// 5. ./snowdrift.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = [
            "snowdrift.toml",
            "snowdrift.json",
            "snowdrift.yaml",
            "snowdrift.yml",
        ];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        Ok(Self::default())
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }

    /// Reject settings a run cannot start with.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.change_api.url.trim().is_empty() {
            return Err(EtlError::Config("change-api.url is required".into()));
        }
        if self.change_api.page_size == 0 {
            return Err(EtlError::Config("change-api.page-size must be positive".into()));
        }
        if !(0..=MAX_LOOKBACK_DAYS).contains(&self.change_api.lookback_days) {
            return Err(EtlError::Config(format!(
                "change-api.lookback-days must be between 0 and {MAX_LOOKBACK_DAYS}"
            )));
        }
        if self.change_api.fields.is_empty() {
            return Err(EtlError::Config("change-api.fields must not be empty".into()));
        }
        self.change_api.tz()?;

        if self.auth.tenant_id.trim().is_empty() {
            return Err(EtlError::Config("auth.tenant-id is required".into()));
        }
        if self.index.index_name.trim().is_empty() {
            return Err(EtlError::Config("index.index-name is required".into()));
        }
        if self.index.bulk_chunk_size == 0 {
            return Err(EtlError::Config("index.bulk-chunk-size must be positive".into()));
        }
        Ok(())
    }
}
