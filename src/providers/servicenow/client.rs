use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone};
use chrono_tz::Tz;
use log::{debug, warn};
use reqwest::Client;
use url::Url;

use crate::auth::Token;
use crate::config::ChangeApiConfig;
use crate::error::{EtlError, Result};

use super::pagination::PageSource;
use super::types::{ChangeResponse, RawChangeRecord};

const WINDOW_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Time range on `start_date` that one run extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionWindow {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl ExtractionWindow {
    /// The `lookback_days` days ending at `end`.
    ///
    /// # Errors
    ///
    /// Returns `EtlError::Config` if the start falls outside the
    /// representable date range.
    pub fn ending_at(end: DateTime<Tz>, lookback_days: i64) -> Result<Self> {
        let start = TimeDelta::try_days(lookback_days)
            .and_then(|lookback| end.checked_sub_signed(lookback))
            .ok_or_else(|| {
                EtlError::Config(format!("Lookback of {lookback_days} days is out of range"))
            })?;
        Ok(Self { start, end })
    }

    /// Encoded query selecting the window, newest updates first.
    pub fn query(&self) -> String {
        format!(
            "start_dateBETWEEN{}@{} ORDERBY sys_updated_on:desc",
            self.start.format(WINDOW_FORMAT),
            self.end.format(WINDOW_FORMAT)
        )
    }
}

/// Table API client for change requests.
pub struct ChangeClient {
    client: Client,
    url: Url,
    token: Token,
    fields: String,
    window: ExtractionWindow,
}

impl ChangeClient {
    pub fn new(config: &ChangeApiConfig, token: Token, window: ExtractionWindow) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("snowdrift/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| EtlError::Config(format!("Failed to create HTTP client: {e}")))?;

        let url = Url::parse(&config.url)
            .map_err(|e| EtlError::Config(format!("Invalid change API URL: {e}")))?;

        if token.is_empty() {
            warn!("Change API client created without a token; requests will be unauthenticated");
        }

        Ok(Self {
            client,
            url,
            token,
            fields: config.fields.join(","),
            window,
        })
    }

    fn query_params(&self, offset: usize, limit: usize) -> Vec<(&'static str, String)> {
        vec![
            ("sysparm_display_value", "true".to_string()),
            ("sysparm_fields", self.fields.clone()),
            ("sysparm_limit", limit.to_string()),
            ("sysparm_offset", offset.to_string()),
            ("sysparm_query", self.window.query()),
        ]
    }
}

#[async_trait]
impl PageSource for ChangeClient {
    async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Vec<RawChangeRecord>> {
        let fetch_error = |message: String| EtlError::Fetch { offset, message };

        let params = self.query_params(offset, limit);
        debug!("GET {} params {:?}", self.url, params);

        let response = self
            .client
            .get(self.url.clone())
            .bearer_auth(self.token.as_str())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .query(&params)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        debug!("Response {} from {}", response.status(), response.url());

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(fetch_error(format!("HTTP {status}: {body}")));
        }

        let body: ChangeResponse = response
            .json()
            .await
            .map_err(|e| fetch_error(format!("Malformed response body: {e}")))?;

        Ok(body.result)
    }
}

/// Current time in `tz`, the reference point for a run.
pub fn now_in<Z: TimeZone>(tz: &Z) -> DateTime<Z> {
    chrono::Utc::now().with_timezone(tz)
}
