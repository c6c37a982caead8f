use std::time::Instant;

use chrono::DateTime;
use chrono_tz::Tz;
use log::{error, info, warn};
use serde::Serialize;

use crate::auth::{Token, TokenProvider};
use crate::config::Config;
use crate::enrich::ServiceMapping;
use crate::error::{EtlError, Result, Stage};
use crate::output::PhaseProgress;
use crate::providers::servicenow::{
    fetch_all, now_in, ChangeClient, ExtractionWindow, PageSource, RawChangeRecord,
};
use crate::sink::{
    load_batch, metrics_document, notification_document, BulkSummary, IndexSink, OpenSearchSink,
};
use crate::transform::{transform_batch, ChangeDocument, TransformPolicy};

/// Settings the pipeline stages need once their collaborators exist.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub page_size: usize,
    pub index_name: String,
    pub bulk_chunk_size: usize,
    pub transform_policy: TransformPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.change_api.page_size,
            index_name: config.index.index_name.clone(),
            bulk_chunk_size: config.index.bulk_chunk_size,
            transform_policy: config.pipeline.transform_policy,
        }
    }
}

/// The stage that stopped a run and why.
#[derive(Debug, Clone, Serialize)]
pub struct StageFailure {
    pub stage: Option<Stage>,
    pub message: String,
}

/// Counts and outcome of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub started_at: String,
    pub window: Option<(String, String)>,
    pub authenticated: bool,
    pub fetched: usize,
    pub transformed: usize,
    pub skipped: usize,
    pub enriched: usize,
    pub load: BulkSummary,
    pub metrics_written: bool,
    pub execution_secs: f64,
    pub failures: Vec<StageFailure>,
}

impl RunReport {
    fn record(&mut self, stage: Option<Stage>, err: &EtlError) {
        let label = stage.map_or_else(|| "setup".to_string(), |s| s.to_string());
        error!("Stage {label} failed: {err}");
        self.failures.push(StageFailure {
            stage,
            message: err.to_string(),
        });
    }

    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Invocation result in the shape schedulers expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

impl InvocationResponse {
    pub fn from_report(report: &RunReport) -> Self {
        if report.succeeded() {
            Self {
                status_code: 200,
                body: "Success".to_string(),
            }
        } else {
            Self {
                status_code: 500,
                body: "Error".to_string(),
            }
        }
    }
}

/// Fetch -> transform -> enrich -> load over injected collaborators.
pub struct Pipeline<'a, S: ?Sized, K: ?Sized> {
    source: &'a S,
    sink: &'a K,
    mapping: &'a ServiceMapping,
    settings: PipelineSettings,
    show_progress: bool,
}

impl<'a, S, K> Pipeline<'a, S, K>
where
    S: PageSource + ?Sized,
    K: IndexSink + ?Sized,
{
    pub fn new(
        source: &'a S,
        sink: &'a K,
        mapping: &'a ServiceMapping,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            sink,
            mapping,
            settings,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Fetch, transform and enrich, without writing anything.
    pub async fn extract(
        &self,
        run_timestamp: &DateTime<Tz>,
        report: &mut RunReport,
    ) -> Result<Vec<ChangeDocument>> {
        let progress = PhaseProgress::start_fetch(self.show_progress);

        let records: Vec<RawChangeRecord> = fetch_all(self.source, self.settings.page_size).await?;
        report.fetched = records.len();

        let progress = progress.finish_fetch_start_transform(records.len());

        let outcome = transform_batch(records, run_timestamp, self.settings.transform_policy)?;
        report.transformed = outcome.documents.len();
        report.skipped = outcome.skipped.len();

        let mut documents = outcome.documents;
        report.enriched = self.mapping.enrich_all(&mut documents);
        info!(
            "Enriched {} of {} documents",
            report.enriched,
            documents.len()
        );

        progress.finish_transform(documents.len());
        Ok(documents)
    }

    /// Create-only load of `documents`, then the run metrics document.
    ///
    /// A failed chunk is recorded alongside whatever earlier chunks wrote,
    /// and the metrics document is still written. Per-document rejections
    /// only show up in the summary.
    pub async fn load(
        &self,
        documents: Vec<ChangeDocument>,
        run_timestamp: &DateTime<Tz>,
        clock: Instant,
        report: &mut RunReport,
    ) {
        let progress = PhaseProgress::start_load(self.show_progress, documents.len());

        let outcome = load_batch(
            self.sink,
            &self.settings.index_name,
            documents,
            self.settings.bulk_chunk_size,
        )
        .await;
        report.load = outcome.summary;
        if let Some(e) = outcome.error {
            report.record(Some(Stage::Load), &e);
        }

        let execution_secs = clock.elapsed().as_secs_f64();
        let metrics = metrics_document(run_timestamp, execution_secs);
        match self
            .sink
            .index_document(&self.settings.index_name, &metrics)
            .await
        {
            Ok(()) => report.metrics_written = true,
            Err(e) => report.record(Some(Stage::Metrics), &e),
        }

        progress.finish_load(&report.load);
    }

    /// Full pass over one extraction window.
    pub async fn execute(
        &self,
        run_timestamp: &DateTime<Tz>,
        clock: Instant,
        report: &mut RunReport,
    ) -> Result<()> {
        let documents = self.extract(run_timestamp, report).await?;
        self.load(documents, run_timestamp, clock, report).await;
        Ok(())
    }
}

/// Result of `run`: the report, the scheduler response, and in dry-run mode
/// the documents that would have been loaded.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub response: InvocationResponse,
    pub documents: Option<Vec<ChangeDocument>>,
}

/// Write an operational notification and log the outcome.
///
/// During a run the result is only logged; a failed notification never
/// changes the run's status.
pub async fn notify<K>(
    sink: &K,
    index: &str,
    timestamp: &DateTime<Tz>,
    api: &str,
    message: &str,
) -> Result<()>
where
    K: IndexSink + ?Sized,
{
    let document = notification_document(timestamp, api, message);
    match sink.index_document(index, &document).await {
        Ok(()) => {
            info!("Notification for '{api}' written to {index}");
            Ok(())
        }
        Err(e) => {
            warn!("Could not write notification for '{api}': {e}");
            Err(e)
        }
    }
}

/// One scheduled run against the configured endpoints.
///
/// Never panics and never returns early: every failure ends up in the
/// report, and the response is 500 whenever a stage failed.
pub async fn run(config: &Config, dry_run: bool, show_progress: bool) -> RunOutcome {
    let clock = Instant::now();
    let mut report = RunReport::default();
    let mut documents = None;

    if let Err(e) = run_stages(
        config,
        dry_run,
        show_progress,
        clock,
        &mut report,
        &mut documents,
    )
    .await
    {
        report.record(e.stage(), &e);
    }

    report.execution_secs = clock.elapsed().as_secs_f64();
    let response = InvocationResponse::from_report(&report);
    info!(
        "Run finished with status {} in {:.2}s",
        response.status_code, report.execution_secs
    );

    RunOutcome {
        report,
        response,
        documents,
    }
}

async fn run_stages(
    config: &Config,
    dry_run: bool,
    show_progress: bool,
    clock: Instant,
    report: &mut RunReport,
    documents: &mut Option<Vec<ChangeDocument>>,
) -> Result<()> {
    let tz = config.change_api.tz()?;
    let started_at = now_in(&tz);
    report.started_at = started_at.to_rfc3339();
    info!("Execution time: {}", report.started_at);

    let sink = OpenSearchSink::new(&config.index)?;
    let notifications = config.pipeline.notify_on_failure && !dry_run;

    let mapping = match &config.mapping.path {
        Some(path) => ServiceMapping::from_path(path)?,
        None => {
            warn!("No service mapping configured; documents will not be enriched");
            ServiceMapping::default()
        }
    };

    let token = match TokenProvider::new(&config.auth)?.fetch_token().await {
        Ok(token) => {
            report.authenticated = true;
            token
        }
        Err(e) => {
            if notifications {
                let _ = notify(
                    &sink,
                    &config.index.notification_index,
                    &started_at,
                    "token",
                    &e.to_string(),
                )
                .await;
            }
            if !config.auth.continue_on_failure {
                return Err(e);
            }
            report.record(Some(Stage::Auth), &e);
            warn!("Continuing without a token; change API calls will be unauthenticated");
            Token::empty()
        }
    };

    let window = ExtractionWindow::ending_at(started_at, config.change_api.lookback_days)?;
    report.window = Some((window.start.to_rfc3339(), window.end.to_rfc3339()));
    let client = ChangeClient::new(&config.change_api, token, window)?;

    let pipeline = Pipeline::new(
        &client,
        &sink,
        &mapping,
        PipelineSettings::from_config(config),
    )
    .with_progress(show_progress);

    let extracted = match pipeline.extract(&started_at, report).await {
        Ok(extracted) => extracted,
        Err(e) => {
            if notifications && matches!(e, EtlError::Fetch { .. }) {
                let _ = notify(
                    &sink,
                    &config.index.notification_index,
                    &started_at,
                    "change management",
                    &e.to_string(),
                )
                .await;
            }
            return Err(e);
        }
    };

    if dry_run {
        info!("Dry run: skipping index writes");
        *documents = Some(extracted);
        return Ok(());
    }

    pipeline.load(extracted, &started_at, clock, report).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::ServiceOwnership;
    use crate::providers::servicenow::fakes::{record, ScriptedSource};
    use crate::sink::memory::MemorySink;
    use chrono::TimeZone;
    use chrono_tz::CET;

    const INDEX: &str = "snow_changes";

    fn settings(page_size: usize) -> PipelineSettings {
        PipelineSettings {
            page_size,
            index_name: INDEX.to_string(),
            bulk_chunk_size: 500,
            transform_policy: TransformPolicy::Abort,
        }
    }

    fn mapping() -> ServiceMapping {
        [(
            "Payments".to_string(),
            ServiceOwnership {
                platform: "Core Platform".into(),
                tribe: "Money Movement".into(),
                company: "Acme Bank".into(),
            },
        )]
        .into_iter()
        .collect()
    }

    fn run_timestamp() -> DateTime<Tz> {
        CET.with_ymd_and_hms(2024, 2, 26, 10, 35, 32).unwrap()
    }

    #[tokio::test]
    async fn test_single_short_page_end_to_end() {
        let source = ScriptedSource::new(vec![Ok(vec![
            record("CHG1", "Payments"),
            record("CHG2", "Unmapped"),
        ])]);
        let sink = MemorySink::default();
        let mapping = mapping();
        let pipeline = Pipeline::new(&source, &sink, &mapping, settings(100));

        let mut report = RunReport::default();
        pipeline
            .execute(&run_timestamp(), Instant::now(), &mut report)
            .await
            .unwrap();

        assert_eq!(source.calls(), vec![0]);
        assert_eq!(*sink.bulk_calls.lock().unwrap(), vec![2]);
        assert_eq!(sink.document_count(INDEX), 2);

        let singles = sink.singles.lock().unwrap();
        assert_eq!(singles.len(), 1);
        assert_eq!(singles[0].0, INDEX);
        assert!(singles[0].1.get("execution_time_for_change_in_secs").is_some());
        assert_eq!(singles[0].1["last run"], singles[0].1["@timestamp"]);

        assert_eq!(report.fetched, 2);
        assert_eq!(report.transformed, 2);
        assert_eq!(report.enriched, 1);
        assert_eq!(report.load.succeeded, 2);
        assert!(report.metrics_written);
        assert!(report.succeeded());

        let stored = sink.stored(INDEX);
        let enriched = stored.iter().find(|d| d["change_id"] == "CHG1").unwrap();
        assert_eq!(enriched["Tribe"], "Money Movement");
        let plain = stored.iter().find(|d| d["change_id"] == "CHG2").unwrap();
        assert!(plain.get("Platform").is_none());
    }

    #[tokio::test]
    async fn test_fetch_failure_stops_before_load() {
        let source = ScriptedSource::new(vec![
            Ok(vec![record("CHG1", "Payments"), record("CHG2", "Payments")]),
            Err(EtlError::Fetch {
                offset: 2,
                message: "HTTP 500".into(),
            }),
        ]);
        let sink = MemorySink::default();
        let mapping = mapping();
        let pipeline = Pipeline::new(&source, &sink, &mapping, settings(2));

        let mut report = RunReport::default();
        let err = pipeline
            .execute(&run_timestamp(), Instant::now(), &mut report)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Fetch));
        assert!(sink.bulk_calls.lock().unwrap().is_empty());
        assert!(sink.singles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rerun_does_not_duplicate() {
        let sink = MemorySink::default();
        let mapping = mapping();

        for _ in 0..2 {
            let source = ScriptedSource::new(vec![Ok(vec![record("CHG1", "Payments")])]);
            let pipeline = Pipeline::new(&source, &sink, &mapping, settings(100));
            let mut report = RunReport::default();
            pipeline
                .execute(&run_timestamp(), Instant::now(), &mut report)
                .await
                .unwrap();
        }

        assert_eq!(sink.document_count(INDEX), 1);
    }

    #[tokio::test]
    async fn test_extract_skip_policy_reports_skipped() {
        let malformed: RawChangeRecord = [("short_description", "orphan")].into_iter().collect();
        let source = ScriptedSource::new(vec![Ok(vec![record("CHG1", "Payments"), malformed])]);
        let sink = MemorySink::default();
        let mapping = mapping();
        let mut settings = settings(100);
        settings.transform_policy = TransformPolicy::Skip;
        let pipeline = Pipeline::new(&source, &sink, &mapping, settings);

        let mut report = RunReport::default();
        let documents = pipeline.extract(&run_timestamp(), &mut report).await.unwrap();

        assert_eq!(documents.len(), 1);
        assert_eq!(report.skipped, 1);
        assert!(sink.bulk_calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_invocation_response() {
        let mut report = RunReport::default();
        assert_eq!(
            InvocationResponse::from_report(&report),
            InvocationResponse {
                status_code: 200,
                body: "Success".into()
            }
        );

        report.record(Some(Stage::Load), &EtlError::Load("cluster unavailable".into()));
        let response = InvocationResponse::from_report(&report);
        assert_eq!(response.status_code, 500);
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"statusCode":500,"body":"Error"}"#
        );
    }

    #[tokio::test]
    async fn test_run_without_upstream_reports_error() {
        let mut config = Config::default();
        config.auth.tenant_id = "tenant".into();
        config.auth.authority = "http://127.0.0.1:1".into();
        config.change_api.url = "http://127.0.0.1:1/api/now/table/change_request".into();
        config.index.url = "http://127.0.0.1:1".into();
        config.index.index_name = INDEX.into();
        config.pipeline.notify_on_failure = false;

        let outcome = run(&config, false, false).await;

        assert_eq!(outcome.response.status_code, 500);
        assert_eq!(outcome.report.failures[0].stage, Some(Stage::Auth));
        assert!(!outcome.report.authenticated);
    }

    #[tokio::test]
    async fn test_load_keeps_counts_from_chunks_before_failure() {
        let sink = MemorySink {
            fail_bulk_call: Some(2),
            ..MemorySink::default()
        };
        let mapping = mapping();
        let source = ScriptedSource::with_sizes(&[]);
        let mut settings = settings(100);
        settings.bulk_chunk_size = 1;
        let pipeline = Pipeline::new(&source, &sink, &mapping, settings);

        let documents = transform_batch(
            vec![record("CHG1", "Payments"), record("CHG2", "Payments")],
            &run_timestamp(),
            TransformPolicy::Abort,
        )
        .unwrap()
        .documents;

        let mut report = RunReport::default();
        pipeline
            .load(documents, &run_timestamp(), Instant::now(), &mut report)
            .await;

        assert_eq!(report.load.succeeded, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, Some(Stage::Load));
        assert!(report.metrics_written);
        assert_eq!(sink.document_count(INDEX), 1);
    }

    const NOTIFICATION_PATH: &str = "/maaps_prod_snow_changemanagement_mom/_doc";
    const CHANGE_PATH: &str = "/api/now/table/change_request";

    fn live_config(upstream: &str, index: &str) -> Config {
        let mut config = Config::default();
        config.auth.tenant_id = "tenant".into();
        config.auth.authority = upstream.to_string();
        config.change_api.url = format!("{upstream}{CHANGE_PATH}");
        config.index.url = index.to_string();
        config.index.index_name = INDEX.into();
        config
    }

    #[tokio::test]
    async fn test_token_failure_writes_notification() {
        let mut upstream = mockito::Server::new_async().await;
        let mut index = mockito::Server::new_async().await;

        upstream
            .mock("POST", "/tenant/oauth2/v2.0/token")
            .with_status(401)
            .with_body("invalid_client")
            .create_async()
            .await;
        let change_api = upstream
            .mock("GET", CHANGE_PATH)
            .match_query(mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let notification = index
            .mock("POST", NOTIFICATION_PATH)
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::PartialJson(serde_json::json!({"api": "token"})),
                mockito::Matcher::Regex("401".into()),
            ]))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"result":"created"}"#)
            .create_async()
            .await;

        let outcome = run(&live_config(&upstream.url(), &index.url()), false, false).await;

        assert_eq!(outcome.response.status_code, 500);
        assert_eq!(outcome.report.failures.len(), 1);
        assert_eq!(outcome.report.failures[0].stage, Some(Stage::Auth));
        notification.assert_async().await;
        change_api.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_failure_writes_notification() {
        let mut upstream = mockito::Server::new_async().await;
        let mut index = mockito::Server::new_async().await;

        upstream
            .mock("POST", "/tenant/oauth2/v2.0/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"live-token","token_type":"Bearer"}"#)
            .create_async()
            .await;
        upstream
            .mock("GET", CHANGE_PATH)
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .with_body("internal error")
            .create_async()
            .await;
        let notification = index
            .mock("POST", NOTIFICATION_PATH)
            .match_body(mockito::Matcher::PartialJson(
                serde_json::json!({"api": "change management"}),
            ))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"result":"created"}"#)
            .create_async()
            .await;
        let bulk = index
            .mock("POST", "/snow_changes/_bulk")
            .expect(0)
            .create_async()
            .await;

        let outcome = run(&live_config(&upstream.url(), &index.url()), false, false).await;

        assert_eq!(outcome.response.status_code, 500);
        assert!(outcome.report.authenticated);
        assert_eq!(outcome.report.failures.len(), 1);
        assert_eq!(outcome.report.failures[0].stage, Some(Stage::Fetch));
        notification.assert_async().await;
        bulk.assert_async().await;
    }

    #[tokio::test]
    async fn test_continue_on_auth_failure_loads_unauthenticated() {
        let mut upstream = mockito::Server::new_async().await;
        let mut index = mockito::Server::new_async().await;

        upstream
            .mock("POST", "/tenant/oauth2/v2.0/token")
            .with_status(401)
            .with_body("invalid_client")
            .create_async()
            .await;
        let change_api = upstream
            .mock("GET", CHANGE_PATH)
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"result":[{"number":"CHG1","business_service":"Payments"}]}"#)
            .create_async()
            .await;
        let notification = index
            .mock("POST", NOTIFICATION_PATH)
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"api": "token"})))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"result":"created"}"#)
            .create_async()
            .await;
        index
            .mock("POST", "/snow_changes/_bulk")
            .match_body(mockito::Matcher::Regex(r#""change_id":"CHG1""#.into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"errors":false,"items":[{"create":{"_id":"a","status":201}}]}"#)
            .create_async()
            .await;
        let metrics = index
            .mock("POST", "/snow_changes/_doc")
            .match_body(mockito::Matcher::Regex("execution_time_for_change_in_secs".into()))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"result":"created"}"#)
            .create_async()
            .await;

        let mut config = live_config(&upstream.url(), &index.url());
        config.auth.continue_on_failure = true;
        let outcome = run(&config, false, false).await;

        assert!(!outcome.report.authenticated);
        assert_eq!(outcome.report.fetched, 1);
        assert_eq!(outcome.report.load.succeeded, 1);
        assert!(outcome.report.metrics_written);
        assert_eq!(outcome.report.failures.len(), 1);
        assert_eq!(outcome.report.failures[0].stage, Some(Stage::Auth));
        assert_eq!(outcome.response.status_code, 500);
        notification.assert_async().await;
        change_api.assert_async().await;
        metrics.assert_async().await;
    }
}
