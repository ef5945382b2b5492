//! VC directory sync, status reporting and the match/premium/analysis services
//! shared by the web and CLI front ends.

pub mod analysis;
pub mod matches;
pub mod premium;
pub mod status;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;
use vlinks_adapters::{init_fallback_table, map_client_match, map_vc_investor, FallbackUrlTable};
use vlinks_core::tables;
use vlinks_storage::{
    AirtableClient, AirtableConfig, LocalStore, MemoryStore, PgStore, RecordStore,
    UnconfiguredRecordStore,
};

pub use analysis::{run_analysis, AnalysisConfig, AnalysisError, AnalysisRun};
pub use matches::{client_match_views, parse_match_quality, MatchError, MatchService};
pub use premium::{
    priority_score, submit_premium_application, PremiumApplication, PremiumError, PremiumReceipt,
};
pub use status::{
    airtable_test_report, build_status_report, compute_vc_status, AirtableTestReport, TableProbe,
};

pub const CRATE_NAME: &str = "vlinks-sync";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub airtable_api_key: Option<String>,
    pub airtable_base_id: Option<String>,
    pub airtable_api_url: String,
    pub jwt_secret: String,
    pub backend_url: String,
    pub database_url: Option<String>,
    pub web_port: u16,
    pub http_timeout_secs: u64,
    pub fallback_urls_path: Option<PathBuf>,
    pub analysis: AnalysisConfig,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = AnalysisConfig::default();
        Self {
            airtable_api_key: non_empty_env("AIRTABLE_API_KEY"),
            airtable_base_id: non_empty_env("AIRTABLE_BASE_ID"),
            airtable_api_url: std::env::var("AIRTABLE_API_URL")
                .unwrap_or_else(|_| "https://api.airtable.com/v0".to_string()),
            jwt_secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| "dev-secret-change-me".to_string()),
            backend_url: std::env::var("BACKEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            database_url: non_empty_env("DATABASE_URL"),
            web_port: std::env::var("VL_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
            http_timeout_secs: std::env::var("VL_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            fallback_urls_path: non_empty_env("VL_FALLBACK_URLS_PATH").map(PathBuf::from),
            analysis: AnalysisConfig {
                program: std::env::var("VL_ANALYSIS_PROGRAM").unwrap_or(defaults.program),
                script: match std::env::var("VL_ANALYSIS_SCRIPT") {
                    Ok(v) if v.trim().is_empty() => None,
                    Ok(v) => Some(v),
                    Err(_) => defaults.script,
                },
                working_dir: std::env::var("VL_ANALYSIS_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.working_dir),
                timeout: std::env::var("VL_ANALYSIS_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.timeout),
            },
            scheduler_enabled: std::env::var("VL_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron: std::env::var("VL_SYNC_CRON").unwrap_or_else(|_| "0 0 6 * * *".to_string()),
        }
    }

    /// `None` unless both the API key and base id are set.
    pub fn airtable(&self) -> Option<AirtableConfig> {
        let (key, base) = (self.airtable_api_key.as_ref()?, self.airtable_base_id.as_ref()?);
        let mut config = AirtableConfig::new(base.clone(), key.clone());
        config.api_url = self.airtable_api_url.clone();
        config.timeout = Duration::from_secs(self.http_timeout_secs);
        Some(config)
    }
}

/// Shared handles every front end needs.
#[derive(Clone)]
pub struct Services {
    pub config: AppConfig,
    pub records: Arc<dyn RecordStore>,
    pub local: Arc<dyn LocalStore>,
    pub fallback: &'static FallbackUrlTable,
}

impl Services {
    pub fn new(
        config: AppConfig,
        records: Arc<dyn RecordStore>,
        local: Arc<dyn LocalStore>,
        fallback: &'static FallbackUrlTable,
    ) -> Self {
        Self {
            config,
            records,
            local,
            fallback,
        }
    }

    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let fallback = init_fallback_table(config.fallback_urls_path.as_deref())
            .context("loading fallback url table")?;

        let records: Arc<dyn RecordStore> = match config.airtable() {
            Some(airtable) => Arc::new(
                AirtableClient::new(airtable).context("building record store client")?,
            ),
            None => {
                warn!("AIRTABLE_API_KEY/AIRTABLE_BASE_ID not set; record store calls will fail");
                Arc::new(UnconfiguredRecordStore)
            }
        };

        let local: Arc<dyn LocalStore> = match &config.database_url {
            Some(url) => {
                let store = PgStore::connect(url).await.context("connecting to DATABASE_URL")?;
                store.migrate().await.context("running migrations")?;
                Arc::new(store)
            }
            None => {
                warn!("DATABASE_URL not set; using in-memory local store");
                Arc::new(MemoryStore::new())
            }
        };

        Ok(Self::new(config, records, local, fallback))
    }

    pub fn pipeline(&self) -> SyncPipeline {
        SyncPipeline::new(self.records.clone(), self.local.clone(), self.fallback)
    }

    pub fn matches(&self) -> MatchService {
        MatchService::new(self.records.clone())
    }

    pub async fn maybe_build_scheduler(&self) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.sync_cron.clone();
        let pipeline = self.pipeline();
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                match pipeline.run_once().await {
                    Ok(summary) => info!(
                        run_id = %summary.run_id,
                        upserted_vcs = summary.upserted_vcs,
                        "scheduled vc sync finished"
                    ),
                    Err(err) => error!(error = %format!("{err:#}"), "scheduled vc sync failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub remote_vcs: usize,
    pub upserted_vcs: usize,
    pub with_website: usize,
    pub failed_vcs: usize,
    pub remote_matches: usize,
    pub upserted_matches: usize,
    pub skipped_matches: usize,
    pub matches_fetch_failed: bool,
}

/// Fetch → map → upsert. Every run overwrites; nothing is deleted locally.
#[derive(Clone)]
pub struct SyncPipeline {
    records: Arc<dyn RecordStore>,
    local: Arc<dyn LocalStore>,
    fallback: &'static FallbackUrlTable,
}

impl SyncPipeline {
    pub fn new(
        records: Arc<dyn RecordStore>,
        local: Arc<dyn LocalStore>,
        fallback: &'static FallbackUrlTable,
    ) -> Self {
        Self {
            records,
            local,
            fallback,
        }
    }

    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("vc_sync", %run_id);

        async move {
            let (vcs, matches) = tokio::join!(
                self.records.list(tables::VC_DATABASE, None),
                self.records.list(tables::MATCHES, None),
            );
            let vcs = vcs.context("fetching VC Database")?;

            let mut upserted_vcs = 0usize;
            let mut with_website = 0usize;
            let mut failed_vcs = 0usize;
            for record in &vcs {
                let vc = map_vc_investor(record, self.fallback, Utc::now());
                if vc.website.is_some() {
                    with_website += 1;
                }
                match self.local.upsert_vc(&vc).await {
                    Ok(()) => upserted_vcs += 1,
                    Err(err) => {
                        failed_vcs += 1;
                        warn!(external_id = %vc.external_id, error = %err, "vc upsert failed");
                    }
                }
            }

            let (matches, matches_fetch_failed) = match matches {
                Ok(records) => (records, false),
                Err(err) => {
                    warn!(error = %err, "match table fetch failed; matches not refreshed");
                    (Vec::new(), true)
                }
            };

            let mut upserted_matches = 0usize;
            let mut skipped_matches = 0usize;
            for record in &matches {
                let Some(client_match) = map_client_match(record, Utc::now()) else {
                    skipped_matches += 1;
                    continue;
                };
                match self.local.upsert_client_match(&client_match).await {
                    Ok(()) => upserted_matches += 1,
                    Err(err) => {
                        skipped_matches += 1;
                        warn!(match_id = %client_match.id, error = %err, "match upsert failed");
                    }
                }
            }

            let summary = SyncRunSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                remote_vcs: vcs.len(),
                upserted_vcs,
                with_website,
                failed_vcs,
                remote_matches: matches.len(),
                upserted_matches,
                skipped_matches,
                matches_fetch_failed,
            };
            info!(
                remote_vcs = summary.remote_vcs,
                upserted_vcs,
                with_website,
                upserted_matches,
                skipped_matches,
                "vc sync finished"
            );
            Ok::<_, anyhow::Error>(summary)
        }
        .instrument(span)
        .await
    }
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let services = Services::from_config(AppConfig::from_env()).await?;
    services.pipeline().run_once().await
}
