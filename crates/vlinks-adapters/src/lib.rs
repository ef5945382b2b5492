//! Field mapper: remote VC, match and startup records into the local schema,
//! with the bundled website fallback table.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};
use vlinks_core::{
    collapse_whitespace, match_fields, startup_fields, vc_fields, ClientMatch, OutreachStatus,
    RemoteRecord, VcInvestor,
};

pub const CRATE_NAME: &str = "vlinks-adapters";

const BUNDLED_FALLBACK_URLS: &str = include_str!("../data/vc-urls.json");

static FALLBACK_TABLE: OnceLock<FallbackUrlTable> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackUrlEntry {
    #[serde(rename = "VC/Investor Name")]
    pub vc_name: String,
    #[serde(rename = "Website URL")]
    pub website_url: String,
}

/// Name → website lookup. Read-only after construction.
#[derive(Debug, Clone, Default)]
pub struct FallbackUrlTable {
    exact: HashMap<String, String>,
    normalized: HashMap<String, String>,
    names: Vec<String>,
}

impl FallbackUrlTable {
    pub fn from_entries(entries: impl IntoIterator<Item = FallbackUrlEntry>) -> Self {
        let mut table = Self::default();
        for entry in entries {
            let url = entry.website_url.trim();
            if entry.vc_name.trim().is_empty() || url.is_empty() {
                continue;
            }
            table
                .exact
                .entry(entry.vc_name.clone())
                .or_insert_with(|| url.to_string());
            table
                .normalized
                .entry(collapse_whitespace(&entry.vc_name))
                .or_insert_with(|| url.to_string());
            table.names.push(collapse_whitespace(&entry.vc_name));
        }
        table
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let entries: Vec<FallbackUrlEntry> =
            serde_json::from_str(raw).context("parse fallback url table")?;
        Ok(Self::from_entries(entries))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read fallback url table {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("load {}", path.display()))
    }

    /// Table compiled into the binary. A corrupt bundle degrades to an empty table.
    pub fn bundled() -> Self {
        match Self::from_json_str(BUNDLED_FALLBACK_URLS) {
            Ok(table) => table,
            Err(err) => {
                error!(error = %err, "bundled fallback url table unreadable");
                Self::default()
            }
        }
    }

    /// Exact name, then trimmed, then whitespace-collapsed; first hit wins.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.exact
            .get(name)
            .or_else(|| self.exact.get(name.trim()))
            .or_else(|| self.normalized.get(&collapse_whitespace(name)))
            .map(String::as_str)
    }

    /// Normalized names, in table order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

/// Process-wide fallback table; the bundled one unless `init_fallback_table` ran first.
pub fn fallback_table() -> &'static FallbackUrlTable {
    FALLBACK_TABLE.get_or_init(|| {
        let table = FallbackUrlTable::bundled();
        info!(entries = table.len(), "fallback url table initialized");
        table
    })
}

/// Install the process-wide table from `path`, or the bundled one when `None`.
/// Has no effect once the table exists.
pub fn init_fallback_table(path: Option<&Path>) -> Result<&'static FallbackUrlTable> {
    let Some(path) = path else {
        return Ok(fallback_table());
    };
    let loaded = FallbackUrlTable::load(path)?;
    let entries = loaded.len();
    if FALLBACK_TABLE.set(loaded).is_err() {
        warn!(path = %path.display(), "fallback url table already initialized; override ignored");
    } else {
        info!(entries, path = %path.display(), "fallback url table loaded from file");
    }
    Ok(fallback_table())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebsiteSource {
    Remote,
    Fallback,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebsiteResolution {
    pub url: Option<String>,
    pub source: WebsiteSource,
}

pub fn resolve_website(
    record: &RemoteRecord,
    name: &str,
    table: &FallbackUrlTable,
) -> WebsiteResolution {
    let remote = [vc_fields::WEBSITE_URL, vc_fields::WEBSITE, vc_fields::WEBSITE_LOWER]
        .into_iter()
        .find_map(|field| record.text(field))
        .map(|url| url.trim().to_string());
    if let Some(url) = remote {
        return WebsiteResolution {
            url: Some(url),
            source: WebsiteSource::Remote,
        };
    }
    match table.lookup(name) {
        Some(url) => WebsiteResolution {
            url: Some(url.to_string()),
            source: WebsiteSource::Fallback,
        },
        None => WebsiteResolution {
            url: None,
            source: WebsiteSource::Missing,
        },
    }
}

fn text_or_empty(record: &RemoteRecord, field: &str) -> String {
    record.text(field).unwrap_or_default()
}

/// Total mapping: absent fields become empty strings, never errors.
pub fn map_vc_investor(
    record: &RemoteRecord,
    table: &FallbackUrlTable,
    now: DateTime<Utc>,
) -> VcInvestor {
    let name = text_or_empty(record, vc_fields::NAME);
    let website = resolve_website(record, &name, table).url;
    VcInvestor {
        external_id: record.id.clone(),
        firm: record
            .text(vc_fields::FIRM)
            .or_else(|| record.text(vc_fields::FIRM_NAME))
            .unwrap_or_default(),
        email: text_or_empty(record, vc_fields::EMAIL),
        phone: text_or_empty(record, vc_fields::PHONE),
        linkedin: text_or_empty(record, vc_fields::LINKEDIN),
        website,
        investment_focus: text_or_empty(record, vc_fields::INVESTMENT_FOCUS),
        investment_stage: text_or_empty(record, vc_fields::INVESTMENT_STAGE),
        geography: text_or_empty(record, vc_fields::GEOGRAPHY),
        portfolio_size: text_or_empty(record, vc_fields::PORTFOLIO_SIZE),
        description: text_or_empty(record, vc_fields::DESCRIPTION),
        updated_at: now,
        name,
    }
}

fn client_access(record: &RemoteRecord) -> bool {
    match record.field(match_fields::CLIENT_ACCESS) {
        Some(JsonValue::Bool(unlocked)) => *unlocked,
        Some(JsonValue::String(s)) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("unlocked") || s.eq_ignore_ascii_case("true")
        }
        _ => false,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
}

/// `None` when the record lacks either linked id; names are never used to join.
pub fn map_client_match(record: &RemoteRecord, now: DateTime<Utc>) -> Option<ClientMatch> {
    let client_id = record.linked_id(match_fields::STARTUP)?;
    let vc_investor_id = record.linked_id(match_fields::VC_INVESTOR)?;

    let outreach_status = match record.text(match_fields::OUTREACH_STATUS) {
        Some(raw) => raw.trim().parse::<OutreachStatus>().unwrap_or_else(|_| {
            warn!(
                record = %record.id,
                status = %raw,
                "unknown outreach status; treating as not_contacted"
            );
            OutreachStatus::NotContacted
        }),
        None => OutreachStatus::NotContacted,
    };

    let assigned_at = record
        .text(match_fields::ASSIGNED_AT)
        .as_deref()
        .and_then(parse_timestamp)
        .or(record.created_time)
        .unwrap_or(now);

    Some(ClientMatch {
        id: record.id.clone(),
        client_id,
        vc_investor_id,
        match_reasoning: text_or_empty(record, match_fields::MATCH_REASONING),
        portfolio_reasoning: text_or_empty(record, match_fields::PORTFOLIO_REASONING),
        client_access: client_access(record),
        assigned_at,
        notes: record.text(match_fields::NOTES),
        outreach_status,
        outreach_notes: record.text(match_fields::OUTREACH_NOTES),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupAnalysis {
    pub startup_name: String,
    pub overall_score: f64,
    pub technology_score: f64,
    pub market_score: f64,
    pub team_score: f64,
    pub technology_reasoning: String,
    pub market_reasoning: String,
    pub team_reasoning: String,
    pub analysis_summary: String,
    pub competitive_differentiation: String,
    pub investment_thesis: String,
    pub therapeutic_focus: String,
}

fn score(record: &RemoteRecord, field: &str) -> f64 {
    match record.field(field) {
        Some(JsonValue::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn text_or(record: &RemoteRecord, field: &str, default: &str) -> String {
    record.text(field).unwrap_or_else(|| default.to_string())
}

pub fn map_startup_analysis(record: &RemoteRecord) -> StartupAnalysis {
    StartupAnalysis {
        startup_name: text_or(record, startup_fields::STARTUP_NAME, "Unknown Company"),
        overall_score: score(record, startup_fields::OVERALL_SCORE),
        technology_score: score(record, startup_fields::TECHNOLOGY_SCORE),
        market_score: score(record, startup_fields::MARKET_SCORE),
        team_score: score(record, startup_fields::TEAM_SCORE),
        technology_reasoning: text_or(
            record,
            startup_fields::TECHNOLOGY_REASONING,
            "No reasoning available",
        ),
        market_reasoning: text_or(
            record,
            startup_fields::MARKET_REASONING,
            "No reasoning available",
        ),
        team_reasoning: text_or(record, startup_fields::TEAM_REASONING, "No reasoning available"),
        analysis_summary: text_or(record, startup_fields::ANALYSIS_SUMMARY, "No summary available"),
        competitive_differentiation: text_or(
            record,
            startup_fields::COMPETITIVE_DIFFERENTIATION,
            "No differentiation analysis available",
        ),
        investment_thesis: text_or(
            record,
            startup_fields::INVESTMENT_THESIS,
            "No investment thesis available",
        ),
        therapeutic_focus: text_or(record, startup_fields::THERAPEUTIC_FOCUS, "Unknown focus"),
    }
}
