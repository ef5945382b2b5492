//! REST client for the remote record store (Airtable) plus in-memory and
//! unconfigured stand-ins implementing the same `RecordStore` contract.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info_span, warn, Instrument};
use vlinks_core::{tables, FieldMap, RemoteRecord};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("record store configuration missing")]
    NotConfigured,
    #[error("invalid record store url: {0}")]
    InvalidUrl(String),
    #[error("request to record store failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },
    #[error("record {id} not found in {table}")]
    NotFound { table: String, id: String },
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

impl FetchError {
    /// Transport-level failure: the request may never have reached the store.
    pub fn is_transport(&self) -> bool {
        matches!(self, FetchError::Request(_) | FetchError::Unavailable(_))
    }
}

/// Structured `filterByFormula` so the same filter can be rendered for the REST
/// API and evaluated against in-memory records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    RecordId(String),
    FieldEquals {
        field: String,
        value: String,
        case_insensitive: bool,
    },
    And(Vec<Filter>),
}

impl Filter {
    pub fn field_equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::FieldEquals {
            field: field.into(),
            value: value.into(),
            case_insensitive: false,
        }
    }

    pub fn field_equals_ignore_case(field: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::FieldEquals {
            field: field.into(),
            value: value.into(),
            case_insensitive: true,
        }
    }

    pub fn to_formula(&self) -> String {
        match self {
            Filter::RecordId(id) => format!("RECORD_ID() = '{}'", escape_formula(id)),
            Filter::FieldEquals {
                field,
                value,
                case_insensitive: false,
            } => format!("{{{}}} = '{}'", field, escape_formula(value)),
            Filter::FieldEquals {
                field,
                value,
                case_insensitive: true,
            } => format!(
                "LOWER({{{}}}) = LOWER('{}')",
                field,
                escape_formula(value)
            ),
            Filter::And(parts) => format!(
                "AND({})",
                parts
                    .iter()
                    .map(Filter::to_formula)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    pub fn matches(&self, record: &RemoteRecord) -> bool {
        match self {
            Filter::RecordId(id) => record.id == *id,
            Filter::FieldEquals {
                field,
                value,
                case_insensitive,
            } => match record.text(field) {
                Some(actual) if *case_insensitive => actual.to_lowercase() == value.to_lowercase(),
                Some(actual) => actual == *value,
                None => false,
            },
            Filter::And(parts) => parts.iter().all(|p| p.matches(record)),
        }
    }
}

fn escape_formula(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every record of `table` matching `filter`, across all pages.
    async fn list(
        &self,
        table: &str,
        filter: Option<&Filter>,
    ) -> Result<Vec<RemoteRecord>, FetchError>;

    async fn get(&self, table: &str, id: &str) -> Result<RemoteRecord, FetchError>;

    async fn create(&self, table: &str, fields: FieldMap) -> Result<RemoteRecord, FetchError>;

    async fn update(
        &self,
        table: &str,
        id: &str,
        fields: FieldMap,
    ) -> Result<RemoteRecord, FetchError>;
}

/// Concurrent read of the three core tables. Each outcome is kept separately so the
/// caller decides whether a failed table degrades or fails the whole operation.
#[derive(Debug)]
pub struct TableSnapshot {
    pub startups: Result<Vec<RemoteRecord>, FetchError>,
    pub vcs: Result<Vec<RemoteRecord>, FetchError>,
    pub matches: Result<Vec<RemoteRecord>, FetchError>,
}

impl TableSnapshot {
    pub fn into_all(
        self,
    ) -> Result<(Vec<RemoteRecord>, Vec<RemoteRecord>, Vec<RemoteRecord>), FetchError> {
        Ok((self.startups?, self.vcs?, self.matches?))
    }
}

pub async fn fetch_all_tables(store: &dyn RecordStore) -> TableSnapshot {
    let (startups, vcs, matches) = tokio::join!(
        store.list(tables::STARTUP_SUBMISSIONS, None),
        store.list(tables::VC_DATABASE, None),
        store.list(tables::MATCHES, None),
    );
    TableSnapshot {
        startups,
        vcs,
        matches,
    }
}

#[derive(Debug, Clone)]
pub struct AirtableConfig {
    pub api_url: String,
    pub base_id: String,
    pub api_key: String,
    pub timeout: Duration,
    pub max_pages: usize,
}

impl AirtableConfig {
    pub fn new(base_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_url: "https://api.airtable.com/v0".to_string(),
            base_id: base_id.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(20),
            max_pages: 100,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListPage {
    #[serde(default)]
    records: Vec<RemoteRecord>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Debug)]
pub struct AirtableClient {
    client: reqwest::Client,
    config: AirtableConfig,
}

impl AirtableClient {
    pub fn new(config: AirtableConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn table_url(&self, table: &str, id: Option<&str>) -> Result<Url, FetchError> {
        let mut url = Url::parse(&self.config.api_url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {e}", self.config.api_url)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| FetchError::InvalidUrl(self.config.api_url.clone()))?;
            segments.pop_if_empty().push(&self.config.base_id).push(table);
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        table: &str,
        id: Option<&str>,
    ) -> Result<reqwest::Response, FetchError> {
        let resp = request.bearer_auth(&self.config.api_key).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::NOT_FOUND {
            if let Some(id) = id {
                return Err(FetchError::NotFound {
                    table: table.to_string(),
                    id: id.to_string(),
                });
            }
        }
        let url = resp.url().to_string();
        let body = resp.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), %url, "record store returned error status");
        Err(FetchError::HttpStatus {
            status: status.as_u16(),
            url,
            body,
        })
    }
}

#[async_trait]
impl RecordStore for AirtableClient {
    async fn list(
        &self,
        table: &str,
        filter: Option<&Filter>,
    ) -> Result<Vec<RemoteRecord>, FetchError> {
        let formula = filter.map(Filter::to_formula);
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        for page in 0..self.config.max_pages.max(1) {
            let mut url = self.table_url(table, None)?;
            {
                let mut query = url.query_pairs_mut();
                if let Some(formula) = &formula {
                    query.append_pair("filterByFormula", formula);
                }
                if let Some(offset) = &offset {
                    query.append_pair("offset", offset);
                }
            }

            let span = info_span!("airtable_list", table, page);
            let body: ListPage = async {
                let resp = self.send(self.client.get(url), table, None).await?;
                resp.json::<ListPage>().await.map_err(FetchError::from)
            }
            .instrument(span)
            .await?;

            records.extend(body.records);
            match body.offset {
                Some(next) => offset = Some(next),
                None => return Ok(records),
            }
        }

        warn!(table, pages = self.config.max_pages, "page cap reached; result truncated");
        Ok(records)
    }

    async fn get(&self, table: &str, id: &str) -> Result<RemoteRecord, FetchError> {
        let url = self.table_url(table, Some(id))?;
        let resp = self
            .send(self.client.get(url), table, Some(id))
            .instrument(info_span!("airtable_get", table, id))
            .await?;
        Ok(resp.json().await?)
    }

    async fn create(&self, table: &str, fields: FieldMap) -> Result<RemoteRecord, FetchError> {
        let url = self.table_url(table, None)?;
        let resp = self
            .send(
                self.client.post(url).json(&json!({ "fields": fields })),
                table,
                None,
            )
            .instrument(info_span!("airtable_create", table))
            .await?;
        Ok(resp.json().await?)
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        fields: FieldMap,
    ) -> Result<RemoteRecord, FetchError> {
        let url = self.table_url(table, Some(id))?;
        let resp = self
            .send(
                self.client.patch(url).json(&json!({ "fields": fields })),
                table,
                Some(id),
            )
            .instrument(info_span!("airtable_update", table, id))
            .await?;
        Ok(resp.json().await?)
    }
}

/// Used when credentials are absent; every call fails with `NotConfigured`.
#[derive(Debug, Default)]
pub struct UnconfiguredRecordStore;

#[async_trait]
impl RecordStore for UnconfiguredRecordStore {
    async fn list(
        &self,
        _table: &str,
        _filter: Option<&Filter>,
    ) -> Result<Vec<RemoteRecord>, FetchError> {
        Err(FetchError::NotConfigured)
    }

    async fn get(&self, _table: &str, _id: &str) -> Result<RemoteRecord, FetchError> {
        Err(FetchError::NotConfigured)
    }

    async fn create(&self, _table: &str, _fields: FieldMap) -> Result<RemoteRecord, FetchError> {
        Err(FetchError::NotConfigured)
    }

    async fn update(
        &self,
        _table: &str,
        _id: &str,
        _fields: FieldMap,
    ) -> Result<RemoteRecord, FetchError> {
        Err(FetchError::NotConfigured)
    }
}

/// A write observed by `MemoryRecordStore`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordWrite {
    pub table: String,
    pub id: String,
    pub fields: FieldMap,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, Vec<RemoteRecord>>,
    writes: Vec<RecordWrite>,
    failing_tables: HashSet<String>,
    failing_writes: bool,
    edits_before_get: BTreeMap<(String, String), FieldMap>,
    next_id: u64,
}

/// In-process record store with failure injection.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    state: Mutex<MemoryState>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, table: &str, record: RemoteRecord) {
        let mut state = self.state.lock().await;
        let rows = state.tables.entry(table.to_string()).or_default();
        rows.retain(|r| r.id != record.id);
        rows.push(record);
    }

    /// Reads and writes against `table` fail as if the network were down.
    pub async fn fail_table(&self, table: &str) {
        self.state.lock().await.failing_tables.insert(table.to_string());
    }

    pub async fn fail_writes(&self, failing: bool) {
        self.state.lock().await.failing_writes = failing;
    }

    /// Simulates another writer: the next `get` of `id` sees `fields` merged into the
    /// stored row. The edit is not recorded in `writes`.
    pub async fn edit_before_get(&self, table: &str, id: &str, fields: FieldMap) {
        self.state
            .lock()
            .await
            .edits_before_get
            .insert((table.to_string(), id.to_string()), fields);
    }

    pub async fn writes(&self) -> Vec<RecordWrite> {
        self.state.lock().await.writes.clone()
    }

    fn check_table(state: &MemoryState, table: &str) -> Result<(), FetchError> {
        if state.failing_tables.contains(table) {
            return Err(FetchError::Unavailable(format!("{table} unreachable")));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn list(
        &self,
        table: &str,
        filter: Option<&Filter>,
    ) -> Result<Vec<RemoteRecord>, FetchError> {
        let state = self.state.lock().await;
        Self::check_table(&state, table)?;
        Ok(state
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| filter.map(|f| f.matches(r)).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, table: &str, id: &str) -> Result<RemoteRecord, FetchError> {
        let mut state = self.state.lock().await;
        Self::check_table(&state, table)?;
        let edit = state
            .edits_before_get
            .remove(&(table.to_string(), id.to_string()));
        let record = state
            .tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|r| r.id == id))
            .ok_or_else(|| FetchError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;
        if let Some(fields) = edit {
            record.fields.extend(fields);
        }
        Ok(record.clone())
    }

    async fn create(&self, table: &str, fields: FieldMap) -> Result<RemoteRecord, FetchError> {
        let mut state = self.state.lock().await;
        Self::check_table(&state, table)?;
        if state.failing_writes {
            return Err(FetchError::Unavailable("writes disabled".to_string()));
        }
        state.next_id += 1;
        let record = RemoteRecord::new(format!("recMem{:06}", state.next_id), fields.clone());
        state.writes.push(RecordWrite {
            table: table.to_string(),
            id: record.id.clone(),
            fields,
        });
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        fields: FieldMap,
    ) -> Result<RemoteRecord, FetchError> {
        let mut state = self.state.lock().await;
        Self::check_table(&state, table)?;
        if state.failing_writes {
            return Err(FetchError::Unavailable("writes disabled".to_string()));
        }
        let record = state
            .tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|r| r.id == id))
            .ok_or_else(|| FetchError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;
        for (key, value) in &fields {
            record.fields.insert(key.clone(), value.clone());
        }
        let updated = record.clone();
        state.writes.push(RecordWrite {
            table: table.to_string(),
            id: id.to_string(),
            fields,
        });
        Ok(updated)
    }
}
