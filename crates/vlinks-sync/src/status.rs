use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use tracing::warn;
use vlinks_adapters::{resolve_website, FallbackUrlTable, WebsiteSource};
use vlinks_core::{
    collapse_whitespace, completion_rate, tables, vc_fields, MissingWebsite, RemoteRecord,
    StatusReport,
};
use vlinks_storage::{fetch_all_tables, FetchError, RecordStore};

const MISSING_LIST_CAP: usize = 25;
const NEAR_MISS_THRESHOLD: f64 = 0.85;

fn closest_fallback_name(name: &str, table: &FallbackUrlTable) -> Option<(String, f64)> {
    let wanted = collapse_whitespace(name).to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    table
        .names()
        .iter()
        .map(|candidate| (candidate, jaro_winkler(&wanted, &candidate.to_lowercase())))
        .filter(|(_, score)| *score >= NEAR_MISS_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(candidate, score)| (candidate.clone(), (score * 1000.0).round() / 1000.0))
}

pub fn build_status_report(
    vcs: &[RemoteRecord],
    table: &FallbackUrlTable,
    now: DateTime<Utc>,
) -> StatusReport {
    let mut with_remote_website = 0usize;
    let mut with_fallback_only = 0usize;
    let mut missing = Vec::new();

    for record in vcs {
        let name = record.text(vc_fields::NAME).unwrap_or_default();
        match resolve_website(record, &name, table).source {
            WebsiteSource::Remote => with_remote_website += 1,
            WebsiteSource::Fallback => with_fallback_only += 1,
            WebsiteSource::Missing => {
                if missing.len() < MISSING_LIST_CAP {
                    let closest = closest_fallback_name(&name, table);
                    missing.push(MissingWebsite {
                        external_id: record.id.clone(),
                        name: collapse_whitespace(&name),
                        closest_fallback_name: closest.as_ref().map(|(n, _)| n.clone()),
                        similarity: closest.map(|(_, s)| s),
                    });
                }
            }
        }
    }

    let total = vcs.len();
    StatusReport {
        total_vcs: total,
        with_remote_website,
        with_fallback_only,
        without_website: total - with_remote_website - with_fallback_only,
        website_completion_rate: completion_rate(with_remote_website + with_fallback_only, total),
        missing,
        generated_at: now,
    }
}

/// Reads the remote VC table directly; a fetch failure is an error, not an empty report.
pub async fn compute_vc_status(
    records: &dyn RecordStore,
    table: &FallbackUrlTable,
) -> Result<StatusReport, FetchError> {
    let vcs = records.list(tables::VC_DATABASE, None).await?;
    Ok(build_status_report(&vcs, table, Utc::now()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableProbe {
    pub table: String,
    pub count: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirtableTestReport {
    pub ok: bool,
    pub tables: Vec<TableProbe>,
}

fn probe(table: &str, outcome: Result<Vec<RemoteRecord>, FetchError>) -> TableProbe {
    match outcome {
        Ok(records) => TableProbe {
            table: table.to_string(),
            count: Some(records.len()),
            error: None,
        },
        Err(err) => {
            warn!(table, error = %err, "connectivity probe failed");
            TableProbe {
                table: table.to_string(),
                count: None,
                error: Some(err.to_string()),
            }
        }
    }
}

/// Diagnostics read of all three tables. Per-table failures degrade into the report.
pub async fn airtable_test_report(records: &dyn RecordStore) -> AirtableTestReport {
    let snapshot = fetch_all_tables(records).await;
    let probes = vec![
        probe(tables::STARTUP_SUBMISSIONS, snapshot.startups),
        probe(tables::VC_DATABASE, snapshot.vcs),
        probe(tables::MATCHES, snapshot.matches),
    ];
    AirtableTestReport {
        ok: probes.iter().all(|t| t.error.is_none()),
        tables: probes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{leaked_table, record};
    use serde_json::json;
    use vlinks_storage::MemoryRecordStore;

    #[test]
    fn empty_directory_reports_zero_rate() {
        let report = build_status_report(&[], &FallbackUrlTable::default(), Utc::now());
        assert_eq!(report.total_vcs, 0);
        assert_eq!(report.website_completion_rate, 0);
        assert!(report.missing.is_empty());
    }

    #[test]
    fn counts_remote_fallback_and_missing_with_near_miss() {
        let table = leaked_table(&[
            ("Atlantic Bridge", "https://atlanticbridge.com"),
            ("Foresite Capital", "https://www.foresitecapital.com"),
        ]);
        let vcs = vec![
            record(
                "rec1",
                json!({ "VC/Investor Name": "Forbion", "Website URL": "https://forbion.com" }),
            ),
            record("rec2", json!({ "VC/Investor Name": "Atlantic Bridge " })),
            record("rec3", json!({ "VC/Investor Name": "Foresight Capital" })),
        ];
        let report = build_status_report(&vcs, table, Utc::now());
        assert_eq!(report.with_remote_website, 1);
        assert_eq!(report.with_fallback_only, 1);
        assert_eq!(report.without_website, 1);
        assert_eq!(report.website_completion_rate, 67);
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].external_id, "rec3");
        assert_eq!(
            report.missing[0].closest_fallback_name.as_deref(),
            Some("Foresite Capital")
        );
        assert!(report.missing[0].similarity.unwrap() >= 0.85);
    }

    #[test]
    fn missing_list_is_capped() {
        let vcs = (0..40)
            .map(|i| record(&format!("rec{i}"), json!({ "VC/Investor Name": format!("Fund {i}") })))
            .collect::<Vec<_>>();
        let report = build_status_report(&vcs, &FallbackUrlTable::default(), Utc::now());
        assert_eq!(report.without_website, 40);
        assert_eq!(report.missing.len(), 25);
        assert!(report.missing.iter().all(|m| m.closest_fallback_name.is_none()));
    }

    #[tokio::test]
    async fn status_propagates_fetch_failure_but_probe_degrades() {
        let store = MemoryRecordStore::new();
        store
            .insert(
                tables::STARTUP_SUBMISSIONS,
                record("recS1", json!({ "Startup Name": "Helix" })),
            )
            .await;
        store.fail_table(tables::VC_DATABASE).await;

        assert!(compute_vc_status(&store, &FallbackUrlTable::default()).await.is_err());

        let report = airtable_test_report(&store).await;
        assert!(!report.ok);
        assert_eq!(report.tables[0].count, Some(1));
        assert!(report.tables[1].error.is_some());
        assert_eq!(report.tables[2].count, Some(0));
    }
}
