//! Client-facing match reads (local join) and writes (remote feedback/outreach).

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use thiserror::Error;
use tracing::{info, warn};
use vlinks_core::{
    match_fields, startup_fields, tables, ClientMatchView, FeedbackAck, FieldMap, MatchQuality,
    OutreachStatus, OutreachUpdate, RemoteWrite,
};
use vlinks_storage::{FetchError, Filter, LocalStore, RecordStore, StoreError};

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Upstream(#[from] FetchError),
}

/// Unlocked matches for `client_id`, newest first, each with its VC (or an all-null VC).
pub async fn client_match_views(
    local: &dyn LocalStore,
    client_id: &str,
) -> Result<Vec<ClientMatchView>, StoreError> {
    let joined = local.matches_for_client(client_id).await?;
    Ok(joined
        .into_iter()
        .map(|j| ClientMatchView::from_join(j.client_match, j.vc))
        .collect())
}

/// Closed-set check, done before any remote call.
pub fn parse_match_quality(raw: &str) -> Result<MatchQuality, MatchError> {
    if raw.trim().is_empty() {
        return Err(MatchError::Validation("match quality is required".to_string()));
    }
    raw.parse::<MatchQuality>()
        .map_err(|_| MatchError::Validation("invalid match quality option".to_string()))
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Remote failures after validation degrade to `persisted = false`, except a missing
/// record store configuration, which no retry can fix.
fn degrade<T>(
    value: T,
    err: FetchError,
    match_id: &str,
    step: &str,
) -> Result<RemoteWrite<T>, MatchError> {
    if matches!(err, FetchError::NotConfigured) {
        return Err(err.into());
    }
    warn!(match_id, step, error = %err, "remote write not persisted");
    Ok(RemoteWrite::not_persisted(value))
}

#[derive(Clone)]
pub struct MatchService {
    records: Arc<dyn RecordStore>,
}

impl MatchService {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// Prefer the address carried by the token; otherwise read the client's submission.
    pub async fn resolve_client_email(
        &self,
        client_id: &str,
        token_email: Option<&str>,
    ) -> Result<String, MatchError> {
        if let Some(email) = token_email.map(str::trim).filter(|e| !e.is_empty()) {
            return Ok(email.to_string());
        }
        let startup = match self.records.get(tables::STARTUP_SUBMISSIONS, client_id).await {
            Ok(record) => record,
            Err(FetchError::NotFound { .. }) => {
                return Err(MatchError::NotFound("client company not found".to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        startup
            .text(startup_fields::EMAIL)
            .map(|e| e.trim().to_string())
            .ok_or_else(|| MatchError::Validation("no email on file for client".to_string()))
    }

    /// Search by (match id, client email), re-read by id, then patch.
    ///
    /// The re-read rejects the write with `Conflict` when `Last Updated` moved since the
    /// search. The patch itself is unconditional, so an edit landing between the re-read
    /// and the patch is overwritten.
    pub async fn submit_feedback(
        &self,
        match_id: &str,
        client_email: &str,
        match_quality: &str,
        feedback_text: Option<&str>,
    ) -> Result<RemoteWrite<FeedbackAck>, MatchError> {
        let quality = parse_match_quality(match_quality)?;

        let now = now_rfc3339();
        let ack = FeedbackAck {
            match_id: match_id.to_string(),
            match_quality: quality,
            feedback_text: feedback_text.unwrap_or_default().to_string(),
            submitted_at: Utc::now(),
        };

        let filter = Filter::And(vec![
            Filter::RecordId(match_id.to_string()),
            Filter::field_equals_ignore_case(match_fields::STARTUP_EMAIL, client_email),
        ]);
        let found = match self.records.list(tables::MATCHES, Some(&filter)).await {
            Ok(found) => found,
            Err(err) => return degrade(ack, err, match_id, "feedback lookup"),
        };
        let Some(seen) = found.into_iter().next() else {
            return Err(MatchError::NotFound(format!("match {match_id} not found for client")));
        };

        let current = match self.records.get(tables::MATCHES, &seen.id).await {
            Ok(current) => current,
            Err(err) => return degrade(ack, err, match_id, "feedback re-read"),
        };
        if current.text(match_fields::LAST_UPDATED) != seen.text(match_fields::LAST_UPDATED) {
            return Err(MatchError::Conflict(format!(
                "match {match_id} changed while feedback was being saved"
            )));
        }

        let mut fields = FieldMap::new();
        fields.insert(match_fields::STARTUP_SAYS_GOOD.to_string(), quality.as_str().into());
        fields.insert(match_fields::STARTUP_FEEDBACK.to_string(), ack.feedback_text.clone().into());
        fields.insert(match_fields::LAST_UPDATED.to_string(), now.into());

        match self.records.update(tables::MATCHES, &seen.id, fields).await {
            Ok(_) => {
                info!(match_id, quality = quality.as_str(), "feedback saved");
                Ok(RemoteWrite::persisted(ack))
            }
            Err(err) => degrade(ack, err, match_id, "feedback patch"),
        }
    }

    /// Any of the nine statuses is accepted from any prior status.
    pub async fn update_outreach_status(
        &self,
        match_id: &str,
        status: &str,
        notes: Option<&str>,
    ) -> Result<RemoteWrite<OutreachUpdate>, MatchError> {
        let status = status
            .parse::<OutreachStatus>()
            .map_err(|_| MatchError::Validation("invalid status".to_string()))?;
        let notes = notes.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string);
        let last_updated = now_rfc3339();

        let mut fields = FieldMap::new();
        fields.insert(match_fields::OUTREACH_STATUS.to_string(), status.as_str().into());
        fields.insert(match_fields::LAST_UPDATED.to_string(), last_updated.clone().into());
        if let Some(notes) = &notes {
            fields.insert(match_fields::OUTREACH_NOTES.to_string(), notes.clone().into());
        }

        let update = OutreachUpdate {
            match_id: match_id.to_string(),
            status,
            last_updated,
            notes,
        };
        match self.records.update(tables::MATCHES, match_id, fields).await {
            Ok(_) => {
                info!(match_id, status = status.as_str(), "outreach status updated");
                Ok(RemoteWrite::persisted(update))
            }
            Err(FetchError::NotFound { .. }) => {
                Err(MatchError::NotFound(format!("match {match_id} not found")))
            }
            Err(err) => degrade(update, err, match_id, "outreach status patch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::record;
    use chrono::Duration;
    use serde_json::json;
    use vlinks_core::{ClientMatch, VcInvestor};
    use vlinks_storage::{MemoryRecordStore, MemoryStore, UnconfiguredRecordStore};

    async fn remote_with_match() -> Arc<MemoryRecordStore> {
        let store = Arc::new(MemoryRecordStore::new());
        store
            .insert(
                tables::MATCHES,
                record(
                    "abc",
                    json!({
                        "Startup Email": "Founder@Helix.bio",
                        "Outreach Status": "not_contacted",
                        "Last Updated": "2026-01-01T00:00:00.000Z"
                    }),
                ),
            )
            .await;
        store
            .insert(
                tables::STARTUP_SUBMISSIONS,
                record("recS1", json!({ "Startup Name": "Helix", "Email": "founder@helix.bio" })),
            )
            .await;
        store
    }

    #[tokio::test]
    async fn unknown_quality_is_rejected_without_remote_calls() {
        let remote = remote_with_match().await;
        let service = MatchService::new(remote.clone());
        let err = service
            .submit_feedback("abc", "founder@helix.bio", "Unknown", None)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::Validation(_)));
        assert!(remote.writes().await.is_empty());
    }

    #[tokio::test]
    async fn feedback_patches_matching_record_case_insensitively() {
        let remote = remote_with_match().await;
        let service = MatchService::new(remote.clone());
        let write = service
            .submit_feedback("abc", "founder@helix.bio", "Good Match", Some("strong fit"))
            .await
            .unwrap();
        assert!(write.persisted);
        assert_eq!(write.value.match_quality, MatchQuality::GoodMatch);

        let writes = remote.writes().await;
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].fields["Startup Says Good"], json!("Good Match"));
        assert_eq!(writes[0].fields["Startup Feedback"], json!("strong fit"));
        assert!(writes[0].fields.contains_key("Last Updated"));
    }

    #[tokio::test]
    async fn feedback_for_another_clients_match_is_not_found() {
        let service = MatchService::new(remote_with_match().await);
        let err = service
            .submit_feedback("abc", "someone@else.bio", "Maybe", None)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn failed_remote_write_is_acknowledged_but_not_persisted() {
        let remote = remote_with_match().await;
        remote.fail_writes(true).await;
        let service = MatchService::new(remote.clone());
        let write = service
            .submit_feedback("abc", "founder@helix.bio", "Poor Match", None)
            .await
            .unwrap();
        assert!(!write.persisted);

        let update = service.update_outreach_status("abc", "email_sent", None).await.unwrap();
        assert!(!update.persisted);
    }

    #[tokio::test]
    async fn feedback_conflicts_when_record_moves_after_search() {
        let remote = remote_with_match().await;
        let mut edit = FieldMap::new();
        edit.insert("Last Updated".into(), json!("2026-01-02T09:30:00.000Z"));
        remote.edit_before_get(tables::MATCHES, "abc", edit).await;

        let service = MatchService::new(remote.clone());
        let err = service
            .submit_feedback("abc", "founder@helix.bio", "Maybe", None)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::Conflict(_)));
        assert!(remote.writes().await.is_empty());
    }

    #[tokio::test]
    async fn unconfigured_record_store_fails_writes_instead_of_degrading() {
        let service = MatchService::new(Arc::new(UnconfiguredRecordStore));
        let err = service
            .submit_feedback("abc", "founder@helix.bio", "Maybe", None)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::Upstream(FetchError::NotConfigured)));

        let err = service
            .update_outreach_status("abc", "deal_closed", None)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::Upstream(FetchError::NotConfigured)));
    }

    #[tokio::test]
    async fn any_status_is_reachable_from_not_contacted() {
        let remote = remote_with_match().await;
        let service = MatchService::new(remote.clone());
        let update = service
            .update_outreach_status("abc", "deal_closed", Some("  signed term sheet "))
            .await
            .unwrap();
        assert!(update.persisted);
        assert_eq!(update.value.status, OutreachStatus::DealClosed);
        assert_eq!(update.value.notes.as_deref(), Some("signed term sheet"));

        let stored = remote.get(tables::MATCHES, "abc").await.unwrap();
        assert_eq!(stored.text("Outreach Status").as_deref(), Some("deal_closed"));

        let err = service.update_outreach_status("abc", "closed", None).await.unwrap_err();
        assert!(matches!(err, MatchError::Validation(_)));
        let err = service.update_outreach_status("nope", "passed", None).await.unwrap_err();
        assert!(matches!(err, MatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn client_email_prefers_token_claim_then_submission_record() {
        let service = MatchService::new(remote_with_match().await);
        assert_eq!(
            service.resolve_client_email("recS1", Some("claim@helix.bio")).await.unwrap(),
            "claim@helix.bio"
        );
        assert_eq!(
            service.resolve_client_email("recS1", None).await.unwrap(),
            "founder@helix.bio"
        );
        assert!(matches!(
            service.resolve_client_email("recMissing", None).await.unwrap_err(),
            MatchError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn views_never_include_locked_matches() {
        let local = MemoryStore::new();
        local
            .upsert_vc(&VcInvestor {
                external_id: "recV1".into(),
                name: "Forbion".into(),
                firm: String::new(),
                email: String::new(),
                phone: String::new(),
                linkedin: String::new(),
                website: Some("https://forbion.com".into()),
                investment_focus: String::new(),
                investment_stage: String::new(),
                geography: String::new(),
                portfolio_size: String::new(),
                description: String::new(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        for (id, unlocked, age) in [("m1", true, 2), ("m2", false, 1), ("m3", true, 0)] {
            local
                .upsert_client_match(&ClientMatch {
                    id: id.into(),
                    client_id: "recS1".into(),
                    vc_investor_id: if id == "m3" { "recGone".into() } else { "recV1".into() },
                    match_reasoning: String::new(),
                    portfolio_reasoning: String::new(),
                    client_access: unlocked,
                    assigned_at: Utc::now() - Duration::days(age),
                    notes: None,
                    outreach_status: OutreachStatus::NotContacted,
                    outreach_notes: None,
                })
                .await
                .unwrap();
        }
        let views = client_match_views(&local, "recS1").await.unwrap();
        assert!(views.iter().all(|v| v.is_unlocked));
        assert_eq!(views.iter().map(|v| v.id.as_str()).collect::<Vec<_>>(), vec!["m3", "m1"]);
        assert_eq!(views[0].vc_investor.name, None);
        assert_eq!(views[1].vc_name.as_deref(), Some("Forbion"));
    }
}
