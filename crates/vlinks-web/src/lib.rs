//! Axum HTTP API for VentriLinks: client portal, waitlist, admin sync and diagnostics.

mod admin;
pub mod auth;
mod client;
pub mod error;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    routing::{get, patch, post},
    Router,
};
use tokio::net::TcpListener;
use tracing::info;
use vlinks_sync::{AppConfig, Services};

pub use auth::{
    decode_client_token, encode_client_token, AuthError, AuthenticatedClient, ClientClaims,
};
pub use error::ApiError;

pub const CRATE_NAME: &str = "vlinks-web";

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(services: Services) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(services.config.http_timeout_secs))
            .build()
            .context("building backend http client")?;
        Ok(Self { services, http })
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(client::health_handler))
        .route("/api/waitlist", post(client::waitlist_handler))
        .route("/api/waitlist/count", get(client::waitlist_count_handler))
        .route("/api/client/matches", get(client::matches_handler))
        .route("/api/client/matches/{match_id}/feedback", post(client::feedback_handler))
        .route(
            "/api/client/matches/{match_id}/update-status",
            patch(client::update_status_handler),
        )
        .route("/api/client/forgot-password", post(client::forgot_password_handler))
        .route("/api/client/reset-password", post(client::reset_password_handler))
        .route("/api/startup/analysis", get(client::startup_analysis_handler))
        .route("/api/admin/sync-vcs", post(admin::sync_vcs_handler))
        .route("/api/admin/vc-status", get(admin::vc_status_handler))
        .route("/api/admin/airtable-test", get(admin::airtable_test_handler))
        .route("/api/admin/run-pdf-analysis", post(admin::run_pdf_analysis_handler))
        .route("/api/premium-support/apply", post(admin::premium_apply_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(services: Services) -> anyhow::Result<()> {
    let port = services.config.web_port;
    let scheduler = services.maybe_build_scheduler().await?;
    if let Some(sched) = &scheduler {
        sched.start().await.context("starting scheduler")?;
        info!(cron = %services.config.sync_cron, "vc sync scheduler started");
    }

    let state = AppState::new(services)?;
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "http api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let services = Services::from_config(AppConfig::from_env()).await?;
    serve(services).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        Json,
    };
    use base64::{engine::general_purpose, Engine as _};
    use chrono::{Duration as ChronoDuration, Utc};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use vlinks_adapters::FallbackUrlTable;
    use vlinks_core::{tables, ClientMatch, FieldMap, OutreachStatus, RemoteRecord, VcInvestor};
    use vlinks_storage::{LocalStore, MemoryRecordStore, MemoryStore, UnconfiguredRecordStore};

    const SECRET: &str = "test-secret";

    struct Harness {
        app: Router,
        remote: Arc<MemoryRecordStore>,
        local: Arc<MemoryStore>,
    }

    fn config(backend_url: &str) -> AppConfig {
        let mut config = AppConfig::from_env();
        config.jwt_secret = SECRET.to_string();
        config.backend_url = backend_url.to_string();
        config.http_timeout_secs = 5;
        config
    }

    fn harness_with_backend(backend_url: &str) -> Harness {
        let remote = Arc::new(MemoryRecordStore::new());
        let local = Arc::new(MemoryStore::new());
        let fallback: &'static FallbackUrlTable = Box::leak(Box::new(FallbackUrlTable::default()));
        let services = Services::new(config(backend_url), remote.clone(), local.clone(), fallback);
        Harness {
            app: app(AppState::new(services).unwrap()),
            remote,
            local,
        }
    }

    fn harness() -> Harness {
        harness_with_backend("http://127.0.0.1:9")
    }

    fn bearer(email: Option<&str>) -> String {
        let claims = ClientClaims {
            sub: "recS1".into(),
            email: email.map(str::to_string),
            exp: 4_102_444_800,
        };
        format!("Bearer {}", encode_client_token(&claims, SECRET).unwrap())
    }

    fn request(
        method: Method,
        uri: &str,
        body: Option<Value>,
        auth: Option<&str>,
    ) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn record(id: &str, fields: Value) -> RemoteRecord {
        let fields: FieldMap = serde_json::from_value(fields).unwrap();
        RemoteRecord::new(id, fields)
    }

    fn client_match(id: &str, vc: &str, unlocked: bool, age_days: i64) -> ClientMatch {
        ClientMatch {
            id: id.into(),
            client_id: "recS1".into(),
            vc_investor_id: vc.into(),
            match_reasoning: "shared oncology thesis".into(),
            portfolio_reasoning: String::new(),
            client_access: unlocked,
            assigned_at: Utc::now() - ChronoDuration::days(age_days),
            notes: None,
            outreach_status: OutreachStatus::NotContacted,
            outreach_notes: None,
        }
    }

    async fn seed_match_record(remote: &MemoryRecordStore) {
        remote
            .insert(
                tables::MATCHES,
                record(
                    "abc",
                    json!({
                        "Startup Email": "founder@helix.bio",
                        "Outreach Status": "not_contacted",
                        "Last Updated": "2026-01-01T00:00:00.000Z"
                    }),
                ),
            )
            .await;
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let h = harness();
        let (status, body) = send(&h.app, request(Method::GET, "/api/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn waitlist_rejects_duplicates_and_counts() {
        let h = harness();
        let signup = json!({ "email": "founder@helix.bio" });
        let (status, body) =
            send(&h.app, request(Method::POST, "/api/waitlist", Some(signup.clone()), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, body) =
            send(&h.app, request(Method::POST, "/api/waitlist", Some(signup), None)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["message"], "Email already registered for waitlist");

        let (status, _) = send(
            &h.app,
            request(Method::POST, "/api/waitlist", Some(json!({ "email": "nope" })), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = send(&h.app, request(Method::GET, "/api/waitlist/count", None, None)).await;
        assert_eq!(body["count"], 1);
    }

    #[tokio::test]
    async fn matches_require_a_valid_token() {
        let h = harness();
        let (status, _) =
            send(&h.app, request(Method::GET, "/api/client/matches", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(
            &h.app,
            request(Method::GET, "/api/client/matches", None, Some("Bearer not-a-jwt")),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn matches_are_unlocked_newest_first_with_null_vc_for_dangling_refs() {
        let h = harness();
        h.local
            .upsert_vc(&VcInvestor {
                external_id: "recV1".into(),
                name: "Forbion".into(),
                firm: "Forbion".into(),
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
        for m in [
            client_match("m-old", "recV1", true, 5),
            client_match("m-locked", "recV1", false, 1),
            client_match("m-new", "recGone", true, 0),
        ] {
            h.local.upsert_client_match(&m).await.unwrap();
        }

        let (status, body) = send(
            &h.app,
            request(Method::GET, "/api/client/matches", None, Some(&bearer(None))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["id"], "m-new");
        assert!(data[0]["vcInvestor"]["name"].is_null());
        assert_eq!(data[1]["vcInvestor"]["website"], "https://forbion.com");
        assert!(data.iter().all(|m| m["isUnlocked"] == true));
    }

    #[tokio::test]
    async fn feedback_validates_quality_before_touching_the_record_store() {
        let h = harness();
        seed_match_record(&h.remote).await;
        let (status, _) = send(
            &h.app,
            request(
                Method::POST,
                "/api/client/matches/abc/feedback",
                Some(json!({ "matchQuality": "Unknown" })),
                Some(&bearer(Some("founder@helix.bio"))),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(h.remote.writes().await.is_empty());

        let (status, body) = send(
            &h.app,
            request(
                Method::POST,
                "/api/client/matches/abc/feedback",
                Some(json!({ "matchQuality": "Good Match", "feedbackText": "great fit" })),
                Some(&bearer(Some("founder@helix.bio"))),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["persisted"], true);
        assert_eq!(body["data"]["matchQuality"], "Good Match");
        assert_eq!(h.remote.writes().await.len(), 1);
    }

    #[tokio::test]
    async fn feedback_not_persisted_is_accepted() {
        let h = harness();
        seed_match_record(&h.remote).await;
        h.remote.fail_writes(true).await;
        let (status, body) = send(
            &h.app,
            request(
                Method::POST,
                "/api/client/matches/abc/feedback",
                Some(json!({ "matchQuality": "Maybe" })),
                Some(&bearer(Some("founder@helix.bio"))),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["persisted"], false);
    }

    #[tokio::test]
    async fn feedback_on_a_record_edited_mid_request_is_a_conflict() {
        let h = harness();
        seed_match_record(&h.remote).await;
        let mut edit = FieldMap::new();
        edit.insert("Last Updated".into(), json!("2026-01-02T09:30:00.000Z"));
        h.remote.edit_before_get(tables::MATCHES, "abc", edit).await;

        let (status, body) = send(
            &h.app,
            request(
                Method::POST,
                "/api/client/matches/abc/feedback",
                Some(json!({ "matchQuality": "Good Match" })),
                Some(&bearer(Some("founder@helix.bio"))),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
        assert!(h.remote.writes().await.is_empty());
    }

    #[tokio::test]
    async fn match_writes_without_record_store_config_are_server_errors() {
        let fallback: &'static FallbackUrlTable = Box::leak(Box::new(FallbackUrlTable::default()));
        let services = Services::new(
            config("http://127.0.0.1:9"),
            Arc::new(UnconfiguredRecordStore),
            Arc::new(MemoryStore::new()),
            fallback,
        );
        let app = app(AppState::new(services).unwrap());

        let (status, body) = send(
            &app,
            request(
                Method::PATCH,
                "/api/client/matches/abc/update-status",
                Some(json!({ "status": "deal_closed" })),
                Some(&bearer(None)),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "record store configuration missing");

        let (status, body) = send(
            &app,
            request(
                Method::POST,
                "/api/client/matches/abc/feedback",
                Some(json!({ "matchQuality": "Maybe" })),
                Some(&bearer(Some("founder@helix.bio"))),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "record store configuration missing");
    }

    #[tokio::test]
    async fn update_status_accepts_any_listed_status() {
        let h = harness();
        seed_match_record(&h.remote).await;
        let (status, body) = send(
            &h.app,
            request(
                Method::PATCH,
                "/api/client/matches/abc/update-status",
                Some(json!({ "status": "deal_closed" })),
                Some(&bearer(None)),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "deal_closed");

        let (status, _) = send(
            &h.app,
            request(
                Method::PATCH,
                "/api/client/matches/abc/update-status",
                Some(json!({ "status": "won" })),
                Some(&bearer(None)),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn vc_status_handles_an_empty_directory() {
        let h = harness();
        let (status, body) =
            send(&h.app, request(Method::GET, "/api/admin/vc-status", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["totalVcs"], 0);
        assert_eq!(body["data"]["websiteCompletionRate"], 0);
    }

    #[tokio::test]
    async fn unconfigured_record_store_is_a_server_error() {
        let fallback: &'static FallbackUrlTable = Box::leak(Box::new(FallbackUrlTable::default()));
        let services = Services::new(
            config("http://127.0.0.1:9"),
            Arc::new(UnconfiguredRecordStore),
            Arc::new(MemoryStore::new()),
            fallback,
        );
        let app = app(AppState::new(services).unwrap());
        let (status, body) =
            send(&app, request(Method::GET, "/api/admin/vc-status", None, None)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "record store configuration missing");

        let (status, body) =
            send(&app, request(Method::GET, "/api/admin/airtable-test", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["data"]["tables"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn sync_endpoint_populates_local_store() {
        let h = harness();
        h.remote
            .insert(
                tables::VC_DATABASE,
                record(
                    "recV1",
                    json!({ "VC/Investor Name": "Forbion", "Website URL": "https://forbion.com" }),
                ),
            )
            .await;
        let (status, body) =
            send(&h.app, request(Method::POST, "/api/admin/sync-vcs", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["upsertedVcs"], 1);
        assert!(h.local.get_vc("recV1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn pdf_analysis_requires_startup_ids() {
        let h = harness();
        let (status, _) = send(
            &h.app,
            request(
                Method::POST,
                "/api/admin/run-pdf-analysis",
                Some(json!({ "startupIds": [] })),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn startup_analysis_decodes_token_and_filters_by_name() {
        let h = harness();
        h.remote
            .insert(
                tables::STARTUP_SUBMISSIONS,
                record("recS1", json!({ "Startup Name": "Helix Bio", "Overall Score": 8 })),
            )
            .await;
        let token = general_purpose::STANDARD.encode("Helix Bio");
        let (status, body) = send(
            &h.app,
            request(Method::GET, &format!("/api/startup/analysis?token={token}"), None, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["startupName"], "Helix Bio");
        assert_eq!(body["overallScore"], 8.0);

        let other = general_purpose::STANDARD.encode("Unknown Co");
        let (status, _) = send(
            &h.app,
            request(Method::GET, &format!("/api/startup/analysis?token={other}"), None, None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) =
            send(&h.app, request(Method::GET, "/api/startup/analysis", None, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn premium_application_requires_core_fields() {
        let h = harness();
        let (status, body) = send(
            &h.app,
            request(
                Method::POST,
                "/api/premium-support/apply",
                Some(json!({ "companyName": "Helix Bio", "email": "sam@helix.bio" })),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "founderName is required");

        let (status, body) = send(
            &h.app,
            request(
                Method::POST,
                "/api/premium-support/apply",
                Some(json!({
                    "companyName": "Helix Bio",
                    "founderName": "Sam Rivera",
                    "email": "sam@helix.bio",
                    "currentStage": "seed",
                    "fundraisingTimeline": "short-term"
                })),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["priorityScore"], 4);
        assert!(body["applicationId"].as_str().is_some());
    }

    #[tokio::test]
    async fn password_requests_pass_backend_status_through() {
        async fn account_backend(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "success": false, "message": "No account", "echo": body["email"] })),
            )
        }
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let backend = Router::new().route("/api/client/forgot-password", post(account_backend));
            axum::serve(listener, backend).await.unwrap();
        });

        let h = harness_with_backend(&format!("http://{addr}"));
        let (status, body) = send(
            &h.app,
            request(
                Method::POST,
                "/api/client/forgot-password",
                Some(json!({ "email": "founder@helix.bio" })),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["echo"], "founder@helix.bio");
    }
}
