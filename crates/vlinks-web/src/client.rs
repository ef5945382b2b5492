use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use vlinks_adapters::map_startup_analysis;
use vlinks_core::{startup_fields, tables, RemoteWrite};
use vlinks_storage::Filter;
use vlinks_sync::{client_match_views, parse_match_quality};

use crate::{auth::AuthenticatedClient, error::ApiError, AppState};

pub(crate) async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmailBody {
    #[serde(default)]
    email: String,
}

pub(crate) async fn waitlist_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EmailBody>,
) -> Result<Json<Value>, ApiError> {
    let email = body.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest("Invalid email address".to_string()));
    }
    let signup = state.services.local.add_waitlist(&email).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Successfully added to waitlist",
        "signup": signup,
    })))
}

pub(crate) async fn waitlist_count_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let count = state.services.local.waitlist_count().await?;
    Ok(Json(json!({ "count": count })))
}

pub(crate) async fn matches_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedClient(claims): AuthenticatedClient,
) -> Result<Json<Value>, ApiError> {
    let views = client_match_views(state.services.local.as_ref(), &claims.sub).await?;
    Ok(Json(json!({ "success": true, "data": views })))
}

/// 200 when the remote store took the write, 202 when it was only acknowledged here.
fn remote_write_response<T: Serialize>(write: RemoteWrite<T>, saved: &str) -> Response {
    let (status, message) = if write.persisted {
        (StatusCode::OK, saved.to_string())
    } else {
        (StatusCode::ACCEPTED, "Accepted but not yet saved to the record store".to_string())
    };
    (
        status,
        Json(json!({
            "success": true,
            "persisted": write.persisted,
            "message": message,
            "data": write.value,
        })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeedbackBody {
    #[serde(default)]
    match_quality: String,
    #[serde(default)]
    feedback_text: Option<String>,
}

pub(crate) async fn feedback_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedClient(claims): AuthenticatedClient,
    Path(match_id): Path<String>,
    Json(body): Json<FeedbackBody>,
) -> Result<Response, ApiError> {
    parse_match_quality(&body.match_quality)?;
    let service = state.services.matches();
    let email = service
        .resolve_client_email(&claims.sub, claims.email.as_deref())
        .await?;
    let write = service
        .submit_feedback(&match_id, &email, &body.match_quality, body.feedback_text.as_deref())
        .await?;
    Ok(remote_write_response(write, "Feedback submitted successfully"))
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusBody {
    #[serde(default)]
    status: String,
    #[serde(default)]
    notes: Option<String>,
}

pub(crate) async fn update_status_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedClient(claims): AuthenticatedClient,
    Path(match_id): Path<String>,
    Json(body): Json<StatusBody>,
) -> Result<Response, ApiError> {
    info!(
        client = %claims.sub,
        match_id = %match_id,
        status = %body.status,
        "outreach status update"
    );
    let write = state
        .services
        .matches()
        .update_outreach_status(&match_id, &body.status, body.notes.as_deref())
        .await?;
    Ok(remote_write_response(write, "Match status updated"))
}

#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct ResetBody {
    #[serde(default)]
    token: String,
    #[serde(default)]
    password: String,
}

/// Forward to the account backend, passing its status and JSON body through.
async fn proxy_to_backend(state: &AppState, path: &str, body: Value) -> Result<Response, ApiError> {
    let url = format!("{}{}", state.services.config.backend_url.trim_end_matches('/'), path);
    let resp = state
        .http
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|e| ApiError::internal(format!("backend request to {url} failed: {e}")))?;
    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let payload = resp.json::<Value>().await.map_err(|e| {
        warn!(%url, error = %e, "backend returned a non-json body");
        ApiError::BadGateway("Backend returned an invalid response".to_string())
    })?;
    Ok((status, Json(payload)).into_response())
}

pub(crate) async fn forgot_password_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EmailBody>,
) -> Result<Response, ApiError> {
    proxy_to_backend(&state, "/api/client/forgot-password", json!({ "email": body.email })).await
}

pub(crate) async fn reset_password_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ResetBody>,
) -> Result<Response, ApiError> {
    proxy_to_backend(&state, "/api/client/reset-password", json!(body)).await
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnalysisQuery {
    token: Option<String>,
}

fn decode_startup_token(token: &str) -> Option<String> {
    let bytes = general_purpose::STANDARD
        .decode(token.trim())
        .or_else(|_| general_purpose::URL_SAFE.decode(token.trim()))
        .ok()?;
    String::from_utf8(bytes).ok().filter(|name| !name.trim().is_empty())
}

pub(crate) async fn startup_analysis_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnalysisQuery>,
) -> Result<Json<Value>, ApiError> {
    let token = query
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Token required".to_string()))?;
    let name = decode_startup_token(&token)
        .ok_or_else(|| ApiError::BadRequest("Invalid token".to_string()))?;

    let filter = Filter::field_equals(startup_fields::STARTUP_NAME, name);
    let record = state
        .services
        .records
        .list(tables::STARTUP_SUBMISSIONS, Some(&filter))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::NotFound("Startup not found".to_string()))?;
    Ok(Json(json!(map_startup_analysis(&record))))
}
