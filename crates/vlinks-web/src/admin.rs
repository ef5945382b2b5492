//! Operator endpoints (sync, diagnostics, analysis runs) and premium-support intake.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::error;
use vlinks_sync::{
    airtable_test_report, compute_vc_status, run_analysis, submit_premium_application,
    AnalysisError, PremiumApplication,
};

use crate::{error::ApiError, AppState};

pub(crate) async fn sync_vcs_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let summary = state
        .services
        .pipeline()
        .run_once()
        .await
        .map_err(|e| ApiError::internal(format!("{e:#}")))?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Synced {} VCs", summary.upserted_vcs),
        "data": summary,
    })))
}

pub(crate) async fn vc_status_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let services = &state.services;
    let report = compute_vc_status(services.records.as_ref(), services.fallback).await?;
    Ok(Json(json!({ "success": true, "data": report })))
}

pub(crate) async fn airtable_test_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let report = airtable_test_report(state.services.records.as_ref()).await;
    Json(json!({ "success": report.ok, "data": report }))
}

pub(crate) async fn run_pdf_analysis_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let startup_ids = body
        .get("startupIds")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let run = match run_analysis(&state.services.config.analysis, &startup_ids).await {
        Ok(run) => run,
        Err(AnalysisError::Spawn(err)) => {
            error!(error = %err, "analysis process could not be started");
            return Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "message": "Failed to start PDF analysis process",
                })),
            )
                .into_response());
        }
        Err(err) => return Err(err.into()),
    };

    if run.succeeded() {
        return Ok(Json(json!({
            "success": true,
            "message": format!("PDF analysis completed for {} startup(s)", run.startup_ids.len()),
            "output": run.stdout,
            "startupIds": run.startup_ids,
        }))
        .into_response());
    }

    let message = if run.timed_out {
        "PDF analysis timed out"
    } else {
        "PDF analysis failed"
    };
    Ok((
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "success": false,
            "message": message,
            "code": run.exit_code,
            "timedOut": run.timed_out,
            "output": run.stdout,
            "errorOutput": run.stderr,
        })),
    )
        .into_response())
}

pub(crate) async fn premium_apply_handler(
    State(state): State<Arc<AppState>>,
    Json(app): Json<PremiumApplication>,
) -> Result<Json<Value>, ApiError> {
    let records = state.services.records.as_ref();
    let receipt = submit_premium_application(records, &app, Utc::now()).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Application submitted successfully",
        "applicationId": receipt.application_id,
        "priorityScore": receipt.priority_score,
    })))
}
