use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::engine::lifecycle;
use crate::models::session::{NewSession, SessionKind};
use crate::routes::engine_error_response;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ScheduleSessionRequest {
    pub tenant_id: Uuid,
    pub kind: SessionKind,
    pub teacher_id: Uuid,
    pub subscription_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    pub duration_minutes: i32,
}

#[derive(Deserialize)]
pub struct TenantScoped {
    pub tenant_id: Uuid,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub tenant_id: Uuid,
    pub actor_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct RescheduleRequest {
    pub tenant_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub new_time: OffsetDateTime,
    pub reason: String,
}

pub async fn schedule_session(
    State(state): State<AppState>,
    Json(body): Json<ScheduleSessionRequest>,
) -> Response {
    if body.duration_minutes <= 0 {
        return crate::responses::JsonResponse::bad_request("duration_minutes must be positive")
            .into_response();
    }
    let new = NewSession {
        tenant_id: body.tenant_id,
        kind: body.kind,
        teacher_id: body.teacher_id,
        subscription_id: body.subscription_id,
        scheduled_at: body.scheduled_at,
        duration_minutes: body.duration_minutes,
    };
    match lifecycle::schedule(&state, new, OffsetDateTime::now_utc()).await {
        Ok(session) => (
            axum::http::StatusCode::OK,
            Json(json!({ "success": true, "session": session })),
        )
            .into_response(),
        Err(err) => engine_error_response(err),
    }
}

pub async fn activate_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<TenantScoped>,
) -> Response {
    match lifecycle::activate(&state, body.tenant_id, session_id, OffsetDateTime::now_utc()).await
    {
        Ok(session) => (
            axum::http::StatusCode::OK,
            Json(json!({ "success": true, "session": session })),
        )
            .into_response(),
        Err(err) => engine_error_response(err),
    }
}

pub async fn complete_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<TenantScoped>,
) -> Response {
    match lifecycle::complete(&state, body.tenant_id, session_id, OffsetDateTime::now_utc()).await
    {
        Ok(session) => (
            axum::http::StatusCode::OK,
            Json(json!({ "success": true, "session": session })),
        )
            .into_response(),
        Err(err) => engine_error_response(err),
    }
}

pub async fn cancel_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<CancelRequest>,
) -> Response {
    match lifecycle::cancel(
        &state,
        body.tenant_id,
        session_id,
        body.reason.as_deref(),
        body.actor_id,
        OffsetDateTime::now_utc(),
    )
    .await
    {
        Ok(session) => (
            axum::http::StatusCode::OK,
            Json(json!({ "success": true, "session": session })),
        )
            .into_response(),
        Err(err) => engine_error_response(err),
    }
}

pub async fn reschedule_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<RescheduleRequest>,
) -> Response {
    match lifecycle::reschedule(
        &state,
        body.tenant_id,
        session_id,
        body.new_time,
        &body.reason,
        OffsetDateTime::now_utc(),
    )
    .await
    {
        Ok(session) => (
            axum::http::StatusCode::OK,
            Json(json!({ "success": true, "session": session })),
        )
            .into_response(),
        Err(err) => engine_error_response(err),
    }
}

pub async fn pause_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<TenantScoped>,
) -> Response {
    match lifecycle::pause(&state, body.tenant_id, session_id).await {
        Ok(session) => (
            axum::http::StatusCode::OK,
            Json(json!({ "success": true, "session": session })),
        )
            .into_response(),
        Err(err) => engine_error_response(err),
    }
}

pub async fn resume_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<TenantScoped>,
) -> Response {
    match lifecycle::resume(&state, body.tenant_id, session_id).await {
        Ok(session) => (
            axum::http::StatusCode::OK,
            Json(json!({ "success": true, "session": session })),
        )
            .into_response(),
        Err(err) => engine_error_response(err),
    }
}
