use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::attendance_record::{AttendanceOverride, AttendanceStatus};
use crate::responses::JsonResponse;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct OverrideRequest {
    pub tenant_id: Uuid,
    pub actor_id: Uuid,
    pub status: AttendanceStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub join_time: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub leave_time: Option<OffsetDateTime>,
    pub reason: String,
}

/// Staff correction of an attendance verdict. Once applied, the aggregator
/// never overwrites this record's status again.
pub async fn override_attendance(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
    Json(body): Json<OverrideRequest>,
) -> Response {
    if body.reason.trim().is_empty() {
        return JsonResponse::bad_request("Override reason is required").into_response();
    }
    if body.status == AttendanceStatus::Pending {
        return JsonResponse::bad_request("Cannot override to pending").into_response();
    }

    let ov = AttendanceOverride {
        join_time: body.join_time,
        leave_time: body.leave_time,
        status: body.status,
        reason: body.reason,
        actor: body.actor_id,
    };

    match state
        .attendance
        .apply_override(body.tenant_id, record_id, &ov, OffsetDateTime::now_utc())
        .await
    {
        Ok(Some(record)) => {
            tracing::info!(
                record_id = %record.id,
                actor = %body.actor_id,
                status = record.attendance_status.as_str(),
                "attendance manually overridden"
            );
            (
                axum::http::StatusCode::OK,
                Json(json!({ "success": true, "record": record })),
            )
                .into_response()
        }
        Ok(None) => JsonResponse::not_found("Attendance record not found").into_response(),
        Err(err) => {
            tracing::error!(error = %err, "attendance override failed");
            JsonResponse::server_error("Failed to apply override").into_response()
        }
    }
}
