use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::engine::renewal;
use crate::models::attendance_event::{AttendanceEventKind, NewAttendanceEvent};
use crate::responses::JsonResponse;
use crate::state::AppState;
use crate::utils::signature;

#[derive(Deserialize)]
struct MeetingEventPayload {
    events: Vec<MeetingEvent>,
}

#[derive(Deserialize)]
struct MeetingEvent {
    tenant_id: Uuid,
    session_id: Uuid,
    participant_id: Uuid,
    kind: AttendanceEventKind,
    #[serde(with = "time::serde::rfc3339")]
    occurred_at: OffsetDateTime,
    source_ref: Option<String>,
}

#[derive(Deserialize)]
struct PaymentResultPayload {
    tenant_id: Uuid,
    subscription_id: Uuid,
    success: bool,
    reference: Option<String>,
    failure_reason: Option<String>,
}

fn verify_signature(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(), Response> {
    let ts = headers
        .get("x-signature-ts")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);
    let provided = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if provided.is_empty() {
        return Err(JsonResponse::unauthorized("Missing webhook signature").into_response());
    }

    let now = OffsetDateTime::now_utc().unix_timestamp();
    if !signature::verify(&state.config.webhook_secret, ts, body, provided, now) {
        return Err(JsonResponse::unauthorized("Invalid webhook signature").into_response());
    }
    Ok(())
}

/// Inbound join/leave stream from the meeting provider. Events land in the
/// append-only store; aggregation happens at finalization, so delivery
/// order and duplicates do not matter here.
pub async fn meeting_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = verify_signature(&state, &headers, &body) {
        return resp;
    }

    let payload: MeetingEventPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(err) => {
            return JsonResponse::bad_request(&format!("Invalid payload: {err}")).into_response();
        }
    };

    let mut accepted = 0;
    let mut skipped = 0;
    for event in payload.events {
        // Only accept events for sessions we actually know about.
        let session = match state
            .sessions
            .find_session(event.tenant_id, event.session_id)
            .await
        {
            Ok(Some(s)) => s,
            Ok(None) => {
                tracing::warn!(
                    session_id = %event.session_id,
                    "meeting event for unknown session; skipped"
                );
                skipped += 1;
                continue;
            }
            Err(err) => {
                tracing::error!(error = %err, "meeting event lookup failed");
                return JsonResponse::server_error("Failed to record events").into_response();
            }
        };

        let stored = state
            .attendance
            .append_event(NewAttendanceEvent {
                tenant_id: session.tenant_id,
                session_id: session.id,
                participant_id: event.participant_id,
                kind: event.kind,
                occurred_at: event.occurred_at,
                source_ref: event.source_ref,
            })
            .await;
        if let Err(err) = stored {
            tracing::error!(error = %err, "failed to append attendance event");
            return JsonResponse::server_error("Failed to record events").into_response();
        }

        // Lazily make sure the record row exists so the participant shows
        // up even before finalization.
        if let Err(err) = state
            .attendance
            .ensure_record(session.tenant_id, session.id, event.participant_id)
            .await
        {
            tracing::error!(error = %err, "failed to ensure attendance record");
        }
        accepted += 1;
    }

    (
        axum::http::StatusCode::OK,
        Json(json!({ "success": true, "accepted": accepted, "skipped": skipped })),
    )
        .into_response()
}

/// Charge results reported back by the payment gateway (asynchronous
/// confirmations for purchases and out-of-band charges).
pub async fn payment_results(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = verify_signature(&state, &headers, &body) {
        return resp;
    }

    let payload: PaymentResultPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(err) => {
            return JsonResponse::bad_request(&format!("Invalid payload: {err}")).into_response();
        }
    };

    let now = OffsetDateTime::now_utc();
    match renewal::handle_charge_result(
        &state,
        payload.tenant_id,
        payload.subscription_id,
        payload.success,
        payload.reference.as_deref(),
        payload.failure_reason.as_deref(),
        now,
    )
    .await
    {
        Ok(_) => JsonResponse::success("Charge result recorded").into_response(),
        Err(crate::engine::EngineError::NotFound) => {
            JsonResponse::not_found("Subscription not found").into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to handle charge result");
            JsonResponse::server_error("Failed to handle charge result").into_response()
        }
    }
}
