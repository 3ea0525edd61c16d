pub mod attendance;
pub mod sessions;
pub mod subscriptions;
pub mod webhooks;

use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;

use crate::engine::EngineError;
use crate::responses::JsonResponse;
use crate::state::AppState;

/// Map a typed engine rejection onto the HTTP envelope. Transition and
/// precondition violations carry their machine code so clients can react
/// without parsing the message.
pub fn engine_error_response(err: EngineError) -> Response {
    let code = err.code();
    match &err {
        EngineError::NotFound => JsonResponse::not_found("Not found").into_response(),
        EngineError::InvalidTransition { .. }
        | EngineError::PastSchedule { .. }
        | EngineError::NotReschedulable { .. }
        | EngineError::SubscriptionUnusable { .. }
        | EngineError::ChargeFailed { .. } => {
            JsonResponse::unprocessable_with_code(&err.to_string(), code).into_response()
        }
        EngineError::Db(db_err) => {
            tracing::error!(error = %db_err, "database error");
            JsonResponse::server_error("Internal error").into_response()
        }
    }
}

pub fn api_router(state: AppState) -> Router {
    let session_routes = Router::new()
        .route("/", post(sessions::schedule_session))
        .route("/{session_id}/activate", post(sessions::activate_session))
        .route("/{session_id}/complete", post(sessions::complete_session))
        .route("/{session_id}/cancel", post(sessions::cancel_session))
        .route("/{session_id}/reschedule", post(sessions::reschedule_session))
        .route("/{session_id}/pause", post(sessions::pause_session))
        .route("/{session_id}/resume", post(sessions::resume_session));

    let subscription_routes = Router::new()
        .route("/", post(subscriptions::purchase_subscription))
        .route(
            "/{subscription_id}/reactivate",
            post(subscriptions::reactivate_subscription),
        )
        .route(
            "/{subscription_id}/cancel",
            post(subscriptions::cancel_subscription),
        );

    let attendance_routes = Router::new().route(
        "/{record_id}/override",
        post(attendance::override_attendance),
    );

    let webhook_routes = Router::new()
        .route("/meeting-events", post(webhooks::meeting_events))
        .route("/payment-results", post(webhooks::payment_results));

    Router::new()
        .nest("/api/sessions", session_routes)
        .nest("/api/subscriptions", subscription_routes)
        .nest("/api/attendance", attendance_routes)
        .nest("/api/webhooks", webhook_routes)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use time::macros::datetime;
    use time::OffsetDateTime;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::config::{Config, Policy};
    use crate::db::mock_db::MockDb;
    use crate::models::session::{Session, SessionKind, SessionStatus};
    use crate::services::meetings::MockMeetingProvider;
    use crate::services::notifier::MockNotifier;
    use crate::services::payment::MockPaymentGateway;
    use crate::state::AppState;
    use crate::utils::signature;

    fn test_state() -> (AppState, Arc<MockDb>) {
        let db = Arc::new(MockDb::new());
        let state = AppState {
            sessions: db.clone(),
            subscriptions: db.clone(),
            attendance: db.clone(),
            gateway: Arc::new(MockPaymentGateway::succeeding()),
            notifier: Arc::new(MockNotifier::new()),
            meetings: Arc::new(MockMeetingProvider::new()),
            config: Arc::new(Config {
                database_url: String::new(),
                webhook_secret: "test-secret".into(),
                allowed_origin: "*".into(),
                payment_gateway_url: String::new(),
                payment_gateway_key: String::new(),
                meeting_provider_url: String::new(),
                meeting_provider_key: String::new(),
                notifier_url: String::new(),
                notifier_key: String::new(),
                policy: Policy::default(),
            }),
        };
        (state, db)
    }

    fn completed_session(tenant_id: Uuid) -> Session {
        let at = datetime!(2025-06-02 10:00 UTC);
        Session {
            id: Uuid::new_v4(),
            tenant_id,
            kind: SessionKind::OneOnOne,
            teacher_id: Uuid::new_v4(),
            subscription_id: None,
            status: SessionStatus::Completed,
            scheduled_at: at,
            duration_minutes: 30,
            started_at: Some(at),
            ended_at: Some(at + time::Duration::minutes(30)),
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            rescheduled_from: None,
            reschedule_reason: None,
            quota_counted: false,
            meeting_room: None,
            session_code: "SES-ROUTE234".into(),
            retired_at: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn webhook_without_signature_is_unauthorized() {
        let (state, _db) = test_state();
        let app = super::api_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/webhooks/meeting-events")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"events":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn webhook_with_valid_signature_accepts_events() {
        let (state, db) = test_state();
        let tenant = Uuid::new_v4();
        let session = completed_session(tenant);
        db.insert_session(session.clone());
        let app = super::api_router(state);

        let body = format!(
            r#"{{"events":[{{"tenant_id":"{tenant}","session_id":"{}","participant_id":"{}","kind":"joined","occurred_at":"2025-06-02T10:00:00Z","source_ref":"evt_1"}}]}}"#,
            session.id,
            Uuid::new_v4(),
        );
        let ts = OffsetDateTime::now_utc().unix_timestamp();
        let sig = signature::sign("test-secret", ts, body.as_bytes());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/webhooks/meeting-events")
                    .header("content-type", "application/json")
                    .header("x-signature-ts", ts.to_string())
                    .header("x-signature", sig)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(db.event_count(session.id), 1);
    }

    #[tokio::test]
    async fn webhook_with_tampered_body_is_rejected() {
        let (state, _db) = test_state();
        let app = super::api_router(state);

        let ts = OffsetDateTime::now_utc().unix_timestamp();
        let sig = signature::sign("test-secret", ts, br#"{"events":[]}"#);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/webhooks/meeting-events")
                    .header("content-type", "application/json")
                    .header("x-signature-ts", ts.to_string())
                    .header("x-signature", sig)
                    .body(Body::from(r#"{"events":[{}]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn cancelling_completed_session_maps_to_past_schedule() {
        let (state, db) = test_state();
        let tenant = Uuid::new_v4();
        let session = completed_session(tenant);
        db.insert_session(session.clone());
        let app = super::api_router(state);

        let body = format!(
            r#"{{"tenant_id":"{tenant}","actor_id":"{}","reason":"no-show"}}"#,
            Uuid::new_v4()
        );
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/sessions/{}/cancel", session.id))
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let bytes = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["code"], "past_schedule");
        // Untouched.
        assert_eq!(
            db.get_session(session.id).unwrap().status,
            SessionStatus::Completed
        );
    }

    #[tokio::test]
    async fn override_requires_a_reason() {
        let (state, _db) = test_state();
        let app = super::api_router(state);

        let body = format!(
            r#"{{"tenant_id":"{}","actor_id":"{}","status":"present","reason":"  "}}"#,
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/attendance/{}/override", Uuid::new_v4()))
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
