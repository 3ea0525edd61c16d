use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::subscription_repository::NewSubscription;
use crate::engine::renewal;
use crate::models::subscription::BillingCycle;
use crate::routes::engine_error_response;
use crate::state::AppState;
use crate::utils::codes;

#[derive(Deserialize)]
pub struct PurchaseRequest {
    pub tenant_id: Uuid,
    pub subscriber_id: Uuid,
    pub billing_cycle: BillingCycle,
    pub total_sessions: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub starts_at: OffsetDateTime,
    pub auto_renew: bool,
    pub amount_cents: i64,
    pub currency: String,
    pub payment_method: String,
}

#[derive(Deserialize)]
pub struct TenantScoped {
    pub tenant_id: Uuid,
}

/// Record a purchase. The subscription stays `pending` until the gateway
/// confirms the first charge through the payment-results webhook.
pub async fn purchase_subscription(
    State(state): State<AppState>,
    Json(body): Json<PurchaseRequest>,
) -> Response {
    if body.total_sessions <= 0 {
        return crate::responses::JsonResponse::bad_request("total_sessions must be positive")
            .into_response();
    }

    let ends_at = body.billing_cycle.extend(body.starts_at);
    let next_billing_date = (body.auto_renew && body.billing_cycle.supports_auto_renewal())
        .then_some(ends_at);
    let new = NewSubscription {
        tenant_id: body.tenant_id,
        subscriber_id: body.subscriber_id,
        billing_cycle: body.billing_cycle,
        total_sessions: body.total_sessions,
        starts_at: body.starts_at,
        ends_at: if body.billing_cycle == BillingCycle::Lifetime {
            // Lifetime plans never lapse on a date.
            body.starts_at + time::Duration::days(36_500)
        } else {
            ends_at
        },
        next_billing_date,
        auto_renew: body.auto_renew,
        amount_cents: body.amount_cents,
        currency: body.currency,
        payment_method: body.payment_method,
    };

    match state
        .subscriptions
        .create_subscription(new, &codes::subscription_code())
        .await
    {
        Ok(subscription) => (
            axum::http::StatusCode::OK,
            Json(json!({ "success": true, "subscription": subscription })),
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "subscription purchase failed");
            crate::responses::JsonResponse::server_error("Failed to create subscription")
                .into_response()
        }
    }
}

/// Manual reactivation of a suspended subscription: charges a fresh
/// payment outside the automatic retry ladder.
pub async fn reactivate_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
    Json(body): Json<TenantScoped>,
) -> Response {
    match renewal::reactivate(
        &state,
        body.tenant_id,
        subscription_id,
        OffsetDateTime::now_utc(),
    )
    .await
    {
        Ok(subscription) => (
            axum::http::StatusCode::OK,
            Json(json!({ "success": true, "subscription": subscription })),
        )
            .into_response(),
        Err(err) => engine_error_response(err),
    }
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
    Json(body): Json<TenantScoped>,
) -> Response {
    match renewal::cancel(
        &state,
        body.tenant_id,
        subscription_id,
        OffsetDateTime::now_utc(),
    )
    .await
    {
        Ok(subscription) => (
            axum::http::StatusCode::OK,
            Json(json!({ "success": true, "subscription": subscription })),
        )
            .into_response(),
        Err(err) => engine_error_response(err),
    }
}
