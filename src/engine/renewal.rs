use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::engine::error::EngineError;
use crate::models::subscription::{Subscription, SubscriptionStatus};
use crate::services::notifier::NotificationKind;
use crate::services::payment::ChargeRequest;
use crate::state::AppState;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RenewalReport {
    pub attempted: usize,
    pub renewed: usize,
    pub retried: usize,
    pub graced: usize,
    pub errors: usize,
}

/// Charge every auto-renewing subscription whose billing date has come
/// due. One subscription's failure never blocks the rest of the pass.
pub async fn process_due(state: &AppState, now: OffsetDateTime) -> Result<RenewalReport, EngineError> {
    let due = state.subscriptions.list_due_for_renewal(now, 500).await?;
    let mut report = RenewalReport::default();

    for subscription in due {
        report.attempted += 1;
        match attempt_renewal(state, &subscription, now).await {
            Ok(RenewalOutcome::Renewed) => report.renewed += 1,
            Ok(RenewalOutcome::RetryScheduled) => report.retried += 1,
            Ok(RenewalOutcome::EnteredGrace) => report.graced += 1,
            Ok(RenewalOutcome::Superseded) => {}
            Err(err) => {
                report.errors += 1;
                tracing::error!(
                    subscription_id = %subscription.id,
                    error = %err,
                    "renewal pass error"
                );
            }
        }
    }
    Ok(report)
}

enum RenewalOutcome {
    Renewed,
    RetryScheduled,
    EnteredGrace,
    /// A concurrent state change (e.g. cancellation during the gateway
    /// round trip) won; nothing was written.
    Superseded,
}

/// One renewal attempt. The gateway call happens strictly outside any
/// database lock; the outcome write re-checks subscription state so a
/// cancellation that landed mid-flight wins.
async fn attempt_renewal(
    state: &AppState,
    subscription: &Subscription,
    now: OffsetDateTime,
) -> Result<RenewalOutcome, EngineError> {
    let attempt = subscription.renewal_attempts + 1;
    tracing::info!(
        subscription_id = %subscription.id,
        subscription_code = %subscription.subscription_code,
        attempt,
        amount_cents = subscription.amount_cents,
        "attempting subscription renewal"
    );

    let charge = state
        .gateway
        .charge(ChargeRequest {
            stored_method: subscription.payment_method.clone(),
            amount_cents: subscription.amount_cents,
            currency: subscription.currency.clone(),
            idempotency_key: format!("renewal-{}-{}", subscription.id, subscription.renewal_attempts),
        })
        .await;

    let failure_reason = match charge {
        Ok(outcome) if outcome.success => {
            return record_success(state, subscription, now, outcome.reference).await;
        }
        Ok(outcome) => outcome
            .failure_reason
            .unwrap_or_else(|| "payment declined".to_string()),
        // Transport trouble is a normal input to the ladder, same as a
        // decline; the next attempt may succeed.
        Err(err) => err.to_string(),
    };

    record_failure(state, subscription, now, attempt, &failure_reason).await
}

async fn record_success(
    state: &AppState,
    subscription: &Subscription,
    now: OffsetDateTime,
    reference: Option<String>,
) -> Result<RenewalOutcome, EngineError> {
    let new_ends_at = subscription.billing_cycle.extend(subscription.ends_at);
    let next_billing_date = new_ends_at;

    let updated = state
        .subscriptions
        .record_renewal_success(
            subscription.tenant_id,
            subscription.id,
            now,
            new_ends_at,
            next_billing_date,
        )
        .await?;

    let updated = match updated {
        Some(s) => s,
        None => {
            tracing::warn!(
                subscription_id = %subscription.id,
                "renewal charge succeeded but subscription changed state mid-flight; not applying"
            );
            return Ok(RenewalOutcome::Superseded);
        }
    };

    notify(
        state,
        NotificationKind::RenewalSucceeded,
        &updated,
        json!({
            "subscription_id": updated.id,
            "subscription_code": updated.subscription_code,
            "amount_cents": updated.amount_cents,
            "currency": updated.currency,
            "reference": reference,
            "ends_at": rfc3339(updated.ends_at),
        }),
    )
    .await;

    tracing::info!(subscription_id = %updated.id, "renewal successful");
    Ok(RenewalOutcome::Renewed)
}

async fn record_failure(
    state: &AppState,
    subscription: &Subscription,
    now: OffsetDateTime,
    attempt: i32,
    reason: &str,
) -> Result<RenewalOutcome, EngineError> {
    let max_attempts = state.config.policy.max_renewal_attempts;

    if attempt >= max_attempts {
        let updated = state
            .subscriptions
            .record_renewal_failure(
                subscription.tenant_id,
                subscription.id,
                subscription.renewal_attempts,
                None,
                Some(now),
            )
            .await?;

        let Some(updated) = updated else {
            return Ok(RenewalOutcome::Superseded);
        };

        tracing::warn!(
            subscription_id = %updated.id,
            attempt,
            reason,
            "renewal failed; entering grace period"
        );
        notify(
            state,
            NotificationKind::GracePeriodStarted,
            &updated,
            json!({
                "subscription_id": updated.id,
                "subscription_code": updated.subscription_code,
                "reason": reason,
                "grace_period_days": state.config.policy.grace_period_days,
            }),
        )
        .await;
        return Ok(RenewalOutcome::EnteredGrace);
    }

    let next_attempt_at = now + state.config.policy.retry_backoff(attempt);
    let updated = state
        .subscriptions
        .record_renewal_failure(
            subscription.tenant_id,
            subscription.id,
            subscription.renewal_attempts,
            Some(next_attempt_at),
            None,
        )
        .await?;

    let Some(updated) = updated else {
        return Ok(RenewalOutcome::Superseded);
    };

    tracing::warn!(
        subscription_id = %updated.id,
        attempt,
        max_attempts,
        reason,
        next_attempt_at = %next_attempt_at,
        "renewal failed; retry scheduled"
    );
    notify(
        state,
        NotificationKind::RenewalFailed,
        &updated,
        json!({
            "subscription_id": updated.id,
            "subscription_code": updated.subscription_code,
            "reason": reason,
            "attempt": attempt,
            "next_attempt_at": rfc3339(next_attempt_at),
        }),
    )
    .await;
    Ok(RenewalOutcome::RetryScheduled)
}

/// Daily job: suspend subscriptions that sat in grace past the window
/// without a successful charge. Suspension blocks new scheduling; it never
/// touches sessions already on the books.
pub async fn expire_grace(state: &AppState, now: OffsetDateTime) -> Result<usize, EngineError> {
    let cutoff = now - state.config.policy.grace_period();
    let expired = state.subscriptions.list_grace_expired(cutoff, 500).await?;
    let mut suspended = 0;

    for subscription in expired {
        match state
            .subscriptions
            .mark_suspended(subscription.tenant_id, subscription.id, now)
            .await
        {
            Ok(Some(updated)) => {
                suspended += 1;
                tracing::warn!(subscription_id = %updated.id, "grace period expired; subscription suspended");
                notify(
                    state,
                    NotificationKind::SubscriptionSuspended,
                    &updated,
                    json!({
                        "subscription_id": updated.id,
                        "subscription_code": updated.subscription_code,
                    }),
                )
                .await;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(subscription_id = %subscription.id, error = %err, "grace expiry error");
            }
        }
    }
    Ok(suspended)
}

/// Daily job: non-renewing subscriptions past their end date lapse.
pub async fn expire_lapsed(state: &AppState, now: OffsetDateTime) -> Result<u64, EngineError> {
    let expired = state.subscriptions.expire_lapsed(now).await?;
    if expired > 0 {
        tracing::info!(count = expired, "expired lapsed subscriptions");
    }
    Ok(expired)
}

/// Manual reactivation, outside the automatic retry ladder: a fresh charge
/// brings a suspended (or still-grace) subscription back to active with a
/// full quota. A declined charge surfaces to the caller.
pub async fn reactivate(
    state: &AppState,
    tenant_id: Uuid,
    subscription_id: Uuid,
    now: OffsetDateTime,
) -> Result<Subscription, EngineError> {
    let subscription = state
        .subscriptions
        .find_subscription(tenant_id, subscription_id)
        .await?
        .ok_or(EngineError::NotFound)?;

    if !matches!(
        subscription.status,
        SubscriptionStatus::Suspended | SubscriptionStatus::Grace
    ) {
        return Err(EngineError::SubscriptionUnusable {
            reason: format!("subscription is {}", subscription.status.as_str()),
        });
    }

    let charge = state
        .gateway
        .charge(ChargeRequest {
            stored_method: subscription.payment_method.clone(),
            amount_cents: subscription.amount_cents,
            currency: subscription.currency.clone(),
            idempotency_key: format!("reactivate-{}-{}", subscription.id, now.unix_timestamp()),
        })
        .await;

    match charge {
        Ok(outcome) if outcome.success => {}
        Ok(outcome) => {
            return Err(EngineError::ChargeFailed {
                reason: outcome
                    .failure_reason
                    .unwrap_or_else(|| "payment declined".to_string()),
            });
        }
        Err(err) => {
            return Err(EngineError::ChargeFailed {
                reason: err.to_string(),
            });
        }
    }

    let new_ends_at = subscription.billing_cycle.extend(now);
    let next_billing_date = (subscription.auto_renew
        && subscription.billing_cycle.supports_auto_renewal())
    .then_some(new_ends_at);

    let updated = state
        .subscriptions
        .mark_reactivated(tenant_id, subscription_id, now, new_ends_at, next_billing_date)
        .await?
        .ok_or(EngineError::NotFound)?;

    notify(
        state,
        NotificationKind::SubscriptionReactivated,
        &updated,
        json!({
            "subscription_id": updated.id,
            "subscription_code": updated.subscription_code,
            "ends_at": rfc3339(updated.ends_at),
        }),
    )
    .await;

    tracing::info!(subscription_id = %updated.id, "subscription reactivated");
    Ok(updated)
}

/// Inbound charge-result handling (payment webhook): a successful charge
/// confirms a pending subscription; failures are recorded and notified but
/// change nothing by themselves.
pub async fn handle_charge_result(
    state: &AppState,
    tenant_id: Uuid,
    subscription_id: Uuid,
    success: bool,
    reference: Option<&str>,
    failure_reason: Option<&str>,
    now: OffsetDateTime,
) -> Result<Option<Subscription>, EngineError> {
    let subscription = state
        .subscriptions
        .find_subscription(tenant_id, subscription_id)
        .await?
        .ok_or(EngineError::NotFound)?;

    if !success {
        tracing::warn!(
            subscription_id = %subscription.id,
            reason = failure_reason.unwrap_or("-"),
            "charge result: failure"
        );
        notify(
            state,
            NotificationKind::RenewalFailed,
            &subscription,
            json!({
                "subscription_id": subscription.id,
                "subscription_code": subscription.subscription_code,
                "reason": failure_reason,
                "reference": reference,
            }),
        )
        .await;
        return Ok(None);
    }

    if subscription.status == SubscriptionStatus::Pending {
        let confirmed = state
            .subscriptions
            .confirm_activation(tenant_id, subscription_id, now)
            .await?;
        if let Some(confirmed) = &confirmed {
            tracing::info!(
                subscription_id = %confirmed.id,
                reference = reference.unwrap_or("-"),
                "subscription activated on payment confirmation"
            );
        }
        return Ok(confirmed);
    }

    tracing::info!(
        subscription_id = %subscription.id,
        reference = reference.unwrap_or("-"),
        "charge result received for non-pending subscription; recorded"
    );
    Ok(None)
}

/// Manual cancellation. Terminal states reject.
pub async fn cancel(
    state: &AppState,
    tenant_id: Uuid,
    subscription_id: Uuid,
    now: OffsetDateTime,
) -> Result<Subscription, EngineError> {
    let updated = state
        .subscriptions
        .mark_cancelled(tenant_id, subscription_id, now)
        .await?;
    match updated {
        Some(s) => {
            tracing::info!(subscription_id = %s.id, "subscription cancelled");
            Ok(s)
        }
        None => {
            let existing = state
                .subscriptions
                .find_subscription(tenant_id, subscription_id)
                .await?
                .ok_or(EngineError::NotFound)?;
            Err(EngineError::SubscriptionUnusable {
                reason: format!("subscription is {}", existing.status.as_str()),
            })
        }
    }
}

async fn notify(
    state: &AppState,
    kind: NotificationKind,
    subscription: &Subscription,
    context: serde_json::Value,
) {
    if let Err(err) = state
        .notifier
        .send(kind, subscription.subscriber_id, context)
        .await
    {
        tracing::warn!(subscription_id = %subscription.id, error = %err, "notification failed");
    }
}

fn rfc3339(at: OffsetDateTime) -> Option<String> {
    at.format(&time::format_description::well_known::Rfc3339).ok()
}
