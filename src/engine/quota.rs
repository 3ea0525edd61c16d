use uuid::Uuid;

use crate::db::subscription_repository::{QuotaOutcome, ReversalOutcome};
use crate::engine::error::EngineError;
use crate::models::session::Session;
use crate::state::AppState;

/// Count a completed session against its subscription quota, at most once.
///
/// The atomic check-decrement-flag sequence lives in the repository; this
/// layer decides what each outcome means operationally. Nothing here is
/// raised to the end user: a quota inconsistency is a monitoring signal,
/// and a counted-but-inactive subscription is a policy violation log, not
/// a failure of the session completion that triggered it.
pub async fn apply_quota(state: &AppState, session: &Session) -> Result<QuotaOutcome, EngineError> {
    // Fast path; the repository re-checks under its lock anyway.
    if session.quota_counted {
        return Ok(QuotaOutcome::AlreadyCounted);
    }

    let outcome = state
        .subscriptions
        .apply_session_quota(session.tenant_id, session.id)
        .await?;

    match &outcome {
        QuotaOutcome::Counted { remaining, exhausted } => {
            tracing::info!(
                session_id = %session.id,
                remaining,
                "session counted against subscription quota"
            );
            if *exhausted {
                tracing::info!(
                    session_id = %session.id,
                    subscription_id = ?session.subscription_id,
                    "subscription quota exhausted; awaiting renewal"
                );
            }
        }
        QuotaOutcome::AlreadyCounted => {}
        QuotaOutcome::CountedAtFloor => {
            // sessions_remaining would have gone negative. Data integrity
            // anomaly: surfaced to monitoring only, the caller still gets a
            // success and the session stays counted.
            tracing::error!(
                session_id = %session.id,
                subscription_id = ?session.subscription_id,
                "QuotaInconsistency: decrement would go below zero"
            );
        }
        QuotaOutcome::CountedInactive { status } => {
            tracing::warn!(
                session_id = %session.id,
                subscription_id = ?session.subscription_id,
                subscription_status = status.as_str(),
                "policy violation: counted session against a non-active subscription without decrement"
            );
        }
        QuotaOutcome::NotApplicable => {
            tracing::debug!(session_id = %session.id, "session kind does not count toward quota");
        }
        QuotaOutcome::SessionNotFound => return Err(EngineError::NotFound),
    }

    Ok(outcome)
}

/// The audited reversal: gives one session back to the quota and clears
/// the counted flag. The only sanctioned way `quota_counted` ever returns
/// to false.
pub async fn reverse_quota(
    state: &AppState,
    session: &Session,
    actor: Uuid,
    reason: &str,
) -> Result<ReversalOutcome, EngineError> {
    let outcome = state
        .subscriptions
        .reverse_session_quota(session.tenant_id, session.id)
        .await?;

    match &outcome {
        ReversalOutcome::Reversed { remaining } => {
            tracing::info!(
                session_id = %session.id,
                subscription_id = ?session.subscription_id,
                actor = %actor,
                reason,
                remaining,
                "quota reversal applied"
            );
        }
        ReversalOutcome::NotCounted => {
            tracing::debug!(session_id = %session.id, "quota reversal requested but session was not counted");
        }
        ReversalOutcome::SessionNotFound => return Err(EngineError::NotFound),
    }

    Ok(outcome)
}
