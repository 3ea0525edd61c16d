use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::engine::error::EngineError;
use crate::engine::{attendance, quota};
use crate::models::session::{NewSession, Session, SessionStatus};
use crate::services::notifier::NotificationKind;
use crate::state::AppState;
use crate::utils::codes;

/// Schedule a new session. Suspended/expired subscriptions block
/// scheduling; an exhausted quota does too.
pub async fn schedule(
    state: &AppState,
    new: NewSession,
    now: OffsetDateTime,
) -> Result<Session, EngineError> {
    if new.scheduled_at < now {
        return Err(EngineError::PastSchedule {
            reason: "scheduled time is in the past".into(),
        });
    }

    if let Some(subscription_id) = new.subscription_id {
        let sub = state
            .subscriptions
            .find_subscription(new.tenant_id, subscription_id)
            .await?
            .ok_or(EngineError::NotFound)?;

        if !sub.status.allows_scheduling() {
            return Err(EngineError::SubscriptionUnusable {
                reason: format!("subscription is {}", sub.status.as_str()),
            });
        }
        if new.kind.counts_toward_quota() && sub.sessions_remaining <= 0 {
            return Err(EngineError::SubscriptionUnusable {
                reason: "no sessions remaining".into(),
            });
        }
        if !sub.covers(new.scheduled_at) {
            return Err(EngineError::PastSchedule {
                reason: "scheduled time is outside the subscription period".into(),
            });
        }
    }

    let teacher_id = new.teacher_id;
    let session = state
        .sessions
        .create_session(new, &codes::session_code())
        .await?;

    notify(
        state,
        NotificationKind::SessionScheduled,
        teacher_id,
        &session,
    )
    .await;

    tracing::info!(
        session_id = %session.id,
        session_code = %session.session_code,
        scheduled_at = %session.scheduled_at,
        "session scheduled"
    );
    Ok(session)
}

/// scheduled → live once the start time has arrived. Idempotent: calling
/// it again on a live session is a no-op.
pub async fn activate(
    state: &AppState,
    tenant_id: Uuid,
    session_id: Uuid,
    now: OffsetDateTime,
) -> Result<Session, EngineError> {
    let current = state
        .sessions
        .find_session(tenant_id, session_id)
        .await?
        .ok_or(EngineError::NotFound)?;

    if current.status == SessionStatus::Live {
        return Ok(current);
    }
    if current.status != SessionStatus::Scheduled {
        return Err(EngineError::InvalidTransition {
            from: current.status,
            to: SessionStatus::Live,
        });
    }
    if now < current.scheduled_at {
        return Err(EngineError::PastSchedule {
            reason: "session start time has not arrived".into(),
        });
    }

    let session = match state.sessions.mark_live(tenant_id, session_id, now).await? {
        Some(s) => s,
        // Lost the race; whoever won either activated (no-op for us) or
        // cancelled (invalid for us).
        None => {
            let s = state
                .sessions
                .find_session(tenant_id, session_id)
                .await?
                .ok_or(EngineError::NotFound)?;
            if s.status == SessionStatus::Live {
                return Ok(s);
            }
            return Err(EngineError::InvalidTransition {
                from: s.status,
                to: SessionStatus::Live,
            });
        }
    };

    // Room creation is best-effort: the session is live regardless, and the
    // reconciliation path tolerates a session that never had a room.
    if session.meeting_room.is_none() {
        match state.meetings.create_room(session.id).await {
            Ok(room) => {
                state
                    .sessions
                    .set_meeting_room(tenant_id, session.id, &room)
                    .await?;
            }
            Err(err) => {
                tracing::error!(session_id = %session.id, error = %err, "failed to create meeting room");
            }
        }
    }

    notify(state, NotificationKind::SessionStarted, session.teacher_id, &session).await;
    tracing::info!(session_id = %session.id, "session activated");
    Ok(session)
}

/// live|paused → completed. Finalizes attendance, counts quota, closes the
/// meeting room.
pub async fn complete(
    state: &AppState,
    tenant_id: Uuid,
    session_id: Uuid,
    actual_end: OffsetDateTime,
) -> Result<Session, EngineError> {
    let session = match state
        .sessions
        .mark_completed(tenant_id, session_id, actual_end)
        .await?
    {
        Some(s) => s,
        None => {
            let s = state
                .sessions
                .find_session(tenant_id, session_id)
                .await?
                .ok_or(EngineError::NotFound)?;
            return Err(EngineError::InvalidTransition {
                from: s.status,
                to: SessionStatus::Completed,
            });
        }
    };

    if session.meeting_room.is_some() {
        if let Err(err) = state.meetings.close_room(session.id).await {
            tracing::error!(session_id = %session.id, error = %err, "failed to close meeting room");
        }
    }

    // Attendance first, then quota; neither failure un-completes the
    // session. Quota errors are logged by the counter itself.
    if let Err(err) = attendance::finalize_session(state, &session, actual_end).await {
        tracing::error!(session_id = %session.id, error = %err, "attendance finalization failed");
    }
    if session.counts_toward_quota() {
        if let Err(err) = quota::apply_quota(state, &session).await {
            tracing::error!(session_id = %session.id, error = %err, "quota counting failed");
        }
    }

    notify(state, NotificationKind::SessionCompleted, session.teacher_id, &session).await;
    tracing::info!(session_id = %session.id, ended_at = %actual_end, "session completed");
    Ok(session)
}

/// Escape hatch from any non-terminal state. Cancelling a completed
/// session is a time violation, not a transition violation, so callers can
/// tell the difference.
pub async fn cancel(
    state: &AppState,
    tenant_id: Uuid,
    session_id: Uuid,
    reason: Option<&str>,
    actor: Uuid,
    now: OffsetDateTime,
) -> Result<Session, EngineError> {
    let current = state
        .sessions
        .find_session(tenant_id, session_id)
        .await?
        .ok_or(EngineError::NotFound)?;

    match current.status {
        SessionStatus::Completed => {
            return Err(EngineError::PastSchedule {
                reason: "session already completed".into(),
            });
        }
        SessionStatus::Cancelled => {
            return Err(EngineError::InvalidTransition {
                from: current.status,
                to: SessionStatus::Cancelled,
            });
        }
        _ => {}
    }

    let session = match state
        .sessions
        .mark_cancelled(tenant_id, session_id, reason, actor, now)
        .await?
    {
        Some(s) => s,
        None => {
            let s = state
                .sessions
                .find_session(tenant_id, session_id)
                .await?
                .ok_or(EngineError::NotFound)?;
            if s.status == SessionStatus::Completed {
                return Err(EngineError::PastSchedule {
                    reason: "session already completed".into(),
                });
            }
            return Err(EngineError::InvalidTransition {
                from: s.status,
                to: SessionStatus::Cancelled,
            });
        }
    };

    // A session counted before cancellation gives its slot back; this is
    // the audited reversal path, not a silent flag reset.
    if session.quota_counted {
        if let Err(err) =
            quota::reverse_quota(state, &session, actor, "session cancelled after counting").await
        {
            tracing::error!(session_id = %session.id, error = %err, "quota reversal failed");
        }
    }

    if session.meeting_room.is_some() {
        if let Err(err) = state.meetings.close_room(session.id).await {
            tracing::error!(session_id = %session.id, error = %err, "failed to close meeting room");
        }
    }

    notify(state, NotificationKind::SessionCancelled, session.teacher_id, &session).await;
    tracing::info!(
        session_id = %session.id,
        actor = %actor,
        reason = reason.unwrap_or("-"),
        "session cancelled"
    );
    Ok(session)
}

pub async fn reschedule(
    state: &AppState,
    tenant_id: Uuid,
    session_id: Uuid,
    new_time: OffsetDateTime,
    reason: &str,
    now: OffsetDateTime,
) -> Result<Session, EngineError> {
    let current = state
        .sessions
        .find_session(tenant_id, session_id)
        .await?
        .ok_or(EngineError::NotFound)?;

    if current.status != SessionStatus::Scheduled {
        return Err(EngineError::NotReschedulable {
            reason: format!("session is {}", current.status.as_str()),
        });
    }
    if new_time < now {
        return Err(EngineError::NotReschedulable {
            reason: "new time is in the past".into(),
        });
    }
    if let Some(subscription_id) = current.subscription_id {
        let sub = state
            .subscriptions
            .find_subscription(tenant_id, subscription_id)
            .await?
            .ok_or(EngineError::NotFound)?;
        if !sub.covers(new_time) {
            return Err(EngineError::NotReschedulable {
                reason: "new time is outside the subscription period".into(),
            });
        }
    }

    let session = state
        .sessions
        .update_schedule(tenant_id, session_id, new_time, reason)
        .await?
        .ok_or_else(|| EngineError::NotReschedulable {
            reason: "session is no longer scheduled".into(),
        })?;

    notify(state, NotificationKind::SessionScheduled, session.teacher_id, &session).await;
    tracing::info!(
        session_id = %session.id,
        new_time = %new_time,
        "session rescheduled"
    );
    Ok(session)
}

pub async fn pause(
    state: &AppState,
    tenant_id: Uuid,
    session_id: Uuid,
) -> Result<Session, EngineError> {
    match state.sessions.mark_paused(tenant_id, session_id).await? {
        Some(s) => Ok(s),
        None => {
            let s = state
                .sessions
                .find_session(tenant_id, session_id)
                .await?
                .ok_or(EngineError::NotFound)?;
            Err(EngineError::InvalidTransition {
                from: s.status,
                to: SessionStatus::Paused,
            })
        }
    }
}

pub async fn resume(
    state: &AppState,
    tenant_id: Uuid,
    session_id: Uuid,
) -> Result<Session, EngineError> {
    match state.sessions.mark_resumed(tenant_id, session_id).await? {
        Some(s) => Ok(s),
        None => {
            let s = state
                .sessions
                .find_session(tenant_id, session_id)
                .await?
                .ok_or(EngineError::NotFound)?;
            Err(EngineError::InvalidTransition {
                from: s.status,
                to: SessionStatus::Live,
            })
        }
    }
}

/// Activate every scheduled session whose start time has arrived.
/// Returns how many were activated.
pub async fn activate_due(state: &AppState, now: OffsetDateTime) -> Result<usize, EngineError> {
    let due = state.sessions.list_due_for_activation(now, 500).await?;
    let mut activated = 0;
    for session in due {
        match activate(state, session.tenant_id, session.id, now).await {
            Ok(_) => activated += 1,
            Err(err) => {
                tracing::error!(session_id = %session.id, error = %err, "activation sweep error");
            }
        }
    }
    Ok(activated)
}

/// Complete every live/paused session past its planned end plus the
/// overrun buffer. Sessions auto-terminate rather than running forever.
pub async fn auto_complete_overrun(
    state: &AppState,
    now: OffsetDateTime,
) -> Result<usize, EngineError> {
    let overrun = state
        .sessions
        .list_overrun(now, state.config.policy.overrun_buffer_minutes, 500)
        .await?;
    let mut completed = 0;
    for session in overrun {
        match complete(state, session.tenant_id, session.id, now).await {
            Ok(_) => {
                completed += 1;
                tracing::info!(session_id = %session.id, "session auto-completed after overrun");
            }
            Err(err) => {
                tracing::error!(session_id = %session.id, error = %err, "auto-completion sweep error");
            }
        }
    }
    Ok(completed)
}

async fn notify(state: &AppState, kind: NotificationKind, recipient: Uuid, session: &Session) {
    let context = json!({
        "session_id": session.id,
        "session_code": session.session_code,
        "scheduled_at": session.scheduled_at.format(&time::format_description::well_known::Rfc3339).ok(),
        "status": session.status.as_str(),
    });
    if let Err(err) = state.notifier.send(kind, recipient, context).await {
        tracing::warn!(session_id = %session.id, error = %err, "notification failed");
    }
}
