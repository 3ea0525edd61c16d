use std::collections::BTreeMap;

use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::Policy;
use crate::engine::error::EngineError;
use crate::models::attendance_event::{
    AttendanceEventKind, NewAttendanceEvent, RECONCILIATION_SOURCE,
};
use crate::models::attendance_record::{AttendanceStatus, AutoAttendance};
use crate::models::session::Session;
use crate::services::notifier::NotificationKind;
use crate::state::AppState;

/// Session timing inputs to classification. `planned_end` anchors the
/// left-early threshold; `actual_end` closes a trailing open join.
#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
    pub scheduled_at: OffsetDateTime,
    pub planned_end: OffsetDateTime,
    pub actual_end: OffsetDateTime,
}

impl SessionTiming {
    pub fn of(session: &Session) -> Self {
        SessionTiming {
            scheduled_at: session.scheduled_at,
            planned_end: session.planned_end(),
            actual_end: session.effective_end(),
        }
    }
}

/// Fold one participant's ordered join/leave stream into auto-tracked
/// attendance. Pure and replayable: feeding the same sequence twice yields
/// the same result.
///
/// Pairing rules: a repeated `joined` while already joined is ignored, as
/// is a `left` with no open join; a trailing open join closes at the
/// session's actual end. Intervals are clipped to start no earlier than
/// the scheduled start, so time spent in the room early does not count.
pub fn aggregate_participant(
    events: &[(AttendanceEventKind, OffsetDateTime)],
    timing: SessionTiming,
    policy: &Policy,
) -> AutoAttendance {
    let mut sorted: Vec<&(AttendanceEventKind, OffsetDateTime)> = events.iter().collect();
    sorted.sort_by_key(|(_, at)| *at);

    let mut intervals: Vec<(OffsetDateTime, OffsetDateTime)> = Vec::new();
    let mut open: Option<OffsetDateTime> = None;
    let mut first_join: Option<OffsetDateTime> = None;

    for (kind, at) in sorted {
        match kind {
            AttendanceEventKind::Joined => {
                if first_join.is_none() {
                    first_join = Some(*at);
                }
                if open.is_none() {
                    open = Some(*at);
                }
            }
            AttendanceEventKind::Left => {
                if let Some(start) = open.take() {
                    intervals.push((start, *at));
                }
            }
        }
    }
    if let Some(start) = open {
        intervals.push((start, timing.actual_end));
    }

    let mut duration = time::Duration::ZERO;
    let mut last_leave: Option<OffsetDateTime> = None;
    for (start, end) in &intervals {
        let clipped_start = (*start).max(timing.scheduled_at);
        if *end > clipped_start {
            duration += *end - clipped_start;
        }
        last_leave = Some(last_leave.map_or(*end, |prev: OffsetDateTime| prev.max(*end)));
    }

    let status = classify(first_join, last_leave, duration, timing, policy);

    AutoAttendance {
        join_time: first_join,
        leave_time: last_leave,
        duration_seconds: duration.whole_seconds().max(0),
        status,
    }
}

fn classify(
    first_join: Option<OffsetDateTime>,
    last_leave: Option<OffsetDateTime>,
    duration: time::Duration,
    timing: SessionTiming,
    policy: &Policy,
) -> AttendanceStatus {
    let first_join = match first_join {
        Some(j) => j,
        None => return AttendanceStatus::Absent,
    };
    if duration < policy.min_present() {
        return AttendanceStatus::Absent;
    }
    if first_join > timing.scheduled_at + policy.late_grace() {
        return AttendanceStatus::Late;
    }
    if let Some(leave) = last_leave {
        if leave < timing.planned_end - policy.leave_early() {
            return AttendanceStatus::LeftEarly;
        }
    }
    AttendanceStatus::Present
}

/// Turn the event stream of a completed session into finalized attendance
/// records, one per participant.
///
/// A participant whose stream still ends in an open join gets a closing
/// `left` event synthesized at the session's end; a lost webhook must not
/// leave attendance incomplete forever. Records already overridden by
/// staff keep their status; only the auto-tracked fields refresh.
pub async fn finalize_session(
    state: &AppState,
    session: &Session,
    finalized_at: OffsetDateTime,
) -> Result<usize, EngineError> {
    let timing = SessionTiming::of(session);
    let events = state
        .attendance
        .list_events(session.tenant_id, session.id)
        .await?;

    let mut per_participant: BTreeMap<Uuid, Vec<(AttendanceEventKind, OffsetDateTime)>> =
        BTreeMap::new();
    for event in &events {
        per_participant
            .entry(event.participant_id)
            .or_default()
            .push((event.kind, event.occurred_at));
    }

    // Close any dangling join in the event log itself, so the append-only
    // record stays self-consistent for audit.
    for (participant_id, stream) in per_participant.iter_mut() {
        let joins = stream
            .iter()
            .filter(|(k, _)| *k == AttendanceEventKind::Joined)
            .count();
        let leaves = stream.len() - joins;
        if joins > leaves {
            tracing::warn!(
                session_id = %session.id,
                participant_id = %participant_id,
                "ReconciliationGap: no terminating leave event; synthesizing one at session end"
            );
            let synthesized = state
                .attendance
                .append_event(NewAttendanceEvent {
                    tenant_id: session.tenant_id,
                    session_id: session.id,
                    participant_id: *participant_id,
                    kind: AttendanceEventKind::Left,
                    occurred_at: timing.actual_end,
                    source_ref: Some(RECONCILIATION_SOURCE.to_string()),
                })
                .await?;
            stream.push((synthesized.kind, synthesized.occurred_at));
        }
    }

    // Pre-created records with no events at all still need an (absent)
    // verdict.
    for record in state
        .attendance
        .list_records(session.tenant_id, session.id)
        .await?
    {
        per_participant.entry(record.participant_id).or_default();
    }

    let mut finalized = 0;
    for (participant_id, stream) in per_participant {
        let auto = aggregate_participant(&stream, timing, &state.config.policy);
        let record = state
            .attendance
            .ensure_record(session.tenant_id, session.id, participant_id)
            .await?;
        let first_pass = record.finalized_at.is_none();
        let stored = state
            .attendance
            .store_auto_result(session.tenant_id, record.id, &auto, finalized_at)
            .await?;
        finalized += 1;

        if first_pass {
            let context = json!({
                "session_id": session.id,
                "session_code": session.session_code,
                "attendance_status": stored.attendance_status.as_str(),
                "duration_seconds": stored.auto_duration_seconds,
            });
            if let Err(err) = state
                .notifier
                .send(NotificationKind::AttendanceMarked, participant_id, context)
                .await
            {
                tracing::warn!(
                    session_id = %session.id,
                    participant_id = %participant_id,
                    error = %err,
                    "attendance notification failed"
                );
            }
        }
    }

    tracing::info!(
        session_id = %session.id,
        participants = finalized,
        "attendance finalized"
    );
    Ok(finalized)
}

/// Periodic sweep: re-finalize completed sessions whose attendance was
/// never finalized or saw events arrive after the last pass.
pub async fn reconcile(state: &AppState, now: OffsetDateTime) -> Result<usize, EngineError> {
    let cutoff = now - state.config.policy.reconcile_after();
    let dirty = state.sessions.list_attendance_dirty(cutoff, 200).await?;
    let mut reconciled = 0;
    for session in dirty {
        match finalize_session(state, &session, now).await {
            Ok(_) => reconciled += 1,
            Err(err) => {
                tracing::error!(session_id = %session.id, error = %err, "attendance reconciliation error");
            }
        }
    }
    Ok(reconciled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn timing() -> SessionTiming {
        // 60-minute session at 10:00, ended on time.
        SessionTiming {
            scheduled_at: datetime!(2025-06-02 10:00 UTC),
            planned_end: datetime!(2025-06-02 11:00 UTC),
            actual_end: datetime!(2025-06-02 11:00 UTC),
        }
    }

    fn policy() -> Policy {
        Policy::default()
    }

    #[test]
    fn full_attendance_is_present_with_exact_duration() {
        let events = vec![
            (AttendanceEventKind::Joined, datetime!(2025-06-02 10:00 UTC)),
            (AttendanceEventKind::Left, datetime!(2025-06-02 11:00 UTC)),
        ];
        let auto = aggregate_participant(&events, timing(), &policy());
        assert_eq!(auto.status, AttendanceStatus::Present);
        assert_eq!(auto.duration_seconds, 3600);
        assert_eq!(auto.join_time, Some(datetime!(2025-06-02 10:00 UTC)));
        assert_eq!(auto.leave_time, Some(datetime!(2025-06-02 11:00 UTC)));
    }

    #[test]
    fn no_events_is_absent() {
        let auto = aggregate_participant(&[], timing(), &policy());
        assert_eq!(auto.status, AttendanceStatus::Absent);
        assert_eq!(auto.duration_seconds, 0);
        assert_eq!(auto.join_time, None);
    }

    #[test]
    fn short_stay_is_absent() {
        let events = vec![
            (AttendanceEventKind::Joined, datetime!(2025-06-02 10:00 UTC)),
            (AttendanceEventKind::Left, datetime!(2025-06-02 10:03 UTC)),
        ];
        let auto = aggregate_participant(&events, timing(), &policy());
        assert_eq!(auto.status, AttendanceStatus::Absent);
    }

    #[test]
    fn late_join_past_grace_is_late() {
        let events = vec![
            (AttendanceEventKind::Joined, datetime!(2025-06-02 10:20 UTC)),
            (AttendanceEventKind::Left, datetime!(2025-06-02 11:00 UTC)),
        ];
        let auto = aggregate_participant(&events, timing(), &policy());
        assert_eq!(auto.status, AttendanceStatus::Late);
    }

    #[test]
    fn early_leave_past_threshold_is_left_early() {
        let events = vec![
            (AttendanceEventKind::Joined, datetime!(2025-06-02 10:00 UTC)),
            (AttendanceEventKind::Left, datetime!(2025-06-02 10:40 UTC)),
        ];
        let auto = aggregate_participant(&events, timing(), &policy());
        assert_eq!(auto.status, AttendanceStatus::LeftEarly);
    }

    #[test]
    fn trailing_open_join_closes_at_actual_end() {
        let events = vec![(AttendanceEventKind::Joined, datetime!(2025-06-02 10:05 UTC))];
        let auto = aggregate_participant(&events, timing(), &policy());
        assert_eq!(auto.status, AttendanceStatus::Present);
        assert_eq!(auto.duration_seconds, 55 * 60);
        assert_eq!(auto.leave_time, Some(datetime!(2025-06-02 11:00 UTC)));
    }

    #[test]
    fn early_join_is_clipped_to_scheduled_start() {
        // In the room 15 minutes before start; only in-session time counts.
        let events = vec![
            (AttendanceEventKind::Joined, datetime!(2025-06-02 09:45 UTC)),
            (AttendanceEventKind::Left, datetime!(2025-06-02 11:00 UTC)),
        ];
        let auto = aggregate_participant(&events, timing(), &policy());
        assert_eq!(auto.duration_seconds, 3600);
        assert_eq!(auto.status, AttendanceStatus::Present);
    }

    #[test]
    fn reconnect_cycles_sum_and_out_of_order_events_are_sorted() {
        // Delivered out of order; pairing must sort by timestamp first.
        let events = vec![
            (AttendanceEventKind::Left, datetime!(2025-06-02 10:20 UTC)),
            (AttendanceEventKind::Joined, datetime!(2025-06-02 10:00 UTC)),
            (AttendanceEventKind::Joined, datetime!(2025-06-02 10:25 UTC)),
            (AttendanceEventKind::Left, datetime!(2025-06-02 11:00 UTC)),
        ];
        let auto = aggregate_participant(&events, timing(), &policy());
        assert_eq!(auto.duration_seconds, (20 + 35) * 60);
        assert_eq!(auto.status, AttendanceStatus::Present);
    }

    #[test]
    fn duplicate_joins_and_orphan_leaves_are_ignored() {
        let events = vec![
            (AttendanceEventKind::Left, datetime!(2025-06-02 09:50 UTC)),
            (AttendanceEventKind::Joined, datetime!(2025-06-02 10:00 UTC)),
            (AttendanceEventKind::Joined, datetime!(2025-06-02 10:10 UTC)),
            (AttendanceEventKind::Left, datetime!(2025-06-02 11:00 UTC)),
        ];
        let auto = aggregate_participant(&events, timing(), &policy());
        assert_eq!(auto.duration_seconds, 3600);
    }

    #[test]
    fn replay_is_idempotent() {
        let events = vec![
            (AttendanceEventKind::Joined, datetime!(2025-06-02 10:02 UTC)),
            (AttendanceEventKind::Left, datetime!(2025-06-02 10:31 UTC)),
            (AttendanceEventKind::Joined, datetime!(2025-06-02 10:34 UTC)),
            (AttendanceEventKind::Left, datetime!(2025-06-02 10:58 UTC)),
        ];
        let first = aggregate_participant(&events, timing(), &policy());
        let second = aggregate_participant(&events, timing(), &policy());
        assert_eq!(first, second);
    }
}
