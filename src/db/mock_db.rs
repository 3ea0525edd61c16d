use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::attendance_repository::AttendanceRepository;
use crate::db::session_repository::SessionRepository;
use crate::db::subscription_repository::{
    NewSubscription, QuotaOutcome, ReversalOutcome, SubscriptionRepository,
};
use crate::models::attendance_event::{AttendanceEvent, NewAttendanceEvent};
use crate::models::attendance_record::{
    AttendanceOverride, AttendanceRecord, AttendanceStatus, AutoAttendance,
};
use crate::models::session::{NewSession, Session, SessionStatus};
use crate::models::subscription::{Subscription, SubscriptionStatus};

/// In-memory store backing all three repository traits for tests. One
/// mutex guards the whole state, so each repository call is atomic exactly
/// like its SQL counterpart.
#[derive(Default)]
pub struct MockDb {
    state: Mutex<MockState>,
    pub should_fail: bool,
}

#[derive(Default)]
struct MockState {
    sessions: HashMap<Uuid, Session>,
    subscriptions: HashMap<Uuid, Subscription>,
    events: Vec<AttendanceEvent>,
    records: HashMap<Uuid, AttendanceRecord>,
}

impl MockDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn fail_check(&self) -> Result<(), sqlx::Error> {
        if self.should_fail {
            return Err(sqlx::Error::Protocol("Mock DB failure".into()));
        }
        Ok(())
    }

    // Test seeding helpers.

    pub fn insert_session(&self, session: Session) {
        self.state
            .lock()
            .unwrap()
            .sessions
            .insert(session.id, session);
    }

    pub fn insert_subscription(&self, subscription: Subscription) {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .insert(subscription.id, subscription);
    }

    pub fn get_session(&self, id: Uuid) -> Option<Session> {
        self.state.lock().unwrap().sessions.get(&id).cloned()
    }

    pub fn get_subscription(&self, id: Uuid) -> Option<Subscription> {
        self.state.lock().unwrap().subscriptions.get(&id).cloned()
    }

    pub fn get_record(&self, id: Uuid) -> Option<AttendanceRecord> {
        self.state.lock().unwrap().records.get(&id).cloned()
    }

    pub fn event_count(&self, session_id: Uuid) -> usize {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| e.session_id == session_id)
            .count()
    }
}

#[async_trait]
impl SessionRepository for MockDb {
    async fn create_session(&self, new: NewSession, code: &str) -> Result<Session, sqlx::Error> {
        self.fail_check()?;
        let now = OffsetDateTime::now_utc();
        let session = Session {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            kind: new.kind,
            teacher_id: new.teacher_id,
            subscription_id: new.subscription_id,
            status: SessionStatus::Scheduled,
            scheduled_at: new.scheduled_at,
            duration_minutes: new.duration_minutes,
            started_at: None,
            ended_at: None,
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            rescheduled_from: None,
            reschedule_reason: None,
            quota_counted: false,
            meeting_room: None,
            session_code: code.to_string(),
            retired_at: None,
            created_at: now,
            updated_at: now,
        };
        self.insert_session(session.clone());
        Ok(session)
    }

    async fn find_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<Session>, sqlx::Error> {
        self.fail_check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .sessions
            .get(&session_id)
            .filter(|s| s.tenant_id == tenant_id && s.retired_at.is_none())
            .cloned())
    }

    async fn mark_live(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<Session>, sqlx::Error> {
        self.fail_check()?;
        let mut state = self.state.lock().unwrap();
        Ok(state.sessions.get_mut(&session_id).and_then(|s| {
            if s.tenant_id != tenant_id || s.status != SessionStatus::Scheduled {
                return None;
            }
            s.status = SessionStatus::Live;
            s.started_at = Some(now);
            s.updated_at = now;
            Some(s.clone())
        }))
    }

    async fn mark_completed(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        ended_at: OffsetDateTime,
    ) -> Result<Option<Session>, sqlx::Error> {
        self.fail_check()?;
        let mut state = self.state.lock().unwrap();
        Ok(state.sessions.get_mut(&session_id).and_then(|s| {
            if s.tenant_id != tenant_id || !s.status.can_complete() {
                return None;
            }
            s.status = SessionStatus::Completed;
            s.ended_at = Some(ended_at);
            s.updated_at = ended_at;
            Some(s.clone())
        }))
    }

    async fn mark_cancelled(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        reason: Option<&str>,
        actor: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<Session>, sqlx::Error> {
        self.fail_check()?;
        let mut state = self.state.lock().unwrap();
        Ok(state.sessions.get_mut(&session_id).and_then(|s| {
            if s.tenant_id != tenant_id || !s.status.can_cancel() {
                return None;
            }
            s.status = SessionStatus::Cancelled;
            s.cancelled_at = Some(now);
            s.cancelled_by = Some(actor);
            s.cancellation_reason = reason.map(|r| r.to_string());
            s.updated_at = now;
            Some(s.clone())
        }))
    }

    async fn mark_paused(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<Session>, sqlx::Error> {
        self.fail_check()?;
        let mut state = self.state.lock().unwrap();
        Ok(state.sessions.get_mut(&session_id).and_then(|s| {
            if s.tenant_id != tenant_id || s.status != SessionStatus::Live {
                return None;
            }
            s.status = SessionStatus::Paused;
            Some(s.clone())
        }))
    }

    async fn mark_resumed(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<Session>, sqlx::Error> {
        self.fail_check()?;
        let mut state = self.state.lock().unwrap();
        Ok(state.sessions.get_mut(&session_id).and_then(|s| {
            if s.tenant_id != tenant_id || s.status != SessionStatus::Paused {
                return None;
            }
            s.status = SessionStatus::Live;
            Some(s.clone())
        }))
    }

    async fn update_schedule(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        new_time: OffsetDateTime,
        reason: &str,
    ) -> Result<Option<Session>, sqlx::Error> {
        self.fail_check()?;
        let mut state = self.state.lock().unwrap();
        Ok(state.sessions.get_mut(&session_id).and_then(|s| {
            if s.tenant_id != tenant_id || s.status != SessionStatus::Scheduled {
                return None;
            }
            s.rescheduled_from = Some(s.scheduled_at);
            s.scheduled_at = new_time;
            s.reschedule_reason = Some(reason.to_string());
            Some(s.clone())
        }))
    }

    async fn set_meeting_room(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        room: &str,
    ) -> Result<(), sqlx::Error> {
        self.fail_check()?;
        let mut state = self.state.lock().unwrap();
        if let Some(s) = state.sessions.get_mut(&session_id) {
            if s.tenant_id == tenant_id {
                s.meeting_room = Some(room.to_string());
            }
        }
        Ok(())
    }

    async fn list_due_for_activation(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Session>, sqlx::Error> {
        self.fail_check()?;
        let state = self.state.lock().unwrap();
        let mut due: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| {
                s.status == SessionStatus::Scheduled
                    && s.scheduled_at <= now
                    && s.retired_at.is_none()
            })
            .cloned()
            .collect();
        due.sort_by_key(|s| s.scheduled_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn list_overrun(
        &self,
        now: OffsetDateTime,
        buffer_minutes: i64,
        limit: i64,
    ) -> Result<Vec<Session>, sqlx::Error> {
        self.fail_check()?;
        let state = self.state.lock().unwrap();
        let buffer = time::Duration::minutes(buffer_minutes);
        let mut overrun: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| {
                matches!(s.status, SessionStatus::Live | SessionStatus::Paused)
                    && s.planned_end() + buffer <= now
            })
            .cloned()
            .collect();
        overrun.sort_by_key(|s| s.scheduled_at);
        overrun.truncate(limit as usize);
        Ok(overrun)
    }

    async fn list_attendance_dirty(
        &self,
        cutoff: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Session>, sqlx::Error> {
        self.fail_check()?;
        let state = self.state.lock().unwrap();
        let mut dirty: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| {
                s.status == SessionStatus::Completed
                    && s.ended_at.map(|e| e <= cutoff).unwrap_or(false)
            })
            .filter(|s| {
                let unfinalized_record = state
                    .records
                    .values()
                    .any(|r| r.session_id == s.id && r.finalized_at.is_none());
                let stale_event = state.events.iter().any(|e| {
                    if e.session_id != s.id {
                        return false;
                    }
                    match state.records.values().find(|r| {
                        r.session_id == s.id && r.participant_id == e.participant_id
                    }) {
                        None => true,
                        Some(r) => match r.finalized_at {
                            None => true,
                            Some(fin) => e.recorded_at > fin,
                        },
                    }
                });
                unfinalized_record || stale_event
            })
            .cloned()
            .collect();
        dirty.sort_by_key(|s| s.ended_at);
        dirty.truncate(limit as usize);
        Ok(dirty)
    }
}

#[async_trait]
impl SubscriptionRepository for MockDb {
    async fn create_subscription(
        &self,
        new: NewSubscription,
        code: &str,
    ) -> Result<Subscription, sqlx::Error> {
        self.fail_check()?;
        let now = OffsetDateTime::now_utc();
        let subscription = Subscription {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            subscriber_id: new.subscriber_id,
            status: SubscriptionStatus::Pending,
            billing_cycle: new.billing_cycle,
            total_sessions: new.total_sessions,
            sessions_remaining: new.total_sessions,
            starts_at: new.starts_at,
            ends_at: new.ends_at,
            next_billing_date: new.next_billing_date,
            auto_renew: new.auto_renew,
            renewal_attempts: 0,
            grace_period_started_at: None,
            amount_cents: new.amount_cents,
            currency: new.currency,
            payment_method: new.payment_method,
            subscription_code: code.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.insert_subscription(subscription.clone());
        Ok(subscription)
    }

    async fn find_subscription(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        self.fail_check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .subscriptions
            .get(&subscription_id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn apply_session_quota(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<QuotaOutcome, sqlx::Error> {
        self.fail_check()?;
        let mut state = self.state.lock().unwrap();

        let (subscription_id, applicable) = match state.sessions.get(&session_id) {
            Some(s) if s.tenant_id == tenant_id => {
                if s.quota_counted {
                    return Ok(QuotaOutcome::AlreadyCounted);
                }
                (s.subscription_id, s.kind.counts_toward_quota())
            }
            _ => return Ok(QuotaOutcome::SessionNotFound),
        };

        let subscription_id = match subscription_id {
            Some(id) if applicable => id,
            _ => return Ok(QuotaOutcome::NotApplicable),
        };

        let outcome = match state.subscriptions.get_mut(&subscription_id) {
            None => QuotaOutcome::CountedInactive {
                status: SubscriptionStatus::Cancelled,
            },
            Some(sub) if sub.status != SubscriptionStatus::Active => {
                QuotaOutcome::CountedInactive { status: sub.status }
            }
            Some(sub) if sub.sessions_remaining <= 0 => QuotaOutcome::CountedAtFloor,
            Some(sub) => {
                sub.sessions_remaining -= 1;
                QuotaOutcome::Counted {
                    remaining: sub.sessions_remaining,
                    exhausted: sub.sessions_remaining == 0,
                }
            }
        };

        if let Some(s) = state.sessions.get_mut(&session_id) {
            s.quota_counted = true;
        }
        Ok(outcome)
    }

    async fn reverse_session_quota(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<ReversalOutcome, sqlx::Error> {
        self.fail_check()?;
        let mut state = self.state.lock().unwrap();

        let subscription_id = match state.sessions.get(&session_id) {
            Some(s) if s.tenant_id == tenant_id => {
                if !s.quota_counted {
                    return Ok(ReversalOutcome::NotCounted);
                }
                s.subscription_id
            }
            _ => return Ok(ReversalOutcome::SessionNotFound),
        };

        let mut remaining = 0;
        if let Some(id) = subscription_id {
            if let Some(sub) = state.subscriptions.get_mut(&id) {
                sub.sessions_remaining = (sub.sessions_remaining + 1).min(sub.total_sessions);
                remaining = sub.sessions_remaining;
            }
        }
        if let Some(s) = state.sessions.get_mut(&session_id) {
            s.quota_counted = false;
        }
        Ok(ReversalOutcome::Reversed { remaining })
    }

    async fn list_due_for_renewal(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Subscription>, sqlx::Error> {
        self.fail_check()?;
        let state = self.state.lock().unwrap();
        let mut due: Vec<Subscription> = state
            .subscriptions
            .values()
            .filter(|s| {
                s.auto_renew
                    && s.billing_cycle.supports_auto_renewal()
                    && s.status.is_usable()
                    && s.next_billing_date.map(|d| d <= now).unwrap_or(false)
            })
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_billing_date);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn record_renewal_success(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        now: OffsetDateTime,
        new_ends_at: OffsetDateTime,
        next_billing_date: OffsetDateTime,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        self.fail_check()?;
        let mut state = self.state.lock().unwrap();
        Ok(state.subscriptions.get_mut(&subscription_id).and_then(|s| {
            if s.tenant_id != tenant_id || !s.status.is_usable() {
                return None;
            }
            s.status = SubscriptionStatus::Active;
            s.ends_at = new_ends_at;
            s.next_billing_date = Some(next_billing_date);
            s.sessions_remaining = s.total_sessions;
            s.renewal_attempts = 0;
            s.grace_period_started_at = None;
            s.updated_at = now;
            Some(s.clone())
        }))
    }

    async fn record_renewal_failure(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        previous_attempts: i32,
        next_attempt_at: Option<OffsetDateTime>,
        grace_started_at: Option<OffsetDateTime>,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        self.fail_check()?;
        let mut state = self.state.lock().unwrap();
        Ok(state.subscriptions.get_mut(&subscription_id).and_then(|s| {
            if s.tenant_id != tenant_id
                || !s.status.is_usable()
                || s.renewal_attempts != previous_attempts
            {
                return None;
            }
            s.renewal_attempts += 1;
            match grace_started_at {
                Some(grace_start) => {
                    s.status = SubscriptionStatus::Grace;
                    s.grace_period_started_at = Some(grace_start);
                    s.next_billing_date = None;
                }
                None => {
                    s.next_billing_date = next_attempt_at;
                }
            }
            Some(s.clone())
        }))
    }

    async fn list_grace_expired(
        &self,
        cutoff: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Subscription>, sqlx::Error> {
        self.fail_check()?;
        let state = self.state.lock().unwrap();
        let mut expired: Vec<Subscription> = state
            .subscriptions
            .values()
            .filter(|s| {
                s.status == SubscriptionStatus::Grace
                    && s.grace_period_started_at
                        .map(|g| g <= cutoff)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        expired.sort_by_key(|s| s.grace_period_started_at);
        expired.truncate(limit as usize);
        Ok(expired)
    }

    async fn mark_suspended(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        self.fail_check()?;
        let mut state = self.state.lock().unwrap();
        Ok(state.subscriptions.get_mut(&subscription_id).and_then(|s| {
            if s.tenant_id != tenant_id || s.status != SubscriptionStatus::Grace {
                return None;
            }
            s.status = SubscriptionStatus::Suspended;
            s.updated_at = now;
            Some(s.clone())
        }))
    }

    async fn mark_reactivated(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        now: OffsetDateTime,
        new_ends_at: OffsetDateTime,
        next_billing_date: Option<OffsetDateTime>,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        self.fail_check()?;
        let mut state = self.state.lock().unwrap();
        Ok(state.subscriptions.get_mut(&subscription_id).and_then(|s| {
            if s.tenant_id != tenant_id
                || !matches!(
                    s.status,
                    SubscriptionStatus::Suspended | SubscriptionStatus::Grace
                )
            {
                return None;
            }
            s.status = SubscriptionStatus::Active;
            s.ends_at = new_ends_at;
            s.next_billing_date = next_billing_date;
            s.sessions_remaining = s.total_sessions;
            s.renewal_attempts = 0;
            s.grace_period_started_at = None;
            s.updated_at = now;
            Some(s.clone())
        }))
    }

    async fn confirm_activation(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        self.fail_check()?;
        let mut state = self.state.lock().unwrap();
        Ok(state.subscriptions.get_mut(&subscription_id).and_then(|s| {
            if s.tenant_id != tenant_id || s.status != SubscriptionStatus::Pending {
                return None;
            }
            s.status = SubscriptionStatus::Active;
            s.updated_at = now;
            Some(s.clone())
        }))
    }

    async fn mark_cancelled(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        self.fail_check()?;
        let mut state = self.state.lock().unwrap();
        Ok(state.subscriptions.get_mut(&subscription_id).and_then(|s| {
            if s.tenant_id != tenant_id || s.status.is_terminal() {
                return None;
            }
            s.status = SubscriptionStatus::Cancelled;
            s.auto_renew = false;
            s.updated_at = now;
            Some(s.clone())
        }))
    }

    async fn expire_lapsed(&self, now: OffsetDateTime) -> Result<u64, sqlx::Error> {
        self.fail_check()?;
        let mut state = self.state.lock().unwrap();
        let mut changed = 0;
        for s in state.subscriptions.values_mut() {
            let non_renewing = !s.auto_renew || !s.billing_cycle.supports_auto_renewal();
            if matches!(
                s.status,
                SubscriptionStatus::Active | SubscriptionStatus::Paused
            ) && s.ends_at < now
                && non_renewing
            {
                s.status = if s.sessions_remaining == 0 {
                    SubscriptionStatus::Completed
                } else {
                    SubscriptionStatus::Expired
                };
                s.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl AttendanceRepository for MockDb {
    async fn append_event(&self, ev: NewAttendanceEvent) -> Result<AttendanceEvent, sqlx::Error> {
        self.fail_check()?;
        let event = AttendanceEvent {
            id: Uuid::new_v4(),
            tenant_id: ev.tenant_id,
            session_id: ev.session_id,
            participant_id: ev.participant_id,
            kind: ev.kind,
            occurred_at: ev.occurred_at,
            source_ref: ev.source_ref,
            recorded_at: OffsetDateTime::now_utc(),
        };
        self.state.lock().unwrap().events.push(event.clone());
        Ok(event)
    }

    async fn list_events(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Vec<AttendanceEvent>, sqlx::Error> {
        self.fail_check()?;
        let state = self.state.lock().unwrap();
        let mut events: Vec<AttendanceEvent> = state
            .events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.session_id == session_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.occurred_at, e.recorded_at));
        Ok(events)
    }

    async fn ensure_record(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        participant_id: Uuid,
    ) -> Result<AttendanceRecord, sqlx::Error> {
        self.fail_check()?;
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .records
            .values()
            .find(|r| r.session_id == session_id && r.participant_id == participant_id)
        {
            return Ok(existing.clone());
        }
        let now = OffsetDateTime::now_utc();
        let record = AttendanceRecord {
            id: Uuid::new_v4(),
            tenant_id,
            session_id,
            participant_id,
            auto_join_time: None,
            auto_leave_time: None,
            auto_duration_seconds: 0,
            auto_tracked: true,
            manually_overridden: false,
            override_join_time: None,
            override_leave_time: None,
            override_reason: None,
            overridden_by: None,
            attendance_status: AttendanceStatus::Pending,
            finalized_at: None,
            created_at: now,
            updated_at: now,
        };
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_record(
        &self,
        tenant_id: Uuid,
        record_id: Uuid,
    ) -> Result<Option<AttendanceRecord>, sqlx::Error> {
        self.fail_check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .records
            .get(&record_id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_records(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Vec<AttendanceRecord>, sqlx::Error> {
        self.fail_check()?;
        let state = self.state.lock().unwrap();
        let mut records: Vec<AttendanceRecord> = state
            .records
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.session_id == session_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn store_auto_result(
        &self,
        tenant_id: Uuid,
        record_id: Uuid,
        auto: &AutoAttendance,
        finalized_at: OffsetDateTime,
    ) -> Result<AttendanceRecord, sqlx::Error> {
        self.fail_check()?;
        let mut state = self.state.lock().unwrap();
        let record = state
            .records
            .get_mut(&record_id)
            .filter(|r| r.tenant_id == tenant_id)
            .ok_or(sqlx::Error::RowNotFound)?;
        record.auto_join_time = auto.join_time;
        record.auto_leave_time = auto.leave_time;
        record.auto_duration_seconds = auto.duration_seconds;
        if !record.manually_overridden {
            record.attendance_status = auto.status;
        }
        record.finalized_at = Some(finalized_at);
        record.updated_at = finalized_at;
        Ok(record.clone())
    }

    async fn apply_override(
        &self,
        tenant_id: Uuid,
        record_id: Uuid,
        ov: &AttendanceOverride,
        now: OffsetDateTime,
    ) -> Result<Option<AttendanceRecord>, sqlx::Error> {
        self.fail_check()?;
        let mut state = self.state.lock().unwrap();
        Ok(state
            .records
            .get_mut(&record_id)
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| {
                r.manually_overridden = true;
                r.override_join_time = ov.join_time;
                r.override_leave_time = ov.leave_time;
                r.override_reason = Some(ov.reason.clone());
                r.overridden_by = Some(ov.actor);
                r.attendance_status = ov.status;
                r.finalized_at = r.finalized_at.or(Some(now));
                r.updated_at = now;
                r.clone()
            }))
    }
}
