use std::sync::Arc;

use time::macros::datetime;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::{Config, Policy};
use crate::db::mock_db::MockDb;
use crate::db::subscription_repository::QuotaOutcome;
use crate::engine::{self, lifecycle, quota, renewal, EngineError};
use crate::models::attendance_event::{AttendanceEventKind, NewAttendanceEvent};
use crate::models::attendance_record::{AttendanceOverride, AttendanceStatus};
use crate::models::session::{NewSession, Session, SessionKind, SessionStatus};
use crate::models::subscription::{BillingCycle, Subscription, SubscriptionStatus};
use crate::services::meetings::MockMeetingProvider;
use crate::services::notifier::{MockNotifier, NotificationKind};
use crate::services::payment::{ChargeOutcome, MockPaymentGateway};
use crate::state::AppState;

fn test_config() -> Config {
    Config {
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
    }
}

struct Harness {
    state: AppState,
    db: Arc<MockDb>,
    gateway: Arc<MockPaymentGateway>,
    notifier: Arc<MockNotifier>,
    meetings: Arc<MockMeetingProvider>,
}

fn harness_with_gateway(gateway: MockPaymentGateway) -> Harness {
    let db = Arc::new(MockDb::new());
    let gateway = Arc::new(gateway);
    let notifier = Arc::new(MockNotifier::new());
    let meetings = Arc::new(MockMeetingProvider::new());
    let state = AppState {
        sessions: db.clone(),
        subscriptions: db.clone(),
        attendance: db.clone(),
        gateway: gateway.clone(),
        notifier: notifier.clone(),
        meetings: meetings.clone(),
        config: Arc::new(test_config()),
    };
    Harness {
        state,
        db,
        gateway,
        notifier,
        meetings,
    }
}

fn harness() -> Harness {
    harness_with_gateway(MockPaymentGateway::succeeding())
}

const T0: OffsetDateTime = datetime!(2025-06-02 10:00 UTC);

fn make_subscription(tenant_id: Uuid, remaining: i32) -> Subscription {
    Subscription {
        id: Uuid::new_v4(),
        tenant_id,
        subscriber_id: Uuid::new_v4(),
        status: SubscriptionStatus::Active,
        billing_cycle: BillingCycle::Monthly,
        total_sessions: 8,
        sessions_remaining: remaining,
        starts_at: T0 - time::Duration::days(10),
        ends_at: T0 + time::Duration::days(20),
        next_billing_date: Some(T0 + time::Duration::days(20)),
        auto_renew: true,
        renewal_attempts: 0,
        grace_period_started_at: None,
        amount_cents: 4_900,
        currency: "SAR".into(),
        payment_method: "pm_stored".into(),
        subscription_code: "SUB-TEST2345".into(),
        created_at: T0 - time::Duration::days(10),
        updated_at: T0 - time::Duration::days(10),
    }
}

fn make_session(
    tenant_id: Uuid,
    subscription_id: Option<Uuid>,
    status: SessionStatus,
    scheduled_at: OffsetDateTime,
) -> Session {
    Session {
        id: Uuid::new_v4(),
        tenant_id,
        kind: SessionKind::OneOnOne,
        teacher_id: Uuid::new_v4(),
        subscription_id,
        status,
        scheduled_at,
        duration_minutes: 30,
        started_at: matches!(status, SessionStatus::Live | SessionStatus::Paused)
            .then_some(scheduled_at),
        ended_at: None,
        cancelled_at: None,
        cancelled_by: None,
        cancellation_reason: None,
        rescheduled_from: None,
        reschedule_reason: None,
        quota_counted: false,
        meeting_room: None,
        session_code: "SES-TEST2345".into(),
        retired_at: None,
        created_at: scheduled_at - time::Duration::days(1),
        updated_at: scheduled_at - time::Duration::days(1),
    }
}

async fn push_event(
    h: &Harness,
    session: &Session,
    participant: Uuid,
    kind: AttendanceEventKind,
    at: OffsetDateTime,
) {
    use crate::db::attendance_repository::AttendanceRepository;
    h.db.append_event(NewAttendanceEvent {
        tenant_id: session.tenant_id,
        session_id: session.id,
        participant_id: participant,
        kind,
        occurred_at: at,
        source_ref: Some("webhook:test".into()),
    })
    .await
    .unwrap();
}

// --- quota counter ---

#[tokio::test]
async fn apply_quota_is_idempotent_for_counted_sessions() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let sub = make_subscription(tenant, 5);
    let mut session = make_session(tenant, Some(sub.id), SessionStatus::Completed, T0);
    h.db.insert_subscription(sub.clone());
    h.db.insert_session(session.clone());

    let first = quota::apply_quota(&h.state, &session).await.unwrap();
    assert_eq!(
        first,
        QuotaOutcome::Counted {
            remaining: 4,
            exhausted: false
        }
    );

    session = h.db.get_session(session.id).unwrap();
    assert!(session.quota_counted);

    for _ in 0..3 {
        let again = quota::apply_quota(&h.state, &session).await.unwrap();
        assert_eq!(again, QuotaOutcome::AlreadyCounted);
    }
    assert_eq!(h.db.get_subscription(sub.id).unwrap().sessions_remaining, 4);
}

#[tokio::test]
async fn concurrent_completions_decrement_exactly_once_per_session() {
    // sessions_remaining = 1, two quota-counted sessions complete
    // concurrently: one decrements to 0, the other hits the floor and is
    // still marked counted. Never negative, never an error to the caller.
    let h = harness();
    let tenant = Uuid::new_v4();
    let sub = make_subscription(tenant, 1);
    let s1 = make_session(tenant, Some(sub.id), SessionStatus::Live, T0);
    let s2 = make_session(tenant, Some(sub.id), SessionStatus::Live, T0);
    h.db.insert_subscription(sub.clone());
    h.db.insert_session(s1.clone());
    h.db.insert_session(s2.clone());

    let end = T0 + time::Duration::minutes(30);
    let (st1, st2) = (h.state.clone(), h.state.clone());
    let (id1, id2) = (s1.id, s2.id);
    let a = tokio::spawn(async move { lifecycle::complete(&st1, tenant, id1, end).await });
    let b = tokio::spawn(async move { lifecycle::complete(&st2, tenant, id2, end).await });
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let sub_after = h.db.get_subscription(sub.id).unwrap();
    assert_eq!(sub_after.sessions_remaining, 0);
    assert!(h.db.get_session(s1.id).unwrap().quota_counted);
    assert!(h.db.get_session(s2.id).unwrap().quota_counted);
}

#[tokio::test]
async fn inactive_subscription_counts_session_without_decrement() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let mut sub = make_subscription(tenant, 3);
    sub.status = SubscriptionStatus::Suspended;
    let session = make_session(tenant, Some(sub.id), SessionStatus::Completed, T0);
    h.db.insert_subscription(sub.clone());
    h.db.insert_session(session.clone());

    let outcome = quota::apply_quota(&h.state, &session).await.unwrap();
    assert_eq!(
        outcome,
        QuotaOutcome::CountedInactive {
            status: SubscriptionStatus::Suspended
        }
    );
    assert!(h.db.get_session(session.id).unwrap().quota_counted);
    assert_eq!(h.db.get_subscription(sub.id).unwrap().sessions_remaining, 3);
}

#[tokio::test]
async fn cancelling_a_counted_session_reverses_the_quota() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let sub = make_subscription(tenant, 5);
    let session = make_session(tenant, Some(sub.id), SessionStatus::Live, T0);
    h.db.insert_subscription(sub.clone());
    h.db.insert_session(session.clone());

    let fetched = h.db.get_session(session.id).unwrap();
    quota::apply_quota(&h.state, &fetched).await.unwrap();
    assert_eq!(h.db.get_subscription(sub.id).unwrap().sessions_remaining, 4);

    let actor = Uuid::new_v4();
    lifecycle::cancel(&h.state, tenant, session.id, Some("teacher ill"), actor, T0)
        .await
        .unwrap();

    assert_eq!(h.db.get_subscription(sub.id).unwrap().sessions_remaining, 5);
    assert!(!h.db.get_session(session.id).unwrap().quota_counted);
}

// --- session lifecycle ---

#[tokio::test]
async fn activate_is_idempotent_and_requests_a_room() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let session = make_session(tenant, None, SessionStatus::Scheduled, T0);
    h.db.insert_session(session.clone());

    let live = lifecycle::activate(&h.state, tenant, session.id, T0).await.unwrap();
    assert_eq!(live.status, SessionStatus::Live);
    assert_eq!(h.meetings.created.lock().unwrap().len(), 1);

    // Second call is a no-op, not an error, and no second room.
    let again = lifecycle::activate(&h.state, tenant, session.id, T0).await.unwrap();
    assert_eq!(again.status, SessionStatus::Live);
    assert_eq!(h.meetings.created.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn activate_before_start_time_is_rejected() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let session = make_session(tenant, None, SessionStatus::Scheduled, T0);
    h.db.insert_session(session.clone());

    let early = T0 - time::Duration::minutes(5);
    let err = lifecycle::activate(&h.state, tenant, session.id, early)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PastSchedule { .. }));
}

#[tokio::test]
async fn room_failure_does_not_block_activation() {
    let db = Arc::new(MockDb::new());
    let meetings = Arc::new(MockMeetingProvider::failing());
    let state = AppState {
        sessions: db.clone(),
        subscriptions: db.clone(),
        attendance: db.clone(),
        gateway: Arc::new(MockPaymentGateway::succeeding()),
        notifier: Arc::new(MockNotifier::new()),
        meetings: meetings.clone(),
        config: Arc::new(test_config()),
    };
    let tenant = Uuid::new_v4();
    let session = make_session(tenant, None, SessionStatus::Scheduled, T0);
    db.insert_session(session.clone());

    let live = lifecycle::activate(&state, tenant, session.id, T0).await.unwrap();
    assert_eq!(live.status, SessionStatus::Live);
    assert!(db.get_session(session.id).unwrap().meeting_room.is_none());
}

#[tokio::test]
async fn complete_from_scheduled_is_invalid() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let session = make_session(tenant, None, SessionStatus::Scheduled, T0);
    h.db.insert_session(session.clone());

    let err = lifecycle::complete(&h.state, tenant, session.id, T0)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

#[tokio::test]
async fn cancel_completed_session_is_past_schedule_and_changes_nothing() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let mut session = make_session(tenant, None, SessionStatus::Live, T0);
    session.status = SessionStatus::Completed;
    session.ended_at = Some(T0 + time::Duration::minutes(30));
    h.db.insert_session(session.clone());

    let err = lifecycle::cancel(
        &h.state,
        tenant,
        session.id,
        Some("too late"),
        Uuid::new_v4(),
        T0 + time::Duration::hours(1),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::PastSchedule { .. }));

    let after = h.db.get_session(session.id).unwrap();
    assert_eq!(after.status, SessionStatus::Completed);
    assert_eq!(after.cancelled_at, None);
    assert_eq!(after.cancellation_reason, None);
}

#[tokio::test]
async fn cancel_loses_against_concurrent_cancel() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let session = make_session(tenant, None, SessionStatus::Scheduled, T0);
    h.db.insert_session(session.clone());

    let actor = Uuid::new_v4();
    lifecycle::cancel(&h.state, tenant, session.id, None, actor, T0)
        .await
        .unwrap();
    let err = lifecycle::cancel(&h.state, tenant, session.id, None, actor, T0)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

#[tokio::test]
async fn reschedule_rules() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let sub = make_subscription(tenant, 5);
    let session = make_session(tenant, Some(sub.id), SessionStatus::Scheduled, T0);
    h.db.insert_subscription(sub.clone());
    h.db.insert_session(session.clone());

    let now = T0 - time::Duration::days(1);

    // Past target time.
    let err = lifecycle::reschedule(
        &h.state,
        tenant,
        session.id,
        now - time::Duration::hours(1),
        "err",
        now,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::NotReschedulable { .. }));

    // Outside the subscription period.
    let err = lifecycle::reschedule(
        &h.state,
        tenant,
        session.id,
        sub.ends_at + time::Duration::days(2),
        "err",
        now,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::NotReschedulable { .. }));

    // Valid move keeps the old time for audit.
    let new_time = T0 + time::Duration::days(1);
    let updated = lifecycle::reschedule(&h.state, tenant, session.id, new_time, "conflict", now)
        .await
        .unwrap();
    assert_eq!(updated.scheduled_at, new_time);
    assert_eq!(updated.rescheduled_from, Some(T0));

    // Not reschedulable once live.
    lifecycle::activate(&h.state, tenant, session.id, new_time).await.unwrap();
    let err = lifecycle::reschedule(
        &h.state,
        tenant,
        session.id,
        new_time + time::Duration::days(1),
        "err",
        new_time,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::NotReschedulable { .. }));
}

#[tokio::test]
async fn overrun_live_session_auto_completes_on_tick() {
    // 10:00 + 30m planned + 10m buffer => tick at 10:45 completes it.
    let h = harness();
    let tenant = Uuid::new_v4();
    let sub = make_subscription(tenant, 3);
    let session = make_session(tenant, Some(sub.id), SessionStatus::Live, T0);
    h.db.insert_subscription(sub.clone());
    h.db.insert_session(session.clone());

    let tick_at = datetime!(2025-06-02 10:45 UTC);
    let report = engine::tick_minute(&h.state, tick_at).await;
    assert_eq!(report.auto_completed, 1);

    let after = h.db.get_session(session.id).unwrap();
    assert_eq!(after.status, SessionStatus::Completed);
    assert_eq!(after.ended_at, Some(tick_at));
    // Zero participants: still completes, counts quota, attendance absent.
    assert!(after.quota_counted);
    assert_eq!(h.db.get_subscription(sub.id).unwrap().sessions_remaining, 2);
}

#[tokio::test]
async fn tick_activates_due_sessions() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let due = make_session(tenant, None, SessionStatus::Scheduled, T0);
    let future = make_session(
        tenant,
        None,
        SessionStatus::Scheduled,
        T0 + time::Duration::hours(2),
    );
    h.db.insert_session(due.clone());
    h.db.insert_session(future.clone());

    let report = engine::tick_minute(&h.state, T0 + time::Duration::minutes(1)).await;
    assert_eq!(report.activated, 1);
    assert_eq!(h.db.get_session(due.id).unwrap().status, SessionStatus::Live);
    assert_eq!(
        h.db.get_session(future.id).unwrap().status,
        SessionStatus::Scheduled
    );
}

#[tokio::test]
async fn scheduling_is_blocked_for_suspended_and_exhausted_subscriptions() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let mut suspended = make_subscription(tenant, 5);
    suspended.status = SubscriptionStatus::Suspended;
    let mut exhausted = make_subscription(tenant, 0);
    exhausted.status = SubscriptionStatus::Active;
    h.db.insert_subscription(suspended.clone());
    h.db.insert_subscription(exhausted.clone());

    let now = T0;
    let request = |sub_id| NewSession {
        tenant_id: tenant,
        kind: SessionKind::OneOnOne,
        teacher_id: Uuid::new_v4(),
        subscription_id: Some(sub_id),
        scheduled_at: T0 + time::Duration::days(1),
        duration_minutes: 30,
    };

    let err = lifecycle::schedule(&h.state, request(suspended.id), now)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SubscriptionUnusable { .. }));

    let err = lifecycle::schedule(&h.state, request(exhausted.id), now)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SubscriptionUnusable { .. }));
}

// --- attendance pipeline ---

#[tokio::test]
async fn completion_finalizes_attendance_round_trip() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let session = make_session(tenant, None, SessionStatus::Live, T0);
    h.db.insert_session(session.clone());
    let student = Uuid::new_v4();

    let end = T0 + time::Duration::minutes(30);
    push_event(&h, &session, student, AttendanceEventKind::Joined, T0).await;
    push_event(&h, &session, student, AttendanceEventKind::Left, end).await;

    lifecycle::complete(&h.state, tenant, session.id, end).await.unwrap();

    use crate::db::attendance_repository::AttendanceRepository;
    let records = h.db.list_records(tenant, session.id).await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.attendance_status, AttendanceStatus::Present);
    assert_eq!(record.auto_duration_seconds, 30 * 60);
    assert!(record.finalized_at.is_some());
    assert_eq!(h.notifier.sent_of_kind(NotificationKind::AttendanceMarked), 1);
}

#[tokio::test]
async fn manual_override_survives_reaggregation() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let mut session = make_session(tenant, None, SessionStatus::Live, T0);
    h.db.insert_session(session.clone());
    let student = Uuid::new_v4();

    // Barely-there participant: the aggregator would say absent.
    push_event(&h, &session, student, AttendanceEventKind::Joined, T0).await;
    push_event(
        &h,
        &session,
        student,
        AttendanceEventKind::Left,
        T0 + time::Duration::minutes(2),
    )
    .await;

    let end = T0 + time::Duration::minutes(30);
    lifecycle::complete(&h.state, tenant, session.id, end).await.unwrap();
    session = h.db.get_session(session.id).unwrap();

    use crate::db::attendance_repository::AttendanceRepository;
    let record = h.db.list_records(tenant, session.id).await.unwrap().remove(0);
    assert_eq!(record.attendance_status, AttendanceStatus::Absent);

    // Staff overrides to present (connectivity problems, say).
    let staff = Uuid::new_v4();
    h.db.apply_override(
        tenant,
        record.id,
        &AttendanceOverride {
            join_time: Some(T0),
            leave_time: Some(end),
            status: AttendanceStatus::Present,
            reason: "joined by phone".into(),
            actor: staff,
        },
        end,
    )
    .await
    .unwrap()
    .unwrap();

    // Any number of further aggregation passes must not touch the verdict.
    for _ in 0..2 {
        crate::engine::attendance::finalize_session(&h.state, &session, end)
            .await
            .unwrap();
    }
    let after = h.db.get_record(record.id).unwrap();
    assert_eq!(after.attendance_status, AttendanceStatus::Present);
    assert!(after.manually_overridden);
    assert_eq!(after.override_reason.as_deref(), Some("joined by phone"));
}

#[tokio::test]
async fn reconciliation_synthesizes_missing_leave_event() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let mut session = make_session(tenant, None, SessionStatus::Live, T0);
    h.db.insert_session(session.clone());
    let student = Uuid::new_v4();

    // Join arrives, the leave webhook is lost.
    push_event(&h, &session, student, AttendanceEventKind::Joined, T0).await;
    let end = T0 + time::Duration::minutes(30);
    lifecycle::complete(&h.state, tenant, session.id, end).await.unwrap();
    session = h.db.get_session(session.id).unwrap();

    // The event log now carries a synthesized closing leave.
    assert_eq!(h.db.event_count(session.id), 2);

    use crate::db::attendance_repository::AttendanceRepository;
    let events = h.db.list_events(tenant, session.id).await.unwrap();
    let synthesized = &events[1];
    assert_eq!(synthesized.kind, AttendanceEventKind::Left);
    assert_eq!(synthesized.occurred_at, end);
    assert_eq!(
        synthesized.source_ref.as_deref(),
        Some(crate::models::attendance_event::RECONCILIATION_SOURCE)
    );

    let record = h.db.list_records(tenant, session.id).await.unwrap().remove(0);
    assert_eq!(record.attendance_status, AttendanceStatus::Present);
    assert_eq!(record.auto_duration_seconds, 30 * 60);
}

#[tokio::test]
async fn late_events_trigger_a_reconciliation_pass() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let mut session = make_session(tenant, None, SessionStatus::Live, T0);
    h.db.insert_session(session.clone());
    let student = Uuid::new_v4();

    let end = T0 + time::Duration::minutes(30);
    lifecycle::complete(&h.state, tenant, session.id, end).await.unwrap();
    session = h.db.get_session(session.id).unwrap();

    // Webhook delivery catches up an hour later.
    push_event(&h, &session, student, AttendanceEventKind::Joined, T0).await;
    push_event(&h, &session, student, AttendanceEventKind::Left, end).await;

    let tick_at = end + time::Duration::hours(2);
    let report = engine::tick_minute(&h.state, tick_at).await;
    assert_eq!(report.reconciled, 1);

    use crate::db::attendance_repository::AttendanceRepository;
    let record = h.db.list_records(tenant, session.id).await.unwrap().remove(0);
    assert_eq!(record.attendance_status, AttendanceStatus::Present);
}

// --- renewal engine ---

#[tokio::test]
async fn successful_renewal_extends_and_restores_quota() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let mut sub = make_subscription(tenant, 0);
    sub.next_billing_date = Some(T0);
    let old_ends = sub.ends_at;
    h.db.insert_subscription(sub.clone());

    let report = renewal::process_due(&h.state, T0).await.unwrap();
    assert_eq!(report.renewed, 1);

    let after = h.db.get_subscription(sub.id).unwrap();
    assert_eq!(after.status, SubscriptionStatus::Active);
    assert_eq!(after.sessions_remaining, after.total_sessions);
    assert_eq!(after.ends_at, old_ends + time::Duration::days(30));
    assert_eq!(after.renewal_attempts, 0);
    assert_eq!(h.gateway.charge_count(), 1);
    assert_eq!(h.notifier.sent_of_kind(NotificationKind::RenewalSucceeded), 1);
}

#[tokio::test]
async fn three_failures_walk_the_ladder_into_grace_then_suspension() {
    let h = harness_with_gateway(MockPaymentGateway::declining("card expired"));
    let tenant = Uuid::new_v4();
    let mut sub = make_subscription(tenant, 2);
    sub.next_billing_date = Some(T0);
    h.db.insert_subscription(sub.clone());

    // Attempt 1: still active, retry in 24h.
    let report = renewal::process_due(&h.state, T0).await.unwrap();
    assert_eq!(report.retried, 1);
    let after1 = h.db.get_subscription(sub.id).unwrap();
    assert_eq!(after1.status, SubscriptionStatus::Active);
    assert_eq!(after1.renewal_attempts, 1);
    assert_eq!(after1.next_billing_date, Some(T0 + time::Duration::hours(24)));

    // Not due again until the backoff elapses.
    let report = renewal::process_due(&h.state, T0 + time::Duration::hours(12))
        .await
        .unwrap();
    assert_eq!(report.attempted, 0);

    // Attempt 2: retry pushed out 48h.
    let t2 = T0 + time::Duration::hours(25);
    let report = renewal::process_due(&h.state, t2).await.unwrap();
    assert_eq!(report.retried, 1);
    let after2 = h.db.get_subscription(sub.id).unwrap();
    assert_eq!(after2.status, SubscriptionStatus::Active);
    assert_eq!(after2.renewal_attempts, 2);
    assert_eq!(after2.next_billing_date, Some(t2 + time::Duration::hours(48)));

    // Attempt 3: grace.
    let t3 = t2 + time::Duration::hours(49);
    let report = renewal::process_due(&h.state, t3).await.unwrap();
    assert_eq!(report.graced, 1);
    let after3 = h.db.get_subscription(sub.id).unwrap();
    assert_eq!(after3.status, SubscriptionStatus::Grace);
    assert_eq!(after3.grace_period_started_at, Some(t3));

    assert_eq!(h.notifier.sent_of_kind(NotificationKind::RenewalFailed), 2);
    assert_eq!(h.notifier.sent_of_kind(NotificationKind::GracePeriodStarted), 1);

    // Grace window passes with no successful charge: suspended.
    let t4 = t3 + time::Duration::days(3) + time::Duration::hours(1);
    let suspended = renewal::expire_grace(&h.state, t4).await.unwrap();
    assert_eq!(suspended, 1);
    let after4 = h.db.get_subscription(sub.id).unwrap();
    assert_eq!(after4.status, SubscriptionStatus::Suspended);
    assert_eq!(h.notifier.sent_of_kind(NotificationKind::SubscriptionSuspended), 1);
}

#[tokio::test]
async fn charge_success_mid_ladder_returns_to_active() {
    let h = harness_with_gateway(MockPaymentGateway::with_script(vec![
        ChargeOutcome {
            success: false,
            reference: None,
            failure_reason: Some("insufficient funds".into()),
        },
        ChargeOutcome {
            success: true,
            reference: Some("ch_2".into()),
            failure_reason: None,
        },
    ]));
    let tenant = Uuid::new_v4();
    let mut sub = make_subscription(tenant, 1);
    sub.next_billing_date = Some(T0);
    h.db.insert_subscription(sub.clone());

    renewal::process_due(&h.state, T0).await.unwrap();
    let t2 = T0 + time::Duration::hours(25);
    let report = renewal::process_due(&h.state, t2).await.unwrap();
    assert_eq!(report.renewed, 1);

    let after = h.db.get_subscription(sub.id).unwrap();
    assert_eq!(after.status, SubscriptionStatus::Active);
    assert_eq!(after.renewal_attempts, 0);
    assert_eq!(after.sessions_remaining, after.total_sessions);
}

#[tokio::test]
async fn grace_has_no_retries_left_but_manual_reactivation_works() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let mut sub = make_subscription(tenant, 0);
    sub.status = SubscriptionStatus::Suspended;
    sub.next_billing_date = None;
    h.db.insert_subscription(sub.clone());

    let now = T0 + time::Duration::days(5);
    let updated = renewal::reactivate(&h.state, tenant, sub.id, now).await.unwrap();
    assert_eq!(updated.status, SubscriptionStatus::Active);
    assert_eq!(updated.sessions_remaining, updated.total_sessions);
    assert_eq!(updated.ends_at, now + time::Duration::days(30));
    assert_eq!(
        h.notifier.sent_of_kind(NotificationKind::SubscriptionReactivated),
        1
    );
}

#[tokio::test]
async fn reactivation_with_declined_charge_surfaces_charge_failed() {
    let h = harness_with_gateway(MockPaymentGateway::declining("do not honor"));
    let tenant = Uuid::new_v4();
    let mut sub = make_subscription(tenant, 0);
    sub.status = SubscriptionStatus::Suspended;
    h.db.insert_subscription(sub.clone());

    let err = renewal::reactivate(&h.state, tenant, sub.id, T0).await.unwrap_err();
    assert!(matches!(err, EngineError::ChargeFailed { .. }));
    assert_eq!(
        h.db.get_subscription(sub.id).unwrap().status,
        SubscriptionStatus::Suspended
    );
}

#[tokio::test]
async fn reactivation_of_an_active_subscription_is_rejected() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let sub = make_subscription(tenant, 3);
    h.db.insert_subscription(sub.clone());

    let err = renewal::reactivate(&h.state, tenant, sub.id, T0).await.unwrap_err();
    assert!(matches!(err, EngineError::SubscriptionUnusable { .. }));
    // No charge was even attempted.
    assert_eq!(h.gateway.charge_count(), 0);
}

#[tokio::test]
async fn one_failing_subscription_does_not_block_the_pass() {
    let h = harness_with_gateway(MockPaymentGateway::with_script(vec![
        ChargeOutcome {
            success: false,
            reference: None,
            failure_reason: Some("card expired".into()),
        },
        ChargeOutcome {
            success: true,
            reference: Some("ch_ok".into()),
            failure_reason: None,
        },
    ]));
    let tenant = Uuid::new_v4();
    let mut failing = make_subscription(tenant, 1);
    failing.next_billing_date = Some(T0 - time::Duration::hours(2));
    let mut fine = make_subscription(tenant, 1);
    fine.next_billing_date = Some(T0 - time::Duration::hours(1));
    h.db.insert_subscription(failing.clone());
    h.db.insert_subscription(fine.clone());

    let report = renewal::process_due(&h.state, T0).await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.renewed, 1);
    assert_eq!(report.retried, 1);
}

#[tokio::test]
async fn payment_confirmation_activates_pending_subscription() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let mut sub = make_subscription(tenant, 8);
    sub.status = SubscriptionStatus::Pending;
    h.db.insert_subscription(sub.clone());

    let confirmed = renewal::handle_charge_result(
        &h.state,
        tenant,
        sub.id,
        true,
        Some("ch_first"),
        None,
        T0,
    )
    .await
    .unwrap();
    assert_eq!(confirmed.unwrap().status, SubscriptionStatus::Active);
}

#[tokio::test]
async fn daily_tick_terminates_lapsed_non_renewing_subscriptions() {
    let h = harness();
    let tenant = Uuid::new_v4();
    let mut lapsed = make_subscription(tenant, 2);
    lapsed.auto_renew = false;
    lapsed.ends_at = T0 - time::Duration::days(1);
    lapsed.next_billing_date = None;
    let mut consumed = make_subscription(tenant, 0);
    consumed.auto_renew = false;
    consumed.ends_at = T0 - time::Duration::days(1);
    consumed.next_billing_date = None;
    h.db.insert_subscription(lapsed.clone());
    h.db.insert_subscription(consumed.clone());

    let report = engine::tick_daily(&h.state, T0).await;
    assert_eq!(report.expired, 2);
    // Unused sessions left: expired. Fully consumed: completed.
    assert_eq!(
        h.db.get_subscription(lapsed.id).unwrap().status,
        SubscriptionStatus::Expired
    );
    assert_eq!(
        h.db.get_subscription(consumed.id).unwrap().status,
        SubscriptionStatus::Completed
    );
}
