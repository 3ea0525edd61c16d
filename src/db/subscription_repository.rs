use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::subscription::{BillingCycle, Subscription, SubscriptionStatus};

/// Result of one `apply_session_quota` unit of work. The counter always
/// leaves the session marked counted (except when it cannot be found);
/// the variants tell the caller what the decrement actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaOutcome {
    /// Flag was already set; nothing changed.
    AlreadyCounted,
    Counted {
        remaining: i32,
        /// True when this decrement consumed the last session; the
        /// subscription stays `active` at zero and scheduling is gated on
        /// the remaining count.
        exhausted: bool,
    },
    /// Remaining was already 0: counted without decrementing. Data
    /// integrity anomaly; surfaced to monitoring, never to the caller.
    CountedAtFloor,
    /// Subscription was not in `active`: counted without decrementing.
    CountedInactive {
        status: SubscriptionStatus,
    },
    /// The session carries no quota-applicable subscription.
    NotApplicable,
    SessionNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReversalOutcome {
    /// Flag was not set; nothing to reverse.
    NotCounted,
    Reversed {
        remaining: i32,
    },
    SessionNotFound,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub tenant_id: Uuid,
    pub subscriber_id: Uuid,
    pub billing_cycle: BillingCycle,
    pub total_sessions: i32,
    pub starts_at: OffsetDateTime,
    pub ends_at: OffsetDateTime,
    pub next_billing_date: Option<OffsetDateTime>,
    pub auto_renew: bool,
    pub amount_cents: i64,
    pub currency: String,
    pub payment_method: String,
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn create_subscription(
        &self,
        new: NewSubscription,
        code: &str,
    ) -> Result<Subscription, sqlx::Error>;

    async fn find_subscription(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, sqlx::Error>;

    /// The one blocking-lock unit of work in the system: locks the session
    /// row, re-checks `quota_counted` under the lock, locks the owning
    /// subscription, decrements floored at zero, sets the flag, commits.
    /// Holds no lock across any network call.
    async fn apply_session_quota(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<QuotaOutcome, sqlx::Error>;

    /// Audited inverse of `apply_session_quota`; same locking discipline.
    /// Restores one session to the quota (capped at the plan total) and
    /// clears the counted flag.
    async fn reverse_session_quota(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<ReversalOutcome, sqlx::Error>;

    // Renewal engine queries/writes.

    /// Auto-renewing, rebillable subscriptions whose billing date has come
    /// due, in `active`, `paused`, or `grace` (retry ladder keeps retrying
    /// during grace).
    async fn list_due_for_renewal(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Subscription>, sqlx::Error>;

    /// Writes a successful charge outcome. CAS on a usable status so a
    /// cancellation that landed during the gateway round trip wins; returns
    /// `None` in that case.
    async fn record_renewal_success(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        now: OffsetDateTime,
        new_ends_at: OffsetDateTime,
        next_billing_date: OffsetDateTime,
    ) -> Result<Option<Subscription>, sqlx::Error>;

    /// Writes a failed charge outcome: bump the attempt counter and either
    /// schedule the next retry (`next_billing_date`) or enter grace. CAS on
    /// usable status and on the expected previous attempt count.
    async fn record_renewal_failure(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        previous_attempts: i32,
        next_attempt_at: Option<OffsetDateTime>,
        grace_started_at: Option<OffsetDateTime>,
    ) -> Result<Option<Subscription>, sqlx::Error>;

    async fn list_grace_expired(
        &self,
        cutoff: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Subscription>, sqlx::Error>;

    /// grace → suspended.
    async fn mark_suspended(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<Subscription>, sqlx::Error>;

    /// suspended|grace → active after a successful out-of-ladder charge.
    async fn mark_reactivated(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        now: OffsetDateTime,
        new_ends_at: OffsetDateTime,
        next_billing_date: Option<OffsetDateTime>,
    ) -> Result<Option<Subscription>, sqlx::Error>;

    /// pending → active on payment confirmation.
    async fn confirm_activation(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<Subscription>, sqlx::Error>;

    /// any non-terminal → cancelled.
    async fn mark_cancelled(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<Subscription>, sqlx::Error>;

    /// Non-renewing subscriptions past their end date terminate:
    /// `completed` when the quota was fully consumed, `expired` otherwise.
    /// Returns how many rows changed.
    async fn expire_lapsed(&self, now: OffsetDateTime) -> Result<u64, sqlx::Error>;
}
