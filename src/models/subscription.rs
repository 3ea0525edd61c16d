use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Paused,
    Grace,
    Suspended,
    Completed,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Grace => "grace",
            SubscriptionStatus::Suspended => "suspended",
            SubscriptionStatus::Completed => "completed",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Completed
                | SubscriptionStatus::Cancelled
                | SubscriptionStatus::Expired
        )
    }

    /// Statuses under which the subscriber may still use the service.
    /// `grace` stays usable while renewal is retried.
    pub fn is_usable(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Paused | SubscriptionStatus::Grace
        )
    }

    /// New sessions may only be scheduled against these statuses.
    pub fn allows_scheduling(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Grace)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "billing_cycle", rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Quarterly,
    Yearly,
    Lifetime,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Quarterly => "quarterly",
            BillingCycle::Yearly => "yearly",
            BillingCycle::Lifetime => "lifetime",
        }
    }

    /// Lifetime plans are paid once and never rebill.
    pub fn supports_auto_renewal(&self) -> bool {
        !matches!(self, BillingCycle::Lifetime)
    }

    /// Calendar months are deliberately approximated with fixed-length
    /// periods so billing math stays total and restart-safe.
    pub fn period(&self) -> Option<time::Duration> {
        match self {
            BillingCycle::Monthly => Some(time::Duration::days(30)),
            BillingCycle::Quarterly => Some(time::Duration::days(90)),
            BillingCycle::Yearly => Some(time::Duration::days(365)),
            BillingCycle::Lifetime => None,
        }
    }

    pub fn extend(&self, from: OffsetDateTime) -> OffsetDateTime {
        match self.period() {
            Some(period) => from + period,
            None => from,
        }
    }
}

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct Subscription {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub subscriber_id: Uuid,
    pub status: SubscriptionStatus,
    pub billing_cycle: BillingCycle,
    pub total_sessions: i32,
    /// Never negative; decremented only through the quota counter.
    pub sessions_remaining: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub starts_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub ends_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_billing_date: Option<OffsetDateTime>,
    pub auto_renew: bool,
    pub renewal_attempts: i32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub grace_period_started_at: Option<OffsetDateTime>,
    /// Renewal price snapshot taken at purchase time.
    pub amount_cents: i64,
    pub currency: String,
    /// Opaque stored-payment-method token understood by the gateway.
    pub payment_method: String,
    pub subscription_code: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    pub fn covers(&self, at: OffsetDateTime) -> bool {
        self.starts_at <= at && at <= self.ends_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn lifetime_cycle_never_rebills() {
        assert!(!BillingCycle::Lifetime.supports_auto_renewal());
        let at = datetime!(2025-03-01 00:00 UTC);
        assert_eq!(BillingCycle::Lifetime.extend(at), at);
    }

    #[test]
    fn monthly_cycle_extends_thirty_days() {
        let at = datetime!(2025-03-01 00:00 UTC);
        assert_eq!(BillingCycle::Monthly.extend(at), datetime!(2025-03-31 00:00 UTC));
    }

    #[test]
    fn grace_is_usable_but_suspended_is_not() {
        assert!(SubscriptionStatus::Grace.is_usable());
        assert!(!SubscriptionStatus::Suspended.is_usable());
        assert!(!SubscriptionStatus::Suspended.allows_scheduling());
    }
}
