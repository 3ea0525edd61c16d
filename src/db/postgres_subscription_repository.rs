use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::subscription_repository::{
    NewSubscription, QuotaOutcome, ReversalOutcome, SubscriptionRepository,
};
use crate::models::session::Session;
use crate::models::subscription::{Subscription, SubscriptionStatus};

pub struct PostgresSubscriptionRepository {
    pub pool: PgPool,
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn create_subscription(
        &self,
        new: NewSubscription,
        code: &str,
    ) -> Result<Subscription, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (
                id, tenant_id, subscriber_id, status, billing_cycle,
                total_sessions, sessions_remaining, starts_at, ends_at,
                next_billing_date, auto_renew, renewal_attempts,
                amount_cents, currency, payment_method, subscription_code,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, 'pending', $4, $5, $5, $6, $7, $8, $9, 0,
                    $10, $11, $12, $13, now(), now())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.tenant_id)
        .bind(new.subscriber_id)
        .bind(new.billing_cycle)
        .bind(new.total_sessions)
        .bind(new.starts_at)
        .bind(new.ends_at)
        .bind(new.next_billing_date)
        .bind(new.auto_renew)
        .bind(new.amount_cents)
        .bind(&new.currency)
        .bind(&new.payment_method)
        .bind(code)
        .fetch_one(&self.pool)
        .await
    }

    async fn find_subscription(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn apply_session_quota(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<QuotaOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let session = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?;

        let session = match session {
            Some(s) => s,
            None => return Ok(QuotaOutcome::SessionNotFound),
        };

        // Double-check under the lock; a concurrent invocation that won the
        // race has already set the flag.
        if session.quota_counted {
            return Ok(QuotaOutcome::AlreadyCounted);
        }

        let subscription_id = match session.subscription_id {
            Some(id) if session.kind.counts_toward_quota() => id,
            _ => return Ok(QuotaOutcome::NotApplicable),
        };

        let subscription = sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(subscription_id)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match subscription {
            None => {
                // Dangling reference; still mark counted so the session is
                // never reprocessed.
                QuotaOutcome::CountedInactive {
                    status: SubscriptionStatus::Cancelled,
                }
            }
            Some(sub) if sub.status != SubscriptionStatus::Active => {
                QuotaOutcome::CountedInactive { status: sub.status }
            }
            Some(sub) if sub.sessions_remaining <= 0 => QuotaOutcome::CountedAtFloor,
            Some(sub) => {
                let remaining = sub.sessions_remaining - 1;
                sqlx::query(
                    r#"
                    UPDATE subscriptions
                    SET sessions_remaining = $3, updated_at = now()
                    WHERE tenant_id = $1 AND id = $2
                    "#,
                )
                .bind(tenant_id)
                .bind(sub.id)
                .bind(remaining)
                .execute(&mut *tx)
                .await?;
                QuotaOutcome::Counted {
                    remaining,
                    exhausted: remaining == 0,
                }
            }
        };

        sqlx::query(
            "UPDATE sessions SET quota_counted = true, updated_at = now() \
             WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    async fn reverse_session_quota(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<ReversalOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let session = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?;

        let session = match session {
            Some(s) => s,
            None => return Ok(ReversalOutcome::SessionNotFound),
        };

        if !session.quota_counted {
            return Ok(ReversalOutcome::NotCounted);
        }

        let mut remaining = 0;
        if let Some(subscription_id) = session.subscription_id {
            let subscription = sqlx::query_as::<_, Subscription>(
                "SELECT * FROM subscriptions WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
            )
            .bind(tenant_id)
            .bind(subscription_id)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(sub) = subscription {
                remaining = (sub.sessions_remaining + 1).min(sub.total_sessions);
                sqlx::query(
                    r#"
                    UPDATE subscriptions
                    SET sessions_remaining = $3, updated_at = now()
                    WHERE tenant_id = $1 AND id = $2
                    "#,
                )
                .bind(tenant_id)
                .bind(sub.id)
                .bind(remaining)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(
            "UPDATE sessions SET quota_counted = false, updated_at = now() \
             WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ReversalOutcome::Reversed { remaining })
    }

    async fn list_due_for_renewal(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT * FROM subscriptions
            WHERE auto_renew = true
              AND billing_cycle <> 'lifetime'
              AND status IN ('active', 'paused', 'grace')
              AND next_billing_date IS NOT NULL
              AND next_billing_date <= $1
            ORDER BY next_billing_date ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn record_renewal_success(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        _now: OffsetDateTime,
        new_ends_at: OffsetDateTime,
        next_billing_date: OffsetDateTime,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET status = 'active',
                ends_at = $3,
                next_billing_date = $4,
                sessions_remaining = total_sessions,
                renewal_attempts = 0,
                grace_period_started_at = NULL,
                updated_at = now()
            WHERE tenant_id = $1 AND id = $2
              AND status IN ('active', 'paused', 'grace')
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(subscription_id)
        .bind(new_ends_at)
        .bind(next_billing_date)
        .fetch_optional(&self.pool)
        .await
    }

    async fn record_renewal_failure(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        previous_attempts: i32,
        next_attempt_at: Option<OffsetDateTime>,
        grace_started_at: Option<OffsetDateTime>,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        match grace_started_at {
            Some(grace_start) => {
                sqlx::query_as::<_, Subscription>(
                    r#"
                    UPDATE subscriptions
                    SET status = 'grace',
                        renewal_attempts = renewal_attempts + 1,
                        grace_period_started_at = $4,
                        next_billing_date = NULL,
                        updated_at = now()
                    WHERE tenant_id = $1 AND id = $2
                      AND status IN ('active', 'paused', 'grace')
                      AND renewal_attempts = $3
                    RETURNING *
                    "#,
                )
                .bind(tenant_id)
                .bind(subscription_id)
                .bind(previous_attempts)
                .bind(grace_start)
                .fetch_optional(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, Subscription>(
                    r#"
                    UPDATE subscriptions
                    SET renewal_attempts = renewal_attempts + 1,
                        next_billing_date = $4,
                        updated_at = now()
                    WHERE tenant_id = $1 AND id = $2
                      AND status IN ('active', 'paused', 'grace')
                      AND renewal_attempts = $3
                    RETURNING *
                    "#,
                )
                .bind(tenant_id)
                .bind(subscription_id)
                .bind(previous_attempts)
                .bind(next_attempt_at)
                .fetch_optional(&self.pool)
                .await
            }
        }
    }

    async fn list_grace_expired(
        &self,
        cutoff: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT * FROM subscriptions
            WHERE status = 'grace'
              AND grace_period_started_at IS NOT NULL
              AND grace_period_started_at <= $1
            ORDER BY grace_period_started_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn mark_suspended(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        _now: OffsetDateTime,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET status = 'suspended', updated_at = now()
            WHERE tenant_id = $1 AND id = $2 AND status = 'grace'
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn mark_reactivated(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        _now: OffsetDateTime,
        new_ends_at: OffsetDateTime,
        next_billing_date: Option<OffsetDateTime>,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET status = 'active',
                ends_at = $3,
                next_billing_date = $4,
                sessions_remaining = total_sessions,
                renewal_attempts = 0,
                grace_period_started_at = NULL,
                updated_at = now()
            WHERE tenant_id = $1 AND id = $2 AND status IN ('suspended', 'grace')
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(subscription_id)
        .bind(new_ends_at)
        .bind(next_billing_date)
        .fetch_optional(&self.pool)
        .await
    }

    async fn confirm_activation(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        _now: OffsetDateTime,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET status = 'active', updated_at = now()
            WHERE tenant_id = $1 AND id = $2 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn mark_cancelled(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        _now: OffsetDateTime,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled', auto_renew = false, updated_at = now()
            WHERE tenant_id = $1 AND id = $2
              AND status NOT IN ('completed', 'cancelled', 'expired')
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn expire_lapsed(&self, now: OffsetDateTime) -> Result<u64, sqlx::Error> {
        // A lapsed plan that was fully consumed terminates `completed`;
        // one with unused sessions terminates `expired`.
        let completed = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'completed', updated_at = now()
            WHERE status IN ('active', 'paused')
              AND ends_at < $1
              AND (auto_renew = false OR billing_cycle = 'lifetime')
              AND sessions_remaining = 0
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        let expired = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'expired', updated_at = now()
            WHERE status IN ('active', 'paused')
              AND ends_at < $1
              AND (auto_renew = false OR billing_cycle = 'lifetime')
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(completed.rows_affected() + expired.rows_affected())
    }
}
