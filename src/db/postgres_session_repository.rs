use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::session_repository::SessionRepository;
use crate::models::session::{NewSession, Session, SessionStatus};

pub struct PostgresSessionRepository {
    pub pool: PgPool,
}

#[async_trait]
impl SessionRepository for PostgresSessionRepository {
    async fn create_session(&self, new: NewSession, code: &str) -> Result<Session, sqlx::Error> {
        let row = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (
                id, tenant_id, kind, teacher_id, subscription_id, status,
                scheduled_at, duration_minutes, quota_counted, session_code,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, 'scheduled', $6, $7, false, $8, now(), now())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.tenant_id)
        .bind(new.kind)
        .bind(new.teacher_id)
        .bind(new.subscription_id)
        .bind(new.scheduled_at)
        .bind(new.duration_minutes)
        .bind(code)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<Session>, sqlx::Error> {
        sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE tenant_id = $1 AND id = $2 AND retired_at IS NULL",
        )
        .bind(tenant_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn mark_live(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<Session>, sqlx::Error> {
        sqlx::query_as::<_, Session>(
            r#"
            UPDATE sessions
            SET status = 'live', started_at = $3, updated_at = now()
            WHERE tenant_id = $1 AND id = $2 AND status = 'scheduled'
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
    }

    async fn mark_completed(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        ended_at: OffsetDateTime,
    ) -> Result<Option<Session>, sqlx::Error> {
        sqlx::query_as::<_, Session>(
            r#"
            UPDATE sessions
            SET status = 'completed', ended_at = $3, updated_at = now()
            WHERE tenant_id = $1 AND id = $2 AND status IN ('live', 'paused')
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .bind(ended_at)
        .fetch_optional(&self.pool)
        .await
    }

    async fn mark_cancelled(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        reason: Option<&str>,
        actor: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<Session>, sqlx::Error> {
        sqlx::query_as::<_, Session>(
            r#"
            UPDATE sessions
            SET status = 'cancelled', cancelled_at = $3, cancelled_by = $4,
                cancellation_reason = $5, updated_at = now()
            WHERE tenant_id = $1 AND id = $2 AND status IN ('scheduled', 'live', 'paused')
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .bind(now)
        .bind(actor)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await
    }

    async fn mark_paused(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<Session>, sqlx::Error> {
        self.flip_status(tenant_id, session_id, SessionStatus::Live, SessionStatus::Paused)
            .await
    }

    async fn mark_resumed(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<Session>, sqlx::Error> {
        self.flip_status(tenant_id, session_id, SessionStatus::Paused, SessionStatus::Live)
            .await
    }

    async fn update_schedule(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        new_time: OffsetDateTime,
        reason: &str,
    ) -> Result<Option<Session>, sqlx::Error> {
        sqlx::query_as::<_, Session>(
            r#"
            UPDATE sessions
            SET rescheduled_from = scheduled_at, scheduled_at = $3,
                reschedule_reason = $4, updated_at = now()
            WHERE tenant_id = $1 AND id = $2 AND status = 'scheduled'
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .bind(new_time)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await
    }

    async fn set_meeting_room(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        room: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE sessions SET meeting_room = $3, updated_at = now() \
             WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(session_id)
        .bind(room)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_due_for_activation(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Session>, sqlx::Error> {
        sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions
            WHERE status = 'scheduled' AND scheduled_at <= $1 AND retired_at IS NULL
            ORDER BY scheduled_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn list_overrun(
        &self,
        now: OffsetDateTime,
        buffer_minutes: i64,
        limit: i64,
    ) -> Result<Vec<Session>, sqlx::Error> {
        sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions
            WHERE status IN ('live', 'paused')
              AND scheduled_at
                  + make_interval(mins => duration_minutes)
                  + make_interval(mins => $2::int) <= $1
            ORDER BY scheduled_at ASC
            LIMIT $3
            "#,
        )
        .bind(now)
        .bind(buffer_minutes as i32)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn list_attendance_dirty(
        &self,
        cutoff: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Session>, sqlx::Error> {
        // A completed session needs an attendance pass when a record was
        // never finalized, or an event landed after the last finalization.
        sqlx::query_as::<_, Session>(
            r#"
            SELECT s.* FROM sessions s
            WHERE s.status = 'completed'
              AND s.ended_at IS NOT NULL
              AND s.ended_at <= $1
              AND (
                EXISTS (
                  SELECT 1 FROM attendance_records r
                  WHERE r.session_id = s.id AND r.finalized_at IS NULL
                )
                OR EXISTS (
                  SELECT 1 FROM attendance_events e
                  LEFT JOIN attendance_records r
                    ON r.session_id = e.session_id
                   AND r.participant_id = e.participant_id
                  WHERE e.session_id = s.id
                    AND (r.id IS NULL OR e.recorded_at > r.finalized_at)
                )
              )
            ORDER BY s.ended_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}

impl PostgresSessionRepository {
    async fn flip_status(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
    ) -> Result<Option<Session>, sqlx::Error> {
        sqlx::query_as::<_, Session>(
            r#"
            UPDATE sessions
            SET status = $4, updated_at = now()
            WHERE tenant_id = $1 AND id = $2 AND status = $3
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await
    }
}
