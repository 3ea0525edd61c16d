use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::attendance_repository::AttendanceRepository;
use crate::models::attendance_event::{AttendanceEvent, NewAttendanceEvent};
use crate::models::attendance_record::{AttendanceOverride, AttendanceRecord, AutoAttendance};

pub struct PostgresAttendanceRepository {
    pub pool: PgPool,
}

#[async_trait]
impl AttendanceRepository for PostgresAttendanceRepository {
    async fn append_event(&self, ev: NewAttendanceEvent) -> Result<AttendanceEvent, sqlx::Error> {
        sqlx::query_as::<_, AttendanceEvent>(
            r#"
            INSERT INTO attendance_events (
                id, tenant_id, session_id, participant_id, kind, occurred_at,
                source_ref, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, now())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(ev.tenant_id)
        .bind(ev.session_id)
        .bind(ev.participant_id)
        .bind(ev.kind)
        .bind(ev.occurred_at)
        .bind(ev.source_ref)
        .fetch_one(&self.pool)
        .await
    }

    async fn list_events(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Vec<AttendanceEvent>, sqlx::Error> {
        sqlx::query_as::<_, AttendanceEvent>(
            r#"
            SELECT * FROM attendance_events
            WHERE tenant_id = $1 AND session_id = $2
            ORDER BY occurred_at ASC, recorded_at ASC
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn ensure_record(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        participant_id: Uuid,
    ) -> Result<AttendanceRecord, sqlx::Error> {
        // Upsert against the (session, participant) uniqueness so concurrent
        // webhook deliveries converge on one row.
        sqlx::query_as::<_, AttendanceRecord>(
            r#"
            INSERT INTO attendance_records (
                id, tenant_id, session_id, participant_id,
                auto_duration_seconds, auto_tracked, manually_overridden,
                attendance_status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, 0, true, false, 'pending', now(), now())
            ON CONFLICT (session_id, participant_id)
            DO UPDATE SET updated_at = now()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(session_id)
        .bind(participant_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn find_record(
        &self,
        tenant_id: Uuid,
        record_id: Uuid,
    ) -> Result<Option<AttendanceRecord>, sqlx::Error> {
        sqlx::query_as::<_, AttendanceRecord>(
            "SELECT * FROM attendance_records WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_records(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Vec<AttendanceRecord>, sqlx::Error> {
        sqlx::query_as::<_, AttendanceRecord>(
            r#"
            SELECT * FROM attendance_records
            WHERE tenant_id = $1 AND session_id = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn store_auto_result(
        &self,
        tenant_id: Uuid,
        record_id: Uuid,
        auto: &AutoAttendance,
        finalized_at: OffsetDateTime,
    ) -> Result<AttendanceRecord, sqlx::Error> {
        // The status CASE keeps a manual override authoritative while still
        // refreshing the auto-tracked fields for audit.
        sqlx::query_as::<_, AttendanceRecord>(
            r#"
            UPDATE attendance_records
            SET auto_join_time = $3,
                auto_leave_time = $4,
                auto_duration_seconds = $5,
                attendance_status = CASE
                    WHEN manually_overridden THEN attendance_status
                    ELSE $6
                END,
                finalized_at = $7,
                updated_at = now()
            WHERE tenant_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(record_id)
        .bind(auto.join_time)
        .bind(auto.leave_time)
        .bind(auto.duration_seconds)
        .bind(auto.status)
        .bind(finalized_at)
        .fetch_one(&self.pool)
        .await
    }

    async fn apply_override(
        &self,
        tenant_id: Uuid,
        record_id: Uuid,
        ov: &AttendanceOverride,
        now: OffsetDateTime,
    ) -> Result<Option<AttendanceRecord>, sqlx::Error> {
        sqlx::query_as::<_, AttendanceRecord>(
            r#"
            UPDATE attendance_records
            SET manually_overridden = true,
                override_join_time = $3,
                override_leave_time = $4,
                override_reason = $5,
                overridden_by = $6,
                attendance_status = $7,
                finalized_at = COALESCE(finalized_at, $8),
                updated_at = now()
            WHERE tenant_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(record_id)
        .bind(ov.join_time)
        .bind(ov.leave_time)
        .bind(&ov.reason)
        .bind(ov.actor)
        .bind(ov.status)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
    }
}
