//! PostgreSQL 存储实现

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use ris_core::models::*;
use ris_core::{Change, OrderStore, Result, RisError, UnitOfWork};
use sqlx::postgres::{PgConnection, PgQueryResult};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::DatabasePool;
use crate::models::*;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// 写入错误：唯一性冲突归到具体实体上
fn write_error(err: sqlx::Error, entity: &'static str, id: Uuid) -> RisError {
    if is_unique_violation(&err) {
        RisError::conflict(entity, id)
    } else {
        RisError::from(err)
    }
}

/// 条件更新未命中时区分记录不存在与版本过期
async fn ensure_updated(
    conn: &mut PgConnection,
    result: PgQueryResult,
    table: &str,
    entity: &'static str,
    id: Uuid,
) -> Result<()> {
    if result.rows_affected() == 1 {
        return Ok(());
    }
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)", table);
    let exists: bool = sqlx::query_scalar(&sql).bind(id).fetch_one(&mut *conn).await?;
    if exists {
        Err(RisError::conflict(entity, id))
    } else {
        Err(RisError::not_found(entity, id))
    }
}

/// 基于 PostgreSQL 的 [`OrderStore`]
#[derive(Debug, Clone)]
pub struct PgOrderStore {
    pool: DatabasePool,
    max_assign_retries: u32,
}

impl PgOrderStore {
    pub fn new(pool: DatabasePool, max_assign_retries: u32) -> Self {
        Self {
            pool,
            max_assign_retries: max_assign_retries.max(1),
        }
    }

    async fn apply(conn: &mut PgConnection, change: &Change) -> Result<()> {
        match change {
            Change::InsertOrder(o) => {
                sqlx::query(
                    r#"
                    INSERT INTO orders (id, request_code, patient_id, ordering_clinician_id, service_id,
                        service_name, requested_at, patient_category, priority, status, clinical_info,
                        body_part, contrast, scheduled_at, cancellation_reason, cancelled_at,
                        cancelled_by, created_by, updated_at, version)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
                "#,
                )
                .bind(o.id)
                .bind(&o.request_code)
                .bind(o.patient_id)
                .bind(o.ordering_clinician_id)
                .bind(o.service_id)
                .bind(&o.service_name)
                .bind(o.requested_at)
                .bind(o.patient_category.code())
                .bind(o.priority.code())
                .bind(o.status.code())
                .bind(&o.clinical_info)
                .bind(&o.body_part)
                .bind(o.contrast)
                .bind(o.scheduled_at)
                .bind(&o.cancellation_reason)
                .bind(o.cancelled_at)
                .bind(o.cancelled_by)
                .bind(o.created_by)
                .bind(o.updated_at)
                .bind(o.version)
                .execute(&mut *conn)
                .await
                .map_err(|e| write_error(e, "order", o.id))?;
            }
            Change::UpdateOrder(o) => {
                let result = sqlx::query(
                    r#"
                    UPDATE orders
                    SET status = $3, clinical_info = $4, body_part = $5, contrast = $6,
                        scheduled_at = $7, cancellation_reason = $8, cancelled_at = $9,
                        cancelled_by = $10, updated_at = $11, version = version + 1
                    WHERE id = $1 AND version = $2
                "#,
                )
                .bind(o.id)
                .bind(o.version)
                .bind(o.status.code())
                .bind(&o.clinical_info)
                .bind(&o.body_part)
                .bind(o.contrast)
                .bind(o.scheduled_at)
                .bind(&o.cancellation_reason)
                .bind(o.cancelled_at)
                .bind(o.cancelled_by)
                .bind(o.updated_at)
                .execute(&mut *conn)
                .await?;
                ensure_updated(conn, result, "orders", "order", o.id).await?;
            }
            Change::InsertExam(e) => {
                sqlx::query(
                    r#"
                    INSERT INTO exams (id, order_id, accession_number, room_id, modality_id,
                        technician_id, started_at, ended_at, study_instance_uid, created_at, version)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
                )
                .bind(e.id)
                .bind(e.order_id)
                .bind(&e.accession_number)
                .bind(e.room_id)
                .bind(e.modality_id)
                .bind(e.technician_id)
                .bind(e.started_at)
                .bind(e.ended_at)
                .bind(&e.study_instance_uid)
                .bind(e.created_at)
                .bind(e.version)
                .execute(&mut *conn)
                .await
                .map_err(|err| write_error(err, "exam", e.id))?;
            }
            Change::UpdateExam(e) => {
                let result = sqlx::query(
                    r#"
                    UPDATE exams
                    SET room_id = $3, modality_id = $4, technician_id = $5, started_at = $6,
                        ended_at = $7, study_instance_uid = $8, version = version + 1
                    WHERE id = $1 AND version = $2
                "#,
                )
                .bind(e.id)
                .bind(e.version)
                .bind(e.room_id)
                .bind(e.modality_id)
                .bind(e.technician_id)
                .bind(e.started_at)
                .bind(e.ended_at)
                .bind(&e.study_instance_uid)
                .execute(&mut *conn)
                .await?;
                ensure_updated(conn, result, "exams", "exam", e.id).await?;
            }
            Change::InsertReport(r) => {
                sqlx::query(
                    r#"
                    INSERT INTO reports (id, exam_id, author_id, findings, impression, recommendations,
                        status, preliminary_note, preliminary_approved_by, preliminary_approved_at,
                        approver_id, approved_at, created_at, updated_at, version)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                "#,
                )
                .bind(r.id)
                .bind(r.exam_id)
                .bind(r.author_id)
                .bind(&r.content.findings)
                .bind(&r.content.impression)
                .bind(&r.content.recommendations)
                .bind(r.status.code())
                .bind(&r.preliminary_note)
                .bind(r.preliminary_approved_by)
                .bind(r.preliminary_approved_at)
                .bind(r.approver_id)
                .bind(r.approved_at)
                .bind(r.created_at)
                .bind(r.updated_at)
                .bind(r.version)
                .execute(&mut *conn)
                .await
                .map_err(|e| write_error(e, "report", r.id))?;
            }
            Change::UpdateReport(r) => {
                let result = sqlx::query(
                    r#"
                    UPDATE reports
                    SET author_id = $3, findings = $4, impression = $5, recommendations = $6,
                        status = $7, preliminary_note = $8, preliminary_approved_by = $9,
                        preliminary_approved_at = $10, approver_id = $11, approved_at = $12,
                        updated_at = $13, version = version + 1
                    WHERE id = $1 AND version = $2
                "#,
                )
                .bind(r.id)
                .bind(r.version)
                .bind(r.author_id)
                .bind(&r.content.findings)
                .bind(&r.content.impression)
                .bind(&r.content.recommendations)
                .bind(r.status.code())
                .bind(&r.preliminary_note)
                .bind(r.preliminary_approved_by)
                .bind(r.preliminary_approved_at)
                .bind(r.approver_id)
                .bind(r.approved_at)
                .bind(r.updated_at)
                .execute(&mut *conn)
                .await?;
                ensure_updated(conn, result, "reports", "report", r.id).await?;
            }
            Change::AppendSignature(s) => {
                sqlx::query(
                    r#"
                    INSERT INTO report_signatures (id, report_id, signer_id, signature_type, signed_at,
                        transaction_id, status, document_digest, signature_value, reason)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
                )
                .bind(s.id)
                .bind(s.report_id)
                .bind(s.signer_id)
                .bind(s.signature_type.map(SignatureType::code))
                .bind(s.signed_at)
                .bind(&s.transaction_id)
                .bind(s.status.code())
                .bind(&s.document_digest)
                .bind(&s.signature_value)
                .bind(&s.reason)
                .execute(&mut *conn)
                .await
                .map_err(|e| write_error(e, "signature", s.id))?;
            }
            Change::UpdateAssignment(a) => {
                let result = sqlx::query(
                    r#"
                    UPDATE queue_assignments
                    SET status = $3, called_at = $4, called_by = $5, started_at = $6,
                        completed_at = $7, notes = $8, version = version + 1
                    WHERE id = $1 AND version = $2
                "#,
                )
                .bind(a.id)
                .bind(a.version)
                .bind(a.status.code())
                .bind(a.called_at)
                .bind(a.called_by)
                .bind(a.started_at)
                .bind(a.completed_at)
                .bind(&a.notes)
                .execute(&mut *conn)
                .await?;
                ensure_updated(conn, result, "queue_assignments", "queue assignment", a.id).await?;
            }
            Change::InsertSession(s) => {
                sqlx::query(
                    r#"
                    INSERT INTO consultation_sessions (id, session_code, title, description,
                        scheduled_start, scheduled_end, actual_start, actual_end, organizer_id,
                        leader_id, secretary_id, status, cancellation_reason, created_at, version)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                "#,
                )
                .bind(s.id)
                .bind(&s.session_code)
                .bind(&s.title)
                .bind(&s.description)
                .bind(s.scheduled_start)
                .bind(s.scheduled_end)
                .bind(s.actual_start)
                .bind(s.actual_end)
                .bind(s.organizer_id)
                .bind(s.leader_id)
                .bind(s.secretary_id)
                .bind(s.status.code())
                .bind(&s.cancellation_reason)
                .bind(s.created_at)
                .bind(s.version)
                .execute(&mut *conn)
                .await
                .map_err(|e| write_error(e, "consultation session", s.id))?;
            }
            Change::UpdateSession(s) => {
                let result = sqlx::query(
                    r#"
                    UPDATE consultation_sessions
                    SET title = $3, description = $4, actual_start = $5, actual_end = $6,
                        leader_id = $7, secretary_id = $8, status = $9, cancellation_reason = $10,
                        version = version + 1
                    WHERE id = $1 AND version = $2
                "#,
                )
                .bind(s.id)
                .bind(s.version)
                .bind(&s.title)
                .bind(&s.description)
                .bind(s.actual_start)
                .bind(s.actual_end)
                .bind(s.leader_id)
                .bind(s.secretary_id)
                .bind(s.status.code())
                .bind(&s.cancellation_reason)
                .execute(&mut *conn)
                .await?;
                ensure_updated(conn, result, "consultation_sessions", "consultation session", s.id)
                    .await?;
            }
            Change::InsertCase(c) => {
                sqlx::query(
                    r#"
                    INSERT INTO consultation_cases (id, session_id, order_id, order_number, reason,
                        preliminary_diagnosis, status, conclusion, recommendation, version)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
                )
                .bind(c.id)
                .bind(c.session_id)
                .bind(c.order_id)
                .bind(c.order_number)
                .bind(&c.reason)
                .bind(&c.preliminary_diagnosis)
                .bind(c.status.code())
                .bind(&c.conclusion)
                .bind(&c.recommendation)
                .bind(c.version)
                .execute(&mut *conn)
                .await
                .map_err(|e| write_error(e, "consultation case", c.id))?;
            }
            Change::UpdateCase(c) => {
                let result = sqlx::query(
                    r#"
                    UPDATE consultation_cases
                    SET reason = $3, preliminary_diagnosis = $4, status = $5, conclusion = $6,
                        recommendation = $7, version = version + 1
                    WHERE id = $1 AND version = $2
                "#,
                )
                .bind(c.id)
                .bind(c.version)
                .bind(&c.reason)
                .bind(&c.preliminary_diagnosis)
                .bind(c.status.code())
                .bind(&c.conclusion)
                .bind(&c.recommendation)
                .execute(&mut *conn)
                .await?;
                ensure_updated(conn, result, "consultation_cases", "consultation case", c.id)
                    .await?;
            }
            Change::DeleteCase(c) => {
                let result =
                    sqlx::query("DELETE FROM consultation_cases WHERE id = $1 AND version = $2")
                        .bind(c.id)
                        .bind(c.version)
                        .execute(&mut *conn)
                        .await?;
                ensure_updated(conn, result, "consultation_cases", "consultation case", c.id)
                    .await?;
            }
            Change::InsertParticipant(p) => {
                sqlx::query(
                    r#"
                    INSERT INTO consultation_participants (id, session_id, user_id, role, status,
                        invited_at, joined_at, left_at, response_note, version)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
                )
                .bind(p.id)
                .bind(p.session_id)
                .bind(p.user_id)
                .bind(p.role.code())
                .bind(p.status.code())
                .bind(p.invited_at)
                .bind(p.joined_at)
                .bind(p.left_at)
                .bind(&p.response_note)
                .bind(p.version)
                .execute(&mut *conn)
                .await
                .map_err(|e| write_error(e, "participant", p.id))?;
            }
            Change::UpdateParticipant(p) => {
                let result = sqlx::query(
                    r#"
                    UPDATE consultation_participants
                    SET role = $3, status = $4, invited_at = $5, joined_at = $6, left_at = $7,
                        response_note = $8, version = version + 1
                    WHERE id = $1 AND version = $2
                "#,
                )
                .bind(p.id)
                .bind(p.version)
                .bind(p.role.code())
                .bind(p.status.code())
                .bind(p.invited_at)
                .bind(p.joined_at)
                .bind(p.left_at)
                .bind(&p.response_note)
                .execute(&mut *conn)
                .await?;
                ensure_updated(conn, result, "consultation_participants", "participant", p.id)
                    .await?;
            }
        }
        Ok(())
    }

    async fn insert_assignment_row(
        conn: &mut PgConnection,
        a: &QueueAssignment,
    ) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO queue_assignments (id, order_id, room_id, modality_id, queue_date,
                queue_number, status, assigned_at, assigned_by, notes, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
        )
        .bind(a.id)
        .bind(a.order_id)
        .bind(a.room_id)
        .bind(a.modality_id)
        .bind(a.queue_date)
        .bind(a.queue_number)
        .bind(a.status.code())
        .bind(a.assigned_at)
        .bind(a.assigned_by)
        .bind(&a.notes)
        .bind(a.version)
        .execute(&mut *conn)
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        sqlx::query_as::<_, DbOrder>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?
            .map(Order::try_from)
            .transpose()
    }

    async fn get_exam(&self, id: Uuid) -> Result<Option<Exam>> {
        let row = sqlx::query_as::<_, DbExam>("SELECT * FROM exams WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;
        Ok(row.map(Exam::from))
    }

    async fn find_exam_by_order(&self, order_id: Uuid) -> Result<Option<Exam>> {
        let row = sqlx::query_as::<_, DbExam>("SELECT * FROM exams WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(self.pool.pool())
            .await?;
        Ok(row.map(Exam::from))
    }

    async fn get_report(&self, id: Uuid) -> Result<Option<Report>> {
        sqlx::query_as::<_, DbReport>("SELECT * FROM reports WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?
            .map(Report::try_from)
            .transpose()
    }

    async fn find_report_by_exam(&self, exam_id: Uuid) -> Result<Option<Report>> {
        sqlx::query_as::<_, DbReport>("SELECT * FROM reports WHERE exam_id = $1")
            .bind(exam_id)
            .fetch_optional(self.pool.pool())
            .await?
            .map(Report::try_from)
            .transpose()
    }

    async fn list_signatures(&self, report_id: Uuid) -> Result<Vec<SignatureRecord>> {
        let rows = sqlx::query_as::<_, DbSignature>(
            "SELECT * FROM report_signatures WHERE report_id = $1 ORDER BY signed_at, seq",
        )
        .bind(report_id)
        .fetch_all(self.pool.pool())
        .await?;
        convert_all(rows)
    }

    async fn get_assignment(&self, id: Uuid) -> Result<Option<QueueAssignment>> {
        sqlx::query_as::<_, DbQueueAssignment>("SELECT * FROM queue_assignments WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?
            .map(QueueAssignment::try_from)
            .transpose()
    }

    async fn list_room_queue(&self, room_id: Uuid, day: NaiveDate) -> Result<Vec<QueueAssignment>> {
        let rows = sqlx::query_as::<_, DbQueueAssignment>(
            "SELECT * FROM queue_assignments WHERE room_id = $1 AND queue_date = $2 ORDER BY queue_number",
        )
        .bind(room_id)
        .bind(day)
        .fetch_all(self.pool.pool())
        .await?;
        convert_all(rows)
    }

    async fn list_assignments_for_day(&self, day: NaiveDate) -> Result<Vec<QueueAssignment>> {
        let rows = sqlx::query_as::<_, DbQueueAssignment>(
            "SELECT * FROM queue_assignments WHERE queue_date = $1 ORDER BY room_id, queue_number",
        )
        .bind(day)
        .fetch_all(self.pool.pool())
        .await?;
        convert_all(rows)
    }

    async fn list_assignments_for_order(&self, order_id: Uuid) -> Result<Vec<QueueAssignment>> {
        let rows = sqlx::query_as::<_, DbQueueAssignment>(
            "SELECT * FROM queue_assignments WHERE order_id = $1 ORDER BY assigned_at",
        )
        .bind(order_id)
        .fetch_all(self.pool.pool())
        .await?;
        convert_all(rows)
    }

    async fn insert_assignment(&self, assignment: NewQueueAssignment) -> Result<QueueAssignment> {
        let (room_id, day) = (assignment.room_id, assignment.queue_date);

        for attempt in 1..=self.max_assign_retries {
            let mut tx = self.pool.pool().begin().await?;
            // 同一房间同一天的号码分配串行执行，锁在事务结束时释放
            sqlx::query(
                "SELECT pg_advisory_xact_lock(hashtextextended($1::TEXT || '/' || $2::TEXT, 0))",
            )
            .bind(room_id)
            .bind(day)
            .execute(&mut *tx)
            .await?;
            let next: i32 = sqlx::query_scalar(
                "SELECT (COUNT(*) + 1)::INT4 FROM queue_assignments WHERE room_id = $1 AND queue_date = $2",
            )
            .bind(room_id)
            .bind(day)
            .fetch_one(&mut *tx)
            .await?;

            let candidate = assignment.clone().into_assignment(next);
            match Self::insert_assignment_row(&mut *tx, &candidate).await {
                Ok(()) => {
                    tx.commit().await?;
                    return Ok(candidate);
                }
                Err(err) if is_unique_violation(&err) => {
                    debug!(
                        "Queue number {} of room {} on {} taken, retry {}/{}",
                        next, room_id, day, attempt, self.max_assign_retries
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!(
            "Queue number assignment for room {} on {} kept colliding after {} attempts",
            room_id, day, self.max_assign_retries
        );
        Err(RisError::conflict("queue assignment", format!("{}/{}", room_id, day)))
    }

    async fn claim_next_waiting(
        &self,
        room_id: Uuid,
        day: NaiveDate,
        called_at: DateTime<Utc>,
        called_by: Uuid,
    ) -> Result<Option<QueueAssignment>> {
        sqlx::query_as::<_, DbQueueAssignment>(
            r#"
            UPDATE queue_assignments
            SET status = $3, called_at = $4, called_by = $5, version = version + 1
            WHERE id = (
                SELECT id FROM queue_assignments
                WHERE room_id = $1 AND queue_date = $2 AND status = $6
                ORDER BY queue_number
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
        "#,
        )
        .bind(room_id)
        .bind(day)
        .bind(QueueStatus::Called.code())
        .bind(called_at)
        .bind(called_by)
        .bind(QueueStatus::Waiting.code())
        .fetch_optional(self.pool.pool())
        .await?
        .map(QueueAssignment::try_from)
        .transpose()
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<ConsultationSession>> {
        sqlx::query_as::<_, DbSession>("SELECT * FROM consultation_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?
            .map(ConsultationSession::try_from)
            .transpose()
    }

    async fn get_case(&self, id: Uuid) -> Result<Option<ConsultationCase>> {
        sqlx::query_as::<_, DbCase>("SELECT * FROM consultation_cases WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?
            .map(ConsultationCase::try_from)
            .transpose()
    }

    async fn list_cases(&self, session_id: Uuid) -> Result<Vec<ConsultationCase>> {
        let rows = sqlx::query_as::<_, DbCase>(
            "SELECT * FROM consultation_cases WHERE session_id = $1 ORDER BY order_number",
        )
        .bind(session_id)
        .fetch_all(self.pool.pool())
        .await?;
        convert_all(rows)
    }

    async fn list_participants(&self, session_id: Uuid) -> Result<Vec<Participant>> {
        let rows = sqlx::query_as::<_, DbParticipant>(
            "SELECT * FROM consultation_participants WHERE session_id = $1 ORDER BY invited_at NULLS LAST, id",
        )
        .bind(session_id)
        .fetch_all(self.pool.pool())
        .await?;
        convert_all(rows)
    }

    async fn find_participant(
        &self,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participant>> {
        sqlx::query_as::<_, DbParticipant>(
            "SELECT * FROM consultation_participants WHERE session_id = $1 AND user_id = $2",
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(self.pool.pool())
        .await?
        .map(Participant::try_from)
        .transpose()
    }

    async fn commit(&self, work: UnitOfWork) -> Result<()> {
        if work.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.pool().begin().await?;
        for change in work.changes() {
            if let Err(err) = Self::apply(&mut *tx, change).await {
                let (entity, id) = change.target();
                debug!("Rolling back unit of work at {} {}: {}", entity, id, err);
                return Err(err);
            }
        }
        tx.commit().await?;
        debug!("Committed unit of work with {} changes", work.changes().len());
        Ok(())
    }
}
