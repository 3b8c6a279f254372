//! 表结构管理

use ris_core::Result;

use crate::connection::DatabasePool;

const TABLES: &[(&str, &str)] = &[
    (
        "orders",
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id UUID PRIMARY KEY,
            request_code VARCHAR(32) NOT NULL,
            patient_id UUID NOT NULL,
            ordering_clinician_id UUID NOT NULL,
            service_id UUID NOT NULL,
            service_name VARCHAR(255) NOT NULL,
            requested_at TIMESTAMP WITH TIME ZONE NOT NULL,
            patient_category SMALLINT NOT NULL,
            priority SMALLINT NOT NULL,
            status SMALLINT NOT NULL DEFAULT 0,
            clinical_info TEXT,
            body_part VARCHAR(128),
            contrast BOOLEAN NOT NULL DEFAULT FALSE,
            scheduled_at TIMESTAMP WITH TIME ZONE,
            cancellation_reason TEXT,
            cancelled_at TIMESTAMP WITH TIME ZONE,
            cancelled_by UUID,
            created_by UUID NOT NULL,
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL,
            version BIGINT NOT NULL DEFAULT 0
        )
    "#,
    ),
    (
        "exams",
        r#"
        CREATE TABLE IF NOT EXISTS exams (
            id UUID PRIMARY KEY,
            order_id UUID NOT NULL UNIQUE REFERENCES orders(id),
            accession_number VARCHAR(32) NOT NULL UNIQUE,
            room_id UUID,
            modality_id UUID,
            technician_id UUID,
            started_at TIMESTAMP WITH TIME ZONE,
            ended_at TIMESTAMP WITH TIME ZONE,
            study_instance_uid VARCHAR(64),
            created_at TIMESTAMP WITH TIME ZONE NOT NULL,
            version BIGINT NOT NULL DEFAULT 0
        )
    "#,
    ),
    (
        "reports",
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            id UUID PRIMARY KEY,
            exam_id UUID NOT NULL UNIQUE REFERENCES exams(id),
            author_id UUID NOT NULL,
            findings TEXT NOT NULL,
            impression TEXT,
            recommendations TEXT,
            status SMALLINT NOT NULL DEFAULT 0,
            preliminary_note TEXT,
            preliminary_approved_by UUID,
            preliminary_approved_at TIMESTAMP WITH TIME ZONE,
            approver_id UUID,
            approved_at TIMESTAMP WITH TIME ZONE,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL,
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL,
            version BIGINT NOT NULL DEFAULT 0
        )
    "#,
    ),
    (
        "report_signatures",
        r#"
        CREATE TABLE IF NOT EXISTS report_signatures (
            id UUID PRIMARY KEY,
            report_id UUID NOT NULL REFERENCES reports(id),
            signer_id UUID NOT NULL,
            signature_type SMALLINT,
            signed_at TIMESTAMP WITH TIME ZONE NOT NULL,
            transaction_id VARCHAR(128),
            status SMALLINT NOT NULL,
            document_digest CHAR(64),
            signature_value BYTEA,
            reason TEXT,
            seq BIGSERIAL
        )
    "#,
    ),
    (
        "queue_assignments",
        r#"
        CREATE TABLE IF NOT EXISTS queue_assignments (
            id UUID PRIMARY KEY,
            order_id UUID NOT NULL REFERENCES orders(id),
            room_id UUID NOT NULL,
            modality_id UUID,
            queue_date DATE NOT NULL,
            queue_number INTEGER NOT NULL,
            status SMALLINT NOT NULL DEFAULT 0,
            assigned_at TIMESTAMP WITH TIME ZONE NOT NULL,
            assigned_by UUID NOT NULL,
            called_at TIMESTAMP WITH TIME ZONE,
            called_by UUID,
            started_at TIMESTAMP WITH TIME ZONE,
            completed_at TIMESTAMP WITH TIME ZONE,
            notes TEXT,
            version BIGINT NOT NULL DEFAULT 0,
            CONSTRAINT uq_queue_room_day_number UNIQUE (room_id, queue_date, queue_number)
        )
    "#,
    ),
    (
        "consultation_sessions",
        r#"
        CREATE TABLE IF NOT EXISTS consultation_sessions (
            id UUID PRIMARY KEY,
            session_code VARCHAR(32) NOT NULL,
            title VARCHAR(255) NOT NULL,
            description TEXT,
            scheduled_start TIMESTAMP WITH TIME ZONE NOT NULL,
            scheduled_end TIMESTAMP WITH TIME ZONE NOT NULL,
            actual_start TIMESTAMP WITH TIME ZONE,
            actual_end TIMESTAMP WITH TIME ZONE,
            organizer_id UUID NOT NULL,
            leader_id UUID,
            secretary_id UUID,
            status SMALLINT NOT NULL DEFAULT 0,
            cancellation_reason TEXT,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL,
            version BIGINT NOT NULL DEFAULT 0
        )
    "#,
    ),
    (
        "consultation_cases",
        r#"
        CREATE TABLE IF NOT EXISTS consultation_cases (
            id UUID PRIMARY KEY,
            session_id UUID NOT NULL REFERENCES consultation_sessions(id),
            order_id UUID NOT NULL REFERENCES orders(id),
            order_number INTEGER NOT NULL,
            reason TEXT,
            preliminary_diagnosis TEXT,
            status SMALLINT NOT NULL DEFAULT 0,
            conclusion TEXT,
            recommendation TEXT,
            version BIGINT NOT NULL DEFAULT 0,
            CONSTRAINT uq_case_session_order UNIQUE (session_id, order_id)
        )
    "#,
    ),
    (
        "consultation_participants",
        r#"
        CREATE TABLE IF NOT EXISTS consultation_participants (
            id UUID PRIMARY KEY,
            session_id UUID NOT NULL REFERENCES consultation_sessions(id),
            user_id UUID NOT NULL,
            role SMALLINT NOT NULL,
            status SMALLINT NOT NULL DEFAULT 0,
            invited_at TIMESTAMP WITH TIME ZONE,
            joined_at TIMESTAMP WITH TIME ZONE,
            left_at TIMESTAMP WITH TIME ZONE,
            response_note TEXT,
            version BIGINT NOT NULL DEFAULT 0,
            CONSTRAINT uq_participant_session_user UNIQUE (session_id, user_id)
        )
    "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_orders_patient_id ON orders(patient_id)",
    "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status)",
    "CREATE INDEX IF NOT EXISTS idx_signatures_report_id ON report_signatures(report_id, signed_at, seq)",
    "CREATE INDEX IF NOT EXISTS idx_queue_order_id ON queue_assignments(order_id)",
    "CREATE INDEX IF NOT EXISTS idx_queue_day_status ON queue_assignments(queue_date, room_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_cases_session_id ON consultation_cases(session_id, order_number)",
];

/// 表结构操作
pub struct DatabaseQueries<'a> {
    pool: &'a DatabasePool,
}

impl<'a> DatabaseQueries<'a> {
    pub fn new(pool: &'a DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表，已存在的表保持不变
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        for (name, ddl) in TABLES {
            sqlx::query(ddl).execute(pool).await?;
            tracing::debug!("Table {} ready", name);
        }
        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        for index_sql in INDEXES {
            sqlx::query(index_sql).execute(pool).await?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }
}
