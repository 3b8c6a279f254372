//! 数据库模型
//!
//! 表行结构使用 `FromRow` 读取，状态列以 SMALLINT 存储，转换为领域枚举时
//! 遇到未知状态码返回存储错误。

use chrono::{DateTime, NaiveDate, Utc};
use ris_core::models::*;
use ris_core::RisError;
use sqlx::FromRow;
use uuid::Uuid;

/// 检查申请表
#[derive(Debug, FromRow)]
pub struct DbOrder {
    pub id: Uuid,
    pub request_code: String,
    pub patient_id: Uuid,
    pub ordering_clinician_id: Uuid,
    pub service_id: Uuid,
    pub service_name: String,
    pub requested_at: DateTime<Utc>,
    pub patient_category: i16,
    pub priority: i16,
    pub status: i16,
    pub clinical_info: Option<String>,
    pub body_part: Option<String>,
    pub contrast: bool,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub created_by: Uuid,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl TryFrom<DbOrder> for Order {
    type Error = RisError;

    fn try_from(row: DbOrder) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            request_code: row.request_code,
            patient_id: row.patient_id,
            ordering_clinician_id: row.ordering_clinician_id,
            service_id: row.service_id,
            service_name: row.service_name,
            requested_at: row.requested_at,
            patient_category: PatientCategory::from_code(row.patient_category)?,
            priority: OrderPriority::from_code(row.priority)?,
            status: OrderStatus::from_code(row.status)?,
            clinical_info: row.clinical_info,
            body_part: row.body_part,
            contrast: row.contrast,
            scheduled_at: row.scheduled_at,
            cancellation_reason: row.cancellation_reason,
            cancelled_at: row.cancelled_at,
            cancelled_by: row.cancelled_by,
            created_by: row.created_by,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

/// 检查表，与 [`Exam`] 字段一致
#[derive(Debug, FromRow)]
pub struct DbExam {
    pub id: Uuid,
    pub order_id: Uuid,
    pub accession_number: String,
    pub room_id: Option<Uuid>,
    pub modality_id: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub study_instance_uid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

impl From<DbExam> for Exam {
    fn from(row: DbExam) -> Self {
        Exam {
            id: row.id,
            order_id: row.order_id,
            accession_number: row.accession_number,
            room_id: row.room_id,
            modality_id: row.modality_id,
            technician_id: row.technician_id,
            started_at: row.started_at,
            ended_at: row.ended_at,
            study_instance_uid: row.study_instance_uid,
            created_at: row.created_at,
            version: row.version,
        }
    }
}

/// 报告表，正文拆成三列存储
#[derive(Debug, FromRow)]
pub struct DbReport {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub author_id: Uuid,
    pub findings: String,
    pub impression: Option<String>,
    pub recommendations: Option<String>,
    pub status: i16,
    pub preliminary_note: Option<String>,
    pub preliminary_approved_by: Option<Uuid>,
    pub preliminary_approved_at: Option<DateTime<Utc>>,
    pub approver_id: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl TryFrom<DbReport> for Report {
    type Error = RisError;

    fn try_from(row: DbReport) -> Result<Self, Self::Error> {
        Ok(Report {
            id: row.id,
            exam_id: row.exam_id,
            author_id: row.author_id,
            content: ReportContent {
                findings: row.findings,
                impression: row.impression,
                recommendations: row.recommendations,
            },
            status: ReportStatus::from_code(row.status)?,
            preliminary_note: row.preliminary_note,
            preliminary_approved_by: row.preliminary_approved_by,
            preliminary_approved_at: row.preliminary_approved_at,
            approver_id: row.approver_id,
            approved_at: row.approved_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

/// 签名审计表
#[derive(Debug, FromRow)]
pub struct DbSignature {
    pub id: Uuid,
    pub report_id: Uuid,
    pub signer_id: Uuid,
    pub signature_type: Option<i16>,
    pub signed_at: DateTime<Utc>,
    pub transaction_id: Option<String>,
    pub status: i16,
    pub document_digest: Option<String>,
    pub signature_value: Option<Vec<u8>>,
    pub reason: Option<String>,
}

impl TryFrom<DbSignature> for SignatureRecord {
    type Error = RisError;

    fn try_from(row: DbSignature) -> Result<Self, Self::Error> {
        Ok(SignatureRecord {
            id: row.id,
            report_id: row.report_id,
            signer_id: row.signer_id,
            signature_type: row.signature_type.map(SignatureType::from_code).transpose()?,
            signed_at: row.signed_at,
            transaction_id: row.transaction_id,
            status: SignatureStatus::from_code(row.status)?,
            document_digest: row.document_digest,
            signature_value: row.signature_value,
            reason: row.reason,
        })
    }
}

/// 排队表
#[derive(Debug, FromRow)]
pub struct DbQueueAssignment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub room_id: Uuid,
    pub modality_id: Option<Uuid>,
    pub queue_date: NaiveDate,
    pub queue_number: i32,
    pub status: i16,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: Uuid,
    pub called_at: Option<DateTime<Utc>>,
    pub called_by: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub version: i64,
}

impl TryFrom<DbQueueAssignment> for QueueAssignment {
    type Error = RisError;

    fn try_from(row: DbQueueAssignment) -> Result<Self, Self::Error> {
        Ok(QueueAssignment {
            id: row.id,
            order_id: row.order_id,
            room_id: row.room_id,
            modality_id: row.modality_id,
            queue_date: row.queue_date,
            queue_number: row.queue_number,
            status: QueueStatus::from_code(row.status)?,
            assigned_at: row.assigned_at,
            assigned_by: row.assigned_by,
            called_at: row.called_at,
            called_by: row.called_by,
            started_at: row.started_at,
            completed_at: row.completed_at,
            notes: row.notes,
            version: row.version,
        })
    }
}

/// 会诊表
#[derive(Debug, FromRow)]
pub struct DbSession {
    pub id: Uuid,
    pub session_code: String,
    pub title: String,
    pub description: Option<String>,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub organizer_id: Uuid,
    pub leader_id: Option<Uuid>,
    pub secretary_id: Option<Uuid>,
    pub status: i16,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

impl TryFrom<DbSession> for ConsultationSession {
    type Error = RisError;

    fn try_from(row: DbSession) -> Result<Self, Self::Error> {
        Ok(ConsultationSession {
            id: row.id,
            session_code: row.session_code,
            title: row.title,
            description: row.description,
            scheduled_start: row.scheduled_start,
            scheduled_end: row.scheduled_end,
            actual_start: row.actual_start,
            actual_end: row.actual_end,
            organizer_id: row.organizer_id,
            leader_id: row.leader_id,
            secretary_id: row.secretary_id,
            status: SessionStatus::from_code(row.status)?,
            cancellation_reason: row.cancellation_reason,
            created_at: row.created_at,
            version: row.version,
        })
    }
}

/// 会诊病例表
#[derive(Debug, FromRow)]
pub struct DbCase {
    pub id: Uuid,
    pub session_id: Uuid,
    pub order_id: Uuid,
    pub order_number: i32,
    pub reason: Option<String>,
    pub preliminary_diagnosis: Option<String>,
    pub status: i16,
    pub conclusion: Option<String>,
    pub recommendation: Option<String>,
    pub version: i64,
}

impl TryFrom<DbCase> for ConsultationCase {
    type Error = RisError;

    fn try_from(row: DbCase) -> Result<Self, Self::Error> {
        Ok(ConsultationCase {
            id: row.id,
            session_id: row.session_id,
            order_id: row.order_id,
            order_number: row.order_number,
            reason: row.reason,
            preliminary_diagnosis: row.preliminary_diagnosis,
            status: CaseStatus::from_code(row.status)?,
            conclusion: row.conclusion,
            recommendation: row.recommendation,
            version: row.version,
        })
    }
}

/// 会诊参与者表
#[derive(Debug, FromRow)]
pub struct DbParticipant {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub role: i16,
    pub status: i16,
    pub invited_at: Option<DateTime<Utc>>,
    pub joined_at: Option<DateTime<Utc>>,
    pub left_at: Option<DateTime<Utc>>,
    pub response_note: Option<String>,
    pub version: i64,
}

impl TryFrom<DbParticipant> for Participant {
    type Error = RisError;

    fn try_from(row: DbParticipant) -> Result<Self, Self::Error> {
        Ok(Participant {
            id: row.id,
            session_id: row.session_id,
            user_id: row.user_id,
            role: ParticipantRole::from_code(row.role)?,
            status: ParticipantStatus::from_code(row.status)?,
            invited_at: row.invited_at,
            joined_at: row.joined_at,
            left_at: row.left_at,
            response_note: row.response_note,
            version: row.version,
        })
    }
}

/// 批量转换查询结果
pub(crate) fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, RisError>
where
    T: TryFrom<R, Error = RisError>,
{
    rows.into_iter().map(T::try_from).collect()
}
