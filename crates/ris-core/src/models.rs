//! 核心数据模型定义
//!
//! 状态值以小整数持久化，各实体使用独立的枚举，避免不同实体之间的状态码混用。

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, RisError};

/// 执行操作的用户
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
}

impl Actor {
    pub fn new(user_id: Uuid) -> Self {
        Self { user_id }
    }
}

/// 为状态枚举生成持久化状态码的互转
macro_rules! status_codes {
    ($name:ident, $entity:literal, { $($variant:ident = $code:literal),+ $(,)? }) => {
        impl $name {
            /// 持久化状态码
            pub fn code(self) -> i16 {
                match self {
                    $($name::$variant => $code,)+
                }
            }

            pub fn from_code(code: i16) -> Result<Self> {
                match code {
                    $($code => Ok($name::$variant),)+
                    other => Err(RisError::Storage(format!(
                        "unknown {} status code {}",
                        $entity, other
                    ))),
                }
            }
        }
    };
}

// ========== 检查申请 ==========

/// 检查申请状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Pending,    // 待执行
    Scheduled,  // 已预约
    InProgress, // 检查中
    Completed,  // 已完成
    Reported,   // 已出报告
    Approved,   // 已审核
    Cancelled,  // 已取消
}

status_codes!(OrderStatus, "order", {
    Pending = 0,
    Scheduled = 1,
    InProgress = 2,
    Completed = 3,
    Reported = 4,
    Approved = 5,
    Cancelled = 6,
});

impl OrderStatus {
    /// 检查是否已经执行完毕（可以出报告）
    pub fn is_examined(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Reported | OrderStatus::Approved
        )
    }
}

/// 患者类别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PatientCategory {
    Insured, // 医保
    SelfPay, // 自费
}

status_codes!(PatientCategory, "patient category", {
    Insured = 1,
    SelfPay = 2,
});

/// 申请优先级
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum OrderPriority {
    Normal,
    Urgent,
    Emergency,
}

status_codes!(OrderPriority, "priority", {
    Normal = 1,
    Urgent = 2,
    Emergency = 3,
});

/// 影像检查申请
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub request_code: String, // 申请单号
    pub patient_id: Uuid,
    pub ordering_clinician_id: Uuid,
    pub service_id: Uuid,
    pub service_name: String,
    pub requested_at: DateTime<Utc>,
    pub patient_category: PatientCategory,
    pub priority: OrderPriority,
    pub status: OrderStatus,
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

/// 新建申请的输入，必填项以 `Option` 接收以便给出验证错误
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewOrder {
    pub patient_id: Option<Uuid>,
    pub ordering_clinician_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub service_name: Option<String>,
    pub patient_category: Option<PatientCategory>,
    pub priority: Option<OrderPriority>,
    pub clinical_info: Option<String>,
    pub body_part: Option<String>,
    #[serde(default)]
    pub contrast: bool,
}

// ========== 检查执行 ==========

/// 一次实际执行的检查
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
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

impl Exam {
    /// 已开始且尚未结束
    pub fn is_open(&self) -> bool {
        self.started_at.is_some() && self.ended_at.is_none()
    }
}

/// 检查所在的房间与设备
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExamPlacement {
    pub room_id: Option<Uuid>,
    pub modality_id: Option<Uuid>,
}

// ========== 诊断报告 ==========

/// 报告审核状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ReportStatus {
    Draft,               // 草稿
    PreliminaryApproved, // 初审
    FinalApproved,       // 终审
}

status_codes!(ReportStatus, "report", {
    Draft = 0,
    PreliminaryApproved = 1,
    FinalApproved = 2,
});

/// 报告正文
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportContent {
    pub findings: String,
    pub impression: Option<String>,
    pub recommendations: Option<String>,
}

/// 放射科诊断报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub author_id: Uuid,
    pub content: ReportContent,
    pub status: ReportStatus,
    pub preliminary_note: Option<String>,
    pub preliminary_approved_by: Option<Uuid>,
    pub preliminary_approved_at: Option<DateTime<Utc>>,
    pub approver_id: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

// ========== 排队 ==========

/// 排队状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum QueueStatus {
    Waiting,    // 等待
    Called,     // 已叫号
    InProgress, // 检查中
    Completed,  // 已完成
    Skipped,    // 已过号
}

status_codes!(QueueStatus, "queue", {
    Waiting = 0,
    Called = 1,
    InProgress = 2,
    Completed = 3,
    Skipped = 4,
});

/// 房间排队记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueAssignment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub room_id: Uuid,
    pub modality_id: Option<Uuid>,
    pub queue_date: NaiveDate,
    pub queue_number: i32,
    pub status: QueueStatus,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: Uuid,
    pub called_at: Option<DateTime<Utc>>,
    pub called_by: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub version: i64,
}

/// 待分配号码的排队记录，号码由存储层在插入时原子生成
#[derive(Debug, Clone)]
pub struct NewQueueAssignment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub room_id: Uuid,
    pub modality_id: Option<Uuid>,
    pub queue_date: NaiveDate,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: Uuid,
    pub notes: Option<String>,
}

impl NewQueueAssignment {
    pub fn into_assignment(self, queue_number: i32) -> QueueAssignment {
        QueueAssignment {
            id: self.id,
            order_id: self.order_id,
            room_id: self.room_id,
            modality_id: self.modality_id,
            queue_date: self.queue_date,
            queue_number,
            status: QueueStatus::Waiting,
            assigned_at: self.assigned_at,
            assigned_by: self.assigned_by,
            called_at: None,
            called_by: None,
            started_at: None,
            completed_at: None,
            notes: self.notes,
            version: 0,
        }
    }
}

/// 房间当日统计
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RoomStatistics {
    pub room_id: Uuid,
    pub waiting: u32,
    pub called: u32,
    pub in_progress: u32,
    pub completed: u32,
    pub skipped: u32,
    pub total: u32,
    pub average_wait_minutes: f64,
}

// ========== 签名 ==========

/// 签名方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignatureType {
    HardwareToken, // USB Token
    ESignature,    // 电子签名
    RemoteService, // 远程签名服务
}

status_codes!(SignatureType, "signature type", {
    HardwareToken = 1,
    ESignature = 2,
    RemoteService = 3,
});

/// 签名记录状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignatureStatus {
    Signed,
    Rejected,
    Cancelled,
}

status_codes!(SignatureStatus, "signature", {
    Signed = 0,
    Rejected = 1,
    Cancelled = 2,
});

/// 报告签名审计记录，只追加不修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub id: Uuid,
    pub report_id: Uuid,
    pub signer_id: Uuid,
    pub signature_type: Option<SignatureType>,
    pub signed_at: DateTime<Utc>,
    pub transaction_id: Option<String>,
    pub status: SignatureStatus,
    pub document_digest: Option<String>,
    pub signature_value: Option<Vec<u8>>,
    pub reason: Option<String>,
}

// ========== 会诊 ==========

/// 会诊状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

status_codes!(SessionStatus, "consultation session", {
    Scheduled = 0,
    InProgress = 1,
    Completed = 2,
    Cancelled = 3,
});

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

/// 会诊
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationSession {
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
    pub status: SessionStatus,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSession {
    pub title: String,
    pub description: Option<String>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub leader_id: Option<Uuid>,
    pub secretary_id: Option<Uuid>,
}

/// 会诊病例状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CaseStatus {
    Pending,
    Concluded,
}

status_codes!(CaseStatus, "consultation case", {
    Pending = 0,
    Concluded = 1,
});

/// 会诊病例，关联一个检查申请
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationCase {
    pub id: Uuid,
    pub session_id: Uuid,
    pub order_id: Uuid,
    pub order_number: i32,
    pub reason: Option<String>,
    pub preliminary_diagnosis: Option<String>,
    pub status: CaseStatus,
    pub conclusion: Option<String>,
    pub recommendation: Option<String>,
    pub version: i64,
}

/// 参与者角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ParticipantRole {
    Leader,
    Secretary,
    Participant,
    Observer,
}

status_codes!(ParticipantRole, "participant role", {
    Leader = 1,
    Secretary = 2,
    Participant = 3,
    Observer = 4,
});

/// 参与者状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ParticipantStatus {
    Invited,
    Accepted,
    Declined,
    Joined,
    Left,
}

status_codes!(ParticipantStatus, "participant", {
    Invited = 0,
    Accepted = 1,
    Declined = 2,
    Joined = 3,
    Left = 4,
});

/// 会诊参与者
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub status: ParticipantStatus,
    pub invited_at: Option<DateTime<Utc>>,
    pub joined_at: Option<DateTime<Utc>>,
    pub left_at: Option<DateTime<Utc>>,
    pub response_note: Option<String>,
    pub version: i64,
}

/// 会诊详情
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    pub session: ConsultationSession,
    pub cases: Vec<ConsultationCase>,
    pub participants: Vec<Participant>,
}
