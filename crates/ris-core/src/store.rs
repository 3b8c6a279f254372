//! 持久化接口
//!
//! 所有组件只通过 [`OrderStore`] 共享状态。多条记录的状态转换打包成一个
//! [`UnitOfWork`] 原子提交：更新类变更携带读取时的 `version`，任何一条版本
//! 不符或唯一性冲突都会使整批变更失败并返回 `ConcurrencyConflict`。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

/// 带乐观锁版本号的实体
pub trait Versioned: Clone {
    fn version(&self) -> i64;

    fn set_version(&mut self, version: i64);

    /// 更新提交成功后存储中的副本
    fn committed(&self) -> Self {
        let mut next = self.clone();
        next.set_version(self.version() + 1);
        next
    }
}

macro_rules! versioned {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Versioned for $ty {
                fn version(&self) -> i64 {
                    self.version
                }

                fn set_version(&mut self, version: i64) {
                    self.version = version;
                }
            }
        )+
    };
}

versioned!(
    Order,
    Exam,
    Report,
    QueueAssignment,
    ConsultationSession,
    ConsultationCase,
    Participant,
);

/// 一次原子提交中的单条变更
#[derive(Debug, Clone)]
pub enum Change {
    InsertOrder(Order),
    /// 以 `order.version` 作为期望版本
    UpdateOrder(Order),
    InsertExam(Exam),
    UpdateExam(Exam),
    InsertReport(Report),
    UpdateReport(Report),
    AppendSignature(SignatureRecord),
    UpdateAssignment(QueueAssignment),
    InsertSession(ConsultationSession),
    UpdateSession(ConsultationSession),
    InsertCase(ConsultationCase),
    UpdateCase(ConsultationCase),
    DeleteCase(ConsultationCase),
    InsertParticipant(Participant),
    UpdateParticipant(Participant),
}

impl Change {
    /// 变更涉及的实体名称与主键
    pub fn target(&self) -> (&'static str, Uuid) {
        match self {
            Change::InsertOrder(o) | Change::UpdateOrder(o) => ("order", o.id),
            Change::InsertExam(e) | Change::UpdateExam(e) => ("exam", e.id),
            Change::InsertReport(r) | Change::UpdateReport(r) => ("report", r.id),
            Change::AppendSignature(s) => ("signature", s.id),
            Change::UpdateAssignment(a) => ("queue assignment", a.id),
            Change::InsertSession(s) | Change::UpdateSession(s) => ("consultation session", s.id),
            Change::InsertCase(c) | Change::UpdateCase(c) | Change::DeleteCase(c) => {
                ("consultation case", c.id)
            }
            Change::InsertParticipant(p) | Change::UpdateParticipant(p) => ("participant", p.id),
        }
    }
}

/// 原子提交的变更集合
#[derive(Debug, Clone, Default)]
pub struct UnitOfWork {
    changes: Vec<Change>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, change: Change) -> Self {
        self.changes.push(change);
        self
    }

    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn into_changes(self) -> Vec<Change> {
        self.changes
    }
}

/// 检查申请、检查、报告、排队、签名与会诊的持久化存储
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>>;

    async fn get_exam(&self, id: Uuid) -> Result<Option<Exam>>;

    async fn find_exam_by_order(&self, order_id: Uuid) -> Result<Option<Exam>>;

    async fn get_report(&self, id: Uuid) -> Result<Option<Report>>;

    async fn find_report_by_exam(&self, exam_id: Uuid) -> Result<Option<Report>>;

    /// 按签名时间升序
    async fn list_signatures(&self, report_id: Uuid) -> Result<Vec<SignatureRecord>>;

    async fn get_assignment(&self, id: Uuid) -> Result<Option<QueueAssignment>>;

    /// 按排队号升序
    async fn list_room_queue(&self, room_id: Uuid, day: NaiveDate) -> Result<Vec<QueueAssignment>>;

    async fn list_assignments_for_day(&self, day: NaiveDate) -> Result<Vec<QueueAssignment>>;

    async fn list_assignments_for_order(&self, order_id: Uuid) -> Result<Vec<QueueAssignment>>;

    /// 插入排队记录并原子地分配 `count(room, day) + 1` 的排队号
    async fn insert_assignment(&self, assignment: NewQueueAssignment) -> Result<QueueAssignment>;

    /// 原子地取出房间当日排队号最小的等待记录并置为已叫号
    async fn claim_next_waiting(
        &self,
        room_id: Uuid,
        day: NaiveDate,
        called_at: DateTime<Utc>,
        called_by: Uuid,
    ) -> Result<Option<QueueAssignment>>;

    async fn get_session(&self, id: Uuid) -> Result<Option<ConsultationSession>>;

    async fn get_case(&self, id: Uuid) -> Result<Option<ConsultationCase>>;

    /// 按病例序号升序
    async fn list_cases(&self, session_id: Uuid) -> Result<Vec<ConsultationCase>>;

    async fn list_participants(&self, session_id: Uuid) -> Result<Vec<Participant>>;

    async fn find_participant(
        &self,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participant>>;

    /// 原子提交，全部成功或全部失败
    async fn commit(&self, work: UnitOfWork) -> Result<()>;
}
