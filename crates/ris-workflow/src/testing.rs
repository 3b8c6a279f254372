//! 单元测试用的外部服务替身

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use ris_core::integration::{
    ArchiveLinker, DocumentRenderer, ReportDocument, SignedPayload, SigningContext, SigningError,
    SigningService,
};
use ris_core::{
    Change, ConsultationCase, ConsultationSession, Exam, MemoryOrderStore, NewQueueAssignment,
    Order, OrderStore, Participant, QueueAssignment, Report, Result, RisError, SignatureRecord,
    UnitOfWork,
};
use uuid::Uuid;

pub(crate) struct NoopArchive;

#[async_trait]
impl ArchiveLinker for NoopArchive {
    async fn link_study(&self, _exam_id: Uuid, _study_instance_uid: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct StubSigner {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl StubSigner {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SigningService for StubSigner {
    async fn sign(
        &self,
        document: &[u8],
        context: SigningContext,
    ) -> std::result::Result<SignedPayload, SigningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SigningError::Unavailable("token not inserted".to_string()));
        }
        Ok(SignedPayload {
            signature: document.iter().rev().take(16).copied().collect(),
            transaction_id: format!("TX-{}", context.signer_id.simple()),
        })
    }
}

pub(crate) struct JsonRenderer;

impl DocumentRenderer for JsonRenderer {
    fn render(&self, document: &ReportDocument<'_>) -> Result<Vec<u8>> {
        serde_json::to_vec(document).map_err(|e| RisError::Validation(e.to_string()))
    }
}

/// 前若干次新建检查记录的提交按检查号已被占用拒绝，其余操作转发给内存存储
pub(crate) struct TakenAccessionStore {
    inner: MemoryOrderStore,
    remaining: AtomicUsize,
    rejected: Mutex<Vec<String>>,
}

impl TakenAccessionStore {
    pub(crate) fn new(collisions: usize) -> Self {
        Self {
            inner: MemoryOrderStore::new(),
            remaining: AtomicUsize::new(collisions),
            rejected: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn rejected(&self) -> Vec<String> {
        self.rejected.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderStore for TakenAccessionStore {
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        self.inner.get_order(id).await
    }

    async fn get_exam(&self, id: Uuid) -> Result<Option<Exam>> {
        self.inner.get_exam(id).await
    }

    async fn find_exam_by_order(&self, order_id: Uuid) -> Result<Option<Exam>> {
        self.inner.find_exam_by_order(order_id).await
    }

    async fn get_report(&self, id: Uuid) -> Result<Option<Report>> {
        self.inner.get_report(id).await
    }

    async fn find_report_by_exam(&self, exam_id: Uuid) -> Result<Option<Report>> {
        self.inner.find_report_by_exam(exam_id).await
    }

    async fn list_signatures(&self, report_id: Uuid) -> Result<Vec<SignatureRecord>> {
        self.inner.list_signatures(report_id).await
    }

    async fn get_assignment(&self, id: Uuid) -> Result<Option<QueueAssignment>> {
        self.inner.get_assignment(id).await
    }

    async fn list_room_queue(&self, room_id: Uuid, day: NaiveDate) -> Result<Vec<QueueAssignment>> {
        self.inner.list_room_queue(room_id, day).await
    }

    async fn list_assignments_for_day(&self, day: NaiveDate) -> Result<Vec<QueueAssignment>> {
        self.inner.list_assignments_for_day(day).await
    }

    async fn list_assignments_for_order(&self, order_id: Uuid) -> Result<Vec<QueueAssignment>> {
        self.inner.list_assignments_for_order(order_id).await
    }

    async fn insert_assignment(&self, assignment: NewQueueAssignment) -> Result<QueueAssignment> {
        self.inner.insert_assignment(assignment).await
    }

    async fn claim_next_waiting(
        &self,
        room_id: Uuid,
        day: NaiveDate,
        called_at: DateTime<Utc>,
        called_by: Uuid,
    ) -> Result<Option<QueueAssignment>> {
        self.inner
            .claim_next_waiting(room_id, day, called_at, called_by)
            .await
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<ConsultationSession>> {
        self.inner.get_session(id).await
    }

    async fn get_case(&self, id: Uuid) -> Result<Option<ConsultationCase>> {
        self.inner.get_case(id).await
    }

    async fn list_cases(&self, session_id: Uuid) -> Result<Vec<ConsultationCase>> {
        self.inner.list_cases(session_id).await
    }

    async fn list_participants(&self, session_id: Uuid) -> Result<Vec<Participant>> {
        self.inner.list_participants(session_id).await
    }

    async fn find_participant(
        &self,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participant>> {
        self.inner.find_participant(session_id, user_id).await
    }

    async fn commit(&self, work: UnitOfWork) -> Result<()> {
        let inserted = work.changes().iter().find_map(|change| match change {
            Change::InsertExam(exam) => Some(exam),
            _ => None,
        });
        if let Some(exam) = inserted {
            let taken = self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if taken {
                self.rejected
                    .lock()
                    .unwrap()
                    .push(exam.accession_number.clone());
                return Err(RisError::conflict("exam", exam.order_id));
            }
        }
        self.inner.commit(work).await
    }
}
