//! 内存存储实现
//!
//! 用于开发环境和测试。提交时先在副本上应用全部变更，全部通过后整体替换，
//! 与数据库事务具有相同的全有或全无语义。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, RisError};
use crate::models::*;
use crate::store::{Change, OrderStore, UnitOfWork, Versioned};

#[derive(Debug, Clone, Default)]
struct Tables {
    orders: HashMap<Uuid, Order>,
    exams: HashMap<Uuid, Exam>,
    reports: HashMap<Uuid, Report>,
    signatures: Vec<SignatureRecord>,
    assignments: HashMap<Uuid, QueueAssignment>,
    sessions: HashMap<Uuid, ConsultationSession>,
    cases: HashMap<Uuid, ConsultationCase>,
    participants: HashMap<Uuid, Participant>,
}

/// 版本号检查后写入 `version + 1`
fn update_versioned<T: Versioned>(
    table: &mut HashMap<Uuid, T>,
    entity: &'static str,
    id: Uuid,
    value: T,
) -> Result<()> {
    let stored = table.get(&id).ok_or_else(|| RisError::not_found(entity, id))?;
    if stored.version() != value.version() {
        return Err(RisError::conflict(entity, id));
    }
    table.insert(id, value.committed());
    Ok(())
}

fn insert_unique<T>(
    table: &mut HashMap<Uuid, T>,
    entity: &'static str,
    id: Uuid,
    value: T,
) -> Result<()> {
    if table.contains_key(&id) {
        return Err(RisError::conflict(entity, id));
    }
    table.insert(id, value);
    Ok(())
}

impl Tables {
    fn apply(&mut self, change: Change) -> Result<()> {
        match change {
            Change::InsertOrder(order) => insert_unique(&mut self.orders, "order", order.id, order),
            Change::UpdateOrder(order) => {
                update_versioned(&mut self.orders, "order", order.id, order)
            }
            Change::InsertExam(exam) => {
                let duplicate = self.exams.values().any(|e| {
                    e.order_id == exam.order_id || e.accession_number == exam.accession_number
                });
                if duplicate {
                    return Err(RisError::conflict("exam", exam.order_id));
                }
                insert_unique(&mut self.exams, "exam", exam.id, exam)
            }
            Change::UpdateExam(exam) => update_versioned(&mut self.exams, "exam", exam.id, exam),
            Change::InsertReport(report) => {
                if self.reports.values().any(|r| r.exam_id == report.exam_id) {
                    return Err(RisError::conflict("report", report.exam_id));
                }
                insert_unique(&mut self.reports, "report", report.id, report)
            }
            Change::UpdateReport(report) => {
                update_versioned(&mut self.reports, "report", report.id, report)
            }
            Change::AppendSignature(record) => {
                if self.signatures.iter().any(|s| s.id == record.id) {
                    return Err(RisError::conflict("signature", record.id));
                }
                self.signatures.push(record);
                Ok(())
            }
            Change::UpdateAssignment(assignment) => update_versioned(
                &mut self.assignments,
                "queue assignment",
                assignment.id,
                assignment,
            ),
            Change::InsertSession(session) => {
                insert_unique(&mut self.sessions, "consultation session", session.id, session)
            }
            Change::UpdateSession(session) => update_versioned(
                &mut self.sessions,
                "consultation session",
                session.id,
                session,
            ),
            Change::InsertCase(case) => {
                let duplicate = self
                    .cases
                    .values()
                    .any(|c| c.session_id == case.session_id && c.order_id == case.order_id);
                if duplicate {
                    return Err(RisError::conflict("consultation case", case.order_id));
                }
                insert_unique(&mut self.cases, "consultation case", case.id, case)
            }
            Change::UpdateCase(case) => {
                update_versioned(&mut self.cases, "consultation case", case.id, case)
            }
            Change::DeleteCase(case) => {
                match self.cases.get(&case.id) {
                    Some(stored) if stored.version == case.version => {}
                    Some(_) => return Err(RisError::conflict("consultation case", case.id)),
                    None => return Err(RisError::not_found("consultation case", case.id)),
                }
                self.cases.remove(&case.id);
                Ok(())
            }
            Change::InsertParticipant(participant) => {
                let duplicate = self.participants.values().any(|p| {
                    p.session_id == participant.session_id && p.user_id == participant.user_id
                });
                if duplicate {
                    return Err(RisError::conflict("participant", participant.user_id));
                }
                insert_unique(&mut self.participants, "participant", participant.id, participant)
            }
            Change::UpdateParticipant(participant) => update_versioned(
                &mut self.participants,
                "participant",
                participant.id,
                participant,
            ),
        }
    }
}

/// 基于内存的 [`OrderStore`]
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    tables: RwLock<Tables>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn get_exam(&self, id: Uuid) -> Result<Option<Exam>> {
        Ok(self.tables.read().await.exams.get(&id).cloned())
    }

    async fn find_exam_by_order(&self, order_id: Uuid) -> Result<Option<Exam>> {
        let tables = self.tables.read().await;
        Ok(tables.exams.values().find(|e| e.order_id == order_id).cloned())
    }

    async fn get_report(&self, id: Uuid) -> Result<Option<Report>> {
        Ok(self.tables.read().await.reports.get(&id).cloned())
    }

    async fn find_report_by_exam(&self, exam_id: Uuid) -> Result<Option<Report>> {
        let tables = self.tables.read().await;
        Ok(tables.reports.values().find(|r| r.exam_id == exam_id).cloned())
    }

    async fn list_signatures(&self, report_id: Uuid) -> Result<Vec<SignatureRecord>> {
        let tables = self.tables.read().await;
        // 追加顺序即签名时间顺序
        Ok(tables
            .signatures
            .iter()
            .filter(|s| s.report_id == report_id)
            .cloned()
            .collect())
    }

    async fn get_assignment(&self, id: Uuid) -> Result<Option<QueueAssignment>> {
        Ok(self.tables.read().await.assignments.get(&id).cloned())
    }

    async fn list_room_queue(&self, room_id: Uuid, day: NaiveDate) -> Result<Vec<QueueAssignment>> {
        let tables = self.tables.read().await;
        let mut queue: Vec<_> = tables
            .assignments
            .values()
            .filter(|a| a.room_id == room_id && a.queue_date == day)
            .cloned()
            .collect();
        queue.sort_by_key(|a| a.queue_number);
        Ok(queue)
    }

    async fn list_assignments_for_day(&self, day: NaiveDate) -> Result<Vec<QueueAssignment>> {
        let tables = self.tables.read().await;
        let mut all: Vec<_> = tables
            .assignments
            .values()
            .filter(|a| a.queue_date == day)
            .cloned()
            .collect();
        all.sort_by_key(|a| (a.room_id, a.queue_number));
        Ok(all)
    }

    async fn list_assignments_for_order(&self, order_id: Uuid) -> Result<Vec<QueueAssignment>> {
        let tables = self.tables.read().await;
        let mut all: Vec<_> = tables
            .assignments
            .values()
            .filter(|a| a.order_id == order_id)
            .cloned()
            .collect();
        all.sort_by_key(|a| a.assigned_at);
        Ok(all)
    }

    async fn insert_assignment(&self, assignment: NewQueueAssignment) -> Result<QueueAssignment> {
        let mut tables = self.tables.write().await;
        if tables.assignments.contains_key(&assignment.id) {
            return Err(RisError::conflict("queue assignment", assignment.id));
        }
        let taken = tables
            .assignments
            .values()
            .filter(|a| a.room_id == assignment.room_id && a.queue_date == assignment.queue_date)
            .count();
        let number = i32::try_from(taken + 1)
            .map_err(|_| RisError::Storage("queue number overflow".to_string()))?;
        let created = assignment.into_assignment(number);
        debug!(
            "Assigned queue number {} for room {} on {}",
            number, created.room_id, created.queue_date
        );
        tables.assignments.insert(created.id, created.clone());
        Ok(created)
    }

    async fn claim_next_waiting(
        &self,
        room_id: Uuid,
        day: NaiveDate,
        called_at: DateTime<Utc>,
        called_by: Uuid,
    ) -> Result<Option<QueueAssignment>> {
        let mut tables = self.tables.write().await;
        let next_id = tables
            .assignments
            .values()
            .filter(|a| {
                a.room_id == room_id && a.queue_date == day && a.status == QueueStatus::Waiting
            })
            .min_by_key(|a| a.queue_number)
            .map(|a| a.id);

        let Some(id) = next_id else {
            return Ok(None);
        };
        let Some(entry) = tables.assignments.get_mut(&id) else {
            return Ok(None);
        };
        entry.status = QueueStatus::Called;
        entry.called_at = Some(called_at);
        entry.called_by = Some(called_by);
        entry.version += 1;
        Ok(Some(entry.clone()))
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<ConsultationSession>> {
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn get_case(&self, id: Uuid) -> Result<Option<ConsultationCase>> {
        Ok(self.tables.read().await.cases.get(&id).cloned())
    }

    async fn list_cases(&self, session_id: Uuid) -> Result<Vec<ConsultationCase>> {
        let tables = self.tables.read().await;
        let mut cases: Vec<_> = tables
            .cases
            .values()
            .filter(|c| c.session_id == session_id)
            .cloned()
            .collect();
        cases.sort_by_key(|c| c.order_number);
        Ok(cases)
    }

    async fn list_participants(&self, session_id: Uuid) -> Result<Vec<Participant>> {
        let tables = self.tables.read().await;
        let mut participants: Vec<_> = tables
            .participants
            .values()
            .filter(|p| p.session_id == session_id)
            .cloned()
            .collect();
        participants.sort_by_key(|p| (p.role.code(), p.invited_at));
        Ok(participants)
    }

    async fn find_participant(
        &self,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participant>> {
        let tables = self.tables.read().await;
        Ok(tables
            .participants
            .values()
            .find(|p| p.session_id == session_id && p.user_id == user_id)
            .cloned())
    }

    async fn commit(&self, work: UnitOfWork) -> Result<()> {
        if work.is_empty() {
            return Ok(());
        }
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        for change in work.into_changes() {
            let (entity, id) = change.target();
            staged.apply(change).map_err(|e| {
                debug!("Rejected change to {} {}: {}", entity, id, e);
                e
            })?;
        }
        *tables = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn sample_order() -> Order {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        Order {
            id: Uuid::new_v4(),
            request_code: "RQ20240501080000ABCD".to_string(),
            patient_id: Uuid::new_v4(),
            ordering_clinician_id: Uuid::new_v4(),
            service_id: Uuid::new_v4(),
            service_name: "胸部CT平扫".to_string(),
            requested_at: now,
            patient_category: PatientCategory::Insured,
            priority: OrderPriority::Normal,
            status: OrderStatus::Pending,
            clinical_info: None,
            body_part: Some("胸部".to_string()),
            contrast: false,
            scheduled_at: None,
            cancellation_reason: None,
            cancelled_at: None,
            cancelled_by: None,
            created_by: Uuid::new_v4(),
            updated_at: now,
            version: 0,
        }
    }

    fn new_assignment(room_id: Uuid, day: NaiveDate) -> NewQueueAssignment {
        NewQueueAssignment {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            room_id,
            modality_id: None,
            queue_date: day,
            assigned_at: Utc::now(),
            assigned_by: Uuid::new_v4(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_rejects_stale_write() {
        let store = MemoryOrderStore::new();
        let order = sample_order();
        store.commit(UnitOfWork::new().with(Change::InsertOrder(order.clone()))).await.unwrap();

        let mut first = order.clone();
        first.status = OrderStatus::Scheduled;
        store.commit(UnitOfWork::new().with(Change::UpdateOrder(first))).await.unwrap();

        let mut stale = order.clone();
        stale.status = OrderStatus::Cancelled;
        let err = store
            .commit(UnitOfWork::new().with(Change::UpdateOrder(stale)))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Scheduled);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_failed_commit_applies_nothing() {
        let store = MemoryOrderStore::new();
        let order = sample_order();
        store.commit(UnitOfWork::new().with(Change::InsertOrder(order.clone()))).await.unwrap();

        let mut updated = order.clone();
        updated.status = OrderStatus::Scheduled;
        let mut stale = order.clone();
        stale.version = 7;

        let work = UnitOfWork::new()
            .with(Change::UpdateOrder(updated))
            .with(Change::UpdateOrder(stale));
        assert!(store.commit(work).await.is_err());

        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
        assert_eq!(stored.version, 0);
    }

    #[tokio::test]
    async fn test_queue_numbers_are_dense_per_room_and_day() {
        let store = MemoryOrderStore::new();
        let room_a = Uuid::new_v4();
        let room_b = Uuid::new_v4();
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let next_day = day.succ_opt().unwrap();

        let mut issued = Vec::new();
        for (room, day) in [(room_a, day), (room_a, day), (room_b, day), (room_a, next_day)] {
            let assignment = store.insert_assignment(new_assignment(room, day)).await.unwrap();
            issued.push(assignment.queue_number);
        }
        assert_eq!(issued, vec![1, 2, 1, 1]);
    }

    #[tokio::test]
    async fn test_concurrent_assignments_get_distinct_numbers() {
        let store = Arc::new(MemoryOrderStore::new());
        let room = Uuid::new_v4();
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert_assignment(new_assignment(room, day)).await.unwrap().queue_number
            }));
        }
        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.unwrap());
        }
        numbers.sort();
        assert_eq!(numbers, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_claim_next_waiting_takes_lowest_number() {
        let store = MemoryOrderStore::new();
        let room = Uuid::new_v4();
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let first = store.insert_assignment(new_assignment(room, day)).await.unwrap();
        store.insert_assignment(new_assignment(room, day)).await.unwrap();

        let caller = Uuid::new_v4();
        let called = store
            .claim_next_waiting(room, day, Utc::now(), caller)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(called.id, first.id);
        assert_eq!(called.status, QueueStatus::Called);
        assert_eq!(called.called_by, Some(caller));

        let second = store
            .claim_next_waiting(room, day, Utc::now(), caller)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.queue_number, 2);
        assert!(store.claim_next_waiting(room, day, Utc::now(), caller).await.unwrap().is_none());
    }
}
