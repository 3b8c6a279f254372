//! 检查室排队管理
//!
//! 每个房间每天独立编号，号码在插入时由存储层原子分配。过号记录保留原号码，
//! 不重新编号，号码中间出现空缺是正常现象。

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use ris_core::utils::{non_blank, Clock};
use ris_core::{
    Actor, Change, NewQueueAssignment, OrderStatus, OrderStore, QueueAssignment, QueueStatus,
    Result, RisError, RoomStatistics, UnitOfWork, Versioned,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::state_machine::{QueueEvent, StateMachine};

/// 排队分配请求
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct AssignRequest {
    pub order_id: Uuid,
    pub room_id: Uuid,
    pub modality_id: Option<Uuid>,
    pub notes: Option<String>,
}

/// 检查室排队调度
pub struct RoomQueueScheduler {
    store: Arc<dyn OrderStore>,
    clock: Arc<dyn Clock>,
    /// 本地时间相对 UTC 的偏移，决定“当天”的范围
    utc_offset: Duration,
    state_machine: StateMachine<QueueStatus, QueueEvent>,
}

impl RoomQueueScheduler {
    pub fn new(store: Arc<dyn OrderStore>, clock: Arc<dyn Clock>, utc_offset_minutes: i32) -> Self {
        Self {
            store,
            clock,
            utc_offset: Duration::minutes(i64::from(utc_offset_minutes)),
            state_machine: StateMachine::queue(),
        }
    }

    /// 某一时刻对应的排队日期
    pub fn queue_day(&self, at: DateTime<Utc>) -> NaiveDate {
        (at + self.utc_offset).date_naive()
    }

    pub fn today(&self) -> NaiveDate {
        self.queue_day(self.clock.now())
    }

    /// 分配排队号，号码为当天该房间已有记录数加一
    pub async fn assign(&self, request: AssignRequest, actor: Actor) -> Result<QueueAssignment> {
        let order = self
            .store
            .get_order(request.order_id)
            .await?
            .ok_or_else(|| RisError::not_found("order", request.order_id))?;
        if order.status == OrderStatus::Cancelled {
            return Err(RisError::invalid_state("order", order.status, "AssignQueue"));
        }

        let now = self.clock.now();
        let assignment = self
            .store
            .insert_assignment(NewQueueAssignment {
                id: Uuid::new_v4(),
                order_id: request.order_id,
                room_id: request.room_id,
                modality_id: request.modality_id,
                queue_date: self.queue_day(now),
                assigned_at: now,
                assigned_by: actor.user_id,
                notes: non_blank(request.notes),
            })
            .await?;

        info!(
            "Order {} assigned to room {} with queue number {} by {}",
            assignment.order_id, assignment.room_id, assignment.queue_number, actor.user_id
        );
        Ok(assignment)
    }

    /// 叫下一个号。没有等待中的记录时返回 `None`
    pub async fn call_next(&self, room_id: Uuid, actor: Actor) -> Result<Option<QueueAssignment>> {
        let now = self.clock.now();
        let called = self
            .store
            .claim_next_waiting(room_id, self.queue_day(now), now, actor.user_id)
            .await?;

        match &called {
            Some(assignment) => info!(
                "Room {} called queue number {} (order {}) by {}",
                room_id, assignment.queue_number, assignment.order_id, actor.user_id
            ),
            None => debug!("Room {} has no waiting patients", room_id),
        }
        Ok(called)
    }

    /// 开始检查
    pub async fn start(&self, assignment_id: Uuid, actor: Actor) -> Result<QueueAssignment> {
        self.apply(assignment_id, QueueEvent::Start, None, actor).await
    }

    /// 过号，只允许从等待或已叫号状态
    pub async fn skip(
        &self,
        assignment_id: Uuid,
        reason: &str,
        actor: Actor,
    ) -> Result<QueueAssignment> {
        let reason = non_blank(Some(reason.to_string()))
            .ok_or_else(|| RisError::Validation("过号原因不能为空".to_string()))?;
        self.apply(assignment_id, QueueEvent::Skip, Some(reason), actor).await
    }

    /// 完成检查
    pub async fn complete(&self, assignment_id: Uuid, actor: Actor) -> Result<QueueAssignment> {
        self.apply(assignment_id, QueueEvent::Complete, None, actor).await
    }

    async fn apply(
        &self,
        assignment_id: Uuid,
        event: QueueEvent,
        note: Option<String>,
        actor: Actor,
    ) -> Result<QueueAssignment> {
        let assignment = self.get(assignment_id).await?;
        let from = assignment.status;
        let updated = self.advance(assignment, event, note, self.clock.now(), actor)?;
        self.store
            .commit(UnitOfWork::new().with(Change::UpdateAssignment(updated.clone())))
            .await?;
        info!(
            "Queue assignment {} status {:?} -> {:?} by {}",
            assignment_id, from, updated.status, actor.user_id
        );
        Ok(updated.committed())
    }

    /// 计算状态转换后的记录，不提交
    pub(crate) fn advance(
        &self,
        assignment: QueueAssignment,
        event: QueueEvent,
        note: Option<String>,
        now: DateTime<Utc>,
        actor: Actor,
    ) -> Result<QueueAssignment> {
        let next = self.state_machine.transition(assignment.status, event)?;
        let mut updated = QueueAssignment {
            status: next,
            ..assignment
        };
        match event {
            QueueEvent::Call => {
                updated.called_at = Some(now);
                updated.called_by = Some(actor.user_id);
            }
            QueueEvent::Start => updated.started_at = Some(now),
            QueueEvent::Complete => updated.completed_at = Some(now),
            QueueEvent::Skip => {}
        }
        if let Some(note) = note {
            updated.notes = Some(note);
        }
        Ok(updated)
    }

    /// 申请当前处于某些状态的排队记录
    pub(crate) async fn active_for_order(
        &self,
        order_id: Uuid,
        statuses: &[QueueStatus],
    ) -> Result<Vec<QueueAssignment>> {
        let mut assignments = self.store.list_assignments_for_order(order_id).await?;
        assignments.retain(|a| statuses.contains(&a.status));
        Ok(assignments)
    }

    pub async fn get(&self, assignment_id: Uuid) -> Result<QueueAssignment> {
        self.store
            .get_assignment(assignment_id)
            .await?
            .ok_or_else(|| RisError::not_found("queue assignment", assignment_id))
    }

    /// 房间某天的全部排队记录，按排队号升序
    pub async fn room_queue(
        &self,
        room_id: Uuid,
        day: Option<NaiveDate>,
    ) -> Result<Vec<QueueAssignment>> {
        let day = day.unwrap_or_else(|| self.today());
        debug!("Loading queue of room {} on {}", room_id, day);
        self.store.list_room_queue(room_id, day).await
    }

    /// 各房间某天的排队统计
    pub async fn room_statistics(&self, day: Option<NaiveDate>) -> Result<Vec<RoomStatistics>> {
        let day = day.unwrap_or_else(|| self.today());
        let assignments = self.store.list_assignments_for_day(day).await?;

        let mut by_room: BTreeMap<Uuid, (RoomStatistics, i64, u32)> = BTreeMap::new();
        for assignment in &assignments {
            let (stats, wait_seconds, waited) =
                by_room.entry(assignment.room_id).or_insert_with(|| {
                    (
                        RoomStatistics {
                            room_id: assignment.room_id,
                            ..Default::default()
                        },
                        0,
                        0,
                    )
                });

            stats.total += 1;
            match assignment.status {
                QueueStatus::Waiting => stats.waiting += 1,
                QueueStatus::Called => stats.called += 1,
                QueueStatus::InProgress => stats.in_progress += 1,
                QueueStatus::Completed => stats.completed += 1,
                QueueStatus::Skipped => stats.skipped += 1,
            }

            // 等待时长 = 叫号时间 - 分配时间
            if let Some(called_at) = assignment.called_at {
                *wait_seconds += (called_at - assignment.assigned_at).num_seconds();
                *waited += 1;
            }
        }

        Ok(by_room
            .into_values()
            .map(|(mut stats, wait_seconds, waited)| {
                if waited > 0 {
                    stats.average_wait_minutes = wait_seconds as f64 / 60.0 / f64::from(waited);
                }
                stats
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ris_core::utils::ManualClock;
    use ris_core::{MemoryOrderStore, NewOrder};

    use crate::order::OrderLifecycle;
    use crate::testing::NoopArchive;

    struct Fixture {
        clock: Arc<ManualClock>,
        orders: OrderLifecycle,
        queue: RoomQueueScheduler,
        actor: Actor,
    }

    fn fixture(start: DateTime<Utc>, utc_offset_minutes: i32) -> Fixture {
        let store = Arc::new(MemoryOrderStore::new());
        let clock = Arc::new(ManualClock::new(start));
        Fixture {
            orders: OrderLifecycle::new(store.clone(), clock.clone(), Arc::new(NoopArchive)),
            queue: RoomQueueScheduler::new(store, clock.clone(), utc_offset_minutes),
            clock,
            actor: Actor::new(Uuid::new_v4()),
        }
    }

    fn morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 1, 0, 0).unwrap()
    }

    async fn new_order(f: &Fixture) -> Uuid {
        let input = NewOrder {
            patient_id: Some(Uuid::new_v4()),
            ordering_clinician_id: Some(Uuid::new_v4()),
            service_id: Some(Uuid::new_v4()),
            service_name: Some("CT Head".to_string()),
            ..Default::default()
        };
        f.orders.create(input, f.actor).await.unwrap().id
    }

    fn request(order_id: Uuid, room_id: Uuid) -> AssignRequest {
        AssignRequest {
            order_id,
            room_id,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_assign_numbers_per_room() {
        let f = fixture(morning(), 0);
        let room = Uuid::new_v4();
        let other_room = Uuid::new_v4();

        let first = f.queue.assign(request(new_order(&f).await, room), f.actor).await.unwrap();
        let second = f.queue.assign(request(new_order(&f).await, room), f.actor).await.unwrap();
        let elsewhere = f
            .queue
            .assign(request(new_order(&f).await, other_room), f.actor)
            .await
            .unwrap();

        assert_eq!(first.queue_number, 1);
        assert_eq!(second.queue_number, 2);
        assert_eq!(elsewhere.queue_number, 1);
        assert_eq!(first.status, QueueStatus::Waiting);
        assert_eq!(first.assigned_by, f.actor.user_id);
    }

    #[tokio::test]
    async fn test_assign_rejects_missing_or_cancelled_order() {
        let f = fixture(morning(), 0);
        let room = Uuid::new_v4();

        let err = f.queue.assign(request(Uuid::new_v4(), room), f.actor).await.unwrap_err();
        assert!(matches!(err, RisError::NotFound { .. }));

        let order_id = new_order(&f).await;
        f.orders.cancel(order_id, "duplicate request", f.actor).await.unwrap();
        let err = f.queue.assign(request(order_id, room), f.actor).await.unwrap_err();
        assert!(matches!(err, RisError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_numbering_restarts_on_local_day_boundary() {
        // UTC+8：UTC 15:59 仍是当地 23:59
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 15, 59, 0).unwrap();
        let f = fixture(start, 8 * 60);
        let room = Uuid::new_v4();

        let late = f.queue.assign(request(new_order(&f).await, room), f.actor).await.unwrap();
        f.clock.advance(Duration::minutes(2));
        let next_day = f.queue.assign(request(new_order(&f).await, room), f.actor).await.unwrap();

        assert_eq!(late.queue_date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(next_day.queue_date, NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
        assert_eq!(next_day.queue_number, 1);
    }

    #[tokio::test]
    async fn test_call_next_never_recalls_called_patient() {
        let f = fixture(morning(), 0);
        let room = Uuid::new_v4();
        let only = f.queue.assign(request(new_order(&f).await, room), f.actor).await.unwrap();

        let called = f.queue.call_next(room, f.actor).await.unwrap().unwrap();
        assert_eq!(called.id, only.id);
        assert_eq!(called.status, QueueStatus::Called);
        assert_eq!(called.called_at, Some(morning()));

        assert!(f.queue.call_next(room, f.actor).await.unwrap().is_none());
        assert!(f.queue.call_next(room, f.actor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_skip_and_complete_rules() {
        let f = fixture(morning(), 0);
        let room = Uuid::new_v4();
        let first = f.queue.assign(request(new_order(&f).await, room), f.actor).await.unwrap();
        let second = f.queue.assign(request(new_order(&f).await, room), f.actor).await.unwrap();

        let err = f.queue.skip(first.id, "", f.actor).await.unwrap_err();
        assert!(matches!(err, RisError::Validation(_)));

        let skipped = f.queue.skip(first.id, "patient absent", f.actor).await.unwrap();
        assert_eq!(skipped.status, QueueStatus::Skipped);
        assert_eq!(skipped.notes.as_deref(), Some("patient absent"));
        assert_eq!(skipped.queue_number, 1);

        let err = f.queue.start(first.id, f.actor).await.unwrap_err();
        assert!(matches!(err, RisError::InvalidState { .. }));

        let err = f.queue.complete(second.id, f.actor).await.unwrap_err();
        assert!(matches!(err, RisError::InvalidState { .. }));

        f.queue.start(second.id, f.actor).await.unwrap();
        let done = f.queue.complete(second.id, f.actor).await.unwrap();
        assert_eq!(done.status, QueueStatus::Completed);
        assert!(done.completed_at.is_some());

        let err = f.queue.skip(second.id, "late", f.actor).await.unwrap_err();
        assert!(matches!(err, RisError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_room_statistics_average_wait() {
        let f = fixture(morning(), 0);
        let room = Uuid::new_v4();
        f.queue.assign(request(new_order(&f).await, room), f.actor).await.unwrap();
        f.queue.assign(request(new_order(&f).await, room), f.actor).await.unwrap();
        f.queue.assign(request(new_order(&f).await, room), f.actor).await.unwrap();

        f.clock.advance(Duration::minutes(10));
        f.queue.call_next(room, f.actor).await.unwrap();
        f.clock.advance(Duration::minutes(20));
        f.queue.call_next(room, f.actor).await.unwrap();

        let stats = f.queue.room_statistics(None).await.unwrap();
        assert_eq!(stats.len(), 1);
        let room_stats = &stats[0];
        assert_eq!(room_stats.room_id, room);
        assert_eq!(room_stats.total, 3);
        assert_eq!(room_stats.called, 2);
        assert_eq!(room_stats.waiting, 1);
        assert!((room_stats.average_wait_minutes - 20.0).abs() < 1e-9);

        let queue = f.queue.room_queue(room, None).await.unwrap();
        let numbers: Vec<i32> = queue.iter().map(|a| a.queue_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }
}
