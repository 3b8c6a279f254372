//! 工作流引擎
//!
//! 组合申请生命周期、排队、报告审核和会诊四个组件。组件之间不直接共享内存
//! 状态，跨组件的联动（开始检查时同步排队状态等）通过存储在同一次提交中完成。

use std::sync::Arc;

use ris_core::integration::{ArchiveLinker, DocumentRenderer, SigningService};
use ris_core::utils::Clock;
use ris_core::{
    Actor, Change, ExamPlacement, Order, OrderStore, QueueAssignment, QueueStatus, Result,
    SignatureType,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::approval::ReportApprovalWorkflow;
use crate::consultation::ConsultationOrchestrator;
use crate::order::{OrderExam, OrderLifecycle, Plan};
use crate::queue::RoomQueueScheduler;
use crate::state_machine::QueueEvent;

/// 外部协作服务
#[derive(Clone)]
pub struct Collaborators {
    pub signer: Arc<dyn SigningService>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub archive: Arc<dyn ArchiveLinker>,
}

/// 工作流参数
#[derive(Debug, Clone, Copy)]
pub struct WorkflowSettings {
    /// 本地时间相对 UTC 的分钟数，决定排队日期
    pub utc_offset_minutes: i32,
    pub signature_type: SignatureType,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            signature_type: SignatureType::ESignature,
        }
    }
}

/// 放射科工作流
pub struct RadiologyWorkflow {
    store: Arc<dyn OrderStore>,
    clock: Arc<dyn Clock>,
    orders: OrderLifecycle,
    queue: RoomQueueScheduler,
    approval: ReportApprovalWorkflow,
    consultations: ConsultationOrchestrator,
}

impl RadiologyWorkflow {
    pub fn new(
        store: Arc<dyn OrderStore>,
        clock: Arc<dyn Clock>,
        collaborators: Collaborators,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            orders: OrderLifecycle::new(store.clone(), clock.clone(), collaborators.archive),
            queue: RoomQueueScheduler::new(
                store.clone(),
                clock.clone(),
                settings.utc_offset_minutes,
            ),
            approval: ReportApprovalWorkflow::new(
                store.clone(),
                clock.clone(),
                collaborators.signer,
                collaborators.renderer,
                settings.signature_type,
            ),
            consultations: ConsultationOrchestrator::new(store.clone(), clock.clone()),
            store,
            clock,
        }
    }

    pub fn orders(&self) -> &OrderLifecycle {
        &self.orders
    }

    pub fn queue(&self) -> &RoomQueueScheduler {
        &self.queue
    }

    pub fn approval(&self) -> &ReportApprovalWorkflow {
        &self.approval
    }

    pub fn consultations(&self) -> &ConsultationOrchestrator {
        &self.consultations
    }

    /// 开始检查，同时把申请的排队记录置为检查中。
    ///
    /// 未指定房间时使用排队记录的房间和设备；已叫号的记录优先于等待中的记录。
    /// 提交冲突时重新读取再试一次，新建的检查记录换一个检查号。
    pub async fn start_exam(
        &self,
        order_id: Uuid,
        placement: ExamPlacement,
        actor: Actor,
    ) -> Result<OrderExam> {
        match self.start_exam_once(order_id, placement, actor).await {
            Err(err) if err.is_retryable() => {
                debug!("Order {} start conflicted: {}, retrying", order_id, err);
                match self.start_exam_once(order_id, placement, actor).await {
                    Err(err) if err.is_retryable() => {
                        self.orders.settle_start_conflict(order_id, err).await
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn start_exam_once(
        &self,
        order_id: Uuid,
        placement: ExamPlacement,
        actor: Actor,
    ) -> Result<OrderExam> {
        let mut active = self
            .queue
            .active_for_order(order_id, &[QueueStatus::Called, QueueStatus::Waiting])
            .await?;
        active.sort_by_key(|a| (a.status != QueueStatus::Called, a.assigned_at));
        let current = active.into_iter().next();

        let placement = match (&current, placement.room_id) {
            (Some(assignment), None) => ExamPlacement {
                room_id: Some(assignment.room_id),
                modality_id: placement.modality_id.or(assignment.modality_id),
            },
            _ => placement,
        };

        let planned = self.orders.plan_start_exam(order_id, placement, actor).await?;
        let (mut work, outcome) = match planned {
            Plan::Unchanged(started) => return Ok(started),
            Plan::Changed { work, outcome } => (work, outcome),
        };
        if let Some(assignment) = current {
            work.push(self.queue_change(assignment, QueueEvent::Start, None, actor)?);
        }

        self.store.commit(work).await?;
        info!(
            "Order {} exam {} started in room {:?} by {}",
            order_id, outcome.exam.accession_number, outcome.exam.room_id, actor.user_id
        );
        Ok(outcome)
    }

    /// 结束检查，同时完成检查中的排队记录
    pub async fn complete_exam(&self, order_id: Uuid, actor: Actor) -> Result<OrderExam> {
        let (mut work, outcome) = match self.orders.plan_complete_exam(order_id).await? {
            Plan::Unchanged(completed) => return Ok(completed),
            Plan::Changed { work, outcome } => (work, outcome),
        };
        for assignment in self
            .queue
            .active_for_order(order_id, &[QueueStatus::InProgress])
            .await?
        {
            work.push(self.queue_change(assignment, QueueEvent::Complete, None, actor)?);
        }

        match self.store.commit(work).await {
            Ok(()) => {
                info!(
                    "Order {} exam {} completed by {}",
                    order_id, outcome.exam.accession_number, actor.user_id
                );
                Ok(outcome)
            }
            Err(err) if err.is_retryable() => {
                self.orders.settle_complete_conflict(order_id, err).await
            }
            Err(err) => Err(err),
        }
    }

    /// 取消申请，尚未检查的排队记录以取消原因过号
    pub async fn cancel_order(&self, order_id: Uuid, reason: &str, actor: Actor) -> Result<Order> {
        let (mut work, outcome) = match self.orders.plan_cancel(order_id, reason, actor).await? {
            Plan::Unchanged(order) => return Ok(order),
            Plan::Changed { work, outcome } => (work, outcome),
        };
        let note = outcome.cancellation_reason.clone();
        let pending = self
            .queue
            .active_for_order(order_id, &[QueueStatus::Waiting, QueueStatus::Called])
            .await?;
        let skipped = pending.len();
        for assignment in pending {
            work.push(self.queue_change(assignment, QueueEvent::Skip, note.clone(), actor)?);
        }
        // 检查中取消：结束排队记录并以取消原因备注，释放检查室
        let running = self
            .queue
            .active_for_order(order_id, &[QueueStatus::InProgress])
            .await?;
        let closed = running.len();
        for assignment in running {
            work.push(self.queue_change(assignment, QueueEvent::Complete, note.clone(), actor)?);
        }

        self.store.commit(work).await?;
        info!(
            "Order {} cancelled by {}, {} queue entries skipped, {} closed",
            order_id, actor.user_id, skipped, closed
        );
        Ok(outcome)
    }

    fn queue_change(
        &self,
        assignment: QueueAssignment,
        event: QueueEvent,
        note: Option<String>,
        actor: Actor,
    ) -> Result<Change> {
        let updated = self
            .queue
            .advance(assignment, event, note, self.clock.now(), actor)?;
        Ok(Change::UpdateAssignment(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ris_core::utils::ManualClock;
    use ris_core::{MemoryOrderStore, NewOrder, OrderStatus};

    use crate::queue::AssignRequest;
    use crate::testing::{JsonRenderer, NoopArchive, StubSigner, TakenAccessionStore};

    fn workflow() -> RadiologyWorkflow {
        workflow_over(Arc::new(MemoryOrderStore::new()))
    }

    fn workflow_over(store: Arc<dyn OrderStore>) -> RadiologyWorkflow {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        ));
        RadiologyWorkflow::new(
            store,
            clock,
            Collaborators {
                signer: Arc::new(StubSigner::default()),
                renderer: Arc::new(JsonRenderer),
                archive: Arc::new(NoopArchive),
            },
            WorkflowSettings::default(),
        )
    }

    async fn order(workflow: &RadiologyWorkflow, actor: Actor) -> Uuid {
        workflow
            .orders()
            .create(
                NewOrder {
                    patient_id: Some(Uuid::new_v4()),
                    ordering_clinician_id: Some(Uuid::new_v4()),
                    service_id: Some(Uuid::new_v4()),
                    service_name: Some("DR Chest".to_string()),
                    ..Default::default()
                },
                actor,
            )
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_exam_moves_queue_entry_along() {
        let workflow = workflow();
        let actor = Actor::new(Uuid::new_v4());
        let order_id = order(&workflow, actor).await;
        let room = Uuid::new_v4();
        let modality = Uuid::new_v4();

        let assignment = workflow
            .queue()
            .assign(
                AssignRequest {
                    order_id,
                    room_id: room,
                    modality_id: Some(modality),
                    notes: None,
                },
                actor,
            )
            .await
            .unwrap();
        workflow.queue().call_next(room, actor).await.unwrap();

        let started = workflow
            .start_exam(order_id, ExamPlacement::default(), actor)
            .await
            .unwrap();
        assert_eq!(started.exam.room_id, Some(room));
        assert_eq!(started.exam.modality_id, Some(modality));
        let entry = workflow.queue().get(assignment.id).await.unwrap();
        assert_eq!(entry.status, QueueStatus::InProgress);
        assert!(entry.started_at.is_some());

        workflow.complete_exam(order_id, actor).await.unwrap();
        let entry = workflow.queue().get(assignment.id).await.unwrap();
        assert_eq!(entry.status, QueueStatus::Completed);

        // 重复调用不会出错
        workflow.complete_exam(order_id, actor).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_exam_retries_with_new_accession() {
        let store = Arc::new(TakenAccessionStore::new(1));
        let workflow = workflow_over(store.clone());
        let actor = Actor::new(Uuid::new_v4());
        let order_id = order(&workflow, actor).await;
        let room = Uuid::new_v4();

        let assignment = workflow
            .queue()
            .assign(
                AssignRequest {
                    order_id,
                    room_id: room,
                    ..Default::default()
                },
                actor,
            )
            .await
            .unwrap();

        let started = workflow
            .start_exam(order_id, ExamPlacement::default(), actor)
            .await
            .unwrap();
        assert_eq!(started.exam.room_id, Some(room));
        assert_ne!(started.exam.accession_number, store.rejected()[0]);

        let entry = workflow.queue().get(assignment.id).await.unwrap();
        assert_eq!(entry.status, QueueStatus::InProgress);
    }

    #[tokio::test]
    async fn test_cancel_skips_waiting_entry() {
        let workflow = workflow();
        let actor = Actor::new(Uuid::new_v4());
        let order_id = order(&workflow, actor).await;
        let room = Uuid::new_v4();

        let assignment = workflow
            .queue()
            .assign(
                AssignRequest {
                    order_id,
                    room_id: room,
                    ..Default::default()
                },
                actor,
            )
            .await
            .unwrap();

        let cancelled = workflow
            .cancel_order(order_id, "contrast allergy", actor)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let entry = workflow.queue().get(assignment.id).await.unwrap();
        assert_eq!(entry.status, QueueStatus::Skipped);
        assert_eq!(entry.notes.as_deref(), Some("contrast allergy"));
        assert!(workflow.queue().call_next(room, actor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_during_exam_closes_queue_entry() {
        let workflow = workflow();
        let actor = Actor::new(Uuid::new_v4());
        let order_id = order(&workflow, actor).await;
        let room = Uuid::new_v4();

        let assignment = workflow
            .queue()
            .assign(
                AssignRequest {
                    order_id,
                    room_id: room,
                    ..Default::default()
                },
                actor,
            )
            .await
            .unwrap();
        workflow
            .start_exam(order_id, ExamPlacement::default(), actor)
            .await
            .unwrap();

        let cancelled = workflow
            .cancel_order(order_id, "patient unwell", actor)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let entry = workflow.queue().get(assignment.id).await.unwrap();
        assert_eq!(entry.status, QueueStatus::Completed);
        assert!(entry.completed_at.is_some());
        assert_eq!(entry.notes.as_deref(), Some("patient unwell"));

        let stats = workflow.queue().room_statistics(None).await.unwrap();
        let room_stats = stats.iter().find(|s| s.room_id == room).unwrap();
        assert_eq!(room_stats.in_progress, 0);
    }
}
