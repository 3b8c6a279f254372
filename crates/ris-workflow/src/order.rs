//! 检查申请生命周期
//!
//! 管理申请从创建、预约、检查、出报告到审核或取消的状态推进。检查记录和
//! 报告在第一次需要时创建（get-or-create），创建和状态变化在同一次提交中完成。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ris_core::integration::ArchiveLinker;
use ris_core::utils::{
    generate_accession_number, generate_request_code, is_valid_dicom_uid, non_blank, Clock,
};
use ris_core::{
    Actor, Change, Exam, ExamPlacement, NewOrder, Order, OrderPriority, OrderStatus, OrderStore,
    PatientCategory, Report, ReportContent, ReportStatus, Result, RisError, UnitOfWork, Versioned,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state_machine::{OrderEvent, StateMachine};

/// 一次状态转换的计划：无需变更，或待提交的变更及提交后的结果
#[derive(Debug)]
pub(crate) enum Plan<T> {
    Unchanged(T),
    Changed { work: UnitOfWork, outcome: T },
}

/// 申请及其检查记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderExam {
    pub order: Order,
    pub exam: Exam,
}

/// 检查申请生命周期
pub struct OrderLifecycle {
    store: Arc<dyn OrderStore>,
    clock: Arc<dyn Clock>,
    archive: Arc<dyn ArchiveLinker>,
    state_machine: StateMachine<OrderStatus, OrderEvent>,
}

fn require<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| RisError::Validation(format!("{}不能为空", field)))
}

fn validate_content(content: ReportContent) -> Result<ReportContent> {
    let findings = require(non_blank(Some(content.findings)), "检查所见")?;
    Ok(ReportContent {
        findings,
        impression: non_blank(content.impression),
        recommendations: non_blank(content.recommendations),
    })
}

impl OrderLifecycle {
    pub fn new(
        store: Arc<dyn OrderStore>,
        clock: Arc<dyn Clock>,
        archive: Arc<dyn ArchiveLinker>,
    ) -> Self {
        Self {
            store,
            clock,
            archive,
            state_machine: StateMachine::order(),
        }
    }

    /// 创建检查申请，初始状态为待执行
    pub async fn create(&self, input: NewOrder, actor: Actor) -> Result<Order> {
        let patient_id = require(input.patient_id, "患者")?;
        let service_id = require(input.service_id, "检查项目")?;
        let ordering_clinician_id = require(input.ordering_clinician_id, "申请医生")?;
        let service_name = require(non_blank(input.service_name), "检查项目名称")?;

        let now = self.clock.now();
        let order = Order {
            id: Uuid::new_v4(),
            request_code: generate_request_code(now),
            patient_id,
            ordering_clinician_id,
            service_id,
            service_name,
            requested_at: now,
            patient_category: input.patient_category.unwrap_or(PatientCategory::SelfPay),
            priority: input.priority.unwrap_or(OrderPriority::Normal),
            status: OrderStatus::Pending,
            clinical_info: non_blank(input.clinical_info),
            body_part: non_blank(input.body_part),
            contrast: input.contrast,
            scheduled_at: None,
            cancellation_reason: None,
            cancelled_at: None,
            cancelled_by: None,
            created_by: actor.user_id,
            updated_at: now,
            version: 0,
        };

        self.store
            .commit(UnitOfWork::new().with(Change::InsertOrder(order.clone())))
            .await?;
        info!(
            "Created order {} ({}) for patient {} by {}",
            order.id, order.request_code, order.patient_id, actor.user_id
        );
        Ok(order)
    }

    pub async fn get(&self, order_id: Uuid) -> Result<Order> {
        debug!("Loading order {}", order_id);
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| RisError::not_found("order", order_id))
    }

    pub async fn exam_for(&self, order_id: Uuid) -> Result<Option<Exam>> {
        self.get(order_id).await?;
        self.store.find_exam_by_order(order_id).await
    }

    pub async fn report_for(&self, order_id: Uuid) -> Result<Option<Report>> {
        match self.exam_for(order_id).await? {
            Some(exam) => self.store.find_report_by_exam(exam.id).await,
            None => Ok(None),
        }
    }

    /// 预约检查时间
    pub async fn schedule(
        &self,
        order_id: Uuid,
        scheduled_at: DateTime<Utc>,
        actor: Actor,
    ) -> Result<Order> {
        let order = self.get(order_id).await?;
        let next = self.state_machine.transition(order.status, OrderEvent::Schedule)?;
        let now = self.clock.now();
        if scheduled_at < now {
            return Err(RisError::Validation("预约时间不能早于当前时间".to_string()));
        }

        let updated = Order {
            status: next,
            scheduled_at: Some(scheduled_at),
            updated_at: now,
            ..order.clone()
        };
        self.store
            .commit(UnitOfWork::new().with(Change::UpdateOrder(updated.clone())))
            .await?;
        self.log_transition(&order, next, actor);
        Ok(updated.committed())
    }

    /// 开始检查。检查中状态下重复调用直接返回当前检查记录。
    ///
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
                        self.settle_start_conflict(order_id, err).await
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
        let (work, outcome) = match self.plan_start_exam(order_id, placement, actor).await? {
            Plan::Unchanged(current) => return Ok(current),
            Plan::Changed { work, outcome } => (work, outcome),
        };
        self.store.commit(work).await?;
        info!(
            "Order {} exam {} started by {}",
            order_id, outcome.exam.accession_number, actor.user_id
        );
        Ok(outcome)
    }

    pub(crate) async fn plan_start_exam(
        &self,
        order_id: Uuid,
        placement: ExamPlacement,
        actor: Actor,
    ) -> Result<Plan<OrderExam>> {
        let order = self.get(order_id).await?;
        let existing = self.store.find_exam_by_order(order_id).await?;

        if order.status == OrderStatus::InProgress {
            if let Some(exam) = existing {
                debug!("Order {} already in progress", order_id);
                return Ok(Plan::Unchanged(OrderExam { order, exam }));
            }
        }
        let next = self.state_machine.transition(order.status, OrderEvent::StartExam)?;
        let now = self.clock.now();

        let mut work = UnitOfWork::new();
        let exam = match existing {
            Some(exam) => {
                let started = Exam {
                    room_id: placement.room_id.or(exam.room_id),
                    modality_id: placement.modality_id.or(exam.modality_id),
                    technician_id: Some(actor.user_id),
                    started_at: Some(now),
                    ended_at: None,
                    ..exam
                };
                work.push(Change::UpdateExam(started.clone()));
                started.committed()
            }
            None => {
                let exam = Exam {
                    room_id: placement.room_id,
                    modality_id: placement.modality_id,
                    technician_id: Some(actor.user_id),
                    started_at: Some(now),
                    ..self.new_exam(order_id, now)
                };
                work.push(Change::InsertExam(exam.clone()));
                exam
            }
        };

        let updated = Order {
            status: next,
            updated_at: now,
            ..order
        };
        work.push(Change::UpdateOrder(updated.clone()));
        Ok(Plan::Changed {
            work,
            outcome: OrderExam {
                order: updated.committed(),
                exam,
            },
        })
    }

    /// 并发开始检查冲突时，若对方已经开始则视为成功
    pub(crate) async fn settle_start_conflict(
        &self,
        order_id: Uuid,
        err: RisError,
    ) -> Result<OrderExam> {
        let order = self.get(order_id).await?;
        if order.status == OrderStatus::InProgress {
            if let Some(exam) = self.store.find_exam_by_order(order_id).await? {
                debug!("Order {} was started concurrently", order_id);
                return Ok(OrderExam { order, exam });
            }
        }
        Err(err)
    }

    /// 结束检查。检查已结束时重复调用直接返回当前记录
    pub async fn complete_exam(&self, order_id: Uuid, actor: Actor) -> Result<OrderExam> {
        match self.plan_complete_exam(order_id).await? {
            Plan::Unchanged(current) => Ok(current),
            Plan::Changed { work, outcome } => match self.store.commit(work).await {
                Ok(()) => {
                    info!(
                        "Order {} exam {} completed by {}",
                        order_id, outcome.exam.accession_number, actor.user_id
                    );
                    Ok(outcome)
                }
                Err(err) if err.is_retryable() => {
                    self.settle_complete_conflict(order_id, err).await
                }
                Err(err) => Err(err),
            },
        }
    }

    pub(crate) async fn plan_complete_exam(&self, order_id: Uuid) -> Result<Plan<OrderExam>> {
        let order = self.get(order_id).await?;
        let exam = match self.store.find_exam_by_order(order_id).await? {
            Some(exam) if exam.started_at.is_some() => exam,
            _ => {
                return Err(RisError::invalid_state(
                    "order",
                    order.status,
                    OrderEvent::CompleteExam,
                ))
            }
        };

        if exam.ended_at.is_some() && order.status.is_examined() {
            debug!("Order {} exam already completed", order_id);
            return Ok(Plan::Unchanged(OrderExam { order, exam }));
        }
        let next = self
            .state_machine
            .transition(order.status, OrderEvent::CompleteExam)?;
        let now = self.clock.now();

        // 结束时间不早于开始时间
        let ended_at = exam.started_at.map_or(now, |started| started.max(now));
        let closed = Exam {
            ended_at: Some(ended_at),
            ..exam
        };
        let updated = Order {
            status: next,
            updated_at: now,
            ..order
        };
        let work = UnitOfWork::new()
            .with(Change::UpdateExam(closed.clone()))
            .with(Change::UpdateOrder(updated.clone()));
        Ok(Plan::Changed {
            work,
            outcome: OrderExam {
                order: updated.committed(),
                exam: closed.committed(),
            },
        })
    }

    pub(crate) async fn settle_complete_conflict(
        &self,
        order_id: Uuid,
        err: RisError,
    ) -> Result<OrderExam> {
        let order = self.get(order_id).await?;
        if order.status.is_examined() {
            if let Some(exam) = self.store.find_exam_by_order(order_id).await? {
                if exam.ended_at.is_some() {
                    debug!("Order {} was completed concurrently", order_id);
                    return Ok(OrderExam { order, exam });
                }
            }
        }
        Err(err)
    }

    /// 录入报告。报告仅在草稿状态下可编辑，申请推进到已出报告
    pub async fn enter_report(
        &self,
        order_id: Uuid,
        content: ReportContent,
        actor: Actor,
    ) -> Result<Report> {
        let order = self.get(order_id).await?;
        let next = self
            .state_machine
            .transition(order.status, OrderEvent::EnterReport)?;
        let content = validate_content(content)?;
        let now = self.clock.now();

        let mut work = UnitOfWork::new();
        let exam = match self.store.find_exam_by_order(order_id).await? {
            Some(exam) => exam,
            None => {
                let exam = self.new_exam(order_id, now);
                work.push(Change::InsertExam(exam.clone()));
                exam
            }
        };

        let report = match self.store.find_report_by_exam(exam.id).await? {
            Some(report) if report.status != ReportStatus::Draft => {
                return Err(RisError::invalid_state(
                    "report",
                    report.status,
                    OrderEvent::EnterReport,
                ));
            }
            Some(report) => {
                let edited = Report {
                    author_id: actor.user_id,
                    content,
                    updated_at: now,
                    ..report
                };
                work.push(Change::UpdateReport(edited.clone()));
                edited.committed()
            }
            None => {
                let report = Report {
                    id: Uuid::new_v4(),
                    exam_id: exam.id,
                    author_id: actor.user_id,
                    content,
                    status: ReportStatus::Draft,
                    preliminary_note: None,
                    preliminary_approved_by: None,
                    preliminary_approved_at: None,
                    approver_id: None,
                    approved_at: None,
                    created_at: now,
                    updated_at: now,
                    version: 0,
                };
                work.push(Change::InsertReport(report.clone()));
                report
            }
        };

        if order.status != next {
            work.push(Change::UpdateOrder(Order {
                status: next,
                updated_at: now,
                ..order.clone()
            }));
        }
        self.store.commit(work).await?;
        self.log_transition(&order, next, actor);
        Ok(report)
    }

    /// 修改草稿报告正文
    pub async fn update_report(
        &self,
        report_id: Uuid,
        content: ReportContent,
        actor: Actor,
    ) -> Result<Report> {
        let report = self
            .store
            .get_report(report_id)
            .await?
            .ok_or_else(|| RisError::not_found("report", report_id))?;
        if report.status != ReportStatus::Draft {
            return Err(RisError::invalid_state("report", report.status, "Edit"));
        }
        let exam = self
            .store
            .get_exam(report.exam_id)
            .await?
            .ok_or_else(|| RisError::not_found("exam", report.exam_id))?;
        let order = self.get(exam.order_id).await?;
        if order.status == OrderStatus::Cancelled {
            return Err(RisError::invalid_state("order", order.status, "EditReport"));
        }
        let content = validate_content(content)?;

        let edited = Report {
            author_id: actor.user_id,
            content,
            updated_at: self.clock.now(),
            ..report
        };
        self.store
            .commit(UnitOfWork::new().with(Change::UpdateReport(edited.clone())))
            .await?;
        info!("Report {} edited by {}", report_id, actor.user_id);
        Ok(edited.committed())
    }

    /// 取消申请，必须提供原因。已审核的申请需先撤销审核
    pub async fn cancel(&self, order_id: Uuid, reason: &str, actor: Actor) -> Result<Order> {
        let planned = self.plan_cancel(order_id, reason, actor).await?;
        let Plan::Changed { work, outcome } = planned else {
            return self.get(order_id).await;
        };
        self.store.commit(work).await?;
        info!(
            "Order {} cancelled by {}: {}",
            order_id,
            actor.user_id,
            outcome.cancellation_reason.as_deref().unwrap_or_default()
        );
        Ok(outcome)
    }

    pub(crate) async fn plan_cancel(
        &self,
        order_id: Uuid,
        reason: &str,
        actor: Actor,
    ) -> Result<Plan<Order>> {
        let reason = require(non_blank(Some(reason.to_string())), "取消原因")?;
        let order = self.get(order_id).await?;
        let next = self.state_machine.transition(order.status, OrderEvent::Cancel)?;
        let now = self.clock.now();

        let updated = Order {
            status: next,
            cancellation_reason: Some(reason),
            cancelled_at: Some(now),
            cancelled_by: Some(actor.user_id),
            updated_at: now,
            ..order
        };
        Ok(Plan::Changed {
            work: UnitOfWork::new().with(Change::UpdateOrder(updated.clone())),
            outcome: updated.committed(),
        })
    }

    /// 关联影像归档中的检查。归档系统通知失败只记录日志
    pub async fn link_study(&self, order_id: Uuid, study_uid: &str, actor: Actor) -> Result<Exam> {
        let study_uid = study_uid.trim();
        if !is_valid_dicom_uid(study_uid) {
            return Err(RisError::Validation(format!("无效的 Study Instance UID: {}", study_uid)));
        }
        let order = self.get(order_id).await?;
        if order.status == OrderStatus::Cancelled {
            return Err(RisError::invalid_state("order", order.status, "LinkStudy"));
        }

        let now = self.clock.now();
        let exam = match self.store.find_exam_by_order(order_id).await? {
            Some(exam) => {
                let linked = Exam {
                    study_instance_uid: Some(study_uid.to_string()),
                    ..exam
                };
                self.store
                    .commit(UnitOfWork::new().with(Change::UpdateExam(linked.clone())))
                    .await?;
                linked.committed()
            }
            None => {
                let exam = Exam {
                    study_instance_uid: Some(study_uid.to_string()),
                    ..self.new_exam(order_id, now)
                };
                self.store
                    .commit(UnitOfWork::new().with(Change::InsertExam(exam.clone())))
                    .await?;
                exam
            }
        };
        info!(
            "Exam {} linked to study {} by {}",
            exam.accession_number, study_uid, actor.user_id
        );

        if let Err(e) = self.archive.link_study(exam.id, study_uid).await {
            warn!("Failed to notify archive for exam {}: {}", exam.id, e);
        }
        Ok(exam)
    }

    fn new_exam(&self, order_id: Uuid, now: DateTime<Utc>) -> Exam {
        Exam {
            id: Uuid::new_v4(),
            order_id,
            accession_number: generate_accession_number(now),
            room_id: None,
            modality_id: None,
            technician_id: None,
            started_at: None,
            ended_at: None,
            study_instance_uid: None,
            created_at: now,
            version: 0,
        }
    }

    fn log_transition(&self, order: &Order, to: OrderStatus, actor: Actor) {
        info!(
            "Order {} status {:?} -> {:?} by {}",
            order.id, order.status, to, actor.user_id
        );
    }
}
