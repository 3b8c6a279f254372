//! 报告审核流程
//!
//! 草稿 → 初审 → 终审。终审调用外部签名服务，签名成功后报告、签名记录和
//! 申请状态在同一次提交中更新；签名失败时本地状态不变。撤销审核追加一条
//! 撤销记录，签名历史只增不减。

use std::sync::Arc;

use ris_core::integration::{DocumentRenderer, ReportDocument, SigningContext, SigningService};
use ris_core::utils::{non_blank, Clock};
use ris_core::{
    Actor, Change, Exam, Order, OrderStatus, OrderStore, Report, ReportStatus, Result, RisError,
    SignatureRecord, SignatureStatus, SignatureType, UnitOfWork, Versioned,
};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::state_machine::{OrderEvent, ReportEvent, StateMachine};

/// 报告审核流程
pub struct ReportApprovalWorkflow {
    store: Arc<dyn OrderStore>,
    clock: Arc<dyn Clock>,
    signer: Arc<dyn SigningService>,
    renderer: Arc<dyn DocumentRenderer>,
    signature_type: SignatureType,
    report_states: StateMachine<ReportStatus, ReportEvent>,
    order_states: StateMachine<OrderStatus, OrderEvent>,
}

impl ReportApprovalWorkflow {
    pub fn new(
        store: Arc<dyn OrderStore>,
        clock: Arc<dyn Clock>,
        signer: Arc<dyn SigningService>,
        renderer: Arc<dyn DocumentRenderer>,
        signature_type: SignatureType,
    ) -> Self {
        Self {
            store,
            clock,
            signer,
            renderer,
            signature_type,
            report_states: StateMachine::report(),
            order_states: StateMachine::order(),
        }
    }

    pub async fn get(&self, report_id: Uuid) -> Result<Report> {
        self.store
            .get_report(report_id)
            .await?
            .ok_or_else(|| RisError::not_found("report", report_id))
    }

    async fn context(&self, report: &Report) -> Result<(Exam, Order)> {
        let exam = self
            .store
            .get_exam(report.exam_id)
            .await?
            .ok_or_else(|| RisError::not_found("exam", report.exam_id))?;
        let order = self
            .store
            .get_order(exam.order_id)
            .await?
            .ok_or_else(|| RisError::not_found("order", exam.order_id))?;
        Ok((exam, order))
    }

    /// 初审
    pub async fn preliminary_approve(
        &self,
        report_id: Uuid,
        note: Option<String>,
        actor: Actor,
    ) -> Result<Report> {
        let report = self.get(report_id).await?;
        let next = self
            .report_states
            .transition(report.status, ReportEvent::PreliminaryApprove)?;
        let (_, order) = self.context(&report).await?;
        if order.status == OrderStatus::Cancelled {
            return Err(RisError::invalid_state(
                "order",
                order.status,
                ReportEvent::PreliminaryApprove,
            ));
        }
        let now = self.clock.now();

        let approved = Report {
            status: next,
            preliminary_note: non_blank(note),
            preliminary_approved_by: Some(actor.user_id),
            preliminary_approved_at: Some(now),
            updated_at: now,
            ..report
        };
        // 申请随同提交以校验版本，并发取消申请时本次初审失败
        let work = UnitOfWork::new()
            .with(Change::UpdateReport(approved.clone()))
            .with(Change::UpdateOrder(order));
        self.store.commit(work).await?;
        info!(
            "Report {} status Draft -> {:?} by {}",
            report_id, next, actor.user_id
        );
        Ok(approved.committed())
    }

    /// 终审签名
    pub async fn final_approve(&self, report_id: Uuid, actor: Actor) -> Result<Report> {
        let report = self.get(report_id).await?;
        let next = self
            .report_states
            .transition(report.status, ReportEvent::FinalApprove)?;
        let (exam, order) = self.context(&report).await?;
        let order_next = self.order_states.transition(order.status, OrderEvent::Approve)?;

        let document = self.renderer.render(&ReportDocument {
            order: &order,
            exam: &exam,
            report: &report,
        })?;
        let digest = format!("{:x}", Sha256::digest(&document));

        let context = SigningContext {
            signer_id: actor.user_id,
            signature_type: self.signature_type,
        };
        let signed = self.signer.sign(&document, context).await.map_err(|e| {
            warn!("Signing failed for report {}: {}", report_id, e);
            RisError::from(e)
        })?;

        let now = self.clock.now();
        let from = report.status;
        let approved = Report {
            status: next,
            approver_id: Some(actor.user_id),
            approved_at: Some(now),
            updated_at: now,
            ..report
        };
        let record = SignatureRecord {
            id: Uuid::new_v4(),
            report_id,
            signer_id: actor.user_id,
            signature_type: Some(self.signature_type),
            signed_at: now,
            transaction_id: Some(signed.transaction_id),
            status: SignatureStatus::Signed,
            document_digest: Some(digest),
            signature_value: Some(signed.signature),
            reason: None,
        };
        let order_id = order.id;
        let work = UnitOfWork::new()
            .with(Change::UpdateReport(approved.clone()))
            .with(Change::AppendSignature(record))
            .with(Change::UpdateOrder(Order {
                status: order_next,
                updated_at: now,
                ..order
            }));
        self.store.commit(work).await?;

        info!(
            "Report {} status {:?} -> {:?} signed by {}; order {} approved",
            report_id, from, next, actor.user_id, order_id
        );
        Ok(approved.committed())
    }

    /// 撤销审核，报告回到草稿，申请回到已出报告
    pub async fn cancel_approval(
        &self,
        report_id: Uuid,
        reason: &str,
        actor: Actor,
    ) -> Result<Report> {
        let reason = non_blank(Some(reason.to_string()))
            .ok_or_else(|| RisError::Validation("撤销原因不能为空".to_string()))?;
        let report = self.get(report_id).await?;
        let next = self
            .report_states
            .transition(report.status, ReportEvent::CancelApproval)?;
        let (_, order) = self.context(&report).await?;
        if order.status == OrderStatus::Cancelled {
            return Err(RisError::invalid_state(
                "order",
                order.status,
                OrderEvent::RevertApproval,
            ));
        }

        let history = self.store.list_signatures(report_id).await?;
        let signature_type = history
            .iter()
            .rev()
            .find(|s| s.status == SignatureStatus::Signed)
            .and_then(|s| s.signature_type);

        let now = self.clock.now();
        let from = report.status;
        let reset = Report {
            status: next,
            preliminary_note: None,
            preliminary_approved_by: None,
            preliminary_approved_at: None,
            approver_id: None,
            approved_at: None,
            updated_at: now,
            ..report
        };
        let record = SignatureRecord {
            id: Uuid::new_v4(),
            report_id,
            signer_id: actor.user_id,
            signature_type,
            signed_at: now,
            transaction_id: None,
            status: SignatureStatus::Cancelled,
            document_digest: None,
            signature_value: None,
            reason: Some(reason),
        };

        let mut work = UnitOfWork::new()
            .with(Change::UpdateReport(reset.clone()))
            .with(Change::AppendSignature(record));
        // 无论之前经历过几次审核，申请都直接回到已出报告
        if order.status != OrderStatus::Reported {
            info!(
                "Order {} status {:?} -> Reported by {}",
                order.id, order.status, actor.user_id
            );
            work.push(Change::UpdateOrder(Order {
                status: OrderStatus::Reported,
                updated_at: now,
                ..order
            }));
        }
        self.store.commit(work).await?;

        info!(
            "Report {} approval cancelled ({:?} -> {:?}) by {}",
            report_id, from, next, actor.user_id
        );
        Ok(reset.committed())
    }

    /// 签名历史，按签名时间升序
    pub async fn signature_history(&self, report_id: Uuid) -> Result<Vec<SignatureRecord>> {
        self.get(report_id).await?;
        self.store.list_signatures(report_id).await
    }
}
