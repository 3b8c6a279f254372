//! # RIS 工作流模块
//!
//! 放射科检查从申请到报告审核的完整工作流：
//! - 申请生命周期：预约、检查、出报告、取消
//! - 检查室排队：按房间按天编号、叫号、过号
//! - 报告审核：初审、终审签名与撤销
//! - 会诊：多方讨论的独立流程

pub mod approval;
pub mod consultation;
pub mod engine;
pub mod order;
pub mod queue;
pub mod state_machine;

#[cfg(test)]
mod testing;

// 重新导出主要类型
pub use approval::ReportApprovalWorkflow;
pub use consultation::{CaseConclusion, ConsultationOrchestrator, InvitationResponse, NewCase};
pub use engine::{Collaborators, RadiologyWorkflow, WorkflowSettings};
pub use order::{OrderExam, OrderLifecycle};
pub use queue::{AssignRequest, RoomQueueScheduler};
pub use state_machine::{
    OrderEvent, ParticipantEvent, QueueEvent, ReportEvent, SessionEvent, StateMachine,
};
