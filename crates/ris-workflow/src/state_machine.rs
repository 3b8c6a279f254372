//! 状态机
//!
//! 申请、排队、报告、会诊和参与者各自的状态转换规则表。转换表只回答
//! “某状态下某事件能否发生、发生后到哪个状态”，持久化由各组件负责。

use ris_core::{
    OrderStatus, ParticipantStatus, QueueStatus, ReportStatus, Result, RisError, SessionStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// 检查申请状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OrderEvent {
    Schedule,
    StartExam,
    CompleteExam,
    EnterReport,
    Approve,
    /// 撤销审核，仅由报告撤销流程触发
    RevertApproval,
    Cancel,
}

/// 排队状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum QueueEvent {
    Call,
    Start,
    Complete,
    Skip,
}

/// 报告审核事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ReportEvent {
    PreliminaryApprove,
    FinalApprove,
    CancelApproval,
}

/// 会诊状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    Start,
    End,
    Cancel,
}

/// 参与者状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ParticipantEvent {
    Accept,
    Decline,
    Join,
    Leave,
}

/// 通用状态机
#[derive(Debug, Clone)]
pub struct StateMachine<S, E> {
    entity: &'static str,
    transitions: HashMap<(S, E), S>,
}

impl<S, E> StateMachine<S, E>
where
    S: Copy + Eq + Hash + Debug,
    E: Copy + Eq + Hash + Debug,
{
    pub fn new(entity: &'static str, rules: &[(S, E, S)]) -> Self {
        let transitions = rules
            .iter()
            .map(|&(from, event, to)| ((from, event), to))
            .collect();
        Self {
            entity,
            transitions,
        }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: S, event: E) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: S, event: E) -> Result<S> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| RisError::invalid_state(self.entity, from, event))
    }

    /// 获取状态的所有可能事件
    pub fn possible_events(&self, current: S) -> Vec<E> {
        self.transitions
            .keys()
            .filter(|(state, _)| *state == current)
            .map(|(_, event)| *event)
            .collect()
    }
}

impl StateMachine<OrderStatus, OrderEvent> {
    pub fn order() -> Self {
        use OrderEvent::*;
        use OrderStatus::*;
        Self::new(
            "order",
            &[
                (Pending, Schedule, Scheduled),
                (Pending, StartExam, InProgress),
                (Scheduled, StartExam, InProgress),
                (InProgress, CompleteExam, Completed),
                (Completed, EnterReport, Reported),
                (Reported, EnterReport, Reported),
                (Reported, Approve, Approved),
                (Approved, RevertApproval, Reported),
                (Pending, Cancel, Cancelled),
                (Scheduled, Cancel, Cancelled),
                (InProgress, Cancel, Cancelled),
                (Completed, Cancel, Cancelled),
                (Reported, Cancel, Cancelled),
            ],
        )
    }
}

impl StateMachine<QueueStatus, QueueEvent> {
    pub fn queue() -> Self {
        use QueueEvent::*;
        use QueueStatus::*;
        Self::new(
            "queue assignment",
            &[
                (Waiting, Call, Called),
                (Waiting, Start, InProgress),
                (Called, Start, InProgress),
                (InProgress, Complete, Completed),
                (Waiting, Skip, Skipped),
                (Called, Skip, Skipped),
            ],
        )
    }
}

impl StateMachine<ReportStatus, ReportEvent> {
    pub fn report() -> Self {
        use ReportEvent::*;
        use ReportStatus::*;
        Self::new(
            "report",
            &[
                (Draft, PreliminaryApprove, PreliminaryApproved),
                (Draft, FinalApprove, FinalApproved),
                (PreliminaryApproved, FinalApprove, FinalApproved),
                (PreliminaryApproved, CancelApproval, Draft),
                (FinalApproved, CancelApproval, Draft),
            ],
        )
    }
}

impl StateMachine<SessionStatus, SessionEvent> {
    pub fn session() -> Self {
        use SessionEvent::*;
        use SessionStatus::*;
        Self::new(
            "consultation session",
            &[
                (Scheduled, Start, InProgress),
                (InProgress, End, Completed),
                (Scheduled, SessionEvent::Cancel, Cancelled),
                (InProgress, SessionEvent::Cancel, Cancelled),
            ],
        )
    }
}

impl StateMachine<ParticipantStatus, ParticipantEvent> {
    pub fn participant() -> Self {
        use ParticipantEvent::*;
        use ParticipantStatus::*;
        Self::new(
            "participant",
            &[
                (Invited, Accept, Accepted),
                (Invited, Decline, Declined),
                (Accepted, Join, Joined),
                (Left, Join, Joined),
                (Joined, Leave, Left),
            ],
        )
    }
}
