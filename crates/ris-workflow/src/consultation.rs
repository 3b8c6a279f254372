//! 会诊管理
//!
//! 会诊是叠加在检查申请之上的可选多方讨论，拥有独立的状态机。会诊的开始、结束
//! 和取消都不会改变所关联申请的状态，取消申请也不会自动移除会诊病例。

use std::sync::Arc;

use ris_core::utils::{generate_session_code, non_blank, Clock};
use ris_core::{
    Actor, CaseStatus, Change, ConsultationCase, ConsultationSession, NewSession, OrderStore,
    Participant, ParticipantRole, ParticipantStatus, Result, RisError, SessionDetail,
    SessionStatus, UnitOfWork, Versioned,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::state_machine::{ParticipantEvent, SessionEvent, StateMachine};

/// 添加会诊病例
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewCase {
    pub order_id: Uuid,
    pub reason: Option<String>,
    pub preliminary_diagnosis: Option<String>,
}

/// 会诊结论
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseConclusion {
    pub conclusion: String,
    pub recommendation: Option<String>,
}

/// 对邀请的答复
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvitationResponse {
    pub accept: bool,
    pub note: Option<String>,
}

/// 会诊编排
pub struct ConsultationOrchestrator {
    store: Arc<dyn OrderStore>,
    clock: Arc<dyn Clock>,
    session_states: StateMachine<SessionStatus, SessionEvent>,
    participant_states: StateMachine<ParticipantStatus, ParticipantEvent>,
}

impl ConsultationOrchestrator {
    pub fn new(store: Arc<dyn OrderStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            session_states: StateMachine::session(),
            participant_states: StateMachine::participant(),
        }
    }

    /// 安排会诊
    pub async fn schedule(&self, input: NewSession, actor: Actor) -> Result<ConsultationSession> {
        let title = non_blank(Some(input.title))
            .ok_or_else(|| RisError::Validation("会诊主题不能为空".to_string()))?;
        let (Some(scheduled_start), Some(scheduled_end)) =
            (input.scheduled_start, input.scheduled_end)
        else {
            return Err(RisError::Validation("会诊时间不能为空".to_string()));
        };
        if scheduled_end <= scheduled_start {
            return Err(RisError::Validation("结束时间必须晚于开始时间".to_string()));
        }

        let now = self.clock.now();
        let session = ConsultationSession {
            id: Uuid::new_v4(),
            session_code: generate_session_code(now),
            title,
            description: non_blank(input.description),
            scheduled_start,
            scheduled_end,
            actual_start: None,
            actual_end: None,
            organizer_id: actor.user_id,
            leader_id: input.leader_id,
            secretary_id: input.secretary_id,
            status: SessionStatus::Scheduled,
            cancellation_reason: None,
            created_at: now,
            version: 0,
        };
        self.store
            .commit(UnitOfWork::new().with(Change::InsertSession(session.clone())))
            .await?;
        info!(
            "Consultation {} ({}) scheduled by {}",
            session.id, session.session_code, actor.user_id
        );
        Ok(session)
    }

    async fn session(&self, session_id: Uuid) -> Result<ConsultationSession> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| RisError::not_found("consultation session", session_id))
    }

    /// 会诊详情，含病例和参与者
    pub async fn get(&self, session_id: Uuid) -> Result<SessionDetail> {
        let session = self.session(session_id).await?;
        let cases = self.store.list_cases(session_id).await?;
        let participants = self.store.list_participants(session_id).await?;
        debug!(
            "Loaded consultation {} with {} cases and {} participants",
            session_id,
            cases.len(),
            participants.len()
        );
        Ok(SessionDetail {
            session,
            cases,
            participants,
        })
    }

    pub async fn start(&self, session_id: Uuid, actor: Actor) -> Result<ConsultationSession> {
        self.advance(session_id, SessionEvent::Start, None, actor).await
    }

    pub async fn end(&self, session_id: Uuid, actor: Actor) -> Result<ConsultationSession> {
        self.advance(session_id, SessionEvent::End, None, actor).await
    }

    pub async fn cancel(
        &self,
        session_id: Uuid,
        reason: Option<String>,
        actor: Actor,
    ) -> Result<ConsultationSession> {
        self.advance(session_id, SessionEvent::Cancel, non_blank(reason), actor)
            .await
    }

    async fn advance(
        &self,
        session_id: Uuid,
        event: SessionEvent,
        reason: Option<String>,
        actor: Actor,
    ) -> Result<ConsultationSession> {
        let session = self.session(session_id).await?;
        let next = self.session_states.transition(session.status, event)?;
        let now = self.clock.now();

        let from = session.status;
        let mut updated = ConsultationSession {
            status: next,
            ..session
        };
        match event {
            SessionEvent::Start => updated.actual_start = Some(now),
            SessionEvent::End => updated.actual_end = Some(now),
            SessionEvent::Cancel => updated.cancellation_reason = reason,
        }
        self.store
            .commit(UnitOfWork::new().with(Change::UpdateSession(updated.clone())))
            .await?;
        info!(
            "Consultation {} status {:?} -> {:?} by {}",
            session_id, from, next, actor.user_id
        );
        Ok(updated.committed())
    }

    fn ensure_open(session: &ConsultationSession, attempted: &str) -> Result<()> {
        if session.status.is_terminal() {
            return Err(RisError::invalid_state(
                "consultation session",
                session.status,
                attempted,
            ));
        }
        Ok(())
    }

    /// 添加病例，会诊结束或取消后不能再添加
    pub async fn add_case(
        &self,
        session_id: Uuid,
        input: NewCase,
        actor: Actor,
    ) -> Result<ConsultationCase> {
        let session = self.session(session_id).await?;
        Self::ensure_open(&session, "AddCase")?;
        if self.store.get_order(input.order_id).await?.is_none() {
            return Err(RisError::not_found("order", input.order_id));
        }

        let cases = self.store.list_cases(session_id).await?;
        if cases.iter().any(|c| c.order_id == input.order_id) {
            return Err(RisError::Validation(format!(
                "申请 {} 已在本次会诊中",
                input.order_id
            )));
        }
        let order_number = cases.iter().map(|c| c.order_number).max().unwrap_or(0) + 1;

        let case = ConsultationCase {
            id: Uuid::new_v4(),
            session_id,
            order_id: input.order_id,
            order_number,
            reason: non_blank(input.reason),
            preliminary_diagnosis: non_blank(input.preliminary_diagnosis),
            status: CaseStatus::Pending,
            conclusion: None,
            recommendation: None,
            version: 0,
        };
        self.store
            .commit(UnitOfWork::new().with(Change::InsertCase(case.clone())))
            .await?;
        info!(
            "Order {} added to consultation {} as case {} by {}",
            case.order_id, session_id, order_number, actor.user_id
        );
        Ok(case)
    }

    async fn case(&self, case_id: Uuid) -> Result<ConsultationCase> {
        self.store
            .get_case(case_id)
            .await?
            .ok_or_else(|| RisError::not_found("consultation case", case_id))
    }

    /// 移除病例
    pub async fn remove_case(&self, case_id: Uuid, actor: Actor) -> Result<()> {
        let case = self.case(case_id).await?;
        let session = self.session(case.session_id).await?;
        Self::ensure_open(&session, "RemoveCase")?;

        let (session_id, order_id) = (case.session_id, case.order_id);
        self.store
            .commit(UnitOfWork::new().with(Change::DeleteCase(case)))
            .await?;
        info!(
            "Order {} removed from consultation {} by {}",
            order_id, session_id, actor.user_id
        );
        Ok(())
    }

    /// 记录病例结论，会诊进行中或已结束时均可
    pub async fn conclude_case(
        &self,
        case_id: Uuid,
        input: CaseConclusion,
        actor: Actor,
    ) -> Result<ConsultationCase> {
        let conclusion = non_blank(Some(input.conclusion))
            .ok_or_else(|| RisError::Validation("会诊结论不能为空".to_string()))?;
        let case = self.case(case_id).await?;
        let session = self.session(case.session_id).await?;
        if !matches!(
            session.status,
            SessionStatus::InProgress | SessionStatus::Completed
        ) {
            return Err(RisError::invalid_state(
                "consultation session",
                session.status,
                "ConcludeCase",
            ));
        }

        let concluded = ConsultationCase {
            status: CaseStatus::Concluded,
            conclusion: Some(conclusion),
            recommendation: non_blank(input.recommendation),
            ..case
        };
        self.store
            .commit(UnitOfWork::new().with(Change::UpdateCase(concluded.clone())))
            .await?;
        info!("Consultation case {} concluded by {}", case_id, actor.user_id);
        Ok(concluded.committed())
    }

    /// 邀请参与者。已拒绝的可以重新邀请，重复邀请直接返回原记录
    pub async fn invite(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        role: ParticipantRole,
        actor: Actor,
    ) -> Result<Participant> {
        let session = self.session(session_id).await?;
        Self::ensure_open(&session, "Invite")?;
        let now = self.clock.now();

        let participant = match self.store.find_participant(session_id, user_id).await? {
            None => {
                let participant = Participant {
                    id: Uuid::new_v4(),
                    session_id,
                    user_id,
                    role,
                    status: ParticipantStatus::Invited,
                    invited_at: Some(now),
                    joined_at: None,
                    left_at: None,
                    response_note: None,
                    version: 0,
                };
                self.store
                    .commit(UnitOfWork::new().with(Change::InsertParticipant(participant.clone())))
                    .await?;
                participant
            }
            Some(existing) if existing.status == ParticipantStatus::Invited => return Ok(existing),
            Some(existing) if existing.status == ParticipantStatus::Declined => {
                let reinvited = Participant {
                    role,
                    status: ParticipantStatus::Invited,
                    invited_at: Some(now),
                    response_note: None,
                    ..existing
                };
                self.store
                    .commit(UnitOfWork::new().with(Change::UpdateParticipant(reinvited.clone())))
                    .await?;
                reinvited.committed()
            }
            Some(existing) => {
                return Err(RisError::invalid_state(
                    "participant",
                    existing.status,
                    "Invite",
                ))
            }
        };
        info!(
            "User {} invited to consultation {} as {:?} by {}",
            user_id, session_id, role, actor.user_id
        );
        Ok(participant)
    }

    async fn participant(&self, session_id: Uuid, user_id: Uuid) -> Result<Participant> {
        self.store
            .find_participant(session_id, user_id)
            .await?
            .ok_or_else(|| RisError::not_found("participant", user_id))
    }

    async fn update_participant(
        &self,
        participant: Participant,
        event: ParticipantEvent,
    ) -> Result<Participant> {
        let from = participant.status;
        let next = self.participant_states.transition(from, event)?;
        let now = self.clock.now();

        let mut updated = Participant {
            status: next,
            ..participant
        };
        match event {
            ParticipantEvent::Join => {
                updated.joined_at = Some(now);
                updated.left_at = None;
            }
            ParticipantEvent::Leave => updated.left_at = Some(now),
            ParticipantEvent::Accept | ParticipantEvent::Decline => {}
        }
        self.store
            .commit(UnitOfWork::new().with(Change::UpdateParticipant(updated.clone())))
            .await?;
        info!(
            "Participant {} of consultation {} status {:?} -> {:?}",
            updated.user_id, updated.session_id, from, next
        );
        Ok(updated.committed())
    }

    /// 答复邀请
    pub async fn respond(
        &self,
        session_id: Uuid,
        response: InvitationResponse,
        actor: Actor,
    ) -> Result<Participant> {
        let session = self.session(session_id).await?;
        Self::ensure_open(&session, "Respond")?;
        let participant = self.participant(session_id, actor.user_id).await?;

        let event = if response.accept {
            ParticipantEvent::Accept
        } else {
            ParticipantEvent::Decline
        };
        let participant = Participant {
            response_note: non_blank(response.note),
            ..participant
        };
        self.update_participant(participant, event).await
    }

    /// 加入会诊。已接受邀请、曾经离开或未受邀（自行加入）的用户可以加入
    pub async fn join(&self, session_id: Uuid, actor: Actor) -> Result<Participant> {
        let session = self.session(session_id).await?;
        Self::ensure_open(&session, "Join")?;

        match self.store.find_participant(session_id, actor.user_id).await? {
            None => {
                let now = self.clock.now();
                let participant = Participant {
                    id: Uuid::new_v4(),
                    session_id,
                    user_id: actor.user_id,
                    role: ParticipantRole::Participant,
                    status: ParticipantStatus::Joined,
                    invited_at: None,
                    joined_at: Some(now),
                    left_at: None,
                    response_note: None,
                    version: 0,
                };
                self.store
                    .commit(UnitOfWork::new().with(Change::InsertParticipant(participant.clone())))
                    .await?;
                info!(
                    "User {} joined consultation {} without invitation",
                    actor.user_id, session_id
                );
                Ok(participant)
            }
            Some(existing) if existing.status == ParticipantStatus::Joined => Ok(existing),
            Some(existing) => self.update_participant(existing, ParticipantEvent::Join).await,
        }
    }

    /// 离开会诊
    pub async fn leave(&self, session_id: Uuid, actor: Actor) -> Result<Participant> {
        self.session(session_id).await?;
        let participant = self.participant(session_id, actor.user_id).await?;
        self.update_participant(participant, ParticipantEvent::Leave).await
    }
}
