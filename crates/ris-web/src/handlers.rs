//! HTTP处理器

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, NaiveDate, Utc};
use ris_core::{
    ConsultationCase, ConsultationSession, Exam, ExamPlacement, NewOrder, NewSession, Order,
    Participant, ParticipantRole, QueueAssignment, Report, ReportContent, RoomStatistics,
    SessionDetail, SignatureRecord,
};
use ris_workflow::{AssignRequest, CaseConclusion, InvitationResponse, NewCase, OrderExam};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::extract::RequestActor;
use crate::server::AppState;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// 健康检查处理器
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ========== 检查申请 ==========

/// 申请详情：申请本身及其检查、报告
#[derive(Debug, Serialize)]
pub struct OrderDetail {
    pub order: Order,
    pub exam: Option<Exam>,
    pub report: Option<Report>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct LinkStudyRequest {
    pub study_instance_uid: String,
}

pub async fn create_order(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Json(input): Json<NewOrder>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state.workflow.orders().create(input, actor).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderDetail> {
    let orders = state.workflow.orders();
    let order = orders.get(id).await?;
    let exam = orders.exam_for(id).await?;
    let report = orders.report_for(id).await?;
    Ok(Json(OrderDetail {
        order,
        exam,
        report,
    }))
}

pub async fn schedule_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
    Json(body): Json<ScheduleRequest>,
) -> ApiResult<Order> {
    let order = state
        .workflow
        .orders()
        .schedule(id, body.scheduled_at, actor)
        .await?;
    Ok(Json(order))
}

/// 开始检查，请求体可省略（使用排队记录的房间）
pub async fn start_exam(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
    body: Option<Json<ExamPlacement>>,
) -> ApiResult<OrderExam> {
    let placement = body.map(|Json(p)| p).unwrap_or_default();
    Ok(Json(state.workflow.start_exam(id, placement, actor).await?))
}

pub async fn complete_exam(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
) -> ApiResult<OrderExam> {
    Ok(Json(state.workflow.complete_exam(id, actor).await?))
}

pub async fn enter_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
    Json(content): Json<ReportContent>,
) -> ApiResult<Report> {
    let report = state
        .workflow
        .orders()
        .enter_report(id, content, actor)
        .await?;
    Ok(Json(report))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
    Json(body): Json<ReasonRequest>,
) -> ApiResult<Order> {
    Ok(Json(state.workflow.cancel_order(id, &body.reason, actor).await?))
}

pub async fn link_study(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
    Json(body): Json<LinkStudyRequest>,
) -> ApiResult<Exam> {
    let exam = state
        .workflow
        .orders()
        .link_study(id, &body.study_instance_uid, actor)
        .await?;
    Ok(Json(exam))
}

// ========== 排队 ==========

#[derive(Debug, Deserialize)]
pub struct DayQuery {
    pub date: Option<NaiveDate>,
}

pub async fn assign_queue(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Json(request): Json<AssignRequest>,
) -> Result<(StatusCode, Json<QueueAssignment>), ApiError> {
    let assignment = state.workflow.queue().assign(request, actor).await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

/// 叫号，队列为空时返回 `null`
pub async fn call_next(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    RequestActor(actor): RequestActor,
) -> ApiResult<Option<QueueAssignment>> {
    Ok(Json(state.workflow.queue().call_next(room_id, actor).await?))
}

pub async fn room_queue(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Query(query): Query<DayQuery>,
) -> ApiResult<Vec<QueueAssignment>> {
    Ok(Json(state.workflow.queue().room_queue(room_id, query.date).await?))
}

pub async fn room_statistics(
    State(state): State<AppState>,
    Query(query): Query<DayQuery>,
) -> ApiResult<Vec<RoomStatistics>> {
    Ok(Json(state.workflow.queue().room_statistics(query.date).await?))
}

pub async fn start_assignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
) -> ApiResult<QueueAssignment> {
    Ok(Json(state.workflow.queue().start(id, actor).await?))
}

pub async fn skip_assignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
    Json(body): Json<ReasonRequest>,
) -> ApiResult<QueueAssignment> {
    Ok(Json(state.workflow.queue().skip(id, &body.reason, actor).await?))
}

pub async fn complete_assignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
) -> ApiResult<QueueAssignment> {
    Ok(Json(state.workflow.queue().complete(id, actor).await?))
}

// ========== 报告 ==========

#[derive(Debug, Default, Deserialize)]
pub struct PreliminaryRequest {
    pub note: Option<String>,
}

pub async fn update_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
    Json(content): Json<ReportContent>,
) -> ApiResult<Report> {
    let report = state
        .workflow
        .orders()
        .update_report(id, content, actor)
        .await?;
    Ok(Json(report))
}

pub async fn preliminary_approve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
    body: Option<Json<PreliminaryRequest>>,
) -> ApiResult<Report> {
    let note = body.and_then(|Json(b)| b.note);
    let report = state
        .workflow
        .approval()
        .preliminary_approve(id, note, actor)
        .await?;
    Ok(Json(report))
}

pub async fn final_approve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
) -> ApiResult<Report> {
    Ok(Json(state.workflow.approval().final_approve(id, actor).await?))
}

pub async fn cancel_approval(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
    Json(body): Json<ReasonRequest>,
) -> ApiResult<Report> {
    let report = state
        .workflow
        .approval()
        .cancel_approval(id, &body.reason, actor)
        .await?;
    Ok(Json(report))
}

pub async fn signature_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<SignatureRecord>> {
    Ok(Json(state.workflow.approval().signature_history(id).await?))
}

// ========== 会诊 ==========

#[derive(Debug, Default, Deserialize)]
pub struct OptionalReason {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    pub user_id: Uuid,
    pub role: ParticipantRole,
}

pub async fn schedule_session(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Json(input): Json<NewSession>,
) -> Result<(StatusCode, Json<ConsultationSession>), ApiError> {
    let session = state.workflow.consultations().schedule(input, actor).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SessionDetail> {
    Ok(Json(state.workflow.consultations().get(id).await?))
}

pub async fn start_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
) -> ApiResult<ConsultationSession> {
    Ok(Json(state.workflow.consultations().start(id, actor).await?))
}

pub async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
) -> ApiResult<ConsultationSession> {
    Ok(Json(state.workflow.consultations().end(id, actor).await?))
}

pub async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
    body: Option<Json<OptionalReason>>,
) -> ApiResult<ConsultationSession> {
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(state.workflow.consultations().cancel(id, reason, actor).await?))
}

pub async fn add_case(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
    Json(input): Json<NewCase>,
) -> Result<(StatusCode, Json<ConsultationCase>), ApiError> {
    let case = state.workflow.consultations().add_case(id, input, actor).await?;
    Ok((StatusCode::CREATED, Json(case)))
}

pub async fn remove_case(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
    RequestActor(actor): RequestActor,
) -> Result<StatusCode, ApiError> {
    state
        .workflow
        .consultations()
        .remove_case(case_id, actor)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn conclude_case(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
    RequestActor(actor): RequestActor,
    Json(input): Json<CaseConclusion>,
) -> ApiResult<ConsultationCase> {
    let case = state
        .workflow
        .consultations()
        .conclude_case(case_id, input, actor)
        .await?;
    Ok(Json(case))
}

pub async fn invite(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
    Json(body): Json<InviteRequest>,
) -> ApiResult<Participant> {
    let participant = state
        .workflow
        .consultations()
        .invite(id, body.user_id, body.role, actor)
        .await?;
    Ok(Json(participant))
}

pub async fn respond(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
    Json(response): Json<InvitationResponse>,
) -> ApiResult<Participant> {
    let participant = state
        .workflow
        .consultations()
        .respond(id, response, actor)
        .await?;
    Ok(Json(participant))
}

pub async fn join(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
) -> ApiResult<Participant> {
    Ok(Json(state.workflow.consultations().join(id, actor).await?))
}

pub async fn leave(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequestActor(actor): RequestActor,
) -> ApiResult<Participant> {
    Ok(Json(state.workflow.consultations().leave(id, actor).await?))
}
