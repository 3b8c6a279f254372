//! 从申请到报告审核的完整流程

mod common;

use chrono::Duration;
use common::{actor, assign_to, create_order, env};
use ris_core::{
    ExamPlacement, OrderStatus, QueueStatus, ReportContent, ReportStatus, RisError,
    SignatureStatus,
};
use uuid::Uuid;

fn chest_findings() -> ReportContent {
    ReportContent {
        findings: "Lungs clear, no pleural effusion".to_string(),
        impression: Some("No acute cardiopulmonary process".to_string()),
        recommendations: None,
    }
}

#[tokio::test]
async fn test_order_to_final_approval() -> anyhow::Result<()> {
    let env = env();
    let registrar = actor();
    let technician = actor();
    let radiologist = actor();
    let room = Uuid::new_v4();

    let order = create_order(&env, "X-Ray Chest", registrar).await;
    assert_eq!(order.status, OrderStatus::Pending);

    let assignment = env
        .workflow
        .queue()
        .assign(assign_to(order.id, room), registrar)
        .await?;
    assert_eq!(assignment.queue_number, 1);
    assert_eq!(assignment.status, QueueStatus::Waiting);

    env.clock.advance(Duration::minutes(12));
    let called = env
        .workflow
        .queue()
        .call_next(room, technician)
        .await?
        .expect("waiting entry");
    assert_eq!(called.id, assignment.id);
    assert_eq!(called.status, QueueStatus::Called);

    let started = env
        .workflow
        .start_exam(order.id, ExamPlacement::default(), technician)
        .await?;
    assert_eq!(started.order.status, OrderStatus::InProgress);
    assert_eq!(started.exam.room_id, Some(room));
    assert!(started.exam.accession_number.starts_with("ACC"));
    assert_eq!(
        env.workflow.queue().get(assignment.id).await?.status,
        QueueStatus::InProgress
    );

    env.clock.advance(Duration::minutes(8));
    let completed = env.workflow.complete_exam(order.id, technician).await?;
    assert_eq!(completed.order.status, OrderStatus::Completed);
    assert_eq!(completed.exam.id, started.exam.id);
    assert!(completed.exam.ended_at.is_some());
    assert_eq!(
        env.workflow.queue().get(assignment.id).await?.status,
        QueueStatus::Completed
    );

    let report = env
        .workflow
        .orders()
        .enter_report(order.id, chest_findings(), radiologist)
        .await?;
    assert_eq!(report.status, ReportStatus::Draft);
    assert_eq!(report.exam_id, started.exam.id);
    assert_eq!(
        env.workflow.orders().get(order.id).await?.status,
        OrderStatus::Reported
    );

    let preliminary = env
        .workflow
        .approval()
        .preliminary_approve(report.id, Some("看过".to_string()), radiologist)
        .await?;
    assert_eq!(preliminary.status, ReportStatus::PreliminaryApproved);

    let approved = env
        .workflow
        .approval()
        .final_approve(report.id, radiologist)
        .await?;
    assert_eq!(approved.status, ReportStatus::FinalApproved);
    assert_eq!(approved.approver_id, Some(radiologist.user_id));
    assert_eq!(
        env.workflow.orders().get(order.id).await?.status,
        OrderStatus::Approved
    );

    let history = env.workflow.approval().signature_history(report.id).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, SignatureStatus::Signed);
    assert_eq!(history[0].signer_id, radiologist.user_id);
    assert_eq!(history[0].document_digest.as_ref().map(String::len), Some(64));
    assert!(history[0]
        .transaction_id
        .as_deref()
        .is_some_and(|t| t.starts_with("LOCAL-")));

    let stats = env.workflow.queue().room_statistics(None).await?;
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].completed, 1);
    assert_eq!(stats[0].average_wait_minutes, 12.0);
    Ok(())
}

#[tokio::test]
async fn test_cancel_approval_round_trip() -> anyhow::Result<()> {
    let env = env();
    let user = actor();
    let order = create_order(&env, "CT Head", user).await;

    env.workflow
        .start_exam(order.id, ExamPlacement::default(), user)
        .await?;
    env.workflow.complete_exam(order.id, user).await?;
    let report = env
        .workflow
        .orders()
        .enter_report(order.id, chest_findings(), user)
        .await?;
    env.workflow.approval().final_approve(report.id, user).await?;

    let err = env
        .workflow
        .approval()
        .cancel_approval(report.id, "  ", user)
        .await
        .unwrap_err();
    assert!(matches!(err, RisError::Validation(_)));

    let reverted = env
        .workflow
        .approval()
        .cancel_approval(report.id, "wrong laterality", user)
        .await?;
    assert_eq!(reverted.status, ReportStatus::Draft);
    assert_eq!(reverted.approver_id, None);
    assert_eq!(
        env.workflow.orders().get(order.id).await?.status,
        OrderStatus::Reported
    );

    // 撤销后可以修改报告并重新审核
    let edited = env
        .workflow
        .orders()
        .update_report(
            report.id,
            ReportContent {
                findings: "Left frontal hypodensity".to_string(),
                ..chest_findings()
            },
            user,
        )
        .await?;
    assert_eq!(edited.content.findings, "Left frontal hypodensity");
    env.workflow.approval().final_approve(report.id, user).await?;

    let history = env.workflow.approval().signature_history(report.id).await?;
    let statuses: Vec<_> = history.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            SignatureStatus::Signed,
            SignatureStatus::Cancelled,
            SignatureStatus::Signed
        ]
    );
    assert_eq!(history[1].reason.as_deref(), Some("wrong laterality"));
    assert_ne!(history[0].document_digest, history[2].document_digest);
    Ok(())
}

#[tokio::test]
async fn test_skipped_patient_and_cancelled_order() -> anyhow::Result<()> {
    let env = env();
    let user = actor();
    let room = Uuid::new_v4();

    let first = create_order(&env, "MR Knee", user).await;
    let second = create_order(&env, "MR Spine", user).await;
    let a1 = env.workflow.queue().assign(assign_to(first.id, room), user).await?;
    let a2 = env.workflow.queue().assign(assign_to(second.id, room), user).await?;
    assert_eq!((a1.queue_number, a2.queue_number), (1, 2));

    let called = env.workflow.queue().call_next(room, user).await?.expect("first");
    assert_eq!(called.id, a1.id);
    let skipped = env.workflow.queue().skip(a1.id, "patient absent", user).await?;
    assert_eq!(skipped.status, QueueStatus::Skipped);
    assert_eq!(skipped.notes.as_deref(), Some("patient absent"));

    let cancelled = env
        .workflow
        .cancel_order(second.id, "duplicate request", user)
        .await?;
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(
        env.workflow.queue().get(a2.id).await?.status,
        QueueStatus::Skipped
    );

    assert!(env.workflow.queue().call_next(room, user).await?.is_none());

    let err = env
        .workflow
        .start_exam(second.id, ExamPlacement::default(), user)
        .await
        .unwrap_err();
    assert!(matches!(err, RisError::InvalidState { .. }));

    // 过号的申请仍可重新排队，号码继续递增
    let again = env.workflow.queue().assign(assign_to(first.id, room), user).await?;
    assert_eq!(again.queue_number, 3);
    Ok(())
}

#[tokio::test]
async fn test_repeated_start_keeps_single_exam() -> anyhow::Result<()> {
    let env = env();
    let user = actor();
    let order = create_order(&env, "US Abdomen", user).await;

    let first = env
        .workflow
        .start_exam(order.id, ExamPlacement::default(), user)
        .await?;
    let second = env
        .workflow
        .start_exam(order.id, ExamPlacement::default(), user)
        .await?;
    assert_eq!(first.exam.id, second.exam.id);
    assert_eq!(first.exam.accession_number, second.exam.accession_number);

    let exam = env.workflow.orders().exam_for(order.id).await?.expect("exam");
    assert_eq!(exam.id, first.exam.id);
    Ok(())
}
