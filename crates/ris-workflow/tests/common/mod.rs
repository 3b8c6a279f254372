//! 集成测试公共环境：内存存储 + 手动时钟 + 本地签名

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use ris_core::utils::ManualClock;
use ris_core::{Actor, MemoryOrderStore, NewOrder, Order};
use ris_integration::{DigestSigningService, LoggingArchiveLinker, PlainTextRenderer};
use ris_workflow::{AssignRequest, Collaborators, RadiologyWorkflow, WorkflowSettings};
use uuid::Uuid;

pub struct TestEnv {
    pub workflow: Arc<RadiologyWorkflow>,
    pub store: Arc<MemoryOrderStore>,
    pub clock: Arc<ManualClock>,
}

pub fn start_of_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 30, 0).unwrap()
}

pub fn env() -> TestEnv {
    let store = Arc::new(MemoryOrderStore::new());
    let clock = Arc::new(ManualClock::new(start_of_day()));
    let workflow = RadiologyWorkflow::new(
        store.clone(),
        clock.clone(),
        Collaborators {
            signer: Arc::new(DigestSigningService::new("integration-test")),
            renderer: Arc::new(PlainTextRenderer::default()),
            archive: Arc::new(LoggingArchiveLinker),
        },
        WorkflowSettings::default(),
    );
    TestEnv {
        workflow: Arc::new(workflow),
        store,
        clock,
    }
}

pub fn actor() -> Actor {
    Actor::new(Uuid::new_v4())
}

pub async fn create_order(env: &TestEnv, service: &str, by: Actor) -> Order {
    env.workflow
        .orders()
        .create(
            NewOrder {
                patient_id: Some(Uuid::new_v4()),
                ordering_clinician_id: Some(Uuid::new_v4()),
                service_id: Some(Uuid::new_v4()),
                service_name: Some(service.to_string()),
                ..Default::default()
            },
            by,
        )
        .await
        .expect("order created")
}

pub fn assign_to(order_id: Uuid, room_id: Uuid) -> AssignRequest {
    AssignRequest {
        order_id,
        room_id,
        modality_id: None,
        notes: None,
    }
}
