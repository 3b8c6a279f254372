//! Web服务器

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use ris_workflow::RadiologyWorkflow;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::handlers::*;

/// 处理器共享状态
#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<RadiologyWorkflow>,
}

impl AppState {
    pub fn new(workflow: Arc<RadiologyWorkflow>) -> Self {
        Self { workflow }
    }
}

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self {
            addr,
            app: create_app(state),
        }
    }

    pub async fn run(self) -> Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start web server: {}", e))?;

        Ok(())
    }
}

/// 构建完整路由
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
}

/// API v1 路由
fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(order_routes())
        .merge(queue_routes())
        .merge(report_routes())
        .merge(consultation_routes())
}

fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/schedule", post(schedule_order))
        .route("/orders/:id/start", post(start_exam))
        .route("/orders/:id/complete", post(complete_exam))
        .route("/orders/:id/report", post(enter_report))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/link-study", post(link_study))
}

fn queue_routes() -> Router<AppState> {
    Router::new()
        .route("/queue/assign", post(assign_queue))
        .route("/queue/:id/start", post(start_assignment))
        .route("/queue/:id/skip", post(skip_assignment))
        .route("/queue/:id/complete", post(complete_assignment))
        .route("/rooms/statistics", get(room_statistics))
        .route("/rooms/:room/queue", get(room_queue))
        .route("/rooms/:room/call-next", post(call_next))
}

fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/reports/:id", put(update_report))
        .route("/reports/:id/preliminary-approve", post(preliminary_approve))
        .route("/reports/:id/final-approve", post(final_approve))
        .route("/reports/:id/cancel-approval", post(cancel_approval))
        .route("/reports/:id/signatures", get(signature_history))
}

fn consultation_routes() -> Router<AppState> {
    Router::new()
        .route("/consultations", post(schedule_session))
        .route("/consultations/:id", get(get_session))
        .route("/consultations/:id/start", post(start_session))
        .route("/consultations/:id/end", post(end_session))
        .route("/consultations/:id/cancel", post(cancel_session))
        .route("/consultations/:id/cases", post(add_case))
        .route("/consultations/:id/invite", post(invite))
        .route("/consultations/:id/respond", post(respond))
        .route("/consultations/:id/join", post(join))
        .route("/consultations/:id/leave", post(leave))
        .route("/consultations/cases/:id", delete(remove_case))
        .route("/consultations/cases/:id/conclude", post(conclude_case))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        response::Response,
    };
    use ris_core::utils::SystemClock;
    use ris_core::MemoryOrderStore;
    use ris_integration::{DigestSigningService, LoggingArchiveLinker, PlainTextRenderer};
    use ris_workflow::{Collaborators, WorkflowSettings};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::extract::ACTOR_HEADER;

    fn app() -> Router {
        let workflow = RadiologyWorkflow::new(
            Arc::new(MemoryOrderStore::new()),
            Arc::new(SystemClock),
            Collaborators {
                signer: Arc::new(DigestSigningService::new("web-test")),
                renderer: Arc::new(PlainTextRenderer::default()),
                archive: Arc::new(LoggingArchiveLinker),
            },
            WorkflowSettings::default(),
        );
        create_app(AppState::new(Arc::new(workflow)))
    }

    fn post_json(uri: &str, actor: Uuid, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(ACTOR_HEADER, actor.to_string())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn new_order() -> Value {
        json!({
            "patient_id": Uuid::new_v4(),
            "ordering_clinician_id": Uuid::new_v4(),
            "service_id": Uuid::new_v4(),
            "service_name": "胸部CT平扫",
        })
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_missing_actor_is_rejected() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/orders")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(new_order().to_string()))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["kind"], "validation");
    }

    #[tokio::test]
    async fn test_create_and_fetch_order() {
        let app = app();
        let actor = Uuid::new_v4();

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/orders", actor, new_order()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let order = body_json(response).await;
        assert_eq!(order["status"], "Pending");

        let uri = format!("/api/v1/orders/{}", order["id"].as_str().unwrap());
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let detail = body_json(response).await;
        assert_eq!(detail["order"]["id"], order["id"]);
        assert!(detail["exam"].is_null());
        assert!(detail["report"].is_null());
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_found() {
        let uri = format!("/api/v1/orders/{}", Uuid::new_v4());
        let response = app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_call_next_on_empty_queue_returns_null() {
        let uri = format!("/api/v1/rooms/{}/call-next", Uuid::new_v4());
        let response = app()
            .oneshot(post_json(&uri, Uuid::new_v4(), json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_json(response).await.is_null());
    }

    #[tokio::test]
    async fn test_assign_then_call_next() {
        let app = app();
        let actor = Uuid::new_v4();
        let room = Uuid::new_v4();

        let order = body_json(
            app.clone()
                .oneshot(post_json("/api/v1/orders", actor, new_order()))
                .await
                .unwrap(),
        )
        .await;
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/v1/queue/assign",
                actor,
                json!({ "order_id": order["id"], "room_id": room }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_json(response).await["queue_number"], 1);

        let uri = format!("/api/v1/rooms/{}/call-next", room);
        let called = body_json(app.oneshot(post_json(&uri, actor, json!({}))).await.unwrap()).await;
        assert_eq!(called["order_id"], order["id"]);
        assert_eq!(called["status"], "Called");
    }

    #[tokio::test]
    async fn test_invalid_transition_is_conflict() {
        let app = app();
        let actor = Uuid::new_v4();
        let order = body_json(
            app.clone()
                .oneshot(post_json("/api/v1/orders", actor, new_order()))
                .await
                .unwrap(),
        )
        .await;
        let uri = format!("/api/v1/orders/{}/cancel", order["id"].as_str().unwrap());

        let first = app
            .clone()
            .oneshot(post_json(&uri, actor, json!({ "reason": "患者未到" })))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(post_json(&uri, actor, json!({ "reason": "重复操作" })))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let body = body_json(second).await;
        assert_eq!(body["kind"], "invalid_state");
        assert_eq!(body["retryable"], false);
    }
}
