//! 影像归档 (PACS) 关联
//!
//! 检查关联到 Study Instance UID 后通知归档系统。通知失败由调用方记录日志，
//! 这里不做重试。

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use ris_core::integration::ArchiveLinker;
use ris_core::{Result, RisError};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct LinkRequest<'a> {
    exam_id: Uuid,
    study_instance_uid: &'a str,
}

fn archive_error(message: String) -> RisError {
    RisError::ExternalService {
        service: "archive",
        message,
    }
}

/// 通过 HTTP 通知影像归档系统
#[derive(Debug, Clone)]
pub struct HttpArchiveLinker {
    client: reqwest::Client,
    base_url: String,
}

impl HttpArchiveLinker {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("RIS-Archive/1.0")
            .build()
            .context("failed to build archive HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ArchiveLinker for HttpArchiveLinker {
    async fn link_study(&self, exam_id: Uuid, study_instance_uid: &str) -> Result<()> {
        let url = format!("{}/studies/links", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&LinkRequest {
                exam_id,
                study_instance_uid,
            })
            .send()
            .await
            .map_err(|e| archive_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(archive_error(format!(
                "archive returned {}",
                response.status()
            )));
        }
        info!("Archive linked exam {} to study {}", exam_id, study_instance_uid);
        Ok(())
    }
}

/// 未配置归档系统时只记录日志
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingArchiveLinker;

#[async_trait]
impl ArchiveLinker for LoggingArchiveLinker {
    async fn link_study(&self, exam_id: Uuid, study_instance_uid: &str) -> Result<()> {
        debug!(
            "No archive configured; exam {} linked to study {} locally",
            exam_id, study_instance_uid
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_http_linker_posts_link() {
        let received: Arc<Mutex<Vec<serde_json::Value>>> = Arc::default();
        let sink = received.clone();
        let app = Router::new().route(
            "/studies/links",
            post(move |Json(body): Json<serde_json::Value>| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(body);
                    StatusCode::NO_CONTENT
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let linker =
            HttpArchiveLinker::new(&format!("http://{}/", addr), Duration::from_secs(5)).unwrap();
        let exam_id = Uuid::new_v4();
        linker.link_study(exam_id, "1.2.840.1").await.unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["study_instance_uid"], "1.2.840.1");
        assert_eq!(received[0]["exam_id"], exam_id.to_string());
    }

    #[tokio::test]
    async fn test_http_linker_reports_unreachable_archive() {
        // 端口 9 (discard) 在测试环境中没有监听
        let linker = HttpArchiveLinker::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = linker.link_study(Uuid::new_v4(), "1.2.3").await.unwrap_err();
        assert!(matches!(err, RisError::ExternalService { service: "archive", .. }));
    }

    #[tokio::test]
    async fn test_logging_linker_always_succeeds() {
        LoggingArchiveLinker
            .link_study(Uuid::new_v4(), "1.2.3")
            .await
            .unwrap();
    }
}
