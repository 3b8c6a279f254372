//! 外部协作服务接口
//!
//! 签名服务、报告渲染与影像归档关联由外部系统提供，这里只定义调用接口。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, RisError};
use crate::models::{Exam, Order, Report, SignatureType};

/// 签名结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPayload {
    pub signature: Vec<u8>,
    pub transaction_id: String,
}

/// 签名失败
#[derive(Debug, Clone, thiserror::Error)]
pub enum SigningError {
    #[error("签名服务不可用: {0}")]
    Unavailable(String),
    #[error("签名被拒绝: {0}")]
    Rejected(String),
}

impl From<SigningError> for RisError {
    fn from(err: SigningError) -> Self {
        RisError::ExternalService {
            service: "signing",
            message: err.to_string(),
        }
    }
}

/// 签名请求附带的签名人信息
#[derive(Debug, Clone, Copy)]
pub struct SigningContext {
    pub signer_id: Uuid,
    pub signature_type: SignatureType,
}

/// 数字签名服务
#[async_trait]
pub trait SigningService: Send + Sync {
    async fn sign(
        &self,
        document: &[u8],
        context: SigningContext,
    ) -> std::result::Result<SignedPayload, SigningError>;
}

/// 报告渲染数据
#[derive(Debug, Clone, Serialize)]
pub struct ReportDocument<'a> {
    pub order: &'a Order,
    pub exam: &'a Exam,
    pub report: &'a Report,
}

/// 报告渲染，输出可打印文档的字节
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, document: &ReportDocument<'_>) -> Result<Vec<u8>>;
}

/// 影像归档 (PACS) 关联
#[async_trait]
pub trait ArchiveLinker: Send + Sync {
    async fn link_study(&self, exam_id: Uuid, study_instance_uid: &str) -> Result<()>;
}
