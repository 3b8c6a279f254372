//! 报告签名服务
//!
//! - [`RemoteSigningClient`]：调用医院 CA 签名网关
//! - [`DigestSigningService`]：未配置签名网关时的本地摘要签名，仅用于开发和测试环境

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ris_core::integration::{SignedPayload, SigningContext, SigningError, SigningService};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    document: String,
    signer_id: Uuid,
    signature_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    signature: String,
    transaction_id: String,
}

/// 远程签名网关客户端
#[derive(Debug, Clone)]
pub struct RemoteSigningClient {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteSigningClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("RIS-Signing/1.0")
            .build()
            .context("failed to build signing HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/sign", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl SigningService for RemoteSigningClient {
    async fn sign(
        &self,
        document: &[u8],
        context: SigningContext,
    ) -> Result<SignedPayload, SigningError> {
        let signature_type = format!("{:?}", context.signature_type);
        let request = SignRequest {
            document: STANDARD.encode(document),
            signer_id: context.signer_id,
            signature_type: &signature_type,
        };
        debug!("Requesting signature from {} for {}", self.endpoint, context.signer_id);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!("Signing gateway unreachable: {}", e);
                SigningError::Unavailable(e.to_string())
            })?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(SigningError::Rejected(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            return Err(SigningError::Unavailable(format!("gateway returned {}", status)));
        }

        let body: SignResponse = response
            .json()
            .await
            .map_err(|e| SigningError::Unavailable(format!("invalid gateway response: {}", e)))?;
        let signature = STANDARD
            .decode(body.signature.as_bytes())
            .map_err(|e| SigningError::Unavailable(format!("invalid signature encoding: {}", e)))?;

        info!(
            "Document signed for {} (transaction {})",
            context.signer_id, body.transaction_id
        );
        Ok(SignedPayload {
            signature,
            transaction_id: body.transaction_id,
        })
    }
}

/// 本地摘要签名：SHA-256(密钥 ‖ 签名人 ‖ 文档)
#[derive(Debug, Clone)]
pub struct DigestSigningService {
    secret: String,
}

impl DigestSigningService {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn digest(&self, document: &[u8], signer_id: Uuid) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(signer_id.as_bytes());
        hasher.update(document);
        hasher.finalize().to_vec()
    }

    /// 校验签名是否由本服务对该文档生成
    pub fn verify(&self, document: &[u8], signer_id: Uuid, signature: &[u8]) -> bool {
        self.digest(document, signer_id) == signature
    }
}

#[async_trait]
impl SigningService for DigestSigningService {
    async fn sign(
        &self,
        document: &[u8],
        context: SigningContext,
    ) -> Result<SignedPayload, SigningError> {
        if document.is_empty() {
            return Err(SigningError::Rejected("empty document".to_string()));
        }
        let signature = self.digest(document, context.signer_id);
        let transaction_id = format!("LOCAL-{}", Uuid::new_v4().simple());
        debug!("Locally signed document for {} ({})", context.signer_id, transaction_id);
        Ok(SignedPayload {
            signature,
            transaction_id,
        })
    }
}
