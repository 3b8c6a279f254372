//! 请求提取器

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use ris_core::{Actor, RisError};
use uuid::Uuid;

use crate::error::ApiError;

/// 操作人请求头
pub const ACTOR_HEADER: &str = "x-actor-id";

/// 从 `x-actor-id` 请求头取得操作人
#[derive(Debug, Clone, Copy)]
pub struct RequestActor(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for RequestActor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(ACTOR_HEADER)
            .ok_or_else(|| RisError::Validation(format!("缺少 {} 请求头", ACTOR_HEADER)))?;
        let user_id = value
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or_else(|| RisError::Validation(format!("{} 不是有效的 UUID", ACTOR_HEADER)))?;
        Ok(RequestActor(Actor::new(user_id)))
    }
}
