use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::IdentityResolver;
use crate::domain::UserProfile;
use crate::error::{ChatError, ChatResult};

#[derive(Deserialize)]
#[serde(untagged)]
enum AuthReply {
    Wrapped { data: UserProfile },
    Bare(UserProfile),
}

/// 通过鉴权中心解析令牌 / Resolve tokens against the auth center
///
/// `GET {center_url}/v1/sso/auth?token=...`，2xx 且能解析出用户即视为通过。
pub struct HttpIdentityResolver {
    client: reqwest::Client,
    center_url: String,
}

impl HttpIdentityResolver {
    pub fn new(center_url: &str, timeout_ms: u64) -> ChatResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(ChatError::storage)?;
        Ok(Self { client, center_url: center_url.trim_end_matches('/').to_string() })
    }
}

#[async_trait]
impl IdentityResolver for HttpIdentityResolver {
    async fn resolve(&self, token: &str) -> ChatResult<UserProfile> {
        if token.is_empty() {
            return Err(ChatError::Unauthorized);
        }
        let resp = self
            .client
            .get(format!("{}/v1/sso/auth", self.center_url))
            .query(&[("token", token)])
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("auth center unreachable: {}", e);
                ChatError::Unauthorized
            })?;
        if !resp.status().is_success() {
            tracing::debug!("auth center rejected token, status={}", resp.status());
            return Err(ChatError::Unauthorized);
        }
        match resp.json::<AuthReply>().await {
            Ok(AuthReply::Wrapped { data }) | Ok(AuthReply::Bare(data)) if data.user_id > 0 => {
                Ok(data)
            }
            Ok(_) => Err(ChatError::Unauthorized),
            Err(e) => {
                tracing::warn!("auth center reply not understood: {}", e);
                Err(ChatError::Unauthorized)
            }
        }
    }
}
