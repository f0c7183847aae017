//! Gemini Provider（generateContent API）

use crate::classify::{failure_from_reqwest, failure_from_response};
use crate::providers::ProviderError;
use crate::upstream::{UpstreamClient, UpstreamErrorKind, UpstreamFailure, UpstreamOutcome};
use async_trait::async_trait;
use poolcast_core::config::UpstreamConfig;
use poolcast_core::credential::Credential;
use poolcast_core::models::gemini::GenerateContentRequest;
use poolcast_core::router::CanonicalModel;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use std::time::Duration;

/// API Key 请求头
const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_version: String,
}

/// 创建配置好的 HTTP 客户端
fn create_http_client(config: &UpstreamConfig) -> Result<Client, ProviderError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(Duration::from_secs(config.timeout_secs))
        .tcp_keepalive(Duration::from_secs(60))
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .build()
        .map_err(ProviderError::from)
}

impl GeminiProvider {
    pub fn new(config: &UpstreamConfig) -> Result<Self, ProviderError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ProviderError::Configuration(
                "upstream.base_url 不能为空".to_string(),
            ));
        }
        Ok(Self {
            client: create_http_client(config)?,
            base_url,
            api_version: config.api_version.trim_matches('/').to_string(),
        })
    }

    /// 构建 generateContent URL
    pub fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/{}/models/{}:generateContent",
            self.base_url, self.api_version, model
        )
    }
}

#[async_trait]
impl UpstreamClient for GeminiProvider {
    async fn call(
        &self,
        credential: &Credential,
        model: &CanonicalModel,
        body: &GenerateContentRequest,
    ) -> UpstreamOutcome {
        let url = self.endpoint(&model.id);
        tracing::debug!(
            "[UPSTREAM] 发起请求: model={} credential={}",
            model.id,
            credential.id
        );

        let resp = match self
            .client
            .post(&url)
            .header(API_KEY_HEADER, credential.secret.expose())
            .json(body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let failure = failure_from_reqwest(&e);
                tracing::warn!(
                    "[UPSTREAM] 请求失败: credential={} detail={}",
                    credential.id,
                    failure.detail
                );
                return UpstreamOutcome::Failure(failure);
            }
        };

        let status = resp.status();
        if status.is_success() {
            return match resp.json::<serde_json::Value>().await {
                Ok(payload) => UpstreamOutcome::Success(payload),
                Err(e) => {
                    tracing::warn!(
                        "[UPSTREAM] 响应解析失败: credential={} error={}",
                        credential.id,
                        e
                    );
                    UpstreamOutcome::Failure(UpstreamFailure::new(
                        UpstreamErrorKind::Transient,
                        Some(status.as_u16()),
                        "上游响应不是有效的 JSON",
                    ))
                }
            };
        }

        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let body = resp.text().await.unwrap_or_default();
        let failure = failure_from_response(status.as_u16(), retry_after.as_deref(), &body);
        tracing::warn!(
            "[UPSTREAM] 上游返回错误: credential={} status={} kind={} detail={}",
            credential.id,
            status,
            failure.kind,
            failure.detail
        );
        UpstreamOutcome::Failure(failure)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
