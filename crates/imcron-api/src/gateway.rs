//! Outbound calls to the message and voice services.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::error::{ApiError, Result};
use crate::jobs::VoiceChannel;

/// Services the scheduled jobs act on.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Delete every message of a conversation.
    async fn clear_conversation_msg(&self, conversation_id: &str) -> Result<()>;

    /// Tear down an idle voice channel.
    async fn close_voice_channel(&self, channel: &VoiceChannel) -> Result<()>;
}

/// HTTP gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:10002".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// [`MessageGateway`] over JSON POSTs.
pub struct HttpMessageGateway {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct ClearConversationMsg<'a> {
    conversation_id: &'a str,
}

impl HttpMessageGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.request_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::Gateway(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "gateway request");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Gateway(format!("{}: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Gateway(format!(
                "{} returned {}: {}",
                path, status, body
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageGateway for HttpMessageGateway {
    async fn clear_conversation_msg(&self, conversation_id: &str) -> Result<()> {
        self.post(
            "/msg/clear_conversation_msg",
            &ClearConversationMsg { conversation_id },
        )
        .await
    }

    async fn close_voice_channel(&self, channel: &VoiceChannel) -> Result<()> {
        self.post("/voice/close_channel", channel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> HttpMessageGateway {
        HttpMessageGateway::new(
            GatewayConfig::new(format!("{}/", server.uri()))
                .with_request_timeout(Duration::from_secs(2)),
        )
        .unwrap()
    }

    #[test]
    fn test_gateway_config_default() {
        let config = GatewayConfig::default();
        assert_eq!(config.base_url, "http://127.0.0.1:10002");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_clear_conversation_msg_posts_conversation_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/msg/clear_conversation_msg"))
            .and(body_json(serde_json::json!({"conversation_id": "si_1_2"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        gateway(&server).clear_conversation_msg("si_1_2").await.unwrap();
    }

    #[tokio::test]
    async fn test_close_voice_channel_posts_channel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/voice/close_channel"))
            .and(body_json(serde_json::json!({
                "user_id": "u1",
                "channel_id": "ch9",
                "group_id": "g3",
                "session_type": 2
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let channel = VoiceChannel {
            user_id: "u1".to_string(),
            channel_id: "ch9".to_string(),
            group_id: "g3".to_string(),
            session_type: 2,
        };
        gateway(&server).close_voice_channel(&channel).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/msg/clear_conversation_msg"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let err = gateway(&server)
            .clear_conversation_msg("si_1_2")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Gateway(_)));
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("busy"));
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_an_error() {
        let gateway = HttpMessageGateway::new(
            GatewayConfig::new("http://127.0.0.1:1").with_request_timeout(Duration::from_secs(1)),
        )
        .unwrap();
        assert!(gateway.clear_conversation_msg("si_1_2").await.is_err());
    }
}
