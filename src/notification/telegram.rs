//! A client for sending notifications through the Telegram Bot API.

use crate::config::TelegramConfig;
use crate::core::{Messenger, OutboundMessage, ParseMode};
use crate::error::DeliveryError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

/// The envelope every Bot API method answers with.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// A client for the Telegram `sendMessage` method.
pub struct TelegramClient {
    client: reqwest::Client,
    api_url: String,
    bot_token: String,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl TelegramClient {
    /// Creates a new `TelegramClient`.
    pub fn new(config: &TelegramConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
        })
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.bot_token)
    }
}

fn parse_mode_name(mode: ParseMode) -> &'static str {
    match mode {
        ParseMode::Markdown => "Markdown",
    }
}

/// Maps an API answer to a delivery outcome.
fn classify(status: reqwest::StatusCode, body: &str) -> Result<(), DeliveryError> {
    match serde_json::from_str::<ApiResponse>(body) {
        Ok(response) if response.ok => Ok(()),
        Ok(response) => {
            let mut description = response
                .description
                .unwrap_or_else(|| "no description".to_string());
            if let Some(retry_after) = response.parameters.and_then(|p| p.retry_after) {
                description = format!("{} (retry after {}s)", description, retry_after);
            }
            Err(DeliveryError::TransportRejected {
                code: response.error_code.unwrap_or(i64::from(status.as_u16())),
                description,
            })
        }
        Err(_) => Err(DeliveryError::Unexpected(format!(
            "status {} with unreadable body: {}",
            status,
            body.chars().take(200).collect::<String>()
        ))),
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    fn name(&self) -> &str {
        "telegram"
    }

    #[instrument(skip(self, message), fields(chat_id = %message.destination()))]
    async fn deliver(&self, message: OutboundMessage) -> Result<(), DeliveryError> {
        let payload = json!({
            "chat_id": message.destination().as_str(),
            "text": message.text(),
            "parse_mode": parse_mode_name(message.parse_mode()),
        });

        // The URL embeds the bot token, so reqwest errors are reported
        // without it.
        let response = self
            .client
            .post(self.send_message_url())
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Unexpected(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DeliveryError::Unexpected(e.without_url().to_string()))?;
        debug!(status = %status, "Telegram answered");
        classify(status, &body)
    }
}

#[cfg(test)]
mod telegram_client_tests {
    use super::*;
    use crate::core::ChatId;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> TelegramClient {
        let config = TelegramConfig {
            bot_token: "TEST".to_string(),
            chat_id: ChatId::new("6412992293"),
            api_url: server.uri(),
            timeout_seconds: 2,
        };
        TelegramClient::new(&config).unwrap()
    }

    fn message(text: &str) -> OutboundMessage {
        OutboundMessage::markdown(text.to_string(), ChatId::new("6412992293"))
    }

    #[tokio::test]
    async fn test_deliver_success() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST/sendMessage"))
            .and(body_json(json!({
                "chat_id": "6412992293",
                "text": "*hello*",
                "parse_mode": "Markdown"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": { "message_id": 1 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        // Act
        let result = client_for(&server).deliver(message("*hello*")).await;

        // Assert
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_deliver_api_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST/sendMessage"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: chat not found"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = client_for(&server).deliver(message("hi")).await;

        assert_eq!(
            result,
            Err(DeliveryError::TransportRejected {
                code: 400,
                description: "Bad Request: chat not found".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_deliver_rate_limited_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "ok": false,
                "error_code": 429,
                "description": "Too Many Requests: retry after 7",
                "parameters": { "retry_after": 7 }
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).deliver(message("hi")).await.unwrap_err();

        match err {
            DeliveryError::TransportRejected { code, description } => {
                assert_eq!(code, 429);
                assert!(description.contains("retry after 7s"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deliver_server_error_is_unexpected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).deliver(message("hi")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Unexpected(_)));
    }

    #[tokio::test]
    async fn test_deliver_connection_failure_is_unexpected_and_hides_token() {
        let config = TelegramConfig {
            bot_token: "SECRET-TOKEN".to_string(),
            chat_id: ChatId::new("1"),
            api_url: "http://127.0.0.1:9".to_string(),
            timeout_seconds: 2,
        };
        let client = TelegramClient::new(&config).unwrap();

        let err = client.deliver(message("hi")).await.unwrap_err();

        match err {
            DeliveryError::Unexpected(text) => assert!(!text.contains("SECRET-TOKEN")),
            other => panic!("expected unexpected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_rejection_without_error_code_uses_status() {
        let result = classify(
            reqwest::StatusCode::FORBIDDEN,
            r#"{"ok": false, "description": "Forbidden: bot was blocked by the user"}"#,
        );
        assert_eq!(
            result,
            Err(DeliveryError::TransportRejected {
                code: 403,
                description: "Forbidden: bot was blocked by the user".to_string()
            })
        );
    }

    #[test]
    fn test_debug_hides_token() {
        let config = TelegramConfig {
            bot_token: "SECRET-TOKEN".to_string(),
            chat_id: ChatId::new("1"),
            api_url: "https://api.telegram.org".to_string(),
            timeout_seconds: 2,
        };
        let client = TelegramClient::new(&config).unwrap();
        assert!(!format!("{:?}", client).contains("SECRET-TOKEN"));
    }
}
