//! HTTP implementation of [`AssistantApi`].
//!
//! Non-streaming calls go through a `reqwest_middleware` stack (Retry-After
//! handling plus exponential backoff, both governed by
//! [`RetryConfig`](opsmind_common::RetryConfig)). Streamed chat uses the plain
//! `reqwest` client: a stream that already produced fragments cannot be
//! replayed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, warn};
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use reqwest_retry_after::RetryAfterMiddleware;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use opsmind_common::{
    ChatRequest, ChatResponse, Config, ConnectionTest, HostRequest, ServerStatus,
    SshExecuteRequest, SshExecuteResponse,
};

use crate::AssistantApi;
use crate::error::ClientError;
use crate::stream::{RecordStream, records};

const CHAT_SEND: &str = "chat/send";
const CHAT_STREAM: &str = "chat/stream";
const SSH_EXECUTE: &str = "ssh/execute";
const SSH_SERVER_STATUS: &str = "ssh/server-status";
const SSH_TEST_CONNECTION: &str = "ssh/test-connection";

/// Client for the assistant HTTP API.
#[derive(Clone)]
pub struct ApiClient {
    client: ClientWithMiddleware,
    streaming_client: reqwest::Client,
    config: Arc<Config>,
}

// Custom Debug implementation to avoid exposing the API token
impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.base_url)
            .field("user_id", &self.config.user_id)
            .field(
                "api_token",
                &self.config.api_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Creates a client from a configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: Config) -> Result<Self, ClientError> {
        config
            .validate()
            .map_err(|e| ClientError::ConfigurationError(e.to_string()))?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(
                config.retry_config.initial_delay,
                config.retry_config.max_delay,
            )
            .build_with_max_retries(config.retry_config.max_retries);

        // None means no timeout: answers from a tool-using agent can take minutes
        let reqwest_client = match config.timeout_seconds {
            Some(timeout) => reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout))
                .build()?,
            None => reqwest::Client::builder().build()?,
        };

        // A total timeout would also bound reading the body, cutting long answers
        // short. Only connecting is bounded here.
        let streaming_client = match config.timeout_seconds {
            Some(timeout) => reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(timeout))
                .build()?,
            None => reqwest::Client::builder().build()?,
        };

        // RetryAfterMiddleware goes first so Retry-After headers win over backoff
        let client = reqwest_middleware::ClientBuilder::new(reqwest_client)
            .with(RetryAfterMiddleware::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            streaming_client,
            config: Arc::new(config),
        })
    }

    fn url(&self, path: &str) -> Result<url::Url, ClientError> {
        let url = self.config.endpoint(path);
        url::Url::parse(&url)
            .map_err(|e| ClientError::ConfigurationError(format!("Invalid URL '{url}': {e}")))
    }

    fn authorization(&self) -> Option<String> {
        self.config
            .api_token
            .as_ref()
            .map(|token| format!("Bearer {}", token.expose_secret()))
    }

    fn with_auth(
        &self,
        builder: reqwest_middleware::RequestBuilder,
    ) -> reqwest_middleware::RequestBuilder {
        match self.authorization() {
            Some(value) => builder.header("Authorization", value),
            None => builder,
        }
    }

    async fn check_status(
        response: reqwest::Response,
        fallback: &str,
    ) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.map_err(|e| {
            warn!("Failed to read error response body: {e}");
            ClientError::NetworkError(e)
        })?;
        let error = ClientError::from_status(status, &body, fallback);
        error!("API request failed with status {}: {error}", status.as_u16());
        Err(error)
    }

    async fn post_json<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
        fallback: &str,
    ) -> Result<T, ClientError> {
        let url = self.url(path)?;
        debug!("POST {url}");

        let response = self
            .with_auth(self.client.post(url))
            .header("Content-Type", "application/json")
            .body(serde_json::to_string(body)?)
            .send()
            .await?;

        Self::parse(Self::check_status(response, fallback).await?).await
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        let text = response.text().await?;
        debug!("Raw API response: {text}");
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl AssistantApi for ApiClient {
    fn config(&self) -> &Config {
        &self.config
    }

    async fn send_message(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError> {
        self.post_json(CHAT_SEND, request, "failed to send message")
            .await
    }

    async fn stream_message(&self, request: &ChatRequest) -> Result<RecordStream, ClientError> {
        let url = self.url(CHAT_STREAM)?;
        debug!("POST {url} (streaming)");

        let mut builder = self
            .streaming_client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .body(serde_json::to_string(request)?);
        if let Some(value) = self.authorization() {
            builder = builder.header("Authorization", value);
        }

        let response = builder.send().await?;
        let response = Self::check_status(response, "failed to send message").await?;

        Ok(Box::pin(records(response.bytes_stream())))
    }

    async fn execute_command(
        &self,
        request: &SshExecuteRequest,
    ) -> Result<SshExecuteResponse, ClientError> {
        self.post_json(SSH_EXECUTE, request, "failed to execute command")
            .await
    }

    async fn server_status(&self, request: &HostRequest) -> Result<ServerStatus, ClientError> {
        self.post_json(SSH_SERVER_STATUS, request, "failed to fetch server status")
            .await
    }

    async fn test_connection(&self, request: &HostRequest) -> Result<ConnectionTest, ClientError> {
        match self
            .post_json(SSH_TEST_CONNECTION, request, "connection test failed")
            .await
        {
            Err(ClientError::RequestFailed { reason, .. } | ClientError::AuthenticationError(reason)) => {
                Ok(ConnectionTest {
                    success: false,
                    message: reason,
                    host: request.host.clone(),
                    latency_ms: None,
                })
            }
            other => other,
        }
    }

    async fn conversation_messages(
        &self,
        remote_id: &str,
        limit: u32,
    ) -> Result<Value, ClientError> {
        let mut url = self.url(&format!("chat/conversations/{remote_id}/messages"))?;
        url.query_pairs_mut()
            .append_pair("user_id", &self.config.user_id)
            .append_pair("limit", &limit.to_string());
        debug!("GET {url}");

        let response = self.with_auth(self.client.get(url)).send().await?;
        Self::parse(Self::check_status(response, "failed to fetch conversation").await?).await
    }

    async fn delete_remote_conversation(&self, remote_id: &str) -> Result<(), ClientError> {
        let mut url = self.url(&format!("chat/conversations/{remote_id}"))?;
        url.query_pairs_mut()
            .append_pair("user_id", &self.config.user_id);
        debug!("DELETE {url}");

        let response = self.with_auth(self.client.delete(url)).send().await?;
        Self::check_status(response, "failed to delete conversation").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;
    use futures::TryStreamExt;
    use opsmind_common::RetryConfig;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_client(base_url: &str) -> ApiClient {
        ApiClient::new(Config::new(format!("{base_url}/api")).with_user_id("ops")).unwrap()
    }

    #[tokio::test]
    async fn test_send_message() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/chat/send"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"message": "uptime", "user_id": "ops"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "answer": "up 12 days",
                "conversation_id": "conv-1",
                "message_id": "msg-1"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let request = ChatRequest::builder()
            .message("uptime")
            .user_id("ops")
            .build();
        let response = client.send_message(&request).await.unwrap();

        assert_eq!(response.answer, "up 12 days");
        assert_eq!(response.conversation_id, "conv-1");
    }

    #[tokio::test]
    async fn test_send_message_surfaces_body_as_reason() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/chat/send"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({"detail": "Dify API error"})),
            )
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let request = ChatRequest::builder().message("hi").build();
        let error = client.send_message(&request).await.unwrap_err();

        match error {
            ClientError::RequestFailed { status, reason } => {
                assert_eq!(status, 500);
                assert_eq!(reason, "Dify API error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bearer_token_is_sent() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/ssh/execute"))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "stdout": "Filesystem  Size\n",
                "stderr": "",
                "exit_code": 0,
                "execution_time_ms": 41.5
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let config = Config::new(format!("{}/api", mock_server.uri())).with_api_token("token-1");
        let client = ApiClient::new(config).unwrap();
        let request = SshExecuteRequest::builder()
            .host("10.0.0.5")
            .command("df -h")
            .build();
        let response = client.execute_command(&request).await.unwrap();

        assert!(response.success);
        assert_eq!(response.execution_time_ms, Some(41.5));
    }

    #[tokio::test]
    async fn test_stream_message_yields_records_in_order() {
        let mock_server = MockServer::start().await;

        let body = concat!(
            "data: {\"event\":\"message\",\"answer\":\"Disk \"}\n\n",
            "data: {\"event\":\"message\",\"answer\":\"is 40% full\"}\n\n",
            "data: {\"event\":\"message_end\",\"conversation_id\":\"conv-9\"}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/chat/stream"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream"),
            )
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let request = ChatRequest::builder().message("disk?").build();

        let fragments: Vec<String> = client
            .stream_fragments(&request)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(fragments, vec!["Disk ", "is 40% full"]);

        let records: Vec<_> = client
            .stream_message(&request)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(matches!(
            records.last(),
            Some(crate::StreamRecord::End { conversation_id: Some(id), .. }) if id == "conv-9"
        ));
    }

    #[tokio::test]
    async fn test_stream_outlives_request_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/chat/stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(
                        b"data: {\"event\":\"message\",\"answer\":\"slow\"}\n\n".to_vec(),
                        "text/event-stream",
                    )
                    .set_delay(Duration::from_millis(2500)),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat/send"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "answer": "slow",
                        "conversation_id": "c",
                        "message_id": "m"
                    }))
                    .set_delay(Duration::from_millis(2500)),
            )
            .mount(&mock_server)
            .await;

        let config = Config::new(format!("{}/api", mock_server.uri()))
            .with_user_id("ops")
            .with_timeout_seconds(1);
        let client = ApiClient::new(config).unwrap();
        let request = ChatRequest::builder().message("uptime?").build();

        let fragments: Vec<String> = client
            .stream_fragments(&request)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(fragments, vec!["slow"]);

        // The same timeout still bounds non-streaming calls.
        let result = client.send_message(&request).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stream_message_fails_before_any_record() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/chat/stream"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let request = ChatRequest::builder().message("hi").build();
        let result = client.stream_message(&request).await;

        assert!(matches!(
            result,
            Err(ClientError::RequestFailed { status: 502, ref reason }) if reason == "Bad Gateway"
        ));
    }

    #[tokio::test]
    async fn test_failed_connection_test_is_not_an_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/ssh/test-connection"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({"detail": "Connection refused"})),
            )
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let result = client
            .test_connection(&HostRequest::new("10.0.0.9", None))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.message, "Connection refused");
        assert_eq!(result.host, "10.0.0.9");
    }

    #[tokio::test]
    async fn test_server_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/ssh/server-status"))
            .and(body_json(json!({"host": "web-01", "port": 2222})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "host": "web-01",
                "online": true,
                "cpu_usage": "12.5%",
                "uptime": "up 3 days"
            })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let status = client
            .server_status(&HostRequest::new("web-01", Some(2222)))
            .await
            .unwrap();

        assert!(status.online);
        assert_eq!(status.cpu_usage.as_deref(), Some("12.5%"));
        assert!(status.memory_usage.is_none());
    }

    #[tokio::test]
    async fn test_remote_history_and_delete() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/chat/conversations/conv-1/messages"))
            .and(query_param("user_id", "ops"))
            .and(query_param("limit", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/chat/conversations/conv-1"))
            .and(query_param("user_id", "ops"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "success"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let history = client.conversation_messages("conv-1", 20).await.unwrap();
        assert_eq!(history, json!({"data": []}));
        client.delete_remote_conversation("conv-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_retries_transient_failures_when_enabled() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/ssh/server-status"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/ssh/server-status"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"host": "db-01", "online": false})),
            )
            .mount(&mock_server)
            .await;

        let config = Config::new(format!("{}/api", mock_server.uri())).with_retry_config(
            RetryConfig {
                max_retries: 2,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
            },
        );
        let client = ApiClient::new(config).unwrap();
        let status = client
            .server_status(&HostRequest::new("db-01", None))
            .await
            .unwrap();

        assert!(!status.online);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let error = ApiClient::new(Config::new("not a url")).unwrap_err();
        assert!(matches!(error, ClientError::ConfigurationError(_)));
    }

    #[test]
    fn test_debug_redacts_token() {
        let client = ApiClient::new(Config::default().with_api_token("hunter2")).unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("REDACTED"));
    }
}
