use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response, header};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::config::{DeploymentConfig, DeploymentKind};
use crate::error::{Error, Result};
use crate::observability::{
    CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS, CLIENT_TOTAL_TOKENS,
};
use crate::types::{ChatCompletion, ChatCompletionRequest, ChatMessage};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Anything that can complete a chat conversation.
///
/// [`OpenAiClient`] talks to a real deployment; sessions only depend on this
/// trait so they can run against any backend.
///
/// ```
/// # use obelisca::{ChatBackend, ChatCompletion, ChatMessage, Result};
/// struct Echo;
///
/// #[async_trait::async_trait]
/// impl ChatBackend for Echo {
///     async fn complete(&self, _model: &str, messages: &[ChatMessage]) -> Result<ChatCompletion> {
///         let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
///         Ok(ChatCompletion::from_reply(last, None))
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let completion = Echo.complete("gpt-4o", &[ChatMessage::user("ping")]).await.unwrap();
/// assert_eq!(completion.reply(), Some("ping"));
/// # });
/// ```
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Requests a completion of `messages` from `model`.
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<ChatCompletion>;
}

/// Client for the OpenAI and Azure OpenAI chat-completions endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    api_key: String,
    kind: DeploymentKind,
    client: ReqwestClient,
    completions_url: Url,
    timeout: Duration,
}

impl OpenAiClient {
    /// Create a client for `deployment`, reading its API key from the environment.
    pub fn from_deployment(deployment: &DeploymentConfig) -> Result<Self> {
        let api_key = deployment.api_key()?;
        Self::with_options(deployment, api_key, None)
    }

    /// Create a client with an explicit API key and optional timeout.
    pub fn with_options(
        deployment: &DeploymentConfig,
        api_key: String,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        info!(
            "Initializing client with deployment: {}",
            deployment.deployment_name
        );
        deployment.validate()?;
        let completions_url = completions_url(deployment)?;

        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;

        match deployment.kind {
            DeploymentKind::Azure => info!("Azure OpenAI client configured."),
            DeploymentKind::OpenAi => info!("Standard OpenAI client configured."),
        }

        Ok(Self {
            api_key,
            kind: deployment.kind,
            client,
            completions_url,
            timeout,
        })
    }

    /// The URL chat completions are posted to.
    pub fn completions_url(&self) -> &Url {
        &self.completions_url
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let invalid_key = |_: header::InvalidHeaderValue| {
            Error::authentication("API key contains invalid header characters")
        };
        match self.kind {
            DeploymentKind::OpenAi => {
                headers.insert(
                    header::AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                        .map_err(invalid_key)?,
                );
            }
            DeploymentKind::Azure => {
                headers.insert(
                    "api-key",
                    HeaderValue::from_str(&self.api_key).map_err(invalid_key)?,
                );
            }
        }
        Ok(headers)
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();
        let headers = response.headers();
        let request_id = headers
            .get("x-request-id")
            .or_else(|| headers.get("apim-request-id"))
            .and_then(|val| val.to_str().ok())
            .map(String::from);
        let retry_after = parse_retry_after(
            headers
                .get(header::RETRY_AFTER)
                .and_then(|val| val.to_str().ok()),
        );

        match response.text().await {
            Ok(body) => map_status(status_code, retry_after, request_id, &body),
            Err(e) => Error::http_client(
                format!("Failed to read error response: {}", e),
                Some(Box::new(e)),
            ),
        }
    }

    async fn send(&self, model: &str, messages: &[ChatMessage]) -> Result<ChatCompletion> {
        let request = ChatCompletionRequest::new(model, messages);
        debug!(
            "Posting {} messages to {}",
            messages.len(),
            self.completions_url
        );

        let response = self
            .client
            .post(self.completions_url.clone())
            .headers(self.default_headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(
                        format!("Request timed out: {}", e),
                        Some(self.timeout.as_secs_f64()),
                    )
                } else if e.is_connect() {
                    Error::connection(format!("Connection error: {}", e), Some(Box::new(e)))
                } else {
                    Error::http_client(format!("Request failed: {}", e), Some(Box::new(e)))
                }
            })?;

        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }

        response.json::<ChatCompletion>().await.map_err(|e| {
            Error::serialization(
                format!("Failed to parse response: {}", e),
                Some(Box::new(e)),
            )
        })
    }
}

#[async_trait::async_trait]
impl ChatBackend for OpenAiClient {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<ChatCompletion> {
        CLIENT_REQUESTS.click();
        let start = Instant::now();
        let result = self.send(model, messages).await;
        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());
        match &result {
            Ok(completion) => {
                if let Some(usage) = completion.usage {
                    CLIENT_TOTAL_TOKENS.count(usage.total_tokens);
                }
            }
            Err(_) => CLIENT_REQUEST_ERRORS.click(),
        }
        result
    }
}

/// Builds the chat-completions URL for a deployment.
///
/// OpenAI: `{endpoint}/chat/completions`.
/// Azure: `{endpoint}/openai/deployments/{name}/chat/completions?api-version={v}`.
fn completions_url(deployment: &DeploymentConfig) -> Result<Url> {
    let endpoint = deployment.endpoint.trim_end_matches('/');
    let url = match deployment.kind {
        DeploymentKind::OpenAi => Url::parse(&format!("{endpoint}/chat/completions"))?,
        DeploymentKind::Azure => {
            let mut url = Url::parse(&format!(
                "{endpoint}/openai/deployments/{}/chat/completions",
                deployment.deployment_name
            ))?;
            url.query_pairs_mut()
                .append_pair("api-version", &deployment.api_version);
            url
        }
    };
    Ok(url)
}

/// Seconds to wait from a `retry-after` header. HTTP-date values are ignored.
fn parse_retry_after(value: Option<&str>) -> Option<u64> {
    value.and_then(|val| val.trim().parse::<u64>().ok())
}

/// Maps a non-success status and its body to the matching error variant.
fn map_status(
    status_code: u16,
    retry_after: Option<u64>,
    request_id: Option<String>,
    body: &str,
) -> Error {
    let (error_type, error_message, error_param) = parse_error_body(body);
    match status_code {
        400 => Error::bad_request(error_message, error_param),
        401 => Error::authentication(error_message),
        403 => Error::permission(error_message),
        404 => Error::not_found(error_message),
        408 => Error::timeout(error_message, None),
        429 => Error::rate_limit(error_message, retry_after),
        500 => Error::internal_server(error_message, request_id),
        502..=504 => Error::service_unavailable(error_message, retry_after),
        _ => Error::api(status_code, error_type, error_message, request_id),
    }
}

/// Pulls `(type, message, param)` out of an OpenAI-style error body, falling
/// back to the raw body as the message.
fn parse_error_body(body: &str) -> (Option<String>, String, Option<String>) {
    #[derive(Deserialize)]
    struct ErrorResponse {
        error: Option<ErrorDetail>,
    }

    #[derive(Deserialize)]
    struct ErrorDetail {
        #[serde(rename = "type")]
        error_type: Option<String>,
        code: Option<serde_json::Value>,
        message: Option<String>,
        param: Option<String>,
    }

    let detail = serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|e| e.error);
    match detail {
        Some(detail) => {
            let error_type = detail.error_type.or_else(|| {
                detail.code.map(|code| match code {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
            });
            let message = detail.message.unwrap_or_else(|| body.to_string());
            (error_type, message, detail.param)
        }
        None => (None, body.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn azure() -> DeploymentConfig {
        DeploymentConfig {
            section: "Deployment_Config_1".to_string(),
            kind: DeploymentKind::Azure,
            endpoint: "https://example.openai.azure.com/".to_string(),
            deployment_name: "gpt-4o".to_string(),
            api_version: "2024-12-01-preview".to_string(),
        }
    }

    #[test]
    fn test_client_creation() {
        let client =
            OpenAiClient::with_options(&DeploymentConfig::default(), "test-key".to_string(), None)
                .unwrap();
        assert_eq!(client.api_key, "test-key");
        assert_eq!(client.timeout, DEFAULT_TIMEOUT);
        assert_eq!(
            client.completions_url().as_str(),
            "https://api.openai.com/v1/chat/completions"
        );

        let client = OpenAiClient::with_options(
            &azure(),
            "test-key".to_string(),
            Some(Duration::from_secs(30)),
        )
        .unwrap();
        assert_eq!(client.timeout, Duration::from_secs(30));
        assert_eq!(
            client.completions_url().as_str(),
            "https://example.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-12-01-preview"
        );
    }

    #[test]
    fn invalid_deployment_is_rejected() {
        let deployment = DeploymentConfig {
            api_version: String::new(),
            ..azure()
        };
        let err = OpenAiClient::with_options(&deployment, "k".to_string(), None).unwrap_err();
        assert!(err.is_configuration());

        let deployment = DeploymentConfig {
            endpoint: "not a url".to_string(),
            ..DeploymentConfig::default()
        };
        assert!(OpenAiClient::with_options(&deployment, "k".to_string(), None).is_err());
    }

    #[test]
    fn auth_header_depends_on_kind() {
        let client =
            OpenAiClient::with_options(&DeploymentConfig::default(), "sk-1".to_string(), None)
                .unwrap();
        let headers = client.default_headers().unwrap();
        assert_eq!(headers[header::AUTHORIZATION], "Bearer sk-1");
        assert!(headers.get("api-key").is_none());

        let client = OpenAiClient::with_options(&azure(), "az-1".to_string(), None).unwrap();
        let headers = client.default_headers().unwrap();
        assert_eq!(headers["api-key"], "az-1");
        assert!(headers.get(header::AUTHORIZATION).is_none());
    }

    #[test]
    fn error_body_parsing() {
        let body = r#"{"error":{"message":"Invalid model","type":"invalid_request_error","param":"model","code":null}}"#;
        assert_eq!(
            parse_error_body(body),
            (
                Some("invalid_request_error".to_string()),
                "Invalid model".to_string(),
                Some("model".to_string())
            )
        );

        let body = r#"{"error":{"code":"DeploymentNotFound","message":"The API deployment does not exist."}}"#;
        let (error_type, message, param) = parse_error_body(body);
        assert_eq!(error_type.as_deref(), Some("DeploymentNotFound"));
        assert_eq!(message, "The API deployment does not exist.");
        assert!(param.is_none());

        assert_eq!(
            parse_error_body("upstream connect error"),
            (None, "upstream connect error".to_string(), None)
        );
    }

    #[test]
    fn retry_after_is_whole_seconds() {
        assert_eq!(parse_retry_after(Some("20")), Some(20));
        assert_eq!(parse_retry_after(Some(" 3 ")), Some(3));
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn client_errors_map_to_variants() {
        let body = r#"{"error":{"message":"bad temperature","type":"invalid_request_error","param":"temperature"}}"#;
        let err = map_status(400, None, None, body);
        assert!(err.is_bad_request());
        assert_eq!(
            err.to_string(),
            "Bad request: bad temperature (parameter: temperature)"
        );

        assert!(map_status(401, None, None, "nope").is_authentication());
        assert!(matches!(
            map_status(403, None, None, "forbidden"),
            Error::Permission { message } if message == "forbidden"
        ));
        assert!(map_status(404, None, None, "no such deployment").is_not_found());
        assert!(matches!(
            map_status(408, None, None, "slow"),
            Error::Timeout { duration: None, .. }
        ));
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = map_status(429, Some(7), None, "too many requests");
        assert!(err.is_rate_limit());
        assert!(matches!(err, Error::RateLimit { retry_after: Some(7), .. }));
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded: too many requests (retry after 7 seconds)"
        );
    }

    #[test]
    fn server_errors_map_to_variants() {
        let err = map_status(500, Some(1), Some("req-1".to_string()), "boom");
        assert!(err.is_server_error());
        assert_eq!(err.request_id(), Some("req-1"));

        for status in [502, 503, 504] {
            let err = map_status(status, Some(30), None, "overloaded");
            assert!(err.is_server_error());
            assert!(matches!(
                err,
                Error::ServiceUnavailable { retry_after: Some(30), .. }
            ));
        }
        assert!(!map_status(501, None, None, "not implemented").is_server_error());
    }

    #[test]
    fn other_statuses_are_generic_api_errors() {
        let body = r#"{"error":{"message":"conflict","type":"conflict_error"}}"#;
        let err = map_status(409, Some(5), Some("req-9".to_string()), body);
        assert_eq!(err.status_code(), Some(409));
        assert_eq!(err.request_id(), Some("req-9"));
        assert_eq!(err.to_string(), "conflict_error: conflict (Request ID: req-9)");
    }

    #[tokio::test]
    #[ignore] // Ignore by default as this requires a real API key
    async fn test_complete() {
        if env::var("OPENAI_API_KEY").is_err() {
            println!("Skipping test_complete: OPENAI_API_KEY not set");
            return;
        }

        let deployment = DeploymentConfig {
            deployment_name: "gpt-4o-mini".to_string(),
            ..DeploymentConfig::default()
        };
        let client = OpenAiClient::from_deployment(&deployment).unwrap();
        let messages = vec![ChatMessage::user("Reply with the single word: pong")];
        let completion = client
            .complete(&deployment.deployment_name, &messages)
            .await
            .unwrap();
        assert!(completion.reply().is_some());
    }
}
