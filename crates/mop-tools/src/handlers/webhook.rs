//! Webhook handler.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::context::StepScope;
use crate::error::StepError;
use crate::registry::{ParamKind, ParamSchema, StepHandler};
use crate::result::StepResult;

/// Default request timeout in seconds.
pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 30;

/// HTTP method.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
#[allow(clippy::upper_case_acronyms)]
pub enum HttpMethod {
    GET,
    #[default]
    POST,
    PUT,
    PATCH,
    DELETE,
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::GET => Method::GET,
            HttpMethod::POST => Method::POST,
            HttpMethod::PUT => Method::PUT,
            HttpMethod::PATCH => Method::PATCH,
            HttpMethod::DELETE => Method::DELETE,
        }
    }
}

/// Webhook step parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Target URL.
    pub url: String,

    /// HTTP method (default: POST).
    #[serde(default)]
    pub method: HttpMethod,

    /// Request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Request body. Strings are sent as-is, anything else as JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,

    /// Query parameters.
    #[serde(default)]
    pub params: HashMap<String, String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_WEBHOOK_TIMEOUT_SECS
}

/// Sends one HTTP request. Non-2xx responses are handler errors.
pub struct WebhookHandler {
    client: reqwest::Client,
}

impl WebhookHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a webhook handler with a custom client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(&self, config: &WebhookConfig) -> Result<StepResult, StepError> {
        let method: Method = config.method.clone().into();
        let mut request = self
            .client
            .request(method, &config.url)
            .timeout(Duration::from_secs(config.timeout_seconds));

        if !config.params.is_empty() {
            request = request.query(&config.params);
        }
        for (key, value) in &config.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        match &config.body {
            Some(serde_json::Value::String(s)) => request = request.body(s.clone()),
            Some(body) => request = request.json(body),
            None => {}
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                StepError::Timeout(config.timeout_seconds)
            } else {
                StepError::from(e)
            }
        })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(StepError::Http(format!(
                "{} returned {}: {}",
                config.url,
                status.as_u16(),
                truncate(&text, 200)
            )));
        }

        let body = serde_json::from_str::<serde_json::Value>(&text)
            .unwrap_or(serde_json::Value::String(text));

        Ok(StepResult::success(
            format!("{} returned {}", config.url, status.as_u16()),
            serde_json::json!({ "status_code": status.as_u16(), "body": body }),
        ))
    }
}

impl Default for WebhookHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl StepHandler for WebhookHandler {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn description(&self) -> &'static str {
        "Send an HTTP request to an integration endpoint"
    }

    fn param_schema(&self) -> ParamSchema {
        ParamSchema::new()
            .required("url", ParamKind::String, "Target URL")
            .optional("method", ParamKind::String, "GET, POST, PUT, PATCH or DELETE")
            .optional("headers", ParamKind::Object, "Request headers")
            .optional("body", ParamKind::Any, "Request body")
            .optional("params", ParamKind::Object, "Query parameters")
            .optional("timeout_seconds", ParamKind::Integer, "Request timeout (default 30)")
    }

    async fn execute(
        &self,
        params: &serde_json::Value,
        scope: &mut StepScope,
    ) -> Result<StepResult, StepError> {
        let config: WebhookConfig = serde_json::from_value(params.clone())
            .map_err(|e| StepError::InvalidParams(format!("Invalid webhook params: {}", e)))?;

        tracing::debug!(
            url = %config.url,
            method = ?config.method,
            device = ?scope.device(),
            "Sending webhook"
        );

        self.send(&config).await
    }
}
