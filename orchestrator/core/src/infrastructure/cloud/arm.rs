// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Azure Resource Manager HTTP client
//!
//! Thin wrapper over `reqwest` shared by every live adapter. It owns the
//! endpoint, subscription and bearer token, and turns ARM error envelopes
//! (`{"error": {"code": "...", "message": "..."}}`) into [`CloudError`].

use crate::domain::errors::CloudError;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

pub const USER_AGENT: &str = concat!("amlfs-orchestrator/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: String,
}

/// Standard ARM list envelope.
#[derive(Debug, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "nextLink", default)]
    pub next_link: Option<String>,
}

#[derive(Clone)]
pub struct ArmClient {
    http: Client,
    endpoint: String,
    subscription_id: String,
    token: Option<String>,
}

impl ArmClient {
    pub fn new(
        endpoint: impl Into<String>,
        subscription_id: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            subscription_id: subscription_id.into(),
            token,
        }
    }

    /// Same credentials against another subscription.
    pub fn for_subscription(&self, subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            ..self.clone()
        }
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// `{endpoint}/subscriptions/{subscription}{path}`
    pub fn subscription_url(&self, path: &str) -> String {
        format!(
            "{}/subscriptions/{}{}",
            self.endpoint, self.subscription_id, path
        )
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header(reqwest::header::USER_AGENT, USER_AGENT);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send and fail on any non-success status.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, CloudError> {
        let response = builder.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(error_from_response(response).await)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        api_version: Option<&str>,
    ) -> Result<T, CloudError> {
        let mut builder = self.request(Method::GET, url);
        if let Some(api_version) = api_version {
            builder = builder.query(&[("api-version", api_version)]);
        }
        let response = self.send(builder).await?;
        decode_json(response).await
    }

    /// Fetch one page of an ARM listing. The continuation is the previous
    /// page's `nextLink`, which already carries its query string.
    pub async fn list_page<T: DeserializeOwned>(
        &self,
        first_page_url: &str,
        api_version: &str,
        continuation: Option<&str>,
    ) -> Result<ListResponse<T>, CloudError> {
        match continuation {
            Some(next_link) => self.get_json(next_link, None).await,
            None => self.get_json(first_page_url, Some(api_version)).await,
        }
    }
}

impl std::fmt::Debug for ArmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmClient")
            .field("endpoint", &self.endpoint)
            .field("subscription_id", &self.subscription_id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, CloudError> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| CloudError::Decode(e.to_string()))
}

/// Build a [`CloudError::Response`] from a failed response.
pub async fn error_from_response(response: Response) -> CloudError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), "ARM request failed: {}", body);
    error_from_body(status, &body)
}

fn error_from_body(status: StatusCode, body: &str) -> CloudError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => CloudError::Response {
            status: status.as_u16(),
            code: envelope.error.code,
            message: envelope.error.message,
        },
        Err(_) => {
            let message = if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                body.trim().to_string()
            };
            CloudError::response(status.as_u16(), message)
        }
    }
}

/// Header value as an owned string, if present and valid UTF-8.
pub fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
