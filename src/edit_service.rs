//! Remote image-edit service client
//!
//! The service receives a source image, a same-sized selection mask and a
//! prompt as `multipart/form-data`, and answers with a list of generated
//! image URLs or an error envelope.

use crate::{
    config::{EditConfig, RetryPolicy, API_KEY_ENV},
    error::{EditError, Result},
    types::{EditRequest, EditResult, GeneratedImage},
};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Longest upstream error body kept in an error message
const MAX_ERROR_BODY: usize = 500;

/// Capability that turns an edit request into generated images
#[async_trait]
pub trait EditService: Send + Sync {
    /// Submit one request
    ///
    /// # Errors
    /// - `RemoteService` for non-success responses or an empty result list
    /// - `Network` / `Timeout` for transport failures
    async fn submit(&self, request: &EditRequest) -> Result<EditResult>;
}

#[async_trait]
impl<S: EditService + ?Sized> EditService for Arc<S> {
    async fn submit(&self, request: &EditRequest) -> Result<EditResult> {
        (**self).submit(request).await
    }
}

#[derive(Debug, Deserialize)]
struct EditResponse {
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    data: Vec<EditResponseImage>,
}

#[derive(Debug, Deserialize)]
struct EditResponseImage {
    url: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// HTTP client for an OpenAI-compatible `/images/edits` endpoint
#[derive(Clone)]
pub struct HttpEditService {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for HttpEditService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEditService")
            .field("base_url", &self.base_url)
            .field("api_key", &crate::config::redact_key(&self.api_key))
            .finish_non_exhaustive()
    }
}

impl HttpEditService {
    #[must_use]
    pub fn new<S: Into<String>, K: Into<String>>(
        client: reqwest::Client,
        base_url: S,
        api_key: K,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Client for the endpoint and credential in `config`
    ///
    /// # Errors
    /// - `InvalidConfig` when no credential is configured
    pub fn from_config(config: &EditConfig, client: reqwest::Client) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                EditError::invalid_config(format!(
                    "No edit service credential configured (set {API_KEY_ENV})"
                ))
            })?;
        Ok(Self::new(client, config.api_base_url.clone(), api_key))
    }

    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}/images/edits", self.base_url)
    }

    fn form(request: &EditRequest) -> Result<Form> {
        let png_part = |bytes: &[u8], file_name: &'static str| {
            Part::bytes(bytes.to_vec())
                .file_name(file_name)
                .mime_str("image/png")
                .map_err(|e| EditError::internal(format!("Invalid multipart part: {e}")))
        };

        Ok(Form::new()
            .part("image", png_part(&request.image_png, "image.png")?)
            .part("mask", png_part(&request.mask_png, "mask.png")?)
            .text("prompt", request.prompt.clone())
            .text("n", request.variant_count.to_string())
            .text("size", request.size_param()))
    }

    async fn error_from_response(response: reqwest::Response) -> EditError {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorEnvelope>(&text) {
            Ok(envelope) => envelope.error.message,
            Err(_) if text.trim().is_empty() => format!("HTTP {status} with empty body"),
            Err(_) => text.chars().take(MAX_ERROR_BODY).collect(),
        };
        EditError::remote(status, message)
    }
}

#[async_trait]
impl EditService for HttpEditService {
    async fn submit(&self, request: &EditRequest) -> Result<EditResult> {
        let url = self.endpoint();
        debug!(
            url = %url,
            size = %request.size_param(),
            n = request.variant_count,
            "Submitting edit request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(Self::form(request)?)
            .send()
            .await
            .map_err(|e| EditError::network_error("submit edit request", &e))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: EditResponse = response.json().await.map_err(|e| {
            EditError::remote(200, format!("Malformed edit service response: {e}"))
        })?;

        let images: Vec<GeneratedImage> = body
            .data
            .into_iter()
            .filter_map(|image| {
                image.url.map(|url| GeneratedImage {
                    url,
                    revised_prompt: image.revised_prompt,
                })
            })
            .collect();
        if images.is_empty() {
            return Err(EditError::remote(
                200,
                "Edit service returned no generated images",
            ));
        }

        info!(count = images.len(), "Edit service returned images");
        Ok(EditResult {
            created: body
                .created
                .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0)),
            images,
        })
    }
}

/// Wraps a service with bounded, backed-off retries of retryable failures
#[derive(Debug, Clone)]
pub struct RetryingEditService<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: EditService> RetryingEditService<S> {
    #[must_use]
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[must_use]
    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: EditService> EditService for RetryingEditService<S> {
    async fn submit(&self, request: &EditRequest) -> Result<EditResult> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.submit(request).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.policy.backoff_for(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Edit submission failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }
}
