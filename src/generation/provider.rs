//! Provider descriptors, payload shaping, and the remote call transport.
//!
//! Each provider endpoint accepts one of a small set of request shapes.
//! Adding a provider is a config/data edit (new descriptor, existing
//! shape); new shapes extend the `RequestShape` enum and `build_payload`.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::request::{GenerationRequest, RequestError};
use super::retry::parse_retry_after;

/// Guidance scale forwarded with image-conditioned requests.
const IMAGE_CONDITIONED_GUIDANCE_SCALE: f64 = 1.0;

/// Conditioning frame count for image-conditioned requests.
const IMAGE_CONDITIONED_FRAMES_TO_USE: u32 = 9;

/// Negative prompt forwarded with every frame-pair request.
const FRAME_PAIR_NEGATIVE_PROMPT: &str = "blurry, low quality, distorted, watermark";

/// Inference step count for frame-pair requests; these endpoints run few
/// steps by design.
const FRAME_PAIR_INFERENCE_STEPS: u32 = 8;

/// Seed sent when the caller did not pin one; paired with
/// `randomize_seed = true` so the provider picks its own.
const DEFAULT_SEED: u64 = 42;

/// Default connection timeout for provider calls.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Keywords that indicate the provider is busy or its queue is full.
const BUSY_KEYWORDS: &[&str] = &["busy", "queue", "overloaded", "at capacity"];

/// HTTP status code for rate limiting.
const HTTP_STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// HTTP status code for an unavailable (busy) service.
const HTTP_STATUS_SERVICE_UNAVAILABLE: u16 = 503;

/// The request shape a provider endpoint expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestShape {
    /// Single conditioning image plus prompt ("image-to-video" mode).
    ImageConditioned,
    /// First/last frame conditioned; both slots get the same image when
    /// only one source image is available.
    FramePair,
}

/// A hosted video-generation model endpoint.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    /// Opaque identifier used in config, logs, and attempt history.
    pub id: String,
    /// Human-readable name for UI layers.
    pub display_name: String,
    /// Endpoint URL the payload is POSTed to.
    pub endpoint: String,
    /// Which payload shape the endpoint expects.
    pub shape: RequestShape,
    /// Environment variable holding an API token, if the endpoint wants one.
    pub api_key_env: Option<String>,
}

/// A shaped request, ready for the transport.
///
/// The image stays a path here; the transport reads and embeds its bytes
/// into `image_slots` at call time.
#[derive(Debug, Clone)]
pub struct ProviderPayload {
    pub image: PathBuf,
    pub image_slots: &'static [&'static str],
    pub body: Value,
}

/// Shape the provider-specific payload for a request.
///
/// Pure transform apart from the image existence check; fails with
/// `RequestError::ImageNotFound` if the source image is gone by build time.
pub fn build_payload(
    request: &GenerationRequest,
    provider: &ProviderDescriptor,
) -> Result<ProviderPayload, RequestError> {
    if !request.source_image().is_file() {
        return Err(RequestError::ImageNotFound(
            request.source_image().to_path_buf(),
        ));
    }
    if !request.duration_in_supported_range() {
        log::warn!(
            "Duration {}s is outside the {}-{}s range providers typically accept",
            request.duration_secs(),
            super::request::SUPPORTED_DURATION_SECS.start(),
            super::request::SUPPORTED_DURATION_SECS.end(),
        );
    }

    let seed = request.seed().unwrap_or(DEFAULT_SEED);
    let randomize_seed = request.seed().is_none();

    let (image_slots, body): (&'static [&'static str], Value) = match provider.shape {
        RequestShape::ImageConditioned => (
            &["input_image"],
            json!({
                "prompt": request.prompt(),
                "mode": "image-to-video",
                "width": request.width(),
                "height": request.height(),
                "duration": request.duration_secs(),
                "frames_to_use": IMAGE_CONDITIONED_FRAMES_TO_USE,
                "guidance_scale": IMAGE_CONDITIONED_GUIDANCE_SCALE,
                "improve_texture": true,
                "seed": seed,
                "randomize_seed": randomize_seed,
            }),
        ),
        RequestShape::FramePair => (
            &["start_image", "end_image"],
            json!({
                "prompt": request.prompt(),
                "negative_prompt": FRAME_PAIR_NEGATIVE_PROMPT,
                "duration": request.duration_secs(),
                "num_inference_steps": FRAME_PAIR_INFERENCE_STEPS,
                "seed": seed,
                "randomize_seed": randomize_seed,
            }),
        ),
    };

    Ok(ProviderPayload {
        image: request.source_image().to_path_buf(),
        image_slots,
        body,
    })
}

/// A provider call failure, classified for retry decisions.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("Provider busy: {0}")]
    Busy(String),

    #[error("Provider call timed out")]
    Timeout,

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        /// Retry-After header value in seconds, if provided.
        retry_after_secs: Option<u64>,
    },

    #[error("Provider error: {0}")]
    Unknown(String),
}

/// The remote call seam; the orchestrator only sees this trait.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Invoke the provider and return its raw reply.
    async fn invoke(
        &self,
        provider: &ProviderDescriptor,
        payload: &ProviderPayload,
    ) -> Result<Value, CallError>;
}

/// HTTP transport: POSTs the payload JSON with the image base64-embedded
/// into the shape's slots.
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with the given per-call timeout.
    pub fn new(call_timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(call_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn invoke(
        &self,
        provider: &ProviderDescriptor,
        payload: &ProviderPayload,
    ) -> Result<Value, CallError> {
        // The image is read here, not at payload build time.
        let image_bytes = tokio::fs::read(&payload.image)
            .await
            .map_err(|e| CallError::Unknown(format!("Failed to read source image: {e}")))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&image_bytes);

        let mut body = payload.body.clone();
        if let Value::Object(map) = &mut body {
            for slot in payload.image_slots {
                map.insert((*slot).to_string(), Value::String(encoded.clone()));
            }
        }

        let mut request = self
            .http_client
            .post(&provider.endpoint)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(env_name) = &provider.api_key_env {
            if let Ok(token) = std::env::var(env_name) {
                request = request.header("Authorization", format!("Bearer {token}"));
            }
        }

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();

        if !status.is_success() {
            if status.as_u16() == HTTP_STATUS_TOO_MANY_REQUESTS {
                let retry_after_secs = parse_retry_after(&response);
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Rate limit exceeded".to_string());
                log::warn!(
                    "{} rate limited us. Retry-After: {:?} seconds",
                    provider.id,
                    retry_after_secs
                );
                return Err(CallError::RateLimited {
                    message,
                    retry_after_secs,
                });
            }

            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            if status.as_u16() == HTTP_STATUS_SERVICE_UNAVAILABLE || is_busy_reply(&message) {
                return Err(CallError::Busy(message));
            }
            return Err(CallError::Unknown(format!(
                "Provider call failed with status {status}: {message}"
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| CallError::Unknown(format!("Provider reply was not JSON: {e}")))
    }
}

/// Check if an error body indicates the provider is busy rather than broken.
pub fn is_busy_reply(text: &str) -> bool {
    let lower = text.to_lowercase();
    BUSY_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

fn classify_transport_error(error: reqwest::Error) -> CallError {
    if error.is_timeout() {
        CallError::Timeout
    } else {
        CallError::Unknown(error.to_string())
    }
}
