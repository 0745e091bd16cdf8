//! Generation request types and validation.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

/// Clip duration range (seconds) the hosted models are known to accept.
///
/// Values outside this range are still forwarded to providers unchanged;
/// the provider may reject them.
pub const SUPPORTED_DURATION_SECS: RangeInclusive<u32> = 2..=10;

/// Errors for malformed generation requests.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Empty prompt")]
    EmptyPrompt,

    #[error("Video {dimension} must be greater than 0")]
    ZeroDimension {
        /// Which dimension was zero ("width" or "height").
        dimension: &'static str,
    },

    #[error("Duration must be greater than 0 seconds")]
    ZeroDuration,

    #[error("Source image not found: {0}")]
    ImageNotFound(PathBuf),
}

/// A single user-initiated video generation request.
///
/// Immutable once built. The source image is referenced by path only; its
/// bytes are read by the provider transport at call time. The seed policy is
/// randomize-unless-overridden: when `seed` is `None`, payloads ask the
/// provider to randomize.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    prompt: String,
    source_image: PathBuf,
    width: u32,
    height: u32,
    duration_secs: u32,
    seed: Option<u64>,
}

impl GenerationRequest {
    /// Build a request, validating the prompt and dimensions.
    ///
    /// The image path is not checked here; existence is verified when the
    /// provider payload is built.
    ///
    /// # Errors
    ///
    /// Returns `RequestError::EmptyPrompt` for an empty or whitespace-only
    /// prompt, `RequestError::ZeroDimension` for a zero width or height, and
    /// `RequestError::ZeroDuration` for a zero duration.
    pub fn new(
        prompt: impl Into<String>,
        source_image: impl Into<PathBuf>,
        width: u32,
        height: u32,
        duration_secs: u32,
    ) -> Result<Self, RequestError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(RequestError::EmptyPrompt);
        }
        if width == 0 {
            return Err(RequestError::ZeroDimension { dimension: "width" });
        }
        if height == 0 {
            return Err(RequestError::ZeroDimension {
                dimension: "height",
            });
        }
        if duration_secs == 0 {
            return Err(RequestError::ZeroDuration);
        }

        Ok(Self {
            prompt,
            source_image: source_image.into(),
            width,
            height,
            duration_secs,
            seed: None,
        })
    }

    /// Pin the sampling seed instead of letting the provider randomize.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn source_image(&self) -> &Path {
        &self.source_image
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Whether the requested duration falls in the range providers accept.
    pub fn duration_in_supported_range(&self) -> bool {
        SUPPORTED_DURATION_SECS.contains(&self.duration_secs)
    }
}
