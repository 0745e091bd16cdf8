//! Configuration file handling for video-forge.
//!
//! Loads configuration from `~/.config/video-forge/config.toml` or a custom
//! path. Every section and field has a default, so a missing file or a
//! partial file both work; an unparseable file is an error.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::generation::{
    ProviderDescriptor, ProviderSelection, RequestShape, RetryPolicy, DEFAULT_BACKOFF_BASE,
    DEFAULT_BACKOFF_MAX, DEFAULT_CALL_TIMEOUT, DEFAULT_FAILURE_THRESHOLD, DEFAULT_MAX_ATTEMPTS,
};

/// Configuration file structure for video-forge.
/// Loaded from ~/.config/video-forge/config.toml (or custom path via --config).
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub assets: AssetsSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub providers: Vec<ProviderSection>,
}

#[derive(Debug, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_provider: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts_per_provider: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts_per_provider.max(1),
            backoff_base: Duration::from_secs(self.backoff_base_secs),
            backoff_max: Duration::from_secs(self.backoff_max_secs),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Deserialize)]
pub struct AssetsSection {
    /// Gallery directory; platform data dir when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Reuse-cache directory; platform cache dir when unset.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_max_cache_mb")]
    pub max_cache_mb: u64,
}

impl Default for AssetsSection {
    fn default() -> Self {
        Self {
            dir: None,
            cache_dir: None,
            max_cache_mb: default_max_cache_mb(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default)]
    pub selection: ProviderSelection,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            selection: ProviderSelection::default(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSection {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub endpoint: String,
    pub shape: RequestShape,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl ProviderSection {
    pub fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            id: self.id.clone(),
            display_name: self.display_name.clone().unwrap_or_else(|| self.id.clone()),
            endpoint: self.endpoint.clone(),
            shape: self.shape,
            api_key_env: self.api_key_env.clone(),
        }
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_base_secs() -> u64 {
    DEFAULT_BACKOFF_BASE.as_secs()
}

fn default_backoff_max_secs() -> u64 {
    DEFAULT_BACKOFF_MAX.as_secs()
}

fn default_call_timeout_secs() -> u64 {
    DEFAULT_CALL_TIMEOUT.as_secs()
}

fn default_max_cache_mb() -> u64 {
    500
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
                path: path.clone(),
                source: e,
            })?;
            let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.clone(),
                source: e,
            })?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Provider descriptors in fallback order; the built-in table when the
    /// config names none.
    pub fn providers(&self) -> Vec<ProviderDescriptor> {
        if self.providers.is_empty() {
            default_providers()
        } else {
            self.providers.iter().map(|p| p.descriptor()).collect()
        }
    }
}

/// Built-in provider table, ordered by preference.
pub fn default_providers() -> Vec<ProviderDescriptor> {
    vec![
        ProviderDescriptor {
            id: "ltx-video".to_string(),
            display_name: "LTX Video (quality)".to_string(),
            endpoint: "https://lightricks-ltx-video-distilled.hf.space/api/image-to-video"
                .to_string(),
            shape: RequestShape::ImageConditioned,
            api_key_env: Some("HF_TOKEN".to_string()),
        },
        ProviderDescriptor {
            id: "stable-video-diffusion".to_string(),
            display_name: "Stable Video Diffusion".to_string(),
            endpoint: "https://multimodalart-stable-video-diffusion.hf.space/api/predict"
                .to_string(),
            shape: RequestShape::ImageConditioned,
            api_key_env: Some("HF_TOKEN".to_string()),
        },
        ProviderDescriptor {
            id: "wan-flf2v".to_string(),
            display_name: "Wan First/Last Frame".to_string(),
            endpoint: "https://wan-ai-wan2-1-flf2v-14b-720p.hf.space/api/generate".to_string(),
            shape: RequestShape::FramePair,
            api_key_env: Some("HF_TOKEN".to_string()),
        },
    ]
}

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError { path, source } => {
                write!(
                    f,
                    "Failed to read config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::ParseError { path, source } => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    source
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
        }
    }
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("video-forge").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/video-forge/config.toml")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load(Some(Path::new("/tmp/video-forge-no-such-config.toml"))).unwrap();
        assert_eq!(config.retry.max_attempts_per_provider, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.orchestrator.selection, ProviderSelection::Static);
        assert!(config.providers.is_empty());
        assert_eq!(config.providers().len(), 3);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [retry]
            max_attempts_per_provider = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.retry.max_attempts_per_provider, 1);
        assert_eq!(
            config.retry.backoff_base_secs,
            DEFAULT_BACKOFF_BASE.as_secs()
        );
        assert_eq!(config.assets.max_cache_mb, 500);
    }

    #[test]
    fn test_provider_sections_override_defaults() {
        let config: Config = toml::from_str(
            r#"
            [orchestrator]
            selection = "adaptive"

            [[providers]]
            id = "local-mock"
            endpoint = "http://localhost:7860/api/generate"
            shape = "image_conditioned"

            [[providers]]
            id = "frame-pair-mock"
            display_name = "Frame Pair Mock"
            endpoint = "http://localhost:7861/api/generate"
            shape = "frame_pair"
            api_key_env = "MOCK_TOKEN"
            "#,
        )
        .unwrap();

        assert_eq!(config.orchestrator.selection, ProviderSelection::Adaptive);
        let providers = config.providers();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].id, "local-mock");
        // Display name falls back to the id.
        assert_eq!(providers[0].display_name, "local-mock");
        assert_eq!(providers[1].display_name, "Frame Pair Mock");
        assert_eq!(providers[1].shape, RequestShape::FramePair);
        assert_eq!(providers[1].api_key_env.as_deref(), Some("MOCK_TOKEN"));
    }

    #[test]
    fn test_retry_section_to_policy() {
        let section = RetrySection {
            max_attempts_per_provider: 0,
            backoff_base_secs: 5,
            backoff_max_secs: 30,
            call_timeout_secs: 60,
        };
        let policy = section.policy();
        // Zero attempts is clamped to one.
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.backoff_base, Duration::from_secs(5));
        assert_eq!(policy.backoff_max, Duration::from_secs(30));
        assert_eq!(section.call_timeout(), Duration::from_secs(60));
    }
}
