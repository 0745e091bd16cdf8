//! Provider fallback orchestration.
//!
//! One generation call walks an ordered provider list: shape the payload,
//! invoke the provider, extract a locator from the reply, materialize it
//! locally. Classified failures are retried against the same provider up
//! to a bound, then the next provider is tried; the first materialized
//! video wins. The full attempt history is returned either way.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::materialize::{MaterializedAsset, Materializer};
use super::normalize::extract_locator;
use super::provider::{build_payload, CallError, ProviderDescriptor, ProviderTransport};
use super::request::GenerationRequest;
use super::retry::RetryPolicy;

/// Consecutive failures at which adaptive selection demotes a provider.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Phases of a single provider attempt, reported through `ProgressSink`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    PayloadBuilt,
    CallSent,
    CallReturned,
    Normalizing,
    Materializing,
    Done,
    Failed,
}

/// Receives phase transitions so a UI layer can render progress without
/// polling orchestrator internals.
pub trait ProgressSink: Send + Sync {
    fn on_phase(&self, provider_id: &str, phase: AttemptPhase);
}

/// Discards all progress events.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn on_phase(&self, _provider_id: &str, _phase: AttemptPhase) {}
}

/// Logs phase transitions; the default when no UI layer is attached.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_phase(&self, provider_id: &str, phase: AttemptPhase) {
        log::info!("[{}] {:?}", provider_id, phase);
    }
}

/// Caller-side abort signal, checked at phase boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the in-flight call returns `Cancelled` at its
    /// next phase boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Backoff sleep seam; injected so tests can observe exact delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A classified failure from one provider attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    #[error("Provider busy: {0}")]
    Busy(String),

    #[error("Provider call timed out")]
    Timeout,

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Provider error: {0}")]
    Unknown(String),

    #[error("No video locator in provider reply")]
    Normalization,

    #[error("Could not materialize video: {0}")]
    Materialization(String),
}

impl AttemptError {
    /// Whether another attempt against the same provider can help.
    ///
    /// Everything except materialization qualifies: the provider may stop
    /// being busy or reply sanely next time, but a locator it already
    /// produced will not become fetchable by asking again.
    fn retryable_same_provider(&self) -> bool {
        !matches!(self, AttemptError::Materialization(_))
    }
}

impl From<CallError> for AttemptError {
    fn from(error: CallError) -> Self {
        match error {
            CallError::Busy(message) => AttemptError::Busy(message),
            CallError::Timeout => AttemptError::Timeout,
            CallError::RateLimited { message, .. } => AttemptError::RateLimited(message),
            CallError::Unknown(message) => AttemptError::Unknown(message),
        }
    }
}

/// One failed attempt in the generation history.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub provider_id: String,
    pub error: AttemptError,
}

/// Why a generation call failed terminally.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FailureReason {
    /// Malformed input; surfaced immediately, never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Every provider failed or ran out of attempts.
    #[error("All providers exhausted; last error: {last_error}")]
    AllProvidersExhausted { last_error: AttemptError },

    /// The caller's cancel token fired.
    #[error("Generation cancelled")]
    Cancelled,
}

/// Terminal value of a generation call.
#[derive(Debug)]
pub enum GenerationOutcome {
    Success {
        asset: MaterializedAsset,
        provider_id: String,
        attempts: Vec<AttemptRecord>,
    },
    Failure {
        reason: FailureReason,
        attempts: Vec<AttemptRecord>,
    },
}

impl GenerationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, GenerationOutcome::Success { .. })
    }

    /// Provider ids attempted so far, one entry per failed attempt, in order.
    pub fn attempted_providers(&self) -> Vec<&str> {
        let attempts = match self {
            GenerationOutcome::Success { attempts, .. } => attempts,
            GenerationOutcome::Failure { attempts, .. } => attempts,
        };
        attempts.iter().map(|a| a.provider_id.as_str()).collect()
    }
}

/// Per-provider counters for adaptive selection.
#[derive(Debug, Clone, Default)]
pub struct ProviderStats {
    pub use_count: u64,
    pub last_used_tick: u64,
    pub consecutive_failures: u32,
}

/// Caller-owned selection state carried between generation calls.
///
/// Time is a monotonic tick bumped on every provider use, which keeps
/// "longest unused" ordering deterministic.
#[derive(Debug, Default)]
pub struct OrchestratorState {
    stats: HashMap<String, ProviderStats>,
    tick: u64,
}

impl OrchestratorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats_for(&self, provider_id: &str) -> Option<&ProviderStats> {
        self.stats.get(provider_id)
    }

    fn touch(&mut self, provider_id: &str) {
        self.tick += 1;
        let entry = self.stats.entry(provider_id.to_string()).or_default();
        entry.use_count += 1;
        entry.last_used_tick = self.tick;
    }

    fn record_failure(&mut self, provider_id: &str) {
        let entry = self.stats.entry(provider_id.to_string()).or_default();
        entry.consecutive_failures += 1;
    }

    fn record_success(&mut self, provider_id: &str) {
        let entry = self.stats.entry(provider_id.to_string()).or_default();
        entry.consecutive_failures = 0;
    }

    fn reset_failures(&mut self) {
        for stats in self.stats.values_mut() {
            stats.consecutive_failures = 0;
        }
    }

    fn failures_for(&self, provider_id: &str) -> u32 {
        self.stats
            .get(provider_id)
            .map(|s| s.consecutive_failures)
            .unwrap_or(0)
    }

    /// Order providers for the next call.
    ///
    /// Providers under the failure threshold come first, sorted by fewest
    /// consecutive failures then longest unused; demoted providers follow
    /// in static order. If every provider is at or above the threshold,
    /// all counters reset and static order applies.
    fn order<'a>(
        &mut self,
        providers: &'a [ProviderDescriptor],
        threshold: u32,
    ) -> Vec<&'a ProviderDescriptor> {
        let any_healthy = providers
            .iter()
            .any(|p| self.failures_for(&p.id) < threshold);
        if !any_healthy {
            self.reset_failures();
            return providers.iter().collect();
        }

        let mut healthy: Vec<&ProviderDescriptor> = providers
            .iter()
            .filter(|p| self.failures_for(&p.id) < threshold)
            .collect();
        healthy.sort_by_key(|p| {
            let stats = self.stats.get(&p.id);
            (
                stats.map(|s| s.consecutive_failures).unwrap_or(0),
                stats.map(|s| s.last_used_tick).unwrap_or(0),
            )
        });
        healthy.extend(
            providers
                .iter()
                .filter(|p| self.failures_for(&p.id) >= threshold),
        );
        healthy
    }
}

/// How the provider order for a call is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderSelection {
    /// Configured list order.
    #[default]
    Static,
    /// Score-based ordering from `OrchestratorState` counters.
    Adaptive,
}

/// Walks providers in order until one yields a materialized video.
pub struct Orchestrator {
    transport: Arc<dyn ProviderTransport>,
    materializer: Materializer,
    retry: RetryPolicy,
    selection: ProviderSelection,
    failure_threshold: u32,
    progress: Arc<dyn ProgressSink>,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn ProviderTransport>, materializer: Materializer) -> Self {
        Self {
            transport,
            materializer,
            retry: RetryPolicy::default(),
            selection: ProviderSelection::default(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            progress: Arc::new(LogProgress),
            sleeper: Arc::new(TokioSleeper),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_selection(mut self, selection: ProviderSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Generate a video for `request`, trying `providers` in order and
    /// writing the result to `dest`.
    ///
    /// Sequential by design: providers are rate-sensitive and only one
    /// video is needed, so there is no racing. The call blocks for as long
    /// as the winning provider takes; phase callbacks keep the caller
    /// informed in the meantime.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        providers: &[ProviderDescriptor],
        dest: &Path,
        state: &mut OrchestratorState,
    ) -> GenerationOutcome {
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut last_error: Option<AttemptError> = None;

        let ordered: Vec<&ProviderDescriptor> = match self.selection {
            ProviderSelection::Static => providers.iter().collect(),
            ProviderSelection::Adaptive => state.order(providers, self.failure_threshold),
        };
        let provider_count = ordered.len();

        for (position, provider) in ordered.into_iter().enumerate() {
            let is_last_provider = position + 1 == provider_count;

            for attempt in 0..self.retry.max_attempts.max(1) {
                if self.cancel.is_cancelled() {
                    return self.fail(FailureReason::Cancelled, attempts);
                }

                let payload = match build_payload(request, provider) {
                    Ok(payload) => payload,
                    Err(e) => {
                        log::error!("Rejecting request: {}", e);
                        return self.fail(FailureReason::InvalidRequest(e.to_string()), attempts);
                    }
                };
                self.progress.on_phase(&provider.id, AttemptPhase::PayloadBuilt);
                state.touch(&provider.id);

                self.progress.on_phase(&provider.id, AttemptPhase::CallSent);
                let call_result = self.transport.invoke(provider, &payload).await;
                self.progress.on_phase(&provider.id, AttemptPhase::CallReturned);

                let (error, retry_after_secs) = match call_result {
                    Ok(reply) => {
                        self.progress.on_phase(&provider.id, AttemptPhase::Normalizing);
                        match extract_locator(&reply) {
                            Some(locator) => {
                                self.progress
                                    .on_phase(&provider.id, AttemptPhase::Materializing);
                                match self.materializer.materialize(&locator, dest).await {
                                    Ok(asset) => {
                                        state.record_success(&provider.id);
                                        self.progress.on_phase(&provider.id, AttemptPhase::Done);
                                        log::info!(
                                            "Generated video via {} at {}",
                                            provider.id,
                                            dest.display()
                                        );
                                        return GenerationOutcome::Success {
                                            asset,
                                            provider_id: provider.id.clone(),
                                            attempts,
                                        };
                                    }
                                    Err(e) => {
                                        log::warn!(
                                            "{}: materialization of '{}' failed: {}",
                                            provider.id,
                                            locator,
                                            e
                                        );
                                        (AttemptError::Materialization(e.to_string()), None)
                                    }
                                }
                            }
                            None => {
                                log::warn!("{}: reply contained no video locator", provider.id);
                                (AttemptError::Normalization, None)
                            }
                        }
                    }
                    Err(call_error) => {
                        log::warn!("{}: call failed: {}", provider.id, call_error);
                        let retry_after = match &call_error {
                            CallError::RateLimited {
                                retry_after_secs, ..
                            } => *retry_after_secs,
                            _ => None,
                        };
                        (AttemptError::from(call_error), retry_after)
                    }
                };

                let retryable = error.retryable_same_provider();
                attempts.push(AttemptRecord {
                    provider_id: provider.id.clone(),
                    error: error.clone(),
                });
                state.record_failure(&provider.id);
                last_error = Some(error);

                let retry_same = retryable && attempt + 1 < self.retry.max_attempts.max(1);
                let more_ahead = retry_same || !is_last_provider;

                if retryable && more_ahead {
                    if self.cancel.is_cancelled() {
                        return self.fail(FailureReason::Cancelled, attempts);
                    }
                    let delay = self.retry.delay_for(attempt, retry_after_secs);
                    log::info!(
                        "Backing off {:?} before {} (attempt {}/{})",
                        delay,
                        if retry_same {
                            "retrying"
                        } else {
                            "the next provider"
                        },
                        attempt + 1,
                        self.retry.max_attempts.max(1)
                    );
                    self.sleeper.sleep(delay).await;
                    if self.cancel.is_cancelled() {
                        return self.fail(FailureReason::Cancelled, attempts);
                    }
                }

                if !retry_same {
                    break;
                }
            }
        }

        let reason = match last_error {
            Some(last_error) => FailureReason::AllProvidersExhausted { last_error },
            None => FailureReason::InvalidRequest("No providers configured".to_string()),
        };
        self.fail(reason, attempts)
    }

    fn fail(&self, reason: FailureReason, attempts: Vec<AttemptRecord>) -> GenerationOutcome {
        let provider_id = attempts
            .last()
            .map(|a| a.provider_id.as_str())
            .unwrap_or("-");
        self.progress.on_phase(provider_id, AttemptPhase::Failed);
        log::warn!("Generation failed: {}", reason);
        GenerationOutcome::Failure { reason, attempts }
    }
}
