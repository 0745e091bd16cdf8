//! Video generation pipeline.
//!
//! A generation request (source image + prompt) is shaped per provider,
//! sent to hosted model endpoints in fallback order, and the first reply
//! that normalizes to a fetchable video locator is materialized into a
//! local file.

mod materialize;
mod normalize;
mod orchestrator;
mod provider;
mod request;
mod retry;

pub use materialize::{MaterializeError, MaterializedAsset, Materializer};
pub use normalize::{extract_locator, LOCATOR_KEYS};
pub use orchestrator::{
    AttemptError, AttemptPhase, AttemptRecord, CancelToken, FailureReason, GenerationOutcome,
    LogProgress, NullProgress, Orchestrator, OrchestratorState, ProgressSink, ProviderSelection,
    ProviderStats, Sleeper, TokioSleeper, DEFAULT_FAILURE_THRESHOLD,
};
pub use provider::{
    build_payload, is_busy_reply, CallError, HttpTransport, ProviderDescriptor, ProviderPayload,
    ProviderTransport, RequestShape,
};
pub use request::{GenerationRequest, RequestError, SUPPORTED_DURATION_SECS};
pub use retry::{
    calculate_backoff, parse_retry_after, RetryPolicy, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX,
    DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_ATTEMPTS,
};
