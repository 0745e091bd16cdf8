//! Mock HTTP tests for the provider transport.
//!
//! These cover request formatting (JSON payload, image embedding, auth
//! header) and failure classification (rate limit, busy, timeout, unknown).

use std::time::Duration;

use base64::Engine;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use video_forge::generation::{
    build_payload, CallError, GenerationRequest, HttpTransport, ProviderDescriptor,
    ProviderTransport, RequestShape,
};

const IMAGE_BYTES: &[u8] = b"fake-png-bytes";

struct Fixture {
    _dir: TempDir,
    request: GenerationRequest,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("source.png");
        std::fs::write(&image, IMAGE_BYTES).unwrap();
        let request = GenerationRequest::new("a calm lake", &image, 704, 512, 2).unwrap();
        Self { _dir: dir, request }
    }
}

fn descriptor(server: &MockServer, shape: RequestShape) -> ProviderDescriptor {
    ProviderDescriptor {
        id: "mock-provider".to_string(),
        display_name: "Mock Provider".to_string(),
        endpoint: format!("{}/api/generate", server.uri()),
        shape,
        api_key_env: None,
    }
}

fn transport() -> HttpTransport {
    HttpTransport::new(Duration::from_secs(5)).expect("Failed to create transport")
}

#[tokio::test]
async fn test_invoke_posts_image_conditioned_payload() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(header("Content-Type", "application/json"))
        .and(body_partial_json(json!({
            "prompt": "a calm lake",
            "mode": "image-to-video",
            "width": 704,
            "height": 512,
            "duration": 2,
            "frames_to_use": 9,
            "guidance_scale": 1.0,
            "improve_texture": true,
            "randomize_seed": true
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"video": "/tmp/out.mp4"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let fixture = Fixture::new();
    let provider = descriptor(&server, RequestShape::ImageConditioned);
    let payload = build_payload(&fixture.request, &provider).unwrap();

    let reply = transport().invoke(&provider, &payload).await.unwrap();
    assert_eq!(reply, json!({"video": "/tmp/out.mp4"}));
}

#[tokio::test]
async fn test_invoke_embeds_image_base64_in_slots() {
    let server = MockServer::start().await;
    let encoded = base64::engine::general_purpose::STANDARD.encode(IMAGE_BYTES);

    // Frame-pair shape fills both slots with the same image.
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_string_contains(format!("\"start_image\":\"{encoded}\"")))
        .and(body_string_contains(format!("\"end_image\":\"{encoded}\"")))
        .and(body_partial_json(json!({
            "num_inference_steps": 8
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"video": "/tmp/out.mp4"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let fixture = Fixture::new();
    let provider = descriptor(&server, RequestShape::FramePair);
    let payload = build_payload(&fixture.request, &provider).unwrap();

    let result = transport().invoke(&provider, &payload).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_invoke_sends_bearer_token_from_env() {
    let server = MockServer::start().await;
    std::env::set_var("VIDEO_FORGE_TEST_TOKEN", "secret-token");

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(header("Authorization", "Bearer secret-token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"video": "/tmp/out.mp4"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let fixture = Fixture::new();
    let mut provider = descriptor(&server, RequestShape::ImageConditioned);
    provider.api_key_env = Some("VIDEO_FORGE_TEST_TOKEN".to_string());
    let payload = build_payload(&fixture.request, &provider).unwrap();

    let result = transport().invoke(&provider, &payload).await;
    assert!(result.is_ok());

    std::env::remove_var("VIDEO_FORGE_TEST_TOKEN");
}

#[tokio::test]
async fn test_429_classified_as_rate_limited_with_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "30")
                .set_body_string("Too many requests"),
        )
        .mount(&server)
        .await;

    let fixture = Fixture::new();
    let provider = descriptor(&server, RequestShape::ImageConditioned);
    let payload = build_payload(&fixture.request, &provider).unwrap();

    match transport().invoke(&provider, &payload).await {
        Err(CallError::RateLimited {
            message,
            retry_after_secs,
        }) => {
            assert_eq!(retry_after_secs, Some(30));
            assert!(message.contains("Too many requests"));
        }
        other => panic!("Expected rate limit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_503_classified_as_busy() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .mount(&server)
        .await;

    let fixture = Fixture::new();
    let provider = descriptor(&server, RequestShape::ImageConditioned);
    let payload = build_payload(&fixture.request, &provider).unwrap();

    assert!(matches!(
        transport().invoke(&provider, &payload).await,
        Err(CallError::Busy(_))
    ));
}

#[tokio::test]
async fn test_busy_keywords_in_error_body_classified_as_busy() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("The model queue is full, try later"),
        )
        .mount(&server)
        .await;

    let fixture = Fixture::new();
    let provider = descriptor(&server, RequestShape::ImageConditioned);
    let payload = build_payload(&fixture.request, &provider).unwrap();

    match transport().invoke(&provider, &payload).await {
        Err(CallError::Busy(message)) => assert!(message.contains("queue")),
        other => panic!("Expected busy classification, got {:?}", other),
    }
}

#[tokio::test]
async fn test_other_errors_classified_as_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal server error"))
        .mount(&server)
        .await;

    let fixture = Fixture::new();
    let provider = descriptor(&server, RequestShape::ImageConditioned);
    let payload = build_payload(&fixture.request, &provider).unwrap();

    match transport().invoke(&provider, &payload).await {
        Err(CallError::Unknown(message)) => {
            assert!(message.contains("500"));
            assert!(message.contains("internal server error"));
        }
        other => panic!("Expected unknown classification, got {:?}", other),
    }
}

#[tokio::test]
async fn test_slow_provider_classified_as_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"video": "/tmp/out.mp4"}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let fixture = Fixture::new();
    let provider = descriptor(&server, RequestShape::ImageConditioned);
    let payload = build_payload(&fixture.request, &provider).unwrap();

    let quick = HttpTransport::new(Duration::from_millis(200)).unwrap();
    assert!(matches!(
        quick.invoke(&provider, &payload).await,
        Err(CallError::Timeout)
    ));
}

#[tokio::test]
async fn test_non_json_reply_classified_as_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let fixture = Fixture::new();
    let provider = descriptor(&server, RequestShape::ImageConditioned);
    let payload = build_payload(&fixture.request, &provider).unwrap();

    assert!(matches!(
        transport().invoke(&provider, &payload).await,
        Err(CallError::Unknown(_))
    ));
}

#[tokio::test]
async fn test_unreachable_endpoint_classified_as_unknown() {
    let fixture = Fixture::new();
    let provider = ProviderDescriptor {
        id: "dead".to_string(),
        display_name: "Dead".to_string(),
        endpoint: "http://127.0.0.1:1/api/generate".to_string(),
        shape: RequestShape::ImageConditioned,
        api_key_env: None,
    };
    let payload = build_payload(&fixture.request, &provider).unwrap();

    assert!(matches!(
        transport().invoke(&provider, &payload).await,
        Err(CallError::Unknown(_))
    ));
}
