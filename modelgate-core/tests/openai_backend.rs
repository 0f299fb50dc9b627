//! OpenAI-compatible backend against a mock HTTP server.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use modelgate_core::backend::{
    BackendError, GenerationBackend, GenerationRequest, OpenAiBackend, OpenAiConfig,
};
use modelgate_core::config::load_builtin;
use modelgate_core::{Gateway, GatewayOutcome};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(params: BTreeMap<String, serde_json::Value>) -> GenerationRequest {
    GenerationRequest {
        request_id: Uuid::new_v4(),
        use_case: "support_ticket_classifier".to_string(),
        model: "gpt-4o-mini".to_string(),
        system_prompt: "Classify.".to_string(),
        user_input: "Contact PII_EMAIL_0123456789abcdef01234567".to_string(),
        params,
    }
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "model": "gpt-4o-mini-2024-07-18",
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }],
        "usage": { "prompt_tokens": 42, "completion_tokens": 7, "total_tokens": 49 }
    })
}

fn backend(server: &MockServer) -> OpenAiBackend {
    OpenAiBackend::new(OpenAiConfig::new(server.uri(), "test-key")).unwrap()
}

#[tokio::test]
async fn test_successful_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": "Classify." },
                { "role": "user", "content": "Contact PII_EMAIL_0123456789abcdef01234567" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("{\"ok\":true}")))
        .expect(1)
        .mount(&server)
        .await;

    let params = BTreeMap::from([("temperature".to_string(), json!(0.2))]);
    let result = backend(&server).generate(&request(params)).await.unwrap();

    assert_eq!(result.output, "{\"ok\":true}");
    assert_eq!(result.usage.prompt_tokens, 42);
    assert_eq!(result.usage.completion_tokens, 7);
    assert_eq!(result.model, "gpt-4o-mini-2024-07-18");
}

#[tokio::test]
async fn test_missing_usage_is_estimated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "one two three" } }]
        })))
        .mount(&server)
        .await;

    let result = backend(&server)
        .generate(&request(BTreeMap::new()))
        .await
        .unwrap();
    assert_eq!(result.usage.completion_tokens, 3);
    assert_eq!(result.usage.prompt_tokens, 3);
    assert_eq!(result.model, "gpt-4o-mini");
}

#[tokio::test]
async fn test_rate_limit_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = backend(&server)
        .generate(&request(BTreeMap::new()))
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = backend(&server)
        .generate(&request(BTreeMap::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Transient { .. }));
}

#[tokio::test]
async fn test_bad_request_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({ "error": { "message": "Unsupported parameter: 'temperature'" } })),
        )
        .mount(&server)
        .await;

    let err = backend(&server)
        .generate(&request(BTreeMap::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Terminal { .. }));
}

#[tokio::test]
async fn test_malformed_body_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = backend(&server)
        .generate(&request(BTreeMap::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Terminal { .. }));
}

#[tokio::test]
async fn test_empty_choices_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let err = backend(&server)
        .generate(&request(BTreeMap::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Terminal { .. }));
}

#[tokio::test]
async fn test_oversized_body_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 4096]))
        .mount(&server)
        .await;

    let mut config = OpenAiConfig::new(server.uri(), "test-key");
    config.max_response_size = 1024;
    let err = OpenAiBackend::new(config)
        .unwrap()
        .generate(&request(BTreeMap::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Terminal { .. }));
}

#[tokio::test]
async fn test_client_timeout_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("{}"))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let mut config = OpenAiConfig::new(server.uri(), "test-key");
    config.timeout = Duration::from_millis(100);
    let err = OpenAiBackend::new(config)
        .unwrap()
        .generate(&request(BTreeMap::new()))
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_gateway_over_http_backend() {
    let server = MockServer::start().await;
    let answer = json!({
        "category": "account_support",
        "confidence": 0.93,
        "reasoning": "password reset"
    });
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(&answer.to_string())))
        .expect(1)
        .mount(&server)
        .await;

    let (catalog, _) = load_builtin().unwrap();
    let gateway = Gateway::new(catalog, Arc::new(backend(&server)));

    let response = gateway
        .process(
            "support_ticket_classifier",
            "I forgot my password, mail me at john@example.com",
        )
        .await;

    let GatewayOutcome::Accepted { value } = &response.outcome else {
        panic!("expected acceptance, got {:?}", response.outcome);
    };
    assert_eq!(value["category"], "account_support");
    // 42 prompt + 7 completion tokens at gpt-4o-mini prices
    let expected = 42.0 / 1000.0 * 0.00015 + 7.0 / 1000.0 * 0.0006;
    assert!((response.cost - expected).abs() < 1e-12);

    let received = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&received[0].body);
    assert!(!body.contains("john@example.com"));
    assert!(body.contains("PII_EMAIL_"));
}
