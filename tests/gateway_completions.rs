use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quizscore::gateway::completions::{CompletionProvider, OpenAiCompatAdapter};
use quizscore::gateway::{
    ApiCredential, Attribution, CompletionModel, CompletionRequest, EndpointConfig, GatewayConfig,
    NoopUsageSink, ProviderError, ProviderGateway,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn adapter(server: &MockServer) -> OpenAiCompatAdapter {
    let endpoint = EndpointConfig::new(server.uri()).request_timeout(Duration::from_secs(5));
    OpenAiCompatAdapter::new(&endpoint, &ApiCredential::none()).unwrap()
}

fn scoring_request(prompt: &str) -> CompletionRequest {
    CompletionRequest::scoring(
        CompletionModel::new("meta-llama/Llama-2-7b-hf"),
        prompt,
        Attribution::new("test"),
    )
}

fn echo_body() -> serde_json::Value {
    json!({
        "choices": [{
            "text": "Answer: Paris",
            "logprobs": {
                "tokens": ["Answer", ":", " Paris"],
                "token_logprobs": [null, -1.25, -0.5]
            },
            "finish_reason": "length"
        }],
        "usage": { "prompt_tokens": 3, "completion_tokens": 0 }
    })
}

#[tokio::test]
async fn completions_parses_echoed_logprobs_with_null_first_entry() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/completions"))
        .and(body_partial_json(json!({
            "model": "meta-llama/Llama-2-7b-hf",
            "prompt": "Answer: Paris",
            "echo": true,
            "max_tokens": 0,
            "logprobs": 1
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-request-id", "req-42")
                .set_body_json(echo_body()),
        )
        .mount(&server)
        .await;

    let resp = adapter(&server)
        .complete(&scoring_request("Answer: Paris"))
        .await
        .unwrap();

    assert_eq!(resp.token_count(), 3);
    assert_eq!(resp.token_logprobs(), vec![None, Some(-1.25), Some(-0.5)]);
    assert_eq!(resp.tokens[2].token, " Paris");
    assert_eq!(resp.prompt_tokens, Some(3));
    assert_eq!(resp.request_id.as_deref(), Some("req-42"));
}

#[tokio::test]
async fn completions_sends_bearer_only_when_credential_present() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(echo_body()))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = EndpointConfig::new(format!("{}/", server.uri()));
    let adapter = OpenAiCompatAdapter::new(&endpoint, &ApiCredential::bearer("sk-test")).unwrap();
    adapter.complete(&scoring_request("Answer: Paris")).await.unwrap();

    let anonymous = OpenAiCompatAdapter::new(&endpoint, &ApiCredential::none()).unwrap();
    // No matching mock without the header: wiremock answers 404.
    let err = anonymous
        .complete(&scoring_request("Answer: Paris"))
        .await
        .unwrap_err();
    assert!(err.is_rejection());
}

#[tokio::test]
async fn completions_maps_400_to_invalid_request_with_context() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/completions"))
        .respond_with(
            ResponseTemplate::new(400)
                .insert_header("x-request-id", "req-bad")
                .set_body_json(json!({
                    "error": {
                        "message": "The model `nope` does not exist.",
                        "code": "model_not_found"
                    }
                })),
        )
        .mount(&server)
        .await;

    let err = adapter(&server)
        .complete(&scoring_request("hi"))
        .await
        .unwrap_err();

    match &err {
        ProviderError::InvalidRequest { message, context } => {
            assert!(message.contains("does not exist"));
            let ctx = context.as_ref().unwrap();
            assert_eq!(ctx.http_status, Some(400));
            assert_eq!(ctx.provider_code.as_deref(), Some("model_not_found"));
            assert_eq!(ctx.request_id.as_deref(), Some("req-bad"));
        }
        other => panic!("expected InvalidRequest, got {other:?}"),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn completions_reads_flat_vllm_error_objects() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/completions"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "object": "error",
            "message": "The model `org/missing` does not exist.",
            "type": "NotFoundError",
            "code": 404
        })))
        .mount(&server)
        .await;

    let err = adapter(&server)
        .complete(&scoring_request("hi"))
        .await
        .unwrap_err();

    assert!(err.is_rejection());
    assert!(err.to_string().contains("org/missing"));
    assert_eq!(
        err.context().and_then(|c| c.provider_code.as_deref()),
        Some("404")
    );
}

#[tokio::test]
async fn completions_without_logprobs_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "text": "", "finish_reason": "length" }]
        })))
        .mount(&server)
        .await;

    let err = adapter(&server)
        .complete(&scoring_request("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidRequest { .. }));
}

#[tokio::test]
async fn completions_rejects_mismatched_token_arrays() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "logprobs": { "tokens": ["a", "b"], "token_logprobs": [null] },
                "finish_reason": "length"
            }]
        })))
        .mount(&server)
        .await;

    let err = adapter(&server)
        .complete(&scoring_request("a b"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Provider { retryable: false, .. }));
}

#[tokio::test]
async fn completions_invalid_json_is_a_provider_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let err = adapter(&server)
        .complete(&scoring_request("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Provider { .. }));
    assert!(!err.is_rejection());
}

#[tokio::test]
async fn completions_slow_response_is_a_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(echo_body())
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let endpoint = EndpointConfig::new(server.uri()).request_timeout(Duration::from_millis(200));
    let adapter = OpenAiCompatAdapter::new(&endpoint, &ApiCredential::none()).unwrap();

    let err = adapter
        .complete(&scoring_request("hi"))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.code(), "timeout");
}

#[tokio::test]
async fn completions_rejects_oversized_prompt_before_sending() {
    let server = MockServer::start().await;

    let prompt = "x".repeat(500_001);
    let err = adapter(&server)
        .complete(&scoring_request(&prompt))
        .await
        .unwrap_err();

    assert!(err.is_rejection());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[derive(Clone)]
struct FlipResponder {
    calls: Arc<AtomicUsize>,
}

impl Respond for FlipResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            ResponseTemplate::new(500).set_body_json(json!({
                "error": { "message": "worker crashed" }
            }))
        } else {
            ResponseTemplate::new(200).set_body_json(echo_body())
        }
    }
}

#[tokio::test]
async fn gateway_retries_server_error_once() {
    let server = MockServer::start().await;
    let calls = Arc::new(AtomicUsize::new(0));

    Mock::given(method("POST"))
        .and(path("/completions"))
        .respond_with(FlipResponder {
            calls: calls.clone(),
        })
        .mount(&server)
        .await;

    let gateway = ProviderGateway::with_config(
        adapter(&server),
        Arc::new(NoopUsageSink),
        GatewayConfig {
            max_retries: 1,
            retry_base_delay: Duration::from_millis(10),
        },
    );

    let resp = gateway.complete(scoring_request("Answer: Paris")).await.unwrap();
    assert_eq!(resp.token_count(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn gateway_does_not_retry_by_default() {
    let server = MockServer::start().await;
    let calls = Arc::new(AtomicUsize::new(0));

    Mock::given(method("POST"))
        .and(path("/completions"))
        .respond_with(FlipResponder {
            calls: calls.clone(),
        })
        .mount(&server)
        .await;

    let endpoint = EndpointConfig::new(server.uri());
    let gateway =
        ProviderGateway::connect(&endpoint, &ApiCredential::none(), Arc::new(NoopUsageSink))
            .unwrap();

    let err = gateway
        .complete(scoring_request("Answer: Paris"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Provider { retryable: true, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
