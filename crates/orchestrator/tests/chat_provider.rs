use codeloop_core::OrchestrationState;
use orchestrator::{
    ChatCompletionProvider, ConvergenceConfig, ConvergenceOrchestrator, FallbackProvider,
    ProviderConfig, ProviderError, RepairRequest, SynthesisProvider,
};
use sandbox::testing::ScriptedLauncher;
use sandbox::{ExecutionSession, RuntimeManager, SessionConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn completion(content: &str) -> Value {
    json!({
        "id": "gen-test",
        "model": "test/model",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

fn candidate_reply(code: &str, tests: &str) -> String {
    json!({"code": code, "tests": tests, "explanation": "test reply"}).to_string()
}

fn provider(server: &MockServer, model: &str) -> ChatCompletionProvider {
    ChatCompletionProvider::new(
        ProviderConfig::default()
            .with_base_url(server.uri())
            .with_api_key("test-key")
            .with_model(model),
    )
    .unwrap()
}

#[tokio::test]
async fn test_synthesize_parses_candidate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"model": "test/model"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(&format!(
            "```json\n{}\n```",
            candidate_reply("def add(a, b):\n    return a + b\n", "assert add(2, 3) == 5")
        ))))
        .expect(1)
        .mount(&server)
        .await;

    let candidate = provider(&server, "test/model")
        .synthesize("Add two numbers")
        .await
        .unwrap();

    assert!(candidate.code.contains("def add"));
    assert_eq!(candidate.tests, "assert add(2, 3) == 5");
    assert_eq!(candidate.explanation, "test reply");
}

#[tokio::test]
async fn test_repair_sends_failure_logs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(|request: &Request| {
            let body: Value = serde_json::from_slice(&request.body).unwrap();
            let prompt = body["messages"][1]["content"].as_str().unwrap_or_default();
            assert!(prompt.contains("ZeroDivisionError"));
            assert!(prompt.contains("x = 1/0"));
            ResponseTemplate::new(200)
                .set_body_json(completion(&candidate_reply("x = 1", "assert x == 1")))
        })
        .mount(&server)
        .await;

    let request = RepairRequest {
        specification: "Set x to one".into(),
        prior_code: "x = 1/0".into(),
        prior_tests: "assert x == 1".into(),
        failure_logs: "ZeroDivisionError: division by zero".into(),
        iteration: 1,
    };
    let candidate = provider(&server, "test/model")
        .repair(&request)
        .await
        .unwrap();
    assert_eq!(candidate.code, "x = 1");
}

#[tokio::test]
async fn test_http_errors_are_classified() {
    let cases = [
        (429, "rate"),
        (401, "permission"),
        (402, "quota"),
        (404, "not_found"),
        (500, "api"),
    ];

    for (status, expected) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_json(json!({"error": {"message": format!("status {}", status)}})),
            )
            .mount(&server)
            .await;

        let err = provider(&server, "test/model")
            .synthesize("spec")
            .await
            .unwrap_err();
        let matched = match expected {
            "rate" => matches!(err, ProviderError::RateLimited { .. }),
            "permission" => matches!(err, ProviderError::PermissionDenied(_)),
            "quota" => matches!(err, ProviderError::QuotaExceeded(_)),
            "not_found" => matches!(err, ProviderError::NotFound(_)),
            _ => matches!(
                err,
                ProviderError::Api {
                    status_code: Some(500),
                    ..
                }
            ),
        };
        assert!(matched, "status {} produced {:?}", status, err);
    }
}

#[tokio::test]
async fn test_reply_without_json_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion("I'm sorry, I can't do that.")),
        )
        .mount(&server)
        .await;

    let err = provider(&server, "test/model")
        .synthesize("spec")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_fallback_to_secondary_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "premium/model"})))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_json(json!({"error": {"message": "premium model not allowed"}})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "basic/model"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion(&candidate_reply("y = 2", "assert y == 2"))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let fallback = FallbackProvider::new(
        Arc::new(provider(&server, "premium/model")),
        Arc::new(provider(&server, "basic/model")),
    );
    let candidate = fallback.synthesize("spec").await.unwrap();
    assert_eq!(candidate.code, "y = 2");
}

#[tokio::test]
async fn test_orchestrator_against_http_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion(&candidate_reply("value = 42", "assert value == 42"))),
        )
        .mount(&server)
        .await;

    let launcher = ScriptedLauncher::new(|view| {
        if view.tests.contains("value == 42") {
            view.passed("")
        } else {
            view.test_failure("AssertionError")
        }
    });
    let session = Arc::new(ExecutionSession::new(
        Arc::new(RuntimeManager::new(Arc::new(launcher))),
        SessionConfig::default(),
    ));
    let orchestrator = ConvergenceOrchestrator::new(
        session,
        Arc::new(provider(&server, "test/model")),
        ConvergenceConfig::default(),
    );

    let report = orchestrator.run("Bind value to the answer").await;
    assert_eq!(report.state, OrchestrationState::Completed);
    assert_eq!(report.history.len(), 1);
}
