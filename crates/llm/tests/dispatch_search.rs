//! Search-order and retry properties of `DispatchClient::call`, exercised
//! against a scripted in-memory transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dispatch::{
    CallOptions, ChatCompletion, ChatMessage, ChatRequest, ChatTransport, Credential,
    DispatchError, FailureKind, TransportError, Usage, USAGE_FIELD,
};
use llm::config::TEXT_MODELS_ENV;
use llm::{ClientConfig, ClientSettings, DispatchClient};
use serde_json::json;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

enum Step {
    Respond(Result<ChatCompletion, TransportError>),
    Hang(Duration),
}

#[derive(Debug, Clone)]
struct Attempt {
    key: String,
    model: String,
    at: Instant,
}

type Responder = dyn Fn(&str, &str, usize) -> Step + Send + Sync;

struct ScriptedTransport {
    attempts: Mutex<Vec<Attempt>>,
    respond: Box<Responder>,
}

impl ScriptedTransport {
    /// `respond(key, model, index_of_this_attempt)` decides each outcome.
    fn new(respond: impl Fn(&str, &str, usize) -> Step + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            attempts: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        })
    }

    fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().unwrap().clone()
    }

    fn pairs(&self) -> Vec<(String, String)> {
        self.attempts()
            .into_iter()
            .map(|a| (a.key, a.model))
            .collect()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn complete(
        &self,
        credential: &Credential,
        request: &ChatRequest,
    ) -> Result<ChatCompletion, TransportError> {
        let model = request.extra_body["model"].as_str().unwrap().to_string();
        let index = {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(Attempt {
                key: credential.expose().to_string(),
                model: model.clone(),
                at: Instant::now(),
            });
            attempts.len() - 1
        };

        match (self.respond)(credential.expose(), &model, index) {
            Step::Respond(result) => result,
            Step::Hang(duration) => {
                tokio::time::sleep(duration).await;
                Ok(ChatCompletion::new("too late"))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn client(keys: &[&str], models: &str, transport: Arc<ScriptedTransport>) -> DispatchClient {
    init_tracing();
    let models = models.to_string();
    let config = ClientConfig::resolve(
        ClientSettings::new()
            .api_keys(keys.iter().copied())
            .suppress_proxy_env(false),
        move |name| (name == TEXT_MODELS_ENV).then(|| models.clone()),
    );
    DispatchClient::new(config, transport)
}

fn messages() -> Vec<ChatMessage> {
    vec![ChatMessage::system("be terse"), ChatMessage::user("hello")]
}

fn options() -> CallOptions {
    CallOptions::default()
        .with_max_retries(3)
        .with_retry_delay(Duration::from_millis(100))
        .with_timeout(Duration::from_secs(5))
}

fn fail(kind: FailureKind) -> Step {
    Step::Respond(Err(TransportError::new(kind, format!("scripted {kind}"))))
}

fn ok(content: &str) -> Step {
    Step::Respond(Ok(ChatCompletion::new(content)))
}

fn pair(key: &str, model: &str) -> (String, String) {
    (key.to_string(), model.to_string())
}

// ---------------------------------------------------------------------------
// Failure classes
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn authentication_failures_try_every_model_under_every_credential_once() {
    let transport = ScriptedTransport::new(|_, _, _| fail(FailureKind::Authentication));
    let client = client(&["k1", "k2"], "A,B,C", transport.clone());

    let err = client.call(&messages(), &options()).await.unwrap_err();

    assert_eq!(
        transport.pairs(),
        vec![
            pair("k1", "A"),
            pair("k1", "B"),
            pair("k1", "C"),
            pair("k2", "A"),
            pair("k2", "B"),
            pair("k2", "C"),
        ]
    );
    match err {
        DispatchError::Exhausted {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 2 * 3);
            assert_eq!(last_error.unwrap().kind, FailureKind::Authentication);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // No backoff between authentication failures.
    let attempts = transport.attempts();
    assert!(attempts.windows(2).all(|w| w[1].at == w[0].at));
}

#[tokio::test(start_paused = true)]
async fn rate_limits_try_each_model_once_per_credential() {
    let transport = ScriptedTransport::new(|_, _, _| fail(FailureKind::RateLimit));
    let client = client(&["k1", "k2"], "A,B,C", transport.clone());

    let err = client.call(&messages(), &options()).await.unwrap_err();

    assert_eq!(err.attempts(), 6);
    assert_eq!(
        transport.pairs(),
        vec![
            pair("k1", "A"),
            pair("k1", "B"),
            pair("k1", "C"),
            pair("k2", "A"),
            pair("k2", "B"),
            pair("k2", "C"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn transient_failures_exhaust_retries_with_doubling_delays() {
    let transport = ScriptedTransport::new(|_, _, _| fail(FailureKind::Transient));
    let client = client(&["k1", "k2"], "A,B", transport.clone());

    let err = client.call(&messages(), &options()).await.unwrap_err();
    assert_eq!(err.attempts(), 2 * 2 * 3);

    let attempts = transport.attempts();
    assert_eq!(attempts.len(), 12);
    for group in attempts.chunks(3) {
        assert!(group
            .iter()
            .all(|a| a.key == group[0].key && a.model == group[0].model));
        assert_eq!(group[1].at - group[0].at, Duration::from_millis(100));
        assert_eq!(group[2].at - group[1].at, Duration::from_millis(200));
    }
    // No sleep after the last retry of a pair: the next model starts at once.
    assert_eq!(attempts[3].at - attempts[2].at, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_recovers_on_same_target() {
    let transport = ScriptedTransport::new(|_, _, index| match index {
        0 => fail(FailureKind::Transient),
        _ => ok("recovered"),
    });
    let client = client(&["k1"], "A,B", transport.clone());

    let output = client.call(&messages(), &options()).await.unwrap();

    assert_eq!(output.content(), Some("recovered"));
    assert_eq!(output.model.as_str(), "A");
    assert_eq!(output.attempts, 2);
    assert_eq!(transport.pairs(), vec![pair("k1", "A"), pair("k1", "A")]);
}

#[tokio::test(start_paused = true)]
async fn unclassified_failure_moves_to_next_model_without_retry() {
    let transport = ScriptedTransport::new(|_, model, _| match model {
        "A" => fail(FailureKind::Other),
        _ => ok("from b"),
    });
    let client = client(&["k1"], "A,B", transport.clone());

    let output = client.call(&messages(), &options()).await.unwrap();

    assert_eq!(output.model.as_str(), "B");
    assert_eq!(output.attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn rejected_credential_falls_through_to_next_credential_after_all_models() {
    let transport = ScriptedTransport::new(|key, _, _| match key {
        "k1" => fail(FailureKind::Authentication),
        _ => ok("second key works"),
    });
    let client = client(&["k1", "k2"], "A,B", transport.clone());

    let output = client.call(&messages(), &options()).await.unwrap();

    assert_eq!(output.credential_index, 1);
    assert_eq!(output.model.as_str(), "A");
    assert_eq!(output.attempts, 3);
    assert_eq!(
        transport.pairs(),
        vec![pair("k1", "A"), pair("k1", "B"), pair("k2", "A")]
    );
}

#[tokio::test(start_paused = true)]
async fn authentication_failure_on_one_model_keeps_the_credential() {
    let transport = ScriptedTransport::new(|_, model, _| match model {
        "A" => fail(FailureKind::Authentication),
        _ => ok("model b accepts the key"),
    });
    let client = client(&["k1", "k2"], "A,B", transport.clone());

    let output = client.call(&messages(), &options()).await.unwrap();

    assert_eq!(output.credential_index, 0);
    assert_eq!(output.model.as_str(), "B");
    assert_eq!(transport.pairs(), vec![pair("k1", "A"), pair("k1", "B")]);
}

#[tokio::test(start_paused = true)]
async fn attempt_timeout_is_transient_and_scoped_per_attempt() {
    let transport = ScriptedTransport::new(|_, model, _| match model {
        "A" => Step::Hang(Duration::from_secs(60)),
        _ => ok("fast"),
    });
    let client = client(&["k1"], "A,B", transport.clone());
    let options = options()
        .with_max_retries(2)
        .with_timeout(Duration::from_secs(1));

    let output = client.call(&messages(), &options).await.unwrap();

    assert_eq!(output.model.as_str(), "B");
    assert_eq!(output.attempts, 3);
    let attempts = transport.attempts();
    // One second of timeout plus the 100ms backoff between the two A attempts.
    assert_eq!(attempts[1].at - attempts[0].at, Duration::from_millis(1_100));
}

// ---------------------------------------------------------------------------
// Strict-JSON mode
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn strict_json_retries_malformed_content_until_valid() {
    let transport = ScriptedTransport::new(|_, _, index| {
        if index < 2 {
            ok("definitely not json")
        } else {
            Step::Respond(Ok(
                ChatCompletion::new(r#"{"a": 1}"#).with_usage(Usage::new(10, 4, 14))
            ))
        }
    });
    let client = client(&["k1"], "A,B", transport.clone());

    let output = client
        .call(&messages(), &options().with_json_mode(true))
        .await
        .unwrap();

    assert_eq!(output.get("a"), Some(&json!(1)));
    assert_eq!(
        output.get(USAGE_FIELD),
        Some(&json!({"prompt_tokens": 10, "completion_tokens": 4, "total_tokens": 14}))
    );
    assert_eq!(output.attempts, 3);
    assert_eq!(output.model.as_str(), "A");

    let attempts = transport.attempts();
    assert_eq!(attempts[1].at - attempts[0].at, Duration::from_millis(100));
    assert_eq!(attempts[2].at - attempts[1].at, Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn strict_json_exhaustion_advances_to_next_model() {
    let transport = ScriptedTransport::new(|_, model, _| match model {
        "A" => ok("[1, 2, 3]"),
        _ => ok(r#"{"ok": true}"#),
    });
    let client = client(&["k1"], "A,B", transport.clone());

    let output = client
        .call(&messages(), &options().with_json_mode(true))
        .await
        .unwrap();

    assert_eq!(output.model.as_str(), "B");
    assert_eq!(output.attempts, 4);
    assert_eq!(output.get("ok"), Some(&json!(true)));
    assert!(output.usage.is_none());
    assert!(output.get(USAGE_FIELD).is_none());
}

#[tokio::test(start_paused = true)]
async fn text_mode_wraps_content_and_usage() {
    let transport = ScriptedTransport::new(|_, _, _| {
        Step::Respond(Ok(ChatCompletion::new("plain words").with_usage(Usage::new(1, 2, 3))))
    });
    let client = client(&["k1"], "A,B", transport);

    let output = client.call(&messages(), &options()).await.unwrap();

    assert_eq!(
        output.into_value(),
        json!({
            "content": "plain words",
            "_usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}
        })
    );
}

// ---------------------------------------------------------------------------
// Preconditions and ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unconfigured_client_makes_no_attempt() {
    let transport = ScriptedTransport::new(|_, _, _| ok("unreachable"));
    let client = client(&[], "A,B", transport.clone());

    assert!(!client.is_configured());
    let err = client.call(&messages(), &options()).await.unwrap_err();

    assert_eq!(err, DispatchError::NotConfigured);
    assert!(transport.attempts().is_empty());
}

#[tokio::test]
async fn empty_message_list_is_rejected_before_any_attempt() {
    let transport = ScriptedTransport::new(|_, _, _| ok("unreachable"));
    let client = client(&["k1"], "A,B", transport.clone());

    let err = client.call(&[], &options()).await.unwrap_err();

    assert!(matches!(err, DispatchError::InvalidRequest { .. }));
    assert!(transport.attempts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn requested_model_is_tried_first_then_configured_order() {
    init_tracing();
    let transport = ScriptedTransport::new(|_, _, _| fail(FailureKind::RateLimit));
    let config = ClientConfig::resolve(
        ClientSettings::new()
            .api_token("k1")
            .model_name("X")
            .suppress_proxy_env(false),
        |name| (name == TEXT_MODELS_ENV).then(|| "A,X,B".to_string()),
    );
    let client = DispatchClient::new(config, transport.clone());
    let planned: Vec<&str> = client.model_candidates().iter().map(|m| m.as_str()).collect();
    assert_eq!(planned, vec!["X", "A", "B"]);

    let _ = client.call(&messages(), &options()).await;

    let models: Vec<String> = transport.pairs().into_iter().map(|(_, m)| m).collect();
    assert_eq!(models, vec!["X", "A", "B"]);
}

#[tokio::test(start_paused = true)]
async fn concurrent_calls_share_one_client() {
    let transport = ScriptedTransport::new(|_, _, _| ok("shared"));
    let client = client(&["k1"], "A,B", transport.clone());

    let (messages, options) = (messages(), options());

    let (a, b) = tokio::join!(
        client.call(&messages, &options),
        client.call(&messages, &options)
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.call_id, b.call_id);
    assert_eq!(transport.attempts().len(), 2);
}
