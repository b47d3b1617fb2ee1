//! HTTP route handlers.

use anyhow::anyhow;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use autovibe::core::types::RiskLevel;
use autovibe::io::config::PolicyOverrides;
use autovibe::unattended::ToolReturn;

use crate::state::AppState;

const EMPTY_CONTENT: &str = "Error: 'content' field is required and cannot be empty";

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health).post(health))
        .route("/autovibe", post(autovibe))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": "ok" }))
}

/// Body of `POST /autovibe`. Everything but `content` is optional; omitted
/// or null fields keep the server's configured policy.
#[derive(Debug)]
struct AutovibeRequest {
    content: Option<String>,
    max_retry: Option<u32>,
    auto_check: Option<bool>,
    exec_timeout: Option<u64>,
    max_risk_level: Option<RiskLevel>,
}

impl AutovibeRequest {
    /// Field by field, so a bad value is reported under its own name.
    fn parse(body: &[u8]) -> Result<Self, String> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| format!("Error: request body is not valid JSON: {err}"))?;
        let Value::Object(fields) = value else {
            return Err("Error: request body must be a JSON object".to_string());
        };
        Ok(Self {
            content: field(&fields, "content")?,
            max_retry: field(&fields, "max_retry")?,
            auto_check: field(&fields, "auto_check")?,
            exec_timeout: field(&fields, "exec_timeout")?,
            max_risk_level: field(&fields, "max_risk_level")?,
        })
    }

    fn overrides(&self) -> PolicyOverrides {
        PolicyOverrides {
            max_retry: self.max_retry,
            max_risk_level: self.max_risk_level,
            auto_check: self.auto_check,
            exec_timeout_secs: self.exec_timeout,
        }
    }
}

fn field<T: DeserializeOwned>(
    fields: &Map<String, Value>,
    name: &str,
) -> Result<Option<T>, String> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => T::deserialize(value)
            .map(Some)
            .map_err(|err| format!("Error: invalid '{name}' in request body: {err}")),
    }
}

type Reply = (StatusCode, Json<ToolReturn>);

fn client_error(content: String) -> Reply {
    (StatusCode::BAD_REQUEST, Json(ToolReturn::error(content)))
}

fn server_error(err: &anyhow::Error) -> Reply {
    warn!(err = %format!("{err:#}"), "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ToolReturn::error(format!("Error processing request: {err:#}"))),
    )
}

/// POST /autovibe - run one request unattended.
///
/// The body is parsed by hand so malformed JSON and bad field values get the
/// same reply shape as every other outcome.
async fn autovibe(State(state): State<AppState>, body: Bytes) -> Reply {
    let request = match AutovibeRequest::parse(&body) {
        Ok(request) => request,
        Err(message) => return client_error(message),
    };
    let content = request
        .content
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if content.is_empty() {
        return client_error(EMPTY_CONTENT.to_string());
    }
    let policy = request.overrides().apply(state.policy.clone());
    if let Err(err) = policy.validate() {
        return server_error(&err);
    }

    info!(
        max_retry = policy.max_retry,
        auto_check = policy.auto_check,
        max_risk_level = %policy.max_risk_level,
        "autovibe request"
    );
    let joined = tokio::task::spawn_blocking(move || state.run(&content, policy)).await;
    match joined {
        Ok(Ok(result)) => (StatusCode::OK, Json(result)),
        Ok(Err(err)) => server_error(&err),
        Err(err) => server_error(&anyhow!("session task failed: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use autovibe::io::artifact_store::ArtifactStore;
    use autovibe::io::completion::StructuredCompletion;
    use autovibe::core::session::Policy;
    use autovibe::test_support::{
        ScriptedCompletion, ScriptedRuntime, exited, generation_reply, outcome_reply, policy,
        regeneration_reply, test_agents, verdict_reply,
    };

    use super::*;
    use crate::state::CompletionFactory;

    fn state(
        dir: &tempfile::TempDir,
        runtime: ScriptedRuntime,
        completion: CompletionFactory,
    ) -> AppState {
        AppState {
            store: ArtifactStore::open(dir.path().join("scripts")).expect("store"),
            runtime: Arc::new(runtime),
            agents: Arc::new(test_agents()),
            completion,
            policy: policy(2, RiskLevel::Deny, true),
        }
    }

    fn scripted(build: fn() -> ScriptedCompletion) -> CompletionFactory {
        Arc::new(move || Ok(Box::new(build()) as Box<dyn StructuredCompletion>))
    }

    fn happy_path() -> ScriptedCompletion {
        ScriptedCompletion::new()
            .reply(generation_reply("hello.py", "print('hi')\n", &[]))
            .reply(verdict_reply(true, RiskLevel::Allow))
            .reply(outcome_reply(true, "said hi"))
    }

    async fn post(app: Router, uri: &str, body: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[tokio::test]
    async fn health_answers_get_and_post() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = router(state(&dir, ScriptedRuntime::new(), scripted(happy_path)));
        let (status, body) = post(app.clone(), "/", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": "ok" }));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn successful_run_returns_tool_result() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runtime = ScriptedRuntime::new().execution(exited(0, "hi\n"));
        let app = router(state(&dir, runtime, scripted(happy_path)));

        let (status, body) = post(app, "/autovibe", r#"{"content": "say hi"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_error"], json!(false));
        assert_eq!(body["content"], json!("said hi"));
        assert_eq!(body["outcome_history"][0]["succeeded"], json!(true));
    }

    #[tokio::test]
    async fn blank_content_is_a_client_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        for payload in [r#"{"content": "   "}"#, r#"{"max_retry": 3}"#] {
            let app = router(state(&dir, ScriptedRuntime::new(), scripted(happy_path)));
            let (status, body) = post(app, "/autovibe", payload).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{payload}");
            assert_eq!(
                body,
                json!({ "is_error": true, "content": EMPTY_CONTENT, "outcome_history": [] })
            );
        }
    }

    #[tokio::test]
    async fn malformed_json_is_a_client_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = router(state(&dir, ScriptedRuntime::new(), scripted(happy_path)));
        let (status, body) = post(app, "/autovibe", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["is_error"], json!(true));
        assert!(body["content"].as_str().expect("content").contains("not valid JSON"));
    }

    #[tokio::test]
    async fn engine_failure_is_reported_with_ok_status() {
        let dir = tempfile::tempdir().expect("tempdir");
        let failing: CompletionFactory = Arc::new(|| {
            Ok(Box::new(ScriptedCompletion::new().fail("code_generation", "no credits"))
                as Box<dyn StructuredCompletion>)
        });
        let app = router(state(&dir, ScriptedRuntime::new(), failing));

        let (status, body) = post(app, "/autovibe", r#"{"content": "x"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_error"], json!(true));
        assert!(body["content"].as_str().expect("content").contains("no credits"));
    }

    #[tokio::test]
    async fn backend_setup_failure_is_a_server_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let broken: CompletionFactory = Arc::new(|| Err(anyhow!("codex binary missing")));
        let app = router(state(&dir, ScriptedRuntime::new(), broken));

        let (status, body) = post(app, "/autovibe", r#"{"content": "x"}"#).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["content"],
            json!("Error processing request: codex binary missing")
        );
    }

    #[tokio::test]
    async fn zero_retry_budget_is_a_server_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = router(state(&dir, ScriptedRuntime::new(), scripted(happy_path)));
        let (status, body) =
            post(app, "/autovibe", r#"{"content": "x", "max_retry": 0}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["content"].as_str().expect("content").contains("max_retry"));
    }

    #[tokio::test]
    async fn bad_field_value_names_the_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        for (payload, name) in [
            (r#"{"content": "x", "max_risk_level": "deny"}"#, "max_risk_level"),
            (r#"{"content": "x", "max_retry": -1}"#, "max_retry"),
            (r#"{"content": "x", "auto_check": "yes"}"#, "auto_check"),
        ] {
            let app = router(state(&dir, ScriptedRuntime::new(), scripted(happy_path)));
            let (status, body) = post(app, "/autovibe", payload).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{payload}");
            let content = body["content"].as_str().expect("content");
            assert!(content.contains(&format!("invalid '{name}'")), "{content}");
            assert!(!content.contains("not valid JSON"), "{content}");
        }
    }

    #[tokio::test]
    async fn non_object_body_is_a_client_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = router(state(&dir, ScriptedRuntime::new(), scripted(happy_path)));
        let (status, body) = post(app, "/autovibe", r#"["say hi"]"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["content"], json!("Error: request body must be a JSON object"));
    }

    fn repairs_then_gives_up() -> ScriptedCompletion {
        ScriptedCompletion::new()
            .reply(generation_reply("crash.py", "raise SystemExit(1)\n", &[]))
            .replies((0..3).map(|_| regeneration_reply("raise SystemExit(1)\n", &[])))
            .replies((0..4).map(|_| verdict_reply(true, RiskLevel::Allow)))
    }

    #[tokio::test]
    async fn omitted_fields_keep_configured_policy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runtime = (0..4).fold(ScriptedRuntime::new(), |runtime, _| {
            runtime.execution(exited(1, ""))
        });
        let mut app_state = state(&dir, runtime, scripted(repairs_then_gives_up));
        // No evaluator replies are scripted, so auto_check must stay off.
        app_state.policy = Policy {
            max_retry: 3,
            auto_check: false,
            ..app_state.policy
        };

        let (status, body) = post(router(app_state), "/autovibe", r#"{"content": "x"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_error"], json!(true));
        assert_eq!(
            body["content"],
            json!("gave up: retry budget exhausted (3 of 3 repairs used)")
        );
    }

    #[test]
    fn request_fields_override_only_what_they_name() {
        let body = br#"{"content": "x", "max_retry": 7, "auto_check": null}"#;
        let request = AutovibeRequest::parse(body).expect("parse");
        let base = policy(3, RiskLevel::Check, false);
        let merged = request.overrides().apply(base.clone());
        assert_eq!(merged.max_retry, 7);
        assert!(!merged.auto_check);
        assert_eq!(merged.max_risk_level, RiskLevel::Check);
        assert_eq!(merged.exec_timeout, base.exec_timeout);
    }
}
