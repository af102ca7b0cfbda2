use avatar_session::{BackendConfig, BackendError, HttpBackend, SessionBackend};
use avatar_types::{AvatarSelection, ChatScopeId, Credential, SessionId};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Recorded {
    requests: Arc<Mutex<Vec<(String, Value)>>>,
    api_keys: Arc<Mutex<Vec<Option<String>>>>,
}

impl Recorded {
    fn record(&self, route: &str, headers: &HeaderMap, body: Value) {
        self.requests.lock().unwrap().push((route.to_string(), body));
        self.api_keys.lock().unwrap().push(
            headers
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        );
    }

    fn body_of(&self, route: &str) -> Value {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(r, _)| r == route)
            .map(|(_, body)| body.clone())
            .unwrap_or(Value::Null)
    }
}

async fn create(
    State(rec): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    rec.record("create", &headers, body);
    // Gateway-style envelope with a string body.
    Json(json!({
        "statusCode": 200,
        "body": r#"{"sessionId":"sess-42","token":"abcdefghijklmnopqrstuvwxyz"}"#
    }))
}

async fn start(
    State(rec): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    rec.record("start", &headers, body);
    Json(json!({
        "body": {
            "roomUrl": "wss://media.example/room",
            "iceServers": [{ "urls": "stun:stun.example:3478" }]
        }
    }))
}

async fn chat(
    State(rec): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let text = body["text"].as_str().unwrap_or_default().to_string();
    rec.record("chat", &headers, body);
    match text.as_str() {
        "silence" => Json(json!({ "message": "" })),
        "wrapped" => Json(json!({ "body": r#"{"message":"hi"}"# })),
        "gateway" => Json(json!({
            "statusCode": 502,
            "body": { "error": "model timed out" }
        })),
        _ => Json(json!({ "message": format!("echo: {text}") })),
    }
}

async fn speak(
    State(rec): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let text = body["text"].as_str().unwrap_or_default().to_string();
    rec.record("speak", &headers, body);
    if text == "refuse" {
        Json(json!({ "success": false, "error": "session not started" }))
    } else {
        Json(json!({ "success": true }))
    }
}

async fn close(State(rec): State<Recorded>, headers: HeaderMap, Json(body): Json<Value>) {
    rec.record("close", &headers, body);
}

async fn broken() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded")
}

async fn spawn_backend() -> (String, Recorded) {
    let rec = Recorded::default();
    let app = Router::new()
        .route("/heygen/create", post(create))
        .route("/heygen/start", post(start))
        .route("/chat", post(chat))
        .route("/heygen/speak", post(speak))
        .route("/heygen/close", post(close))
        .route("/broken", post(broken))
        .with_state(rec.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), rec)
}

fn backend(base_url: &str) -> HttpBackend {
    let mut config = BackendConfig::new(base_url);
    config.api_key = Some("test-key".to_string());
    HttpBackend::new(config).unwrap()
}

#[tokio::test]
async fn create_session_unwraps_gateway_envelope() {
    let (url, rec) = spawn_backend().await;
    let backend = backend(&url);

    let selection = AvatarSelection {
        avatar_name: Some("Wayne_20240711".to_string()),
        quality: Some("low".to_string()),
        voice_rate: Some(1.0),
        knowledge_id: Some("kb-menu".to_string()),
        ..Default::default()
    };
    let grant = backend.create_session(&selection).await.unwrap();

    assert_eq!(grant.session_id.as_str(), "sess-42");
    assert_eq!(grant.credential.expose(), "abcdefghijklmnopqrstuvwxyz");
    assert_eq!(
        rec.body_of("create"),
        json!({
            "avatarName": "Wayne_20240711",
            "quality": "low",
            "voiceRate": 1.0,
            "knowledgeId": "kb-menu"
        })
    );
    assert_eq!(
        rec.api_keys.lock().unwrap()[0].as_deref(),
        Some("test-key")
    );
}

#[tokio::test]
async fn start_session_returns_transport_descriptor() {
    let (url, rec) = spawn_backend().await;
    let backend = backend(&url);

    let descriptor = backend
        .start_session(&SessionId::new("sess-42"), &Credential::new("tok"))
        .await
        .unwrap();

    assert_eq!(descriptor.url.as_deref(), Some("wss://media.example/room"));
    assert_eq!(descriptor.ice_servers[0].urls, vec!["stun:stun.example:3478"]);
    assert_eq!(
        rec.body_of("start"),
        json!({ "sessionId": "sess-42", "credential": "tok" })
    );
}

#[tokio::test]
async fn start_is_skipped_without_start_path() {
    let (url, rec) = spawn_backend().await;
    let mut config = BackendConfig::new(url);
    config.start_path = Some(String::new());
    let backend = HttpBackend::new(config).unwrap();

    assert!(!backend.requires_start());
    let descriptor = backend
        .start_session(&SessionId::new("sess-42"), &Credential::new("tok"))
        .await
        .unwrap();
    assert!(descriptor.url.is_none());
    assert!(rec.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn chat_sends_scope_and_returns_message() {
    let (url, rec) = spawn_backend().await;
    let backend = backend(&url);
    let scope = ChatScopeId::generate();

    let reply = backend.chat(&scope, "hello there").await.unwrap();

    assert_eq!(reply, "echo: hello there");
    let body = rec.body_of("chat");
    assert_eq!(body["text"], "hello there");
    assert_eq!(body["session_id"], scope.to_string());
}

#[tokio::test]
async fn chat_unwraps_string_body() {
    let (url, _rec) = spawn_backend().await;
    let backend = backend(&url);

    let reply = backend
        .chat(&ChatScopeId::generate(), "wrapped")
        .await
        .unwrap();
    assert_eq!(reply, "hi");
}

#[tokio::test]
async fn chat_without_message_is_rejected() {
    let (url, _rec) = spawn_backend().await;
    let backend = backend(&url);

    let err = backend
        .chat(&ChatScopeId::generate(), "silence")
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Rejected(_)), "got {err:?}");
}

#[tokio::test]
async fn chat_surfaces_upstream_status_in_envelope() {
    let (url, _rec) = spawn_backend().await;
    let backend = backend(&url);

    let err = backend
        .chat(&ChatScopeId::generate(), "gateway")
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("502"), "got {msg}");
    assert!(msg.contains("model timed out"), "got {msg}");
}

#[tokio::test]
async fn speak_reports_unsuccessful_receipt() {
    let (url, rec) = spawn_backend().await;
    let backend = backend(&url);
    let id = SessionId::new("sess-42");
    let cred = Credential::new("tok");

    backend.speak(&id, &cred, "hi").await.unwrap();
    assert_eq!(
        rec.body_of("speak"),
        json!({ "sessionId": "sess-42", "credential": "tok", "text": "hi" })
    );

    let err = backend.speak(&id, &cred, "refuse").await.unwrap_err();
    assert_eq!(err.to_string(), "backend rejected request: session not started");
}

#[tokio::test]
async fn close_accepts_empty_response() {
    let (url, rec) = spawn_backend().await;
    let backend = backend(&url);

    backend
        .close_session(&SessionId::new("sess-42"), &Credential::new("tok"))
        .await
        .unwrap();
    assert_eq!(rec.body_of("close")["sessionId"], "sess-42");
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let (url, _rec) = spawn_backend().await;
    let mut config = BackendConfig::new(url);
    config.close_path = "/broken".to_string();
    let backend = HttpBackend::new(config).unwrap();

    let err = backend
        .close_session(&SessionId::new("sess-42"), &Credential::new("tok"))
        .await
        .unwrap_err();
    match err {
        BackendError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "upstream exploded");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = backend(&format!("http://{addr}"))
        .create_session(&AvatarSelection::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Network(_)), "got {err:?}");
}
