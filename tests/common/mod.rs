//! Shared test utilities: in-process fake services listening on loopback

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// How a fake agent answers invocations
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Reply `success` with the payload
    Succeed(Value),
    /// Reply `error` with the detail
    Fail(String),
    /// Wait, then reply `success` with the payload
    Delay(Duration, Value),
    /// Reply with a bare HTTP status and a text body
    HttpStatus(u16),
}

#[derive(Clone)]
struct AgentState {
    descriptor: Value,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
    last_body: Arc<Mutex<Option<Value>>>,
}

/// A running fake agent service
pub struct FakeAgent {
    pub base_url: String,
    calls: Arc<AtomicUsize>,
    last_body: Arc<Mutex<Option<Value>>>,
}

impl FakeAgent {
    /// Number of invocations received
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Body of the most recent invocation
    pub fn last_body(&self) -> Option<Value> {
        self.last_body.lock().expect("lock").clone()
    }
}

/// Bind an ephemeral loopback port
pub async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let addr = listener.local_addr().expect("listener has no address");
    (listener, format!("http://{addr}"))
}

fn serve(listener: TcpListener, router: Router) {
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
}

/// Spawn a fake agent publishing one skill
pub async fn spawn_agent(
    service_id: &str,
    skill_id: &str,
    description: &str,
    tags: &[&str],
    behavior: Behavior,
) -> FakeAgent {
    let (listener, base_url) = bind().await;

    let descriptor = json!({
        "serviceId": service_id,
        "displayName": format!("{service_id} agent"),
        "version": "1.0.0",
        "endpointUrl": format!("{base_url}/invoke"),
        "skills": [{
            "id": skill_id,
            "description": description,
            "tags": tags,
        }],
    });

    let calls = Arc::new(AtomicUsize::new(0));
    let last_body = Arc::new(Mutex::new(None));
    let state = AgentState {
        descriptor,
        behavior,
        calls: calls.clone(),
        last_body: last_body.clone(),
    };

    let router = Router::new()
        .route("/.well-known/agent.json", get(serve_descriptor))
        .route("/invoke", post(invoke))
        .with_state(state);
    serve(listener, router);

    FakeAgent {
        base_url,
        calls,
        last_body,
    }
}

/// Spawn a server publishing `body` verbatim as its descriptor
pub async fn spawn_raw_descriptor(body: &str) -> String {
    let (listener, base_url) = bind().await;
    let body = body.to_string();

    let router = Router::new().route(
        "/.well-known/agent.json",
        get(move || {
            let body = body.clone();
            async move { ([("content-type", "application/json")], body) }
        }),
    );
    serve(listener, router);

    base_url
}

/// An endpoint nothing listens on
pub async fn dead_endpoint() -> String {
    let (listener, base_url) = bind().await;
    drop(listener);
    base_url
}

async fn serve_descriptor(State(state): State<AgentState>) -> Json<Value> {
    Json(state.descriptor)
}

async fn invoke(State(state): State<AgentState>, Json(body): Json<Value>) -> Response {
    state.calls.fetch_add(1, Ordering::SeqCst);
    *state.last_body.lock().expect("lock") = Some(body);

    match state.behavior {
        Behavior::Succeed(payload) => {
            Json(json!({ "status": "success", "payload": payload })).into_response()
        }
        Behavior::Fail(detail) => {
            Json(json!({ "status": "error", "errorDetail": detail })).into_response()
        }
        Behavior::Delay(delay, payload) => {
            tokio::time::sleep(delay).await;
            Json(json!({ "status": "success", "payload": payload })).into_response()
        }
        Behavior::HttpStatus(code) => (
            StatusCode::from_u16(code).expect("valid status"),
            "agent exploded",
        )
            .into_response(),
    }
}

/// A running fake decision oracle
pub struct FakeOracle {
    pub url: String,
    authorization: Arc<Mutex<Option<String>>>,
    last_body: Arc<Mutex<Option<Value>>>,
}

impl FakeOracle {
    /// Authorization header of the most recent decision request
    pub fn authorization(&self) -> Option<String> {
        self.authorization.lock().expect("lock").clone()
    }

    /// Body of the most recent decision request
    pub fn last_body(&self) -> Option<Value> {
        self.last_body.lock().expect("lock").clone()
    }
}

#[derive(Clone)]
struct OracleState {
    reply: Value,
    authorization: Arc<Mutex<Option<String>>>,
    last_body: Arc<Mutex<Option<Value>>>,
}

/// Spawn a fake oracle that always answers `reply`
pub async fn spawn_oracle(reply: Value) -> FakeOracle {
    let (listener, base_url) = bind().await;

    let authorization = Arc::new(Mutex::new(None));
    let last_body = Arc::new(Mutex::new(None));
    let state = OracleState {
        reply,
        authorization: authorization.clone(),
        last_body: last_body.clone(),
    };

    let router = Router::new()
        .route("/decide", post(decide))
        .with_state(state);
    serve(listener, router);

    FakeOracle {
        url: format!("{base_url}/decide"),
        authorization,
        last_body,
    }
}

async fn decide(
    State(state): State<OracleState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    *state.authorization.lock().expect("lock") = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    *state.last_body.lock().expect("lock") = Some(body);
    Json(state.reply)
}
