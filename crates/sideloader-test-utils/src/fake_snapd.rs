//! A fake snapd listening on a temporary Unix socket.
//!
//! Serves the subset of the snapd REST API the sideloader uses and records
//! every request it receives, so tests can assert on exactly what was sent
//! and in which order.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use tempfile::TempDir;
use tokio::net::UnixListener;
use tokio::sync::oneshot;

/// Listing returned for `GET /v2/snaps` unless overridden.
pub const DEFAULT_LIST_BODY: &str =
    r#"{"type":"sync","status-code":200,"status":"OK","result":[{"name":"core","revision":"16"}]}"#;

/// A request as seen by the fake daemon.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub host: Option<String>,
    pub content_type: Option<String>,
    pub body: Bytes,
    /// Sequence number taken when the request headers arrived.
    pub started: usize,
    /// Sequence number taken once the request body was fully read.
    pub completed: usize,
}

impl RecordedRequest {
    /// Whether this request finished before `other` started.
    pub fn completed_before(&self, other: &RecordedRequest) -> bool {
        self.completed < other.started
    }
}

#[derive(Clone)]
struct Behaviour {
    ack_status: StatusCode,
    install_status: StatusCode,
    list_status: StatusCode,
    list_body: String,
}

struct FakeState {
    behaviour: Behaviour,
    requests: Mutex<Vec<RecordedRequest>>,
    sequence: AtomicUsize,
}

/// Builder for a [`FakeSnapd`] with non-default responses.
pub struct FakeSnapdBuilder {
    behaviour: Behaviour,
}

impl FakeSnapdBuilder {
    /// Status returned for `POST /v2/assertions`.
    pub fn ack_status(mut self, status: u16) -> Self {
        self.behaviour.ack_status = status_code(status);
        self
    }

    /// Status returned for `POST /v2/snaps`.
    pub fn install_status(mut self, status: u16) -> Self {
        self.behaviour.install_status = status_code(status);
        self
    }

    /// Status returned for `GET /v2/snaps`.
    pub fn list_status(mut self, status: u16) -> Self {
        self.behaviour.list_status = status_code(status);
        self
    }

    /// Body returned for a successful `GET /v2/snaps`.
    pub fn list_body(mut self, body: &str) -> Self {
        self.behaviour.list_body = body.to_string();
        self
    }

    /// Bind the socket and start serving.
    pub async fn start(self) -> FakeSnapd {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let socket_path = temp_dir.path().join("snapd.socket");
        let listener = UnixListener::bind(&socket_path).expect("failed to bind fake snapd");

        let state = Arc::new(FakeState {
            behaviour: self.behaviour,
            requests: Mutex::new(Vec::new()),
            sequence: AtomicUsize::new(0),
        });
        let app = axum::Router::new()
            .fallback(handle)
            .with_state(Arc::clone(&state));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        FakeSnapd {
            socket_path,
            state,
            _shutdown: shutdown_tx,
            _temp_dir: temp_dir,
        }
    }
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).expect("invalid status code")
}

/// A running fake snapd.
///
/// The socket and its directory are removed and the server stopped when this
/// value is dropped.
pub struct FakeSnapd {
    socket_path: PathBuf,
    state: Arc<FakeState>,
    _shutdown: oneshot::Sender<()>,
    _temp_dir: TempDir,
}

impl FakeSnapd {
    /// A fake snapd that accepts everything.
    pub async fn start() -> Self {
        Self::builder().start().await
    }

    pub fn builder() -> FakeSnapdBuilder {
        FakeSnapdBuilder {
            behaviour: Behaviour {
                ack_status: StatusCode::OK,
                install_status: StatusCode::ACCEPTED,
                list_status: StatusCode::OK,
                list_body: DEFAULT_LIST_BODY.to_string(),
            },
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// All requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        let mut requests = self
            .state
            .requests
            .lock()
            .expect("request log poisoned")
            .clone();
        requests.sort_by_key(|r| r.started);
        requests
    }

    /// Requests received for `method` and `path`.
    pub fn requests_to(&self, method: &str, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }
}

async fn handle(State(state): State<Arc<FakeState>>, req: Request) -> Response {
    let started = state.sequence.fetch_add(1, Ordering::SeqCst);
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let (host, content_type) = {
        let headers = req.headers();
        let header = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        (header(HOST), header(CONTENT_TYPE))
    };

    let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(body) => body,
        Err(e) => return error(StatusCode::BAD_REQUEST, &format!("bad body: {e}")),
    };
    let completed = state.sequence.fetch_add(1, Ordering::SeqCst);

    state
        .requests
        .lock()
        .expect("request log poisoned")
        .push(RecordedRequest {
            method: method.clone(),
            path: path.clone(),
            host,
            content_type,
            body,
            started,
            completed,
        });

    let behaviour = &state.behaviour;
    match (method.as_str(), path.as_str()) {
        ("POST", "/v2/assertions") if behaviour.ack_status.is_success() => json(
            behaviour.ack_status,
            r#"{"type":"sync","status-code":200,"status":"OK","result":null}"#.to_string(),
        ),
        ("POST", "/v2/assertions") => error(behaviour.ack_status, "cannot assert"),
        ("POST", "/v2/snaps") if behaviour.install_status.is_success() => json(
            behaviour.install_status,
            r#"{"type":"async","status-code":202,"status":"Accepted","change":"1"}"#.to_string(),
        ),
        ("POST", "/v2/snaps") => error(behaviour.install_status, "cannot install"),
        ("GET", "/v2/snaps") if behaviour.list_status.is_success() => {
            json(behaviour.list_status, behaviour.list_body.clone())
        }
        ("GET", "/v2/snaps") => error(behaviour.list_status, "cannot list"),
        _ => error(StatusCode::NOT_FOUND, "not found"),
    }
}

fn json(status: StatusCode, body: String) -> Response {
    (status, [(CONTENT_TYPE, "application/json")], Body::from(body)).into_response()
}

fn error(status: StatusCode, message: &str) -> Response {
    json(
        status,
        format!(
            r#"{{"type":"error","status-code":{},"status":"{}","result":{{"message":"{}"}}}}"#,
            status.as_u16(),
            status.canonical_reason().unwrap_or_default(),
            message
        ),
    )
}
