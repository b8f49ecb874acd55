//! HTTP/1.1 transport to snapd over a Unix domain socket.
//!
//! Requests are addressed to the logical host `localhost`; where the bytes
//! actually go is decided by the [`Connector`]. The production
//! [`UnixConnector`] always dials the snapd socket.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tracing::debug;

/// Host every snapd request is addressed to.
pub const SNAPD_HOST: &str = "localhost";

/// Body type accepted by [`Transport::call`].
pub type RequestBody = BoxBody<Bytes, io::Error>;

/// Errors from the snapd transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("failed to connect to snapd at {target}: {source}")]
    Connect { target: String, source: io::Error },

    #[error("HTTP handshake failed: {0}")]
    Handshake(String),

    #[error("failed to build request: {0}")]
    Build(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("snapd returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("snapd request timed out after {0:?}")]
    Timeout(Duration),
}

/// Opens the byte stream a request is sent over.
pub trait Connector: Send + Sync + 'static {
    type Io: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Open a fresh connection.
    fn connect(&self) -> impl Future<Output = io::Result<Self::Io>> + Send;

    /// Human-readable description of where connections go.
    fn target(&self) -> String;
}

/// Dials a fixed Unix socket path.
#[derive(Debug, Clone)]
pub struct UnixConnector {
    socket_path: PathBuf,
}

impl UnixConnector {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }
}

impl Connector for UnixConnector {
    type Io = UnixStream;

    fn connect(&self) -> impl Future<Output = io::Result<Self::Io>> + Send {
        let path = self.socket_path.clone();
        async move { UnixStream::connect(path).await }
    }

    fn target(&self) -> String {
        self.socket_path.display().to_string()
    }
}

/// Aborts the background connection driver when the request is finished or
/// abandoned, which also drops the request body it was reading.
struct ConnectionTask(JoinHandle<()>);

impl Drop for ConnectionTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// One-connection-per-request HTTP client for the snapd API.
#[derive(Debug, Clone)]
pub struct Transport<C = UnixConnector> {
    connector: C,
    timeout: Option<Duration>,
}

impl<C: Connector> Transport<C> {
    /// Create a transport with no request deadline.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            timeout: None,
        }
    }

    /// Set (or clear) the deadline applied to each request.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Issue a request and return the body of a successful response.
    ///
    /// Only `POST` and `GET` are supported; anything else fails before a
    /// connection is opened. `GET` requests are sent without a body.
    pub async fn call(
        &self,
        method: &str,
        path: &str,
        content_type: Option<&str>,
        body: Option<RequestBody>,
    ) -> Result<Bytes, TransportError> {
        let (method, body) = match method {
            "POST" => (Method::POST, body.unwrap_or_else(empty_body)),
            "GET" => (Method::GET, empty_body()),
            other => return Err(TransportError::UnsupportedMethod(other.to_string())),
        };

        let request = self.send(method, path, content_type, body);
        match self.timeout {
            None => request.await,
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        content_type: Option<&str>,
        body: RequestBody,
    ) -> Result<Bytes, TransportError> {
        let stream = self
            .connector
            .connect()
            .await
            .map_err(|source| TransportError::Connect {
                target: self.connector.target(),
                source,
            })?;

        let (mut sender, conn) =
            hyper::client::conn::http1::handshake::<_, RequestBody>(TokioIo::new(stream))
                .await
                .map_err(|e| TransportError::Handshake(error_chain(&e)))?;

        // Drive the connection in the background
        let _conn = ConnectionTask(tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "snapd connection closed with error");
            }
        }));

        debug!(%method, path, "snapd request");

        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, SNAPD_HOST);
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        let req = builder
            .body(body)
            .map_err(|e| TransportError::Build(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| TransportError::Request(error_chain(&e)))?;

        let status = resp.status();
        let resp_body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| {
                TransportError::Request(format!(
                    "failed to read response body: {}",
                    error_chain(&e)
                ))
            })?
            .to_bytes();

        debug!(status = status.as_u16(), bytes = resp_body.len(), "snapd response");

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&resp_body).into_owned(),
            });
        }

        Ok(resp_body)
    }
}

/// An empty request body.
pub fn empty_body() -> RequestBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

/// A request body held fully in memory.
pub fn full_body(data: impl Into<Bytes>) -> RequestBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

/// Render an error together with its chain of sources.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::Request as AxumRequest;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use tokio::net::UnixListener;

    use super::*;

    /// Connector that records connection attempts and always fails.
    #[derive(Default)]
    struct CountingConnector {
        attempts: Arc<AtomicUsize>,
    }

    impl Connector for CountingConnector {
        type Io = UnixStream;

        fn connect(&self) -> impl Future<Output = io::Result<Self::Io>> + Send {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(io::Error::from(io::ErrorKind::ConnectionRefused)) }
        }

        fn target(&self) -> String {
            "counting".to_string()
        }
    }

    fn spawn_server(path: &Path, app: axum::Router) {
        let listener = UnixListener::bind(path).unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
    }

    fn test_router() -> axum::Router {
        axum::Router::new()
            .route(
                "/v2/snaps",
                get(|| async { r#"{"type":"sync","result":[]}"# }),
            )
            .route(
                "/echo",
                post(|req: AxumRequest| async move {
                    let host = req.headers()[HOST].to_str().unwrap().to_string();
                    let content_type = req.headers()[CONTENT_TYPE].to_str().unwrap().to_string();
                    let body = axum::body::to_bytes(req.into_body(), usize::MAX)
                        .await
                        .unwrap();
                    format!("{host}|{content_type}|{}", String::from_utf8_lossy(&body))
                }),
            )
            .route(
                "/fail",
                post(|| async { (StatusCode::BAD_REQUEST, r#"{"type":"error"}"#) }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    "late"
                }),
            )
    }

    #[tokio::test]
    async fn test_unsupported_method_fails_before_connecting() {
        let connector = CountingConnector::default();
        let attempts = Arc::clone(&connector.attempts);
        let transport = Transport::new(connector);

        let err = transport
            .call("DELETE", "/v2/snaps", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedMethod(ref m) if m == "DELETE"));
        assert_eq!(err.to_string(), "unsupported method: DELETE");
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_error_names_the_socket() {
        let dir = TempDir::new().unwrap();
        let sock = dir.path().join("missing.socket");
        let transport = Transport::new(UnixConnector::new(&sock));

        let err = transport
            .call("GET", "/v2/snaps", None, None)
            .await
            .unwrap_err();
        match err {
            TransportError::Connect { target, .. } => assert_eq!(target, sock.display().to_string()),
            other => panic!("expected connect error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_returns_body() {
        let dir = TempDir::new().unwrap();
        let sock = dir.path().join("snapd.socket");
        spawn_server(&sock, test_router());

        let transport = Transport::new(UnixConnector::new(&sock));
        let body = transport.call("GET", "/v2/snaps", None, None).await.unwrap();
        assert_eq!(&body[..], br#"{"type":"sync","result":[]}"#);
    }

    #[tokio::test]
    async fn test_post_sends_host_content_type_and_body() {
        let dir = TempDir::new().unwrap();
        let sock = dir.path().join("snapd.socket");
        spawn_server(&sock, test_router());

        let transport = Transport::new(UnixConnector::new(&sock));
        let body = transport
            .call(
                "POST",
                "/echo",
                Some("application/x.ubuntu.assertion"),
                Some(full_body("ASSERT-BYTES")),
            )
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(body.to_vec()).unwrap(),
            "localhost|application/x.ubuntu.assertion|ASSERT-BYTES"
        );
    }

    #[tokio::test]
    async fn test_aborted_body_stream_fails_the_request() {
        let dir = TempDir::new().unwrap();
        let sock = dir.path().join("snapd.socket");
        spawn_server(&sock, test_router());

        let (mut writer, reader) = crate::snapd::pipe::pipe(4);
        writer.write(Bytes::from_static(b"partial")).await.unwrap();
        writer
            .close_with_error(io::Error::other("encoder failed"))
            .await;

        let transport = Transport::new(UnixConnector::new(&sock));
        let err = transport
            .call("POST", "/echo", Some("text/plain"), Some(reader.boxed()))
            .await
            .unwrap_err();
        match err {
            TransportError::Request(msg) => assert!(msg.contains("encoder failed"), "{msg}"),
            other => panic!("expected request error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_status_is_reported_with_raw_body() {
        let dir = TempDir::new().unwrap();
        let sock = dir.path().join("snapd.socket");
        spawn_server(&sock, test_router());

        let transport = Transport::new(UnixConnector::new(&sock));
        let err = transport
            .call("POST", "/fail", Some("text/plain"), None)
            .await
            .unwrap_err();
        match err {
            TransportError::Status { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, r#"{"type":"error"}"#);
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deadline_cancels_slow_request() {
        let dir = TempDir::new().unwrap();
        let sock = dir.path().join("snapd.socket");
        spawn_server(&sock, test_router());

        let transport = Transport::new(UnixConnector::new(&sock))
            .with_timeout(Some(Duration::from_millis(100)));
        let err = transport.call("GET", "/slow", None, None).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[test]
    fn test_error_chain_includes_sources() {
        #[derive(Debug, thiserror::Error)]
        #[error("outer")]
        struct Outer(#[source] io::Error);

        let err = Outer(io::Error::other("inner"));
        assert_eq!(error_chain(&err), "outer: inner");
    }
}
