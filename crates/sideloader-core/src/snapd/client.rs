//! Typed snapd API client and the sideload orchestration.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use http_body_util::BodyExt;
use hyper::body::Bytes;
use tracing::{debug, info};

use sideloader_config::SnapdConfig;

use super::multipart::{InstallForm, MultipartWriter, stream_install};
use super::pipe::{DEFAULT_CAPACITY, pipe};
use super::transport::{Connector, Transport, TransportError, UnixConnector, full_body};
use super::{TYPE_ASSERTION, URL_ASSERTIONS, URL_SNAPS};
use crate::BoxFuture;

/// Errors from snapd API operations.
#[derive(Debug, thiserror::Error)]
pub enum SnapdError {
    #[error("cannot read assertion {path}: {source}")]
    ReadAssertion { path: PathBuf, source: io::Error },

    #[error("cannot open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Path of the assertion for `name` at `revision` inside `dir`.
pub fn assertion_path(dir: &Path, name: &str, revision: &str) -> PathBuf {
    dir.join(format!("{name}_{revision}.assert"))
}

/// Path of the snap file for `name` at `revision` inside `dir`.
pub fn snap_path(dir: &Path, name: &str, revision: &str) -> PathBuf {
    dir.join(format!("{name}_{revision}.snap"))
}

/// Operations the web service needs from snapd.
pub trait SnapClient: Send + Sync {
    /// Directory holding pre-staged assertions and snaps.
    fn download_dir(&self) -> &Path;

    /// Acknowledge a (snap) assertion.
    fn ack<'a>(&'a self, assertion: &'a [u8]) -> BoxFuture<'a, Result<(), SnapdError>>;

    /// Install a snap from a local file, streaming it to snapd.
    fn install_path<'a>(
        &'a self,
        name: &'a str,
        file_path: &'a Path,
    ) -> BoxFuture<'a, Result<(), SnapdError>>;

    /// Raw JSON of snapd's installed-snaps listing.
    fn list(&self) -> BoxFuture<'_, Result<Bytes, SnapdError>>;

    /// Sideload a pre-staged snap: acknowledge its assertion, then install it.
    ///
    /// Reads `<name>_<revision>.assert` and installs `<name>_<revision>.snap`
    /// from [`download_dir`](Self::download_dir). If the assertion cannot be
    /// read or acknowledged, no install is attempted.
    ///
    /// The two steps are not transactional. When the install fails after a
    /// successful acknowledge, the assertion stays acknowledged in snapd;
    /// sideloading again once the cause is fixed is the way to recover, since
    /// acknowledging the same assertion twice is harmless.
    fn sideload<'a>(
        &'a self,
        name: &'a str,
        revision: &'a str,
    ) -> BoxFuture<'a, Result<(), SnapdError>> {
        Box::pin(async move {
            let assert_path = assertion_path(self.download_dir(), name, revision);
            let snap_file = snap_path(self.download_dir(), name, revision);
            info!(name, revision, "sideloading snap");

            let assertion = tokio::fs::read(&assert_path).await.map_err(|source| {
                SnapdError::ReadAssertion {
                    path: assert_path.clone(),
                    source,
                }
            })?;
            self.ack(&assertion).await?;
            drop(assertion);
            debug!(name, revision, "assertion acknowledged");

            self.install_path(name, &snap_file).await?;
            info!(name, revision, "snap submitted");
            Ok(())
        })
    }
}

/// snapd REST API client.
#[derive(Debug, Clone)]
pub struct Snapd<C = UnixConnector> {
    download_dir: PathBuf,
    transport: Transport<C>,
    pipe_capacity: usize,
}

impl Snapd {
    /// Client for the snapd socket at `socket_path`.
    pub fn new(download_dir: impl Into<PathBuf>, socket_path: impl Into<PathBuf>) -> Self {
        Self::with_connector(download_dir, UnixConnector::new(socket_path))
    }

    /// Client built from the `[snapd]` configuration section.
    pub fn from_config(config: &SnapdConfig) -> Self {
        Self::new(&config.download_dir, &config.socket_path).with_timeout(config.timeout())
    }
}

impl<C: Connector> Snapd<C> {
    /// Client sending its requests through `connector`.
    pub fn with_connector(download_dir: impl Into<PathBuf>, connector: C) -> Self {
        Self {
            download_dir: download_dir.into(),
            transport: Transport::new(connector),
            pipe_capacity: DEFAULT_CAPACITY,
        }
    }

    /// Apply a deadline to every snapd request.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transport = self.transport.with_timeout(timeout);
        self
    }

    /// Number of chunks that may be queued between the encoder and the
    /// connection during an install.
    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity.max(1);
        self
    }

    async fn ack_bytes(&self, assertion: &[u8]) -> Result<(), SnapdError> {
        self.transport
            .call(
                "POST",
                URL_ASSERTIONS,
                Some(TYPE_ASSERTION),
                Some(full_body(Bytes::copy_from_slice(assertion))),
            )
            .await?;
        Ok(())
    }

    async fn install_file(&self, name: &str, file_path: &Path) -> Result<(), SnapdError> {
        let file =
            tokio::fs::File::open(file_path)
                .await
                .map_err(|source| SnapdError::Open {
                    path: file_path.to_path_buf(),
                    source,
                })?;

        let (writer, reader) = pipe(self.pipe_capacity);
        let multipart = MultipartWriter::new();
        let content_type = multipart.content_type();

        debug!(name, path = %file_path.display(), "streaming snap to snapd");
        tokio::spawn(stream_install(
            InstallForm::new(name, file_path),
            file,
            multipart,
            writer,
        ));

        self.transport
            .call("POST", URL_SNAPS, Some(&content_type), Some(reader.boxed()))
            .await?;
        Ok(())
    }

    async fn list_snaps(&self) -> Result<Bytes, SnapdError> {
        Ok(self.transport.call("GET", URL_SNAPS, None, None).await?)
    }
}

impl<C: Connector> SnapClient for Snapd<C> {
    fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    fn ack<'a>(&'a self, assertion: &'a [u8]) -> BoxFuture<'a, Result<(), SnapdError>> {
        Box::pin(self.ack_bytes(assertion))
    }

    fn install_path<'a>(
        &'a self,
        name: &'a str,
        file_path: &'a Path,
    ) -> BoxFuture<'a, Result<(), SnapdError>> {
        Box::pin(self.install_file(name, file_path))
    }

    fn list(&self) -> BoxFuture<'_, Result<Bytes, SnapdError>> {
        Box::pin(self.list_snaps())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    /// Records the calls the default `sideload` makes.
    struct Recorder {
        dir: PathBuf,
        fail_ack: bool,
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new(dir: &Path, fail_ack: bool) -> Self {
            Self {
                dir: dir.to_path_buf(),
                fail_ack,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SnapClient for Recorder {
        fn download_dir(&self) -> &Path {
            &self.dir
        }

        fn ack<'a>(&'a self, assertion: &'a [u8]) -> BoxFuture<'a, Result<(), SnapdError>> {
            Box::pin(async move {
                self.calls
                    .lock()
                    .unwrap()
                    .push(format!("ack:{}", String::from_utf8_lossy(assertion)));
                if self.fail_ack {
                    return Err(TransportError::Status {
                        status: 400,
                        body: "bad assertion".to_string(),
                    }
                    .into());
                }
                Ok(())
            })
        }

        fn install_path<'a>(
            &'a self,
            name: &'a str,
            file_path: &'a Path,
        ) -> BoxFuture<'a, Result<(), SnapdError>> {
            Box::pin(async move {
                self.calls
                    .lock()
                    .unwrap()
                    .push(format!("install:{name}:{}", file_path.display()));
                Ok(())
            })
        }

        fn list(&self) -> BoxFuture<'_, Result<Bytes, SnapdError>> {
            Box::pin(async { Ok(Bytes::new()) })
        }
    }

    #[test]
    fn test_download_paths() {
        let dir = Path::new("/tmp/snaps");
        assert_eq!(
            assertion_path(dir, "hello", "42"),
            PathBuf::from("/tmp/snaps/hello_42.assert")
        );
        assert_eq!(
            snap_path(dir, "hello", "42"),
            PathBuf::from("/tmp/snaps/hello_42.snap")
        );
    }

    #[tokio::test]
    async fn test_sideload_acks_before_install() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hello_42.assert"), "ASSERT-BYTES").unwrap();
        let client = Recorder::new(dir.path(), false);

        client.sideload("hello", "42").await.unwrap();

        let snap = dir.path().join("hello_42.snap");
        assert_eq!(
            client.calls(),
            vec![
                "ack:ASSERT-BYTES".to_string(),
                format!("install:hello:{}", snap.display()),
            ]
        );
    }

    #[tokio::test]
    async fn test_sideload_missing_assertion_makes_no_calls() {
        let dir = TempDir::new().unwrap();
        let client = Recorder::new(dir.path(), false);

        let err = client.sideload("hello", "42").await.unwrap_err();
        match err {
            SnapdError::ReadAssertion { path, source } => {
                assert_eq!(path, dir.path().join("hello_42.assert"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected read error, got {other:?}"),
        }
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sideload_ack_failure_skips_install() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hello_42.assert"), "ASSERT-BYTES").unwrap();
        let client = Recorder::new(dir.path(), true);

        let err = client.sideload("hello", "42").await.unwrap_err();
        assert!(matches!(
            err,
            SnapdError::Transport(TransportError::Status { status: 400, .. })
        ));
        assert_eq!(client.calls(), vec!["ack:ASSERT-BYTES".to_string()]);
    }

    #[tokio::test]
    async fn test_install_missing_file_is_open_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope_1.snap");
        let client = Snapd::new(dir.path(), dir.path().join("snapd.socket"));

        let err = client.install_path("nope", &missing).await.unwrap_err();
        assert!(matches!(err, SnapdError::Open { ref path, .. } if path == &missing));
        assert!(err.to_string().starts_with("cannot open"));
    }

    #[test]
    fn test_from_config_uses_download_dir() {
        let config = SnapdConfig {
            socket_path: PathBuf::from("/tmp/test-snapd.socket"),
            download_dir: PathBuf::from("/srv/snaps"),
            timeout_secs: 5,
        };
        let client = Snapd::from_config(&config);
        assert_eq!(client.download_dir(), Path::new("/srv/snaps"));
        assert_eq!(
            client.transport.connector().target(),
            "/tmp/test-snapd.socket"
        );
    }
}
