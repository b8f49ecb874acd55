//! Streaming `multipart/form-data` encoder for snap installs.
//!
//! [`MultipartWriter`] produces the framing (part headers and boundaries) as
//! small [`Bytes`] chunks; [`stream_install`] interleaves them with the snap
//! file contents and pushes everything into a [`PipeWriter`], one
//! [`CHUNK_SIZE`] read at a time, so the file is never held in memory.

use std::path::{Path, PathBuf};

use hyper::body::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use super::pipe::PipeWriter;

/// Size of a single read from the snap file.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Form field carrying the snap file contents.
pub const FILE_FIELD: &str = "snap";

/// Text fields of a snapd install request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallForm {
    /// Snap name; omitted from the form when empty.
    pub name: String,
    /// Path of the snap file; omitted from the form when empty.
    pub snap_path: PathBuf,
}

impl InstallForm {
    pub fn new(name: impl Into<String>, snap_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            snap_path: snap_path.into(),
        }
    }

    /// Text fields in wire order, with empty values dropped.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        [
            ("action", "install".to_string()),
            ("name", self.name.clone()),
            ("snap-path", self.snap_path.to_string_lossy().into_owned()),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .collect()
    }

    /// Filename reported for the file part: the base name of the snap path.
    pub fn file_name(&self) -> String {
        base_name(&self.snap_path)
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Produces the framing of a `multipart/form-data` body.
///
/// Callers emit, in order, any number of [`field`](Self::field) and
/// [`file_part`](Self::file_part) chunks (file contents are written by the
/// caller directly after a file-part header), then [`finish`](Self::finish).
#[derive(Debug, Clone)]
pub struct MultipartWriter {
    boundary: String,
    wrote_part: bool,
}

impl MultipartWriter {
    /// Create a writer with a random boundary.
    pub fn new() -> Self {
        Self::with_boundary(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Create a writer with a fixed boundary.
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            wrote_part: false,
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// The `Content-Type` header value for the body, including the boundary.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// A complete text field part.
    pub fn field(&mut self, name: &str, value: &str) -> Bytes {
        let mut out = self.part_header(&format!(
            "Content-Disposition: form-data; name=\"{}\"\r\n",
            escape_quotes(name)
        ));
        out.push_str(value);
        Bytes::from(out)
    }

    /// The header of a file part; the file contents follow it.
    pub fn file_part(&mut self, field: &str, file_name: &str) -> Bytes {
        Bytes::from(self.part_header(&format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
             Content-Type: application/octet-stream\r\n",
            escape_quotes(field),
            escape_quotes(file_name)
        )))
    }

    /// The closing boundary.
    pub fn finish(&mut self) -> Bytes {
        let lead = if self.wrote_part { "\r\n" } else { "" };
        Bytes::from(format!("{lead}--{}--\r\n", self.boundary))
    }

    fn part_header(&mut self, headers: &str) -> String {
        let lead = if self.wrote_part { "\r\n" } else { "" };
        self.wrote_part = true;
        format!("{lead}--{}\r\n{headers}\r\n", self.boundary)
    }
}

impl Default for MultipartWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Encode an install form plus the snap file into `pipe`.
///
/// Runs until the whole body is written or the first failure. On success the
/// pipe is closed cleanly; on failure it is aborted with the error so the
/// HTTP request reading the other end fails too. `file` is dropped before the
/// pipe is finished, on every path.
pub async fn stream_install<R>(
    form: InstallForm,
    file: R,
    writer: MultipartWriter,
    mut pipe: PipeWriter,
) where
    R: AsyncRead + Unpin,
{
    match write_install(&form, file, writer, &mut pipe).await {
        Ok(copied) => {
            debug!(name = %form.name, bytes = copied, "snap upload encoded");
            pipe.close();
        }
        Err(e) => {
            warn!(name = %form.name, error = %e, "snap upload encoding aborted");
            pipe.close_with_error(e).await;
        }
    }
}

async fn write_install<R>(
    form: &InstallForm,
    mut file: R,
    mut writer: MultipartWriter,
    pipe: &mut PipeWriter,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    for (name, value) in form.fields() {
        pipe.write(writer.field(name, &value)).await?;
    }
    let header = writer.file_part(FILE_FIELD, &form.file_name());
    pipe.write(header).await?;

    let mut copied = 0u64;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        pipe.write(Bytes::copy_from_slice(&buf[..n])).await?;
        copied += n as u64;
    }
    drop(file);

    pipe.write(writer.finish()).await?;
    Ok(copied)
}
