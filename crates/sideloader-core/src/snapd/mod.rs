//! snapd REST API client.
//!
//! snapd only listens on a Unix domain socket, so every request is issued
//! against the logical base address `http://localhost` while the
//! [`transport`] dials the socket directly.
//!
//! ## Install data flow
//!
//! ```text
//! ┌────────────┐  chunks   ┌──────────┐  request body  ┌───────────┐   Unix socket   ┌───────┐
//! │ .snap file │──────────▶│ encoder  │───── pipe ────▶│ transport │────────────────▶│ snapd │
//! └────────────┘  64 KiB   │ (task)   │  (bounded)     │  (hyper)  │  HTTP/1.1       └───────┘
//!                          └──────────┘                └───────────┘
//! ```

pub mod client;
pub mod multipart;
pub mod pipe;
pub mod transport;

pub use client::{SnapClient, Snapd, SnapdError};
pub use multipart::{InstallForm, MultipartWriter};
pub use pipe::{PipeReader, PipeWriter, pipe};
pub use transport::{Connector, Transport, TransportError, UnixConnector};

/// Endpoint for acknowledging assertions.
pub const URL_ASSERTIONS: &str = "/v2/assertions";

/// Endpoint for installing and listing snaps.
pub const URL_SNAPS: &str = "/v2/snaps";

/// Content type snapd expects for assertion bodies.
pub const TYPE_ASSERTION: &str = "application/x.ubuntu.assertion";
