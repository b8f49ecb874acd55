//! Sideload web service.
//!
//! A small HTTP/JSON API in front of the snapd client:
//!
//! ```text
//! ┌──────────┐   GET /<name>/<revision>   ┌─────────────┐   Unix socket   ┌───────┐
//! │ operator │───────────────────────────▶│   service   │────────────────▶│ snapd │
//! │          │   GET /list                │   (axum)    │   HTTP/1.1      │       │
//! └──────────┘                            └─────────────┘                 └───────┘
//! ```

pub mod server;
pub mod types;

pub use server::{ServiceError, ServiceState, bind, router, serve};
pub use types::{Envelope, ResponseType};
