#![deny(unsafe_code)]

//! snap-sideloader core.
//!
//! Installs pre-staged snaps through the local snapd daemon: the assertion is
//! acknowledged first, then the snap file is streamed to snapd as a
//! multipart upload. The [`snapd`] module talks to the daemon over its Unix
//! socket; the [`service`] module exposes sideloading over HTTP.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future, the return type for async
/// trait methods that need dynamic dispatch (`dyn Trait`).
///
/// Native `async fn` in traits produces opaque return types that are not
/// object-safe, so traits consumed as `Arc<dyn Trait>` return a concrete
/// `Pin<Box<dyn Future>>` instead.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// HTTP web service that routes requests to sideload and list calls.
pub mod service;

/// snapd REST API client over the Unix domain socket.
pub mod snapd;

pub use snapd::{SnapClient, Snapd, SnapdError};
