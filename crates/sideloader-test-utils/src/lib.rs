#![deny(unsafe_code)]

//! Shared test utilities for the snap-sideloader workspace.
//!
//! Provides a fake snapd daemon, a multipart body parser, staging helpers for
//! download directories and config builders so that individual crate tests
//! stay concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! sideloader-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod fake_snapd;
pub mod multipart;
pub mod staging;

pub use fake_snapd::{FakeSnapd, RecordedRequest};
pub use multipart::{Part, parse_multipart};
pub use staging::StagedSnap;
