//! FWA Test Kit - fixtures and helpers for testing the firewall agent crates
//!
//! - [`fixtures`]: ready-made subjects and policies
//! - [`RecordingProgress`]: shared recorder for `(processed, total)` updates
//! - tracing setup for test output
//!
//! # Example
//!
//! ```rust,ignore
//! use fwa_testkit::{fixtures, init_test_tracing, RecordingProgress};
//!
//! #[tokio::test]
//! async fn applies_deny_all() {
//!     init_test_tracing();
//!     let progress = RecordingProgress::new();
//!     let outcome = engine
//!         .submit_desired_policies(
//!             vec![fixtures::deny_all(fixtures::app(1))],
//!             PlanScope::Full,
//!             progress.sink(),
//!         )
//!         .await
//!         .unwrap();
//!     assert_eq!(progress.last(), Some((1, 1)));
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod fixtures;
mod progress;
mod tracing_config;

pub use progress::*;
pub use tracing_config::*;
