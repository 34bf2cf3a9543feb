//! # CloudSync Testkit
//!
//! Test utilities for CloudSync.
//!
//! This crate provides:
//! - Test entities, simulated devices and temporary file shares
//! - Property-based test generators using proptest
//! - Fault-injecting provider wrappers for forcing races and failures
//! - Multi-device workloads and convergence checks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cloudsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn devices_converge() {
//!     let remote = MemoryCloudProvider::new();
//!     let a = TestDevice::new(remote.clone());
//!     let b = TestDevice::new(remote.clone());
//!
//!     a.write(1, "hello").await;
//!     a.sync().await;
//!     b.sync().await;
//!     assert_eq!(b.note(1).await, Some(Note::new(1, "hello")));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod providers;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::providers::*;
    pub use crate::stress::*;
    pub use cloudsync_engine::MemoryCloudProvider;
}

pub use fixtures::*;
pub use generators::*;
pub use providers::*;
pub use stress::*;
