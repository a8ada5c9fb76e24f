//! # qbsync testkit
//!
//! Test utilities for qbsync.
//!
//! This crate provides:
//! - Canned server configuration and a QuickBooks stand-in
//!   ([`QuickBooksDouble`]) that answers phase queries
//! - A scripted Web Connector client ([`ScriptedClient`]) that drives a
//!   `SyncServer` through SOAP envelopes
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use qbsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn syncs_everything() {
//!     let server = test_server();
//!     let mut client = ScriptedClient::new(&server);
//!     let run = client
//!         .run_sync(&QuickBooksDouble::new(), TEST_USER, TEST_PASSWORD, TEST_COMPANY_FILE)
//!         .await
//!         .unwrap();
//!     assert!(run.completed());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::client::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use client::*;
pub use fixtures::*;
pub use generators::*;
