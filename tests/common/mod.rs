//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - A call-counting wrapper around `MemoryStore`
//! - A replicator that hands out arms the test can drive
//! - A reporter that records replication errors
//! - Monitor construction helpers

pub mod mock_store;

pub use mock_store::*;
