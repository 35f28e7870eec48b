//! Testing utilities for apitrace
//!
//! The [`MockCollector`] stands in for the metrics collector in integration
//! tests: it records every request it receives and answers with canned
//! [`MockReply`]s.

pub mod reply;
pub mod server;

pub use reply::MockReply;
pub use server::{MockCollector, RecordedRequest};
