//! tmon Protocol - Wire envelopes for the remote authority
//!
//! This crate describes the HTTP surface of the task orchestrator: which
//! endpoints exist, the envelopes they return, and lenient parsers for the
//! fields whose encoding differs between orchestrator builds.

pub mod error;
pub mod message;
pub mod parse;

pub use error::ProtocolError;
pub use message::{Endpoint, HistoryPageResponse, HttpMethod, StopRequest, TaskStats, TreeResponse};
pub use parse::{parse_go_duration, RawDuration, RawHistoryStats};
