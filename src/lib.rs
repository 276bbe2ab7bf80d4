#![forbid(unsafe_code)]

//! Protocol test harness for line-delimited JSON-RPC tool servers.

pub mod config;
pub mod errors;
pub mod idempotency;
pub mod invoker;
pub mod protocol;
pub mod report;
pub mod scenario;
pub mod session;
pub mod stats;
pub mod supervisor;

pub use config::HarnessConfig;
pub use errors::{AppError, Result};
