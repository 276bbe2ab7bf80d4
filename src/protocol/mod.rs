//! Wire protocol: envelopes, payload types and the request correlator.

pub mod correlator;
pub mod envelope;
pub mod messages;

pub use correlator::RequestCorrelator;
pub use envelope::{Inbound, Notification, Request, Response, ResponseBody, RpcError};
