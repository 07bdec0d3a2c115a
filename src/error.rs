//! Fatal startup errors surfaced from [`Relay::start`](crate::relay::Relay::start).
//!
//! Runtime failures on the worker path never appear here: malformed payloads
//! are logged and dropped, and execution failures become error responses
//! published on the request's reply topic.

use thiserror::Error;

use crate::bus::BusError;
use crate::engines::EngineError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid Relay configuration detected. At least one execution engine must be enabled.")]
    NoExecutionEngines,

    #[error("execution engine verification failed: {0}")]
    EngineVerification(#[source] EngineError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("relay is already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, RelayError>;
