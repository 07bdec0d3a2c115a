//! Execution engine contract.
//!
//! Concrete backends (native process, containerized process) live outside the
//! core; it only selects by bundle kind, invokes `execute`, and hands the
//! captured streams to the output parser. The factory's `verify` runs once at
//! startup and `clean` is driven by the container-cleanup timer.

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{Bundle, BundleKind, ExecutionRequest};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} execution engine is not enabled")]
    Disabled(&'static str),

    #[error("engine setup failed: {0}")]
    Setup(String),

    #[error("command execution failed: {0}")]
    Execution(String),
}

/// Captured output of one command invocation.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[async_trait]
pub trait Engine: Send + Sync {
    async fn execute(
        &self,
        request: &ExecutionRequest,
        bundle: &Bundle,
    ) -> Result<ExecOutput, EngineError>;
}

/// Engine construction and maintenance, injected into the relay.
pub trait EngineFactory: Send + Sync {
    fn create(&self, kind: BundleKind) -> Result<Box<dyn Engine>, EngineError>;

    /// Startup check of the container runtime. Called only when the container
    /// engine is enabled.
    fn verify(&self) -> Result<(), EngineError>;

    /// Reap dead containers, returning how many were removed.
    fn clean(&self) -> Result<usize, EngineError>;
}
