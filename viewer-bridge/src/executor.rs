//! Script submission into the sandbox.
//!
//! Submission is fire-and-forget: `execute` returns as soon as the script is
//! handed over. Results come back later through the inbound callback path.

use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Sandbox is closed")]
    Closed,

    #[error("Sandbox rejected script: {0}")]
    Rejected(String),
}

/// Anything that can hand executable text to the sandbox.
pub trait ScriptExecutor: Send + Sync {
    fn execute(&self, script: &str) -> Result<(), ExecutorError>;
}

/// Forwards scripts to the thread that owns the sandbox.
///
/// Hosts whose embedding API must be driven from a UI thread drain the
/// receiver there and feed each script to the sandbox in order.
#[derive(Debug, Clone)]
pub struct ChannelExecutor {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelExecutor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ScriptExecutor for ChannelExecutor {
    fn execute(&self, script: &str) -> Result<(), ExecutorError> {
        self.tx
            .send(script.to_string())
            .map_err(|_| ExecutorError::Closed)
    }
}
