//! Deferred operations executed on behalf of a suspended flow.

use futures_util::future::BoxFuture;
use miette::Diagnostic;
use thiserror::Error;

use crate::types::DeduplicationId;

#[derive(Debug, Error, Diagnostic)]
pub enum OperationError {
    #[error("async operation failed: {message}")]
    #[diagnostic(code(spindle::async_op::failed))]
    Failed { message: String },

    #[error("async operation rejected its arguments: {message}")]
    #[diagnostic(
        code(spindle::async_op::rejected),
        help("The operation refused to start; the state machine decides whether to retry or hospitalize.")
    )]
    Rejected { message: String },
}

impl OperationError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}

/// A long-running operation a flow hands off instead of blocking its fiber.
///
/// `execute` must return promptly with the deferred result. Failing to
/// *start* (the outer `Err`) is distinct from the deferred work failing (the
/// inner `Err`): the former surfaces to the state machine as an
/// `AsyncOperationTransition` error, the latter is delivered as an
/// `AsyncOperationThrows` event. The deduplication id makes a replayed
/// attempt after retry-from-safe-point idempotent on the operation's side.
pub trait AsyncFlowOperation: Send + Sync + std::fmt::Debug {
    fn execute(
        &self,
        deduplication_id: DeduplicationId,
    ) -> Result<BoxFuture<'static, Result<serde_json::Value, OperationError>>, OperationError>;
}
