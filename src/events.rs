//! Events delivered back into a flow fiber.
//!
//! The executor never advances a flow directly; asynchronous results come
//! back as [`FlowEvent`]s scheduled on the fiber's mailbox and are consumed
//! by the state machine in FIFO order.

use crate::errors::FlowError;
use crate::ledger::CommittedTransaction;

/// An asynchronous result fed back into a fiber's state machine.
///
/// Closed union: the state machine matches exhaustively, so adding a variant
/// is a compile-time change at every consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    /// A tracked ledger transaction committed.
    TransactionCommitted(CommittedTransaction),
    /// An [`AsyncFlowOperation`](crate::async_ops::AsyncFlowOperation)
    /// completed with a result.
    AsyncOperationCompletion(serde_json::Value),
    /// An async operation's deferred future failed.
    AsyncOperationThrows(FlowError),
    /// A collaborator failed on behalf of this flow.
    Error(FlowError),
    /// A timed sleep elapsed (or was interrupted by shutdown).
    Wakeup,
}

impl FlowEvent {
    /// Short label used in logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            FlowEvent::TransactionCommitted(_) => "transaction_committed",
            FlowEvent::AsyncOperationCompletion(_) => "async_operation_completion",
            FlowEvent::AsyncOperationThrows(_) => "async_operation_throws",
            FlowEvent::Error(_) => "error",
            FlowEvent::Wakeup => "wakeup",
        }
    }
}
