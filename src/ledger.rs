//! Ledger-facing collaborator traits.
//!
//! Transaction verification and the vault data model live outside this
//! crate; the executor only needs to arm commit notifications and release
//! soft locks.

use futures_util::future::BoxFuture;
use miette::Diagnostic;
use thiserror::Error;
use uuid::Uuid;

use crate::types::TransactionHash;

/// A transaction the ledger reports as committed.
///
/// Opaque to the executor; handed to the state machine inside a
/// [`FlowEvent::TransactionCommitted`](crate::events::FlowEvent::TransactionCommitted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTransaction {
    pub hash: TransactionHash,
}

#[derive(Debug, Error, Diagnostic)]
pub enum TrackerError {
    #[error("transaction {hash} was rejected by verification")]
    #[diagnostic(code(spindle::ledger::rejected))]
    Rejected { hash: TransactionHash },

    #[error("ledger tracker unavailable: {message}")]
    #[diagnostic(code(spindle::ledger::unavailable))]
    Unavailable { message: String },
}

/// Subscribes to commit notifications for a transaction hash.
///
/// `track_transaction` must return promptly; the returned future resolves
/// when the transaction commits (or the subscription fails). The executor
/// awaits it on a spawned task, never on the fiber's carrier thread.
pub trait TransactionTracker: Send + Sync {
    fn track_transaction(
        &self,
        hash: TransactionHash,
    ) -> BoxFuture<'static, Result<CommittedTransaction, TrackerError>>;
}

/// Releases vault soft locks held on behalf of a flow.
pub trait SoftLockRegistry: Send + Sync {
    fn release_soft_locks(&self, lock_id: Uuid);
}
