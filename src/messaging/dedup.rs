//! Per-inbound-message deduplication handlers.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::database::{DatabaseError, TransactionContext};

#[derive(Debug, Error, Diagnostic)]
pub enum DeduplicationError {
    #[error("deduplication hook failed: {message}")]
    #[diagnostic(code(spindle::dedup::hook))]
    Hook { message: String },

    #[error(transparent)]
    #[diagnostic(code(spindle::dedup::database))]
    Database(#[from] DatabaseError),
}

/// Two-phase lifecycle of one inbound message's deduplication.
///
/// `inside_database_transaction` idempotently records the receipt fact; it
/// runs inside the fiber's bound transaction so the fact commits atomically
/// with the transition it caused. `after_database_transaction` acknowledges
/// the message to the broker and runs only after a successful commit; its
/// failure merely risks a redelivery the recorded fact already covers.
#[async_trait]
pub trait DeduplicationHandler: Send + Sync + std::fmt::Debug {
    async fn inside_database_transaction(
        &self,
        ctx: &mut TransactionContext,
    ) -> Result<(), DeduplicationError>;

    async fn after_database_transaction(&self) -> Result<(), DeduplicationError>;
}
