//! Database transaction context.
//!
//! The executor binds at most one database transaction to a fiber at a time.
//! The original design kept the transaction in fiber-local ambient state;
//! here it is an explicit [`TransactionContext`] passed by reference through
//! action execution, which preserves the one-transaction-per-fiber invariant
//! without global mutable state.

use std::any::Any;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DatabaseError {
    /// Opening a transaction while one is already bound is a programmer
    /// error in the state machine's action sequence.
    #[error("a database transaction is already bound to this fiber")]
    #[diagnostic(
        code(spindle::database::already_bound),
        help("The state machine must commit or roll back before emitting CreateTransaction again.")
    )]
    AlreadyBound,

    #[error("no database transaction is bound to this fiber")]
    #[diagnostic(
        code(spindle::database::not_bound),
        help("Emit CreateTransaction before transactional actions.")
    )]
    NotBound,

    #[error("database backend error: {message}")]
    #[diagnostic(code(spindle::database::backend))]
    Backend { message: String },
}

/// One open database transaction.
///
/// `commit` and `rollback` consume the transaction, so a committed or rolled
/// back transaction cannot be touched again and there is no separate close
/// step whose failure could mask a commit error.
#[async_trait]
pub trait DatabaseTransaction: Send {
    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError>;

    /// Backend pairing hook: storage implementations downcast to their own
    /// transaction type to stage writes into it.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Opens database transactions.
#[async_trait]
pub trait DatabaseProvider: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn DatabaseTransaction>, DatabaseError>;
}

/// The (at most one) transaction bound to an executing fiber.
///
/// # Examples
///
/// ```rust
/// use spindle::database::TransactionContext;
///
/// let ctx = TransactionContext::new();
/// assert!(!ctx.is_bound());
/// ```
#[derive(Default)]
pub struct TransactionContext {
    transaction: Option<Box<dyn DatabaseTransaction>>,
}

impl TransactionContext {
    #[must_use]
    pub fn new() -> Self {
        Self { transaction: None }
    }

    pub fn is_bound(&self) -> bool {
        self.transaction.is_some()
    }

    /// Bind a freshly opened transaction.
    pub fn bind(&mut self, transaction: Box<dyn DatabaseTransaction>) -> Result<(), DatabaseError> {
        if self.transaction.is_some() {
            return Err(DatabaseError::AlreadyBound);
        }
        self.transaction = Some(transaction);
        Ok(())
    }

    /// Take the bound transaction, leaving the context unbound.
    pub fn take(&mut self) -> Option<Box<dyn DatabaseTransaction>> {
        self.transaction.take()
    }

    /// Mutable access to the bound transaction.
    pub fn transaction_mut(&mut self) -> Result<&mut (dyn DatabaseTransaction + '_), DatabaseError> {
        match self.transaction.as_mut() {
            Some(transaction) => Ok(transaction.as_mut()),
            None => Err(DatabaseError::NotBound),
        }
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("bound", &self.is_bound())
            .finish()
    }
}
