//! Checkpoint storage.
//!
//! Durable key/value mapping from flow id to serialized checkpoint bytes,
//! transactionally co-located with the application database: every write
//! goes through the database transaction bound to the executing fiber, so a
//! checkpoint and the business effects it represents commit or vanish
//! together.
//!
//! Two backends ship in-tree:
//! * [`InMemoryCheckpointStorage`] — volatile, for tests and ephemeral runs.
//! * `SqliteCheckpointStorage` — durable, behind the `sqlite` feature.

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

use crate::database::{
    DatabaseError, DatabaseProvider, DatabaseTransaction, TransactionContext,
};
use crate::types::FlowId;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    /// A checkpoint is added exactly once per flow; later writes must be
    /// updates.
    #[error("checkpoint already exists for flow {flow_id}")]
    #[diagnostic(
        code(spindle::storage::already_added),
        help("Persist with is_update = true after the first suspension.")
    )]
    AlreadyAdded { flow_id: FlowId },

    #[error("no checkpoint to update for flow {flow_id}")]
    #[diagnostic(
        code(spindle::storage::missing),
        help("Persist with is_update = false on the first suspension.")
    )]
    MissingCheckpoint { flow_id: FlowId },

    /// The bound transaction was opened by a different database backend.
    #[error("transaction backend mismatch: {message}")]
    #[diagnostic(code(spindle::storage::backend_mismatch))]
    BackendMismatch { message: String },

    #[error(transparent)]
    #[diagnostic(code(spindle::storage::database))]
    Database(#[from] DatabaseError),

    #[error("backend error: {message}")]
    #[diagnostic(code(spindle::storage::backend))]
    Backend { message: String },
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Durable storage for serialized flow checkpoints.
///
/// All writes participate in the database transaction bound to `ctx`; they
/// become observable only when that transaction commits. `load_checkpoint`
/// reads committed state outside any transaction and backs
/// retry-from-safe-point.
#[async_trait]
pub trait CheckpointStorage: Send + Sync {
    /// Record the first checkpoint for a flow. Fails with
    /// [`StorageError::AlreadyAdded`] if one exists (committed or staged).
    async fn add_checkpoint(
        &self,
        ctx: &mut TransactionContext,
        flow_id: FlowId,
        bytes: &[u8],
    ) -> Result<()>;

    /// Replace an existing checkpoint. Fails with
    /// [`StorageError::MissingCheckpoint`] if none exists.
    async fn update_checkpoint(
        &self,
        ctx: &mut TransactionContext,
        flow_id: FlowId,
        bytes: &[u8],
    ) -> Result<()>;

    /// Delete a flow's checkpoint on termination. Idempotent: removing an
    /// absent checkpoint is a no-op.
    async fn remove_checkpoint(&self, ctx: &mut TransactionContext, flow_id: FlowId) -> Result<()>;

    /// Read the committed checkpoint bytes for a flow, if any.
    async fn load_checkpoint(&self, flow_id: FlowId) -> Result<Option<Vec<u8>>>;
}

type SharedCheckpoints = Arc<Mutex<FxHashMap<FlowId, Vec<u8>>>>;

/// In-memory database whose transactions stage checkpoint writes and apply
/// them atomically on commit.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    committed: SharedCheckpoints,
    fail_commit: Arc<Mutex<Option<String>>>,
}

impl MemoryDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next transaction commit fail with `message`. Test hook for
    /// commit-failure paths.
    pub fn fail_next_commit(&self, message: impl Into<String>) {
        *self.fail_commit.lock() = Some(message.into());
    }

    /// Committed view, bypassing any open transaction. Test observability.
    #[must_use]
    pub fn committed_checkpoint(&self, flow_id: FlowId) -> Option<Vec<u8>> {
        self.committed.lock().get(&flow_id).cloned()
    }

    pub fn committed_count(&self) -> usize {
        self.committed.lock().len()
    }
}

#[async_trait]
impl DatabaseProvider for MemoryDatabase {
    async fn begin(&self) -> std::result::Result<Box<dyn DatabaseTransaction>, DatabaseError> {
        Ok(Box::new(MemoryTransaction {
            committed: Arc::clone(&self.committed),
            fail_commit: Arc::clone(&self.fail_commit),
            staged: Vec::new(),
        }))
    }
}

enum StagedOp {
    Put(FlowId, Vec<u8>),
    Remove(FlowId),
}

/// One open transaction against a [`MemoryDatabase`].
pub struct MemoryTransaction {
    committed: SharedCheckpoints,
    fail_commit: Arc<Mutex<Option<String>>>,
    staged: Vec<StagedOp>,
}

impl MemoryTransaction {
    /// Whether `flow_id` has a checkpoint visible to this transaction
    /// (committed and not staged-removed, or staged-put).
    fn sees_checkpoint(&self, flow_id: FlowId) -> bool {
        let mut present = self.committed.lock().contains_key(&flow_id);
        for op in &self.staged {
            match op {
                StagedOp::Put(id, _) if *id == flow_id => present = true,
                StagedOp::Remove(id) if *id == flow_id => present = false,
                _ => {}
            }
        }
        present
    }

    pub(crate) fn stage_add(&mut self, flow_id: FlowId, bytes: &[u8]) -> Result<()> {
        if self.sees_checkpoint(flow_id) {
            return Err(StorageError::AlreadyAdded { flow_id });
        }
        self.staged.push(StagedOp::Put(flow_id, bytes.to_vec()));
        Ok(())
    }

    pub(crate) fn stage_update(&mut self, flow_id: FlowId, bytes: &[u8]) -> Result<()> {
        if !self.sees_checkpoint(flow_id) {
            return Err(StorageError::MissingCheckpoint { flow_id });
        }
        self.staged.push(StagedOp::Put(flow_id, bytes.to_vec()));
        Ok(())
    }

    pub(crate) fn stage_remove(&mut self, flow_id: FlowId) -> Result<()> {
        // Removal is idempotent: removing an absent checkpoint is a no-op,
        // so crash replays and never-checkpointed flows terminate cleanly.
        self.staged.push(StagedOp::Remove(flow_id));
        Ok(())
    }
}

#[async_trait]
impl DatabaseTransaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> std::result::Result<(), DatabaseError> {
        if let Some(message) = self.fail_commit.lock().take() {
            return Err(DatabaseError::Backend { message });
        }
        let mut committed = self.committed.lock();
        for op in self.staged {
            match op {
                StagedOp::Put(id, bytes) => {
                    committed.insert(id, bytes);
                }
                StagedOp::Remove(id) => {
                    committed.remove(&id);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> std::result::Result<(), DatabaseError> {
        // Staged ops are simply dropped.
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Volatile checkpoint storage over a [`MemoryDatabase`].
#[derive(Clone)]
pub struct InMemoryCheckpointStorage {
    database: MemoryDatabase,
}

impl InMemoryCheckpointStorage {
    /// Storage sharing state with `database`: writes staged through its
    /// transactions become visible to `load_checkpoint` on commit.
    #[must_use]
    pub fn new(database: MemoryDatabase) -> Self {
        Self { database }
    }

    fn memory_tx<'a>(
        ctx: &'a mut TransactionContext,
    ) -> Result<&'a mut MemoryTransaction> {
        let tx = ctx.transaction_mut()?;
        tx.as_any_mut()
            .downcast_mut::<MemoryTransaction>()
            .ok_or_else(|| StorageError::BackendMismatch {
                message: "bound transaction is not a MemoryTransaction".to_string(),
            })
    }
}

#[async_trait]
impl CheckpointStorage for InMemoryCheckpointStorage {
    async fn add_checkpoint(
        &self,
        ctx: &mut TransactionContext,
        flow_id: FlowId,
        bytes: &[u8],
    ) -> Result<()> {
        Self::memory_tx(ctx)?.stage_add(flow_id, bytes)
    }

    async fn update_checkpoint(
        &self,
        ctx: &mut TransactionContext,
        flow_id: FlowId,
        bytes: &[u8],
    ) -> Result<()> {
        Self::memory_tx(ctx)?.stage_update(flow_id, bytes)
    }

    async fn remove_checkpoint(&self, ctx: &mut TransactionContext, flow_id: FlowId) -> Result<()> {
        Self::memory_tx(ctx)?.stage_remove(flow_id)
    }

    async fn load_checkpoint(&self, flow_id: FlowId) -> Result<Option<Vec<u8>>> {
        Ok(self.database.committed_checkpoint(flow_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn staged_writes_are_invisible_until_commit() {
        let db = MemoryDatabase::new();
        let storage = InMemoryCheckpointStorage::new(db.clone());
        let flow_id = FlowId::random();

        let mut ctx = TransactionContext::new();
        ctx.bind(db.begin().await.unwrap()).unwrap();
        storage
            .add_checkpoint(&mut ctx, flow_id, b"cp1")
            .await
            .unwrap();
        assert_eq!(storage.load_checkpoint(flow_id).await.unwrap(), None);

        ctx.take().unwrap().commit().await.unwrap();
        assert_eq!(
            storage.load_checkpoint(flow_id).await.unwrap(),
            Some(b"cp1".to_vec())
        );
    }

    #[tokio::test]
    async fn add_twice_is_a_storage_error() {
        let db = MemoryDatabase::new();
        let storage = InMemoryCheckpointStorage::new(db.clone());
        let flow_id = FlowId::random();

        let mut ctx = TransactionContext::new();
        ctx.bind(db.begin().await.unwrap()).unwrap();
        storage
            .add_checkpoint(&mut ctx, flow_id, b"a")
            .await
            .unwrap();
        let err = storage
            .add_checkpoint(&mut ctx, flow_id, b"b")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyAdded { .. }));
    }

    #[tokio::test]
    async fn update_requires_existing_checkpoint() {
        let db = MemoryDatabase::new();
        let storage = InMemoryCheckpointStorage::new(db.clone());
        let mut ctx = TransactionContext::new();
        ctx.bind(db.begin().await.unwrap()).unwrap();
        let err = storage
            .update_checkpoint(&mut ctx, FlowId::random(), b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MissingCheckpoint { .. }));
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let db = MemoryDatabase::new();
        let storage = InMemoryCheckpointStorage::new(db.clone());
        let flow_id = FlowId::random();

        let mut ctx = TransactionContext::new();
        ctx.bind(db.begin().await.unwrap()).unwrap();
        storage
            .add_checkpoint(&mut ctx, flow_id, b"cp")
            .await
            .unwrap();
        ctx.take().unwrap().rollback().await.unwrap();
        assert_eq!(storage.load_checkpoint(flow_id).await.unwrap(), None);
        assert_eq!(db.committed_count(), 0);
    }

    #[tokio::test]
    async fn remove_then_commit_deletes() {
        let db = MemoryDatabase::new();
        let storage = InMemoryCheckpointStorage::new(db.clone());
        let flow_id = FlowId::random();

        let mut ctx = TransactionContext::new();
        ctx.bind(db.begin().await.unwrap()).unwrap();
        storage
            .add_checkpoint(&mut ctx, flow_id, b"cp")
            .await
            .unwrap();
        ctx.take().unwrap().commit().await.unwrap();

        let mut ctx = TransactionContext::new();
        ctx.bind(db.begin().await.unwrap()).unwrap();
        storage.remove_checkpoint(&mut ctx, flow_id).await.unwrap();
        ctx.take().unwrap().commit().await.unwrap();
        assert_eq!(storage.load_checkpoint(flow_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn remove_of_absent_checkpoint_is_a_noop() {
        let db = MemoryDatabase::new();
        let storage = InMemoryCheckpointStorage::new(db.clone());
        let flow_id = FlowId::random();

        let mut ctx = TransactionContext::new();
        ctx.bind(db.begin().await.unwrap()).unwrap();
        storage.remove_checkpoint(&mut ctx, flow_id).await.unwrap();
        ctx.take().unwrap().commit().await.unwrap();
        assert_eq!(db.committed_count(), 0);

        // A replayed remove after the row is already gone is equally fine.
        let mut ctx = TransactionContext::new();
        ctx.bind(db.begin().await.unwrap()).unwrap();
        storage
            .add_checkpoint(&mut ctx, flow_id, b"cp")
            .await
            .unwrap();
        storage.remove_checkpoint(&mut ctx, flow_id).await.unwrap();
        storage.remove_checkpoint(&mut ctx, flow_id).await.unwrap();
        ctx.take().unwrap().commit().await.unwrap();
        assert_eq!(storage.load_checkpoint(flow_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn writes_without_transaction_fail() {
        let db = MemoryDatabase::new();
        let storage = InMemoryCheckpointStorage::new(db);
        let mut ctx = TransactionContext::new();
        let err = storage
            .add_checkpoint(&mut ctx, FlowId::random(), b"x")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Database(DatabaseError::NotBound)
        ));
    }
}
