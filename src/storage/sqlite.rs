/*!
SQLite checkpoint storage

This module provides the SQLite-backed implementation of the
`CheckpointStorage` trait, plus the matching `DatabaseProvider` whose
transactions the storage writes through.

## Behavior

- Checkpoint bytes live in a single `checkpoints` table keyed by the
  encoded flow id.
- Every write runs inside the `sqlx` transaction bound to the executing
  fiber; nothing is observable until that transaction commits.
- When the `sqlite-migrations` feature is enabled (default), embedded
  migrations (`sqlx::migrate!("./migrations")`) are executed on connect;
  disabling the feature assumes external migration orchestration.

## Design Goals

- Keep this module focused on database I/O; add-once/update-must-exist
  validation is expressed as SQL existence checks so it holds under
  concurrent nodes sharing one database.
*/

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::instrument;

use crate::database::{
    DatabaseError, DatabaseProvider, DatabaseTransaction, TransactionContext,
};
use crate::storage::{CheckpointStorage, Result, StorageError};
use crate::types::FlowId;

#[derive(Debug, Error, Diagnostic)]
pub enum SqliteStorageError {
    #[error("SQLx error: {0}")]
    #[diagnostic(
        code(spindle::sqlite::sqlx),
        help("Ensure the SQLite database URL is valid and accessible.")
    )]
    Sqlx(#[from] sqlx::Error),

    #[error("migration failure: {0}")]
    #[diagnostic(
        code(spindle::sqlite::migrate),
        help("Check the embedded migrations or run them externally.")
    )]
    Migrate(String),
}

impl From<SqliteStorageError> for StorageError {
    fn from(e: SqliteStorageError) -> Self {
        StorageError::Backend {
            message: e.to_string(),
        }
    }
}

/// SQLite-backed database provider.
///
/// Checkpoints share the pool with the application's own tables, which is
/// what makes checkpoint-plus-business-effects atomicity possible: both are
/// written through the same bound transaction.
pub struct SqliteDatabase {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDatabase").finish()
    }
}

impl SqliteDatabase {
    /// Connect (or create) a SQLite database at `database_url`.
    /// Example URL: "sqlite://spindle.db?mode=rwc"
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(SqliteStorageError::Sqlx)?;
        #[cfg(feature = "sqlite-migrations")]
        {
            if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
                return Err(SqliteStorageError::Migrate(e.to_string()).into());
            }
        }
        #[cfg(not(feature = "sqlite-migrations"))]
        {
            // Feature disabled: assume external migration orchestration already applied schema.
        }
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    #[must_use]
    pub fn pool(&self) -> Arc<SqlitePool> {
        Arc::clone(&self.pool)
    }
}

#[async_trait]
impl DatabaseProvider for SqliteDatabase {
    async fn begin(&self) -> std::result::Result<Box<dyn DatabaseTransaction>, DatabaseError> {
        let tx = self.pool.begin().await.map_err(|e| DatabaseError::Backend {
            message: e.to_string(),
        })?;
        Ok(Box::new(SqliteTransaction { tx }))
    }
}

/// One open `sqlx` transaction.
pub struct SqliteTransaction {
    tx: sqlx::Transaction<'static, sqlx::Sqlite>,
}

#[async_trait]
impl DatabaseTransaction for SqliteTransaction {
    async fn commit(self: Box<Self>) -> std::result::Result<(), DatabaseError> {
        self.tx.commit().await.map_err(|e| DatabaseError::Backend {
            message: e.to_string(),
        })
    }

    async fn rollback(self: Box<Self>) -> std::result::Result<(), DatabaseError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| DatabaseError::Backend {
                message: e.to_string(),
            })
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Durable checkpoint storage over a [`SqliteDatabase`].
pub struct SqliteCheckpointStorage {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteCheckpointStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCheckpointStorage").finish()
    }
}

impl SqliteCheckpointStorage {
    /// Storage writing through transactions opened by `database`.
    #[must_use]
    pub fn new(database: &SqliteDatabase) -> Self {
        Self {
            pool: database.pool(),
        }
    }

    fn sqlite_tx<'a>(ctx: &'a mut TransactionContext) -> Result<&'a mut SqliteTransaction> {
        let tx = ctx.transaction_mut()?;
        tx.as_any_mut()
            .downcast_mut::<SqliteTransaction>()
            .ok_or_else(|| StorageError::BackendMismatch {
                message: "bound transaction is not a SqliteTransaction".to_string(),
            })
    }

    async fn exists(tx: &mut SqliteTransaction, flow_id: FlowId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM checkpoints WHERE flow_id = ?1")
            .bind(flow_id.encode())
            .fetch_optional(&mut *tx.tx)
            .await
            .map_err(SqliteStorageError::Sqlx)?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl CheckpointStorage for SqliteCheckpointStorage {
    #[instrument(skip(self, ctx, bytes), err)]
    async fn add_checkpoint(
        &self,
        ctx: &mut TransactionContext,
        flow_id: FlowId,
        bytes: &[u8],
    ) -> Result<()> {
        let tx = Self::sqlite_tx(ctx)?;
        if Self::exists(tx, flow_id).await? {
            return Err(StorageError::AlreadyAdded { flow_id });
        }
        sqlx::query(
            "INSERT INTO checkpoints (flow_id, checkpoint_blob, updated_at) \
             VALUES (?1, ?2, CURRENT_TIMESTAMP)",
        )
        .bind(flow_id.encode())
        .bind(bytes)
        .execute(&mut *tx.tx)
        .await
        .map_err(SqliteStorageError::Sqlx)?;
        Ok(())
    }

    #[instrument(skip(self, ctx, bytes), err)]
    async fn update_checkpoint(
        &self,
        ctx: &mut TransactionContext,
        flow_id: FlowId,
        bytes: &[u8],
    ) -> Result<()> {
        let tx = Self::sqlite_tx(ctx)?;
        let result = sqlx::query(
            "UPDATE checkpoints SET checkpoint_blob = ?2, updated_at = CURRENT_TIMESTAMP \
             WHERE flow_id = ?1",
        )
        .bind(flow_id.encode())
        .bind(bytes)
        .execute(&mut *tx.tx)
        .await
        .map_err(SqliteStorageError::Sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::MissingCheckpoint { flow_id });
        }
        Ok(())
    }

    #[instrument(skip(self, ctx), err)]
    async fn remove_checkpoint(&self, ctx: &mut TransactionContext, flow_id: FlowId) -> Result<()> {
        let tx = Self::sqlite_tx(ctx)?;
        // Idempotent: deleting an absent row is a no-op.
        sqlx::query("DELETE FROM checkpoints WHERE flow_id = ?1")
            .bind(flow_id.encode())
            .execute(&mut *tx.tx)
            .await
            .map_err(SqliteStorageError::Sqlx)?;
        Ok(())
    }

    async fn load_checkpoint(&self, flow_id: FlowId) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT checkpoint_blob FROM checkpoints WHERE flow_id = ?1")
            .bind(flow_id.encode())
            .fetch_optional(&*self.pool)
            .await
            .map_err(SqliteStorageError::Sqlx)?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>(0)))
    }
}
