mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use common::{Harness, JournalingDedupHandler};
use spindle::actions::Action;
use spindle::checkpoint::Checkpoint;
use spindle::database::{DatabaseError, TransactionContext};
use spindle::executor::ActionError;
use spindle::fiber::fiber_channel;
use spindle::storage::{CheckpointStorage, StorageError};
use spindle::types::FlowId;

#[tokio::test]
async fn create_then_rollback_leaves_no_transaction_and_no_effects() {
    let h = Harness::new();
    let flow_id = FlowId::random();
    let (fiber, _events) = fiber_channel(flow_id);
    let mut ctx = TransactionContext::new();

    h.executor
        .execute(&fiber, &mut ctx, Action::CreateTransaction)
        .await
        .unwrap();
    h.executor
        .execute(
            &fiber,
            &mut ctx,
            Action::PersistCheckpoint {
                flow_id,
                checkpoint: Checkpoint::initial(flow_id, json!({"pc": 0})),
                is_update: false,
            },
        )
        .await
        .unwrap();
    h.executor
        .execute(&fiber, &mut ctx, Action::RollbackTransaction)
        .await
        .unwrap();

    assert!(!ctx.is_bound());
    assert_eq!(h.storage.load_checkpoint(flow_id).await.unwrap(), None);
    assert_eq!(h.database.committed_count(), 0);
}

#[tokio::test]
async fn double_create_transaction_is_a_programmer_error() {
    let h = Harness::new();
    let (fiber, _events) = fiber_channel(FlowId::random());
    let mut ctx = TransactionContext::new();

    h.executor
        .execute(&fiber, &mut ctx, Action::CreateTransaction)
        .await
        .unwrap();
    let err = h
        .executor
        .execute(&fiber, &mut ctx, Action::CreateTransaction)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ActionError::Database(DatabaseError::AlreadyBound)
    ));
    // The original transaction is still bound and usable.
    assert!(ctx.is_bound());
}

#[tokio::test]
async fn rollback_is_idempotent_against_absence() {
    let h = Harness::new();
    let (fiber, _events) = fiber_channel(FlowId::random());
    let mut ctx = TransactionContext::new();

    h.executor
        .execute(&fiber, &mut ctx, Action::RollbackTransaction)
        .await
        .unwrap();
    assert!(!ctx.is_bound());
}

#[tokio::test]
async fn commit_without_transaction_fails() {
    let h = Harness::new();
    let (fiber, _events) = fiber_channel(FlowId::random());
    let mut ctx = TransactionContext::new();

    let err = h
        .executor
        .execute(&fiber, &mut ctx, Action::CommitTransaction)
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::Database(DatabaseError::NotBound)));
}

#[tokio::test]
async fn failed_commit_unbinds_and_persists_nothing() {
    let h = Harness::new();
    let flow_id = FlowId::random();
    let (fiber, _events) = fiber_channel(flow_id);
    let mut ctx = TransactionContext::new();

    let journal = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(JournalingDedupHandler::new("h1", Arc::clone(&journal)));

    h.executor
        .execute(&fiber, &mut ctx, Action::CreateTransaction)
        .await
        .unwrap();
    h.executor
        .execute(
            &fiber,
            &mut ctx,
            Action::PersistCheckpoint {
                flow_id,
                checkpoint: Checkpoint::initial(flow_id, json!({"pc": 7})),
                is_update: false,
            },
        )
        .await
        .unwrap();
    h.executor
        .execute(
            &fiber,
            &mut ctx,
            Action::PersistDeduplicationFacts {
                handlers: vec![handler],
            },
        )
        .await
        .unwrap();

    h.database.fail_next_commit("disk full");
    let err = h
        .executor
        .execute(&fiber, &mut ctx, Action::CommitTransaction)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ActionError::Database(DatabaseError::Backend { .. })
    ));

    // The exception escaped before the state machine would have emitted
    // AcknowledgeMessages: no post-commit hook ran, nothing is observable,
    // and no transaction is left bound to the fiber.
    assert!(!ctx.is_bound());
    assert_eq!(*journal.lock(), vec!["inside:h1"]);
    assert_eq!(h.storage.load_checkpoint(flow_id).await.unwrap(), None);
}

#[tokio::test]
async fn transactional_writes_require_a_bound_transaction() {
    let h = Harness::new();
    let flow_id = FlowId::random();
    let (fiber, _events) = fiber_channel(flow_id);
    let mut ctx = TransactionContext::new();

    let err = h
        .executor
        .execute(
            &fiber,
            &mut ctx,
            Action::PersistCheckpoint {
                flow_id,
                checkpoint: Checkpoint::initial(flow_id, json!(null)),
                is_update: false,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ActionError::Storage(StorageError::Database(DatabaseError::NotBound))
    ));
}
