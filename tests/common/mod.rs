//! Shared test support: recording collaborators and executor fixtures.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use uuid::Uuid;

use spindle::async_ops::{AsyncFlowOperation, OperationError};
use spindle::checkpoint::FlowState;
use spindle::clock::ManualClock;
use spindle::database::TransactionContext;
use spindle::executor::ActionExecutor;
use spindle::ledger::{CommittedTransaction, SoftLockRegistry, TrackerError, TransactionTracker};
use spindle::manager::{FlowRemovalReason, StateMachineManager};
use spindle::messaging::{DeduplicationError, DeduplicationHandler, InMemoryFlowMessaging};
use spindle::storage::{InMemoryCheckpointStorage, MemoryDatabase};
use spindle::types::{FlowId, SessionId, TransactionHash};

/// One observed call on the recording manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerCall {
    AddSessionBinding(FlowId, SessionId),
    RemoveSessionBindings(Vec<SessionId>),
    SignalFlowHasStarted(FlowId),
    RemoveFlow(FlowId, FlowRemovalReason),
    RetryFromSafePoint(FlowId),
    ScheduleFlowTimeout(FlowId),
    CancelFlowTimeout(FlowId),
}

#[derive(Default)]
pub struct RecordingManager {
    calls: Mutex<Vec<ManagerCall>>,
}

impl RecordingManager {
    pub fn calls(&self) -> Vec<ManagerCall> {
        self.calls.lock().clone()
    }
}

impl StateMachineManager for RecordingManager {
    fn add_session_binding(&self, flow_id: FlowId, session_id: SessionId) {
        self.calls
            .lock()
            .push(ManagerCall::AddSessionBinding(flow_id, session_id));
    }

    fn remove_session_bindings(&self, session_ids: &[SessionId]) {
        self.calls
            .lock()
            .push(ManagerCall::RemoveSessionBindings(session_ids.to_vec()));
    }

    fn signal_flow_has_started(&self, flow_id: FlowId) {
        self.calls
            .lock()
            .push(ManagerCall::SignalFlowHasStarted(flow_id));
    }

    fn remove_flow(&self, flow_id: FlowId, reason: FlowRemovalReason, _last_state: FlowState) {
        self.calls
            .lock()
            .push(ManagerCall::RemoveFlow(flow_id, reason));
    }

    fn retry_flow_from_safe_point(&self, current_state: FlowState) {
        self.calls
            .lock()
            .push(ManagerCall::RetryFromSafePoint(current_state.flow_id));
    }

    fn schedule_flow_timeout(&self, flow_id: FlowId) {
        self.calls
            .lock()
            .push(ManagerCall::ScheduleFlowTimeout(flow_id));
    }

    fn cancel_flow_timeout(&self, flow_id: FlowId) {
        self.calls
            .lock()
            .push(ManagerCall::CancelFlowTimeout(flow_id));
    }
}

/// Deduplication handler writing its hook invocations into a shared journal.
#[derive(Debug)]
pub struct JournalingDedupHandler {
    name: &'static str,
    journal: Arc<Mutex<Vec<String>>>,
    fail_inside: bool,
    fail_after: bool,
}

impl JournalingDedupHandler {
    pub fn new(name: &'static str, journal: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name,
            journal,
            fail_inside: false,
            fail_after: false,
        }
    }

    pub fn failing_inside(mut self) -> Self {
        self.fail_inside = true;
        self
    }

    pub fn failing_after(mut self) -> Self {
        self.fail_after = true;
        self
    }
}

#[async_trait]
impl DeduplicationHandler for JournalingDedupHandler {
    async fn inside_database_transaction(
        &self,
        _ctx: &mut TransactionContext,
    ) -> Result<(), DeduplicationError> {
        self.journal.lock().push(format!("inside:{}", self.name));
        if self.fail_inside {
            return Err(DeduplicationError::Hook {
                message: format!("{} refused to record", self.name),
            });
        }
        Ok(())
    }

    async fn after_database_transaction(&self) -> Result<(), DeduplicationError> {
        self.journal.lock().push(format!("after:{}", self.name));
        if self.fail_after {
            return Err(DeduplicationError::Hook {
                message: format!("{} failed to acknowledge", self.name),
            });
        }
        Ok(())
    }
}

/// Tracker resolving immediately with a fixed outcome.
pub struct ImmediateTracker {
    pub fail_with: Option<String>,
}

impl ImmediateTracker {
    pub fn committing() -> Self {
        Self { fail_with: None }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
        }
    }
}

impl TransactionTracker for ImmediateTracker {
    fn track_transaction(
        &self,
        hash: TransactionHash,
    ) -> BoxFuture<'static, Result<CommittedTransaction, TrackerError>> {
        match &self.fail_with {
            None => async move { Ok(CommittedTransaction { hash }) }.boxed(),
            Some(message) => {
                let message = message.clone();
                async move { Err(TrackerError::Unavailable { message }) }.boxed()
            }
        }
    }
}

#[derive(Default)]
pub struct RecordingSoftLocks {
    released: Mutex<Vec<Uuid>>,
}

impl RecordingSoftLocks {
    pub fn released(&self) -> Vec<Uuid> {
        self.released.lock().clone()
    }
}

impl SoftLockRegistry for RecordingSoftLocks {
    fn release_soft_locks(&self, lock_id: Uuid) {
        self.released.lock().push(lock_id);
    }
}

/// Async operation with a scripted outcome.
#[derive(Debug)]
pub enum ScriptedOperation {
    CompleteWith(serde_json::Value),
    FailWith(String),
    RefuseToStart(String),
}

impl AsyncFlowOperation for ScriptedOperation {
    fn execute(
        &self,
        _deduplication_id: spindle::types::DeduplicationId,
    ) -> Result<BoxFuture<'static, Result<serde_json::Value, OperationError>>, OperationError> {
        match self {
            ScriptedOperation::CompleteWith(value) => {
                let value = value.clone();
                Ok(async move { Ok(value) }.boxed())
            }
            ScriptedOperation::FailWith(message) => {
                let message = message.clone();
                Ok(async move { Err(OperationError::failed(message)) }.boxed())
            }
            ScriptedOperation::RefuseToStart(message) => {
                Err(OperationError::rejected(message.clone()))
            }
        }
    }
}

/// An executor wired to recording collaborators and a manual clock.
pub struct Harness {
    pub executor: ActionExecutor,
    pub database: MemoryDatabase,
    pub storage: Arc<InMemoryCheckpointStorage>,
    pub messaging: InMemoryFlowMessaging,
    pub manager: Arc<RecordingManager>,
    pub soft_locks: Arc<RecordingSoftLocks>,
    pub clock: Arc<ManualClock>,
    pub sender_uuid: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_tracker(ImmediateTracker::committing())
    }

    pub fn with_tracker(tracker: ImmediateTracker) -> Self {
        spindle::telemetry::init_tracing();
        let database = MemoryDatabase::new();
        let storage = Arc::new(InMemoryCheckpointStorage::new(database.clone()));
        let messaging = InMemoryFlowMessaging::new();
        let manager = Arc::new(RecordingManager::default());
        let soft_locks = Arc::new(RecordingSoftLocks::default());
        let clock = Arc::new(ManualClock::starting_at(Utc::now()));
        let sender_uuid = Uuid::new_v4();
        let executor = ActionExecutor::new(
            Arc::clone(&storage) as _,
            Arc::new(messaging.clone()) as _,
            Arc::clone(&manager) as _,
            Arc::new(tracker) as _,
            Arc::clone(&soft_locks) as _,
            Arc::new(database.clone()) as _,
        )
        .with_clock(Arc::clone(&clock) as _)
        .with_sender_uuid(sender_uuid);
        Self {
            executor,
            database,
            storage,
            messaging,
            manager,
            soft_locks,
            clock,
            sender_uuid,
        }
    }
}
