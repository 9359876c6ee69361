//! The action executor.
//!
//! Bottom layer of the flow runtime: receives `(fiber, action)` pairs from
//! the state machine and realizes each action against durable storage, the
//! messaging fabric, the manager, and the database. This is the correctness
//! linchpin — errors here corrupt durable flow state or duplicate
//! peer-visible messages — so the contracts are strict:
//!
//! * dispatch over [`Action`] is exhaustive, with no fallthrough;
//! * actions execute in the order the transition emitted them;
//! * deduplication facts persist inside the transaction, acknowledgements
//!   run only after commit and never fail the transition;
//! * every peer-visible send carries a deduplication id derivable from
//!   checkpointed state, so crash replays produce bit-identical sends.
//!
//! Exceptions escape to the state machine layer, which classifies them
//! (retryable, fatal, hospitalize) — the executor recovers locally only
//! where an operation contract explicitly says so.

pub mod metrics;

use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;
use tracing::{info, instrument, trace, warn};
use uuid::Uuid;

use crate::actions::Action;
use crate::async_ops::{AsyncFlowOperation, OperationError};
use crate::checkpoint::{
    Checkpoint, CheckpointSerializer, FlowState, JsonCheckpointSerializer, SerializationContext,
    SerializationError,
};
use crate::clock::{Clock, SystemClock};
use crate::database::{DatabaseError, DatabaseProvider, TransactionContext};
use crate::errors::FlowError;
use crate::events::FlowEvent;
use crate::fiber::FlowFiber;
use crate::ledger::{SoftLockRegistry, TransactionTracker};
use crate::manager::{FlowRemovalReason, StateMachineManager};
use crate::messaging::{
    DeduplicationHandler, ExistingSessionMessage, FlowMessaging, InitialSessionMessage,
    MessagingError, SessionMessage,
};
use crate::session::SessionState;
use crate::storage::{CheckpointStorage, StorageError};
use crate::types::{
    DeduplicationId, FlowId, PartyId, SenderDeduplicationId, TransactionHash,
};

use metrics::{CheckpointMetrics, MetricsRegistry};

#[derive(Debug, Error, Diagnostic)]
pub enum ActionError {
    #[error(transparent)]
    #[diagnostic(code(spindle::executor::database))]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    #[diagnostic(code(spindle::executor::storage))]
    Storage(#[from] StorageError),

    #[error(transparent)]
    #[diagnostic(code(spindle::executor::serialization))]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    #[diagnostic(code(spindle::executor::messaging))]
    Messaging(#[from] MessagingError),

    #[error("deduplication fact recording failed: {0}")]
    #[diagnostic(code(spindle::executor::deduplication))]
    Deduplication(#[from] crate::messaging::DeduplicationError),

    /// An async operation failed to start. Not recovered locally; the state
    /// machine decides whether to retry or hospitalize.
    #[error("async operation transition failed: {source}")]
    #[diagnostic(code(spindle::executor::async_transition))]
    AsyncOperationTransition {
        #[source]
        source: OperationError,
    },
}

pub type Result<T> = std::result::Result<T, ActionError>;

/// Executes the side effects of flow state-machine transitions.
///
/// Stateless with respect to flows: per-flow state lives in checkpoints and
/// in the manager, and the fiber's transaction travels in the explicit
/// [`TransactionContext`]. The executor owns only its metric primitives.
///
/// # Examples
///
/// ```rust,no_run
/// use spindle::actions::Action;
/// use spindle::database::TransactionContext;
/// use spindle::executor::ActionExecutor;
/// use spindle::fiber::fiber_channel;
/// use spindle::types::FlowId;
///
/// # async fn example(executor: ActionExecutor) -> Result<(), Box<dyn std::error::Error>> {
/// let (fiber, _events) = fiber_channel(FlowId::random());
/// let mut ctx = TransactionContext::new();
///
/// executor.execute(&fiber, &mut ctx, Action::CreateTransaction).await?;
/// // ... persist checkpoint, dedup facts ...
/// executor.execute(&fiber, &mut ctx, Action::CommitTransaction).await?;
/// # Ok(())
/// # }
/// ```
pub struct ActionExecutor {
    checkpoint_storage: Arc<dyn CheckpointStorage>,
    messaging: Arc<dyn FlowMessaging>,
    manager: Arc<dyn StateMachineManager>,
    tracker: Arc<dyn TransactionTracker>,
    soft_locks: Arc<dyn SoftLockRegistry>,
    database: Arc<dyn DatabaseProvider>,
    serializer: Arc<dyn CheckpointSerializer>,
    serialization_context: SerializationContext,
    clock: Arc<dyn Clock>,
    registry: Arc<MetricsRegistry>,
    metrics: CheckpointMetrics,
    sender_uuid: Uuid,
}

impl ActionExecutor {
    /// Create an executor over the six required collaborators, with the
    /// JSON serializer, system clock, a fresh metrics registry, and a
    /// random sender UUID. Use the `with_*` builders to override.
    pub fn new(
        checkpoint_storage: Arc<dyn CheckpointStorage>,
        messaging: Arc<dyn FlowMessaging>,
        manager: Arc<dyn StateMachineManager>,
        tracker: Arc<dyn TransactionTracker>,
        soft_locks: Arc<dyn SoftLockRegistry>,
        database: Arc<dyn DatabaseProvider>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let registry = Arc::new(MetricsRegistry::new());
        let metrics = CheckpointMetrics::register(&registry, Arc::clone(&clock));
        Self {
            checkpoint_storage,
            messaging,
            manager,
            tracker,
            soft_locks,
            database,
            serializer: Arc::new(JsonCheckpointSerializer),
            serialization_context: SerializationContext::default(),
            clock,
            registry,
            metrics,
            sender_uuid: Uuid::new_v4(),
        }
    }

    /// Substitute the time source. Re-registers the checkpoint metrics so
    /// the bandwidth gauge reads the new clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Arc::clone(&clock);
        self.metrics = CheckpointMetrics::register(&self.registry, clock);
        self
    }

    /// Substitute the metrics registry (e.g. one shared with an exporter).
    #[must_use]
    pub fn with_metrics_registry(mut self, registry: Arc<MetricsRegistry>) -> Self {
        self.metrics = CheckpointMetrics::register(&registry, Arc::clone(&self.clock));
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn CheckpointSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    #[must_use]
    pub fn with_serialization_context(mut self, context: SerializationContext) -> Self {
        self.serialization_context = context;
        self
    }

    /// Set the restart-scoped UUID paired with outbound deduplication ids.
    #[must_use]
    pub fn with_sender_uuid(mut self, sender_uuid: Uuid) -> Self {
        self.sender_uuid = sender_uuid;
        self
    }

    pub fn metrics(&self) -> &CheckpointMetrics {
        &self.metrics
    }

    pub fn metrics_registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    /// Perform one action on behalf of `fiber`.
    ///
    /// Actions emitted by a single transition must be passed in emission
    /// order; the executor performs no reordering. Errors escape to the
    /// state machine except where the action's contract says otherwise
    /// (acknowledgement swallow, non-live session skip, async wrapping).
    #[instrument(
        level = "trace",
        skip_all,
        fields(flow_id = %fiber.id(), action = action.label())
    )]
    pub async fn execute(
        &self,
        fiber: &FlowFiber,
        ctx: &mut TransactionContext,
        action: Action,
    ) -> Result<()> {
        trace!(target: "spindle::executor", "executing action");
        match action {
            Action::TrackTransaction { hash } => {
                self.execute_track_transaction(fiber, hash);
                Ok(())
            }
            Action::PersistCheckpoint {
                flow_id,
                checkpoint,
                is_update,
            } => {
                self.execute_persist_checkpoint(ctx, flow_id, &checkpoint, is_update)
                    .await
            }
            Action::PersistDeduplicationFacts { handlers } => {
                self.execute_persist_deduplication_facts(ctx, &handlers).await
            }
            Action::AcknowledgeMessages { handlers } => {
                self.execute_acknowledge_messages(&handlers).await;
                Ok(())
            }
            Action::PropagateErrors {
                errors,
                sessions,
                sender_uuid,
            } => {
                self.execute_propagate_errors(&errors, &sessions, sender_uuid)
                    .await
            }
            Action::ScheduleEvent { event } => {
                fiber.schedule_event(event);
                Ok(())
            }
            Action::SleepUntil { time } => {
                self.execute_sleep_until(fiber, time);
                Ok(())
            }
            Action::RemoveCheckpoint { flow_id } => {
                self.checkpoint_storage
                    .remove_checkpoint(ctx, flow_id)
                    .await?;
                Ok(())
            }
            Action::SendInitial {
                destination,
                initialise,
                deduplication_id,
            } => {
                self.execute_send_initial(&destination, initialise, deduplication_id)
                    .await
            }
            Action::SendExisting {
                peer,
                message,
                deduplication_id,
            } => {
                self.execute_send_existing(&peer, message, deduplication_id)
                    .await
            }
            Action::AddSessionBinding {
                flow_id,
                session_id,
            } => {
                self.manager.add_session_binding(flow_id, session_id);
                Ok(())
            }
            Action::RemoveSessionBindings { session_ids } => {
                self.manager.remove_session_bindings(&session_ids);
                Ok(())
            }
            Action::SignalFlowHasStarted { flow_id } => {
                self.manager.signal_flow_has_started(flow_id);
                Ok(())
            }
            Action::RemoveFlow {
                flow_id,
                removal_reason,
                last_state,
            } => {
                self.execute_remove_flow(flow_id, removal_reason, last_state);
                Ok(())
            }
            Action::CreateTransaction => self.execute_create_transaction(ctx).await,
            Action::RollbackTransaction => self.execute_rollback_transaction(ctx).await,
            Action::CommitTransaction => self.execute_commit_transaction(ctx).await,
            Action::ExecuteAsyncOperation {
                operation,
                deduplication_id,
            } => self.execute_async_operation(fiber, &operation, deduplication_id),
            Action::ReleaseSoftLocks { lock_id } => {
                if let Some(lock_id) = lock_id {
                    self.soft_locks.release_soft_locks(lock_id);
                }
                Ok(())
            }
            Action::RetryFlowFromSafePoint { current_state } => {
                self.manager.retry_flow_from_safe_point(current_state);
                Ok(())
            }
            Action::ScheduleFlowTimeout { flow_id } => {
                self.manager.schedule_flow_timeout(flow_id);
                Ok(())
            }
            Action::CancelFlowTimeout { flow_id } => {
                self.manager.cancel_flow_timeout(flow_id);
                Ok(())
            }
        }
    }

    /// Arm a commit notification; the result comes back as an event on the
    /// fiber. Never blocks the caller.
    fn execute_track_transaction(&self, fiber: &FlowFiber, hash: TransactionHash) {
        let committed = self.tracker.track_transaction(hash);
        let fiber = fiber.clone();
        tokio::spawn(async move {
            match committed.await {
                Ok(tx) => fiber.schedule_event(FlowEvent::TransactionCommitted(tx)),
                Err(e) => fiber.schedule_event(FlowEvent::Error(FlowError::msg(e.to_string()))),
            }
        });
    }

    async fn execute_persist_checkpoint(
        &self,
        ctx: &mut TransactionContext,
        flow_id: FlowId,
        checkpoint: &Checkpoint,
        is_update: bool,
    ) -> Result<()> {
        let bytes = self
            .serializer
            .checkpoint_serialize(checkpoint, self.serialization_context)?;
        if is_update {
            self.checkpoint_storage
                .update_checkpoint(ctx, flow_id, &bytes)
                .await?;
        } else {
            self.checkpoint_storage
                .add_checkpoint(ctx, flow_id, &bytes)
                .await?;
        }
        // Only persisted checkpoints count towards the rate and volume
        // metrics; a failed write must not leave a phantom sample.
        self.metrics
            .record_checkpoint(bytes.len() as u64, self.clock.monotonic_nanos());
        Ok(())
    }

    /// Pre-commit hooks run inside the bound transaction so the dedup fact
    /// and the transition's business effects commit atomically. Any hook
    /// failure aborts the transition.
    async fn execute_persist_deduplication_facts(
        &self,
        ctx: &mut TransactionContext,
        handlers: &[Arc<dyn DeduplicationHandler>],
    ) -> Result<()> {
        for handler in handlers {
            handler.inside_database_transaction(ctx).await?;
        }
        Ok(())
    }

    /// Post-commit hooks. The business transaction is already durable, so a
    /// failed broker acknowledgement merely risks a redelivery the dedup
    /// facts cover — every handler runs, failures are logged and swallowed.
    async fn execute_acknowledge_messages(&self, handlers: &[Arc<dyn DeduplicationHandler>]) {
        for handler in handlers {
            if let Err(e) = handler.after_database_transaction().await {
                info!(
                    target: "spindle::executor",
                    error = %e,
                    ?handler,
                    "message acknowledgement failed; relying on deduplication facts"
                );
            }
        }
    }

    async fn execute_propagate_errors(
        &self,
        errors: &[FlowError],
        sessions: &[SessionState],
        sender_uuid: Option<Uuid>,
    ) -> Result<()> {
        for error in errors {
            warn!(
                target: "spindle::executor",
                error_id = %error.error_id,
                "propagating error to peers: {}",
                error.message
            );
        }
        for session in sessions {
            // Sessions that never went live (or already ended) have no peer
            // sink to address; skipped silently.
            let Some(sink) = session.initiated_state.live_sink() else {
                continue;
            };
            for error in errors {
                let deduplication_id = DeduplicationId::for_error(error.error_id, sink);
                let message = SessionMessage::error(sink, error.error_id, error.message.clone());
                self.messaging
                    .send_session_message(
                        &session.peer,
                        message,
                        SenderDeduplicationId::new(deduplication_id, sender_uuid),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    fn execute_sleep_until(&self, fiber: &FlowFiber, time: chrono::DateTime<chrono::Utc>) {
        let delay = (time - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
        fiber.arm_sleep(delay);
    }

    async fn execute_send_initial(
        &self,
        destination: &PartyId,
        initialise: InitialSessionMessage,
        deduplication_id: DeduplicationId,
    ) -> Result<()> {
        self.messaging
            .send_session_message(
                destination,
                SessionMessage::Initial(initialise),
                SenderDeduplicationId::new(deduplication_id, Some(self.sender_uuid)),
            )
            .await?;
        Ok(())
    }

    async fn execute_send_existing(
        &self,
        peer: &PartyId,
        message: ExistingSessionMessage,
        deduplication_id: DeduplicationId,
    ) -> Result<()> {
        self.messaging
            .send_session_message(
                peer,
                SessionMessage::Existing(message),
                SenderDeduplicationId::new(deduplication_id, Some(self.sender_uuid)),
            )
            .await?;
        Ok(())
    }

    fn execute_remove_flow(
        &self,
        flow_id: FlowId,
        removal_reason: FlowRemovalReason,
        last_state: FlowState,
    ) {
        if let FlowRemovalReason::Errored(errors) = &removal_reason {
            for error in errors {
                warn!(
                    target: "spindle::executor",
                    flow_id = %flow_id,
                    error_id = %error.error_id,
                    "flow removed with error: {}",
                    error.message
                );
            }
        }
        self.manager.remove_flow(flow_id, removal_reason, last_state);
    }

    async fn execute_create_transaction(&self, ctx: &mut TransactionContext) -> Result<()> {
        if ctx.is_bound() {
            return Err(DatabaseError::AlreadyBound.into());
        }
        let transaction = self.database.begin().await?;
        ctx.bind(transaction)?;
        Ok(())
    }

    async fn execute_rollback_transaction(&self, ctx: &mut TransactionContext) -> Result<()> {
        match ctx.take() {
            Some(transaction) => {
                transaction.rollback().await?;
                Ok(())
            }
            None => {
                trace!(target: "spindle::executor", "rollback with no bound transaction");
                Ok(())
            }
        }
    }

    /// The transaction is taken out of the context before the commit is
    /// awaited, so the fiber holds no transaction on any exit path, and a
    /// commit failure escapes unmasked.
    async fn execute_commit_transaction(&self, ctx: &mut TransactionContext) -> Result<()> {
        let transaction = ctx.take().ok_or(DatabaseError::NotBound)?;
        transaction.commit().await?;
        Ok(())
    }

    fn execute_async_operation(
        &self,
        fiber: &FlowFiber,
        operation: &Arc<dyn AsyncFlowOperation>,
        deduplication_id: DeduplicationId,
    ) -> Result<()> {
        let deferred = operation
            .execute(deduplication_id)
            .map_err(|source| ActionError::AsyncOperationTransition { source })?;
        let fiber = fiber.clone();
        tokio::spawn(async move {
            match deferred.await {
                Ok(result) => fiber.schedule_event(FlowEvent::AsyncOperationCompletion(result)),
                Err(e) => fiber.schedule_event(FlowEvent::AsyncOperationThrows(FlowError::msg(
                    e.to_string(),
                ))),
            }
        });
        Ok(())
    }
}

impl std::fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("sender_uuid", &self.sender_uuid)
            .field("metrics", &self.metrics)
            .finish()
    }
}
