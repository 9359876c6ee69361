//! The closed union of side effects a flow transition may request.
//!
//! The flow state machine *decides*; the
//! [`ActionExecutor`](crate::executor::ActionExecutor) *performs*. Every
//! observable side effect of a transition is one of these variants, and the
//! executor's dispatch over them is exhaustive — adding a variant is a
//! compile-time failure everywhere actions are matched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::async_ops::AsyncFlowOperation;
use crate::checkpoint::{Checkpoint, FlowState};
use crate::errors::FlowError;
use crate::events::FlowEvent;
use crate::manager::FlowRemovalReason;
use crate::messaging::{DeduplicationHandler, ExistingSessionMessage, InitialSessionMessage};
use crate::session::SessionState;
use crate::types::{DeduplicationId, FlowId, PartyId, SessionId, TransactionHash};

/// One side effect requested by a flow state-machine transition.
#[derive(Debug, Clone)]
pub enum Action {
    /// Subscribe to commit notifications for a ledger transaction.
    TrackTransaction { hash: TransactionHash },

    /// Serialize and persist a checkpoint inside the bound transaction.
    /// The caller asserts whether this is the first write (`is_update =
    /// false`) or a replacement.
    PersistCheckpoint {
        flow_id: FlowId,
        checkpoint: Checkpoint,
        is_update: bool,
    },

    /// Run each handler's pre-commit hook inside the bound transaction.
    PersistDeduplicationFacts {
        handlers: Vec<Arc<dyn DeduplicationHandler>>,
    },

    /// Run each handler's post-commit hook. Failures are swallowed.
    AcknowledgeMessages {
        handlers: Vec<Arc<dyn DeduplicationHandler>>,
    },

    /// Send each error to every live session's peer sink.
    PropagateErrors {
        errors: Vec<FlowError>,
        sessions: Vec<SessionState>,
        sender_uuid: Option<Uuid>,
    },

    /// Feed an event straight back into the fiber.
    ScheduleEvent { event: FlowEvent },

    /// Park the fiber until the given wall-clock time.
    SleepUntil { time: DateTime<Utc> },

    /// Delete the flow's checkpoint inside the bound transaction.
    RemoveCheckpoint { flow_id: FlowId },

    /// Open a new session with a peer.
    SendInitial {
        destination: PartyId,
        initialise: InitialSessionMessage,
        deduplication_id: DeduplicationId,
    },

    /// Send on an established session.
    SendExisting {
        peer: PartyId,
        message: ExistingSessionMessage,
        deduplication_id: DeduplicationId,
    },

    AddSessionBinding {
        flow_id: FlowId,
        session_id: SessionId,
    },

    RemoveSessionBindings { session_ids: Vec<SessionId> },

    SignalFlowHasStarted { flow_id: FlowId },

    RemoveFlow {
        flow_id: FlowId,
        removal_reason: FlowRemovalReason,
        last_state: FlowState,
    },

    /// Open a database transaction and bind it to the fiber. Programmer
    /// error if one is already bound.
    CreateTransaction,

    /// Roll back and unbind. Idempotent against absence.
    RollbackTransaction,

    /// Commit and unbind; the fiber is transaction-free on every exit path.
    CommitTransaction,

    /// Start a deferred operation; its result comes back as an event.
    ExecuteAsyncOperation {
        operation: Arc<dyn AsyncFlowOperation>,
        deduplication_id: DeduplicationId,
    },

    /// Release vault soft locks held under `lock_id`. No-op on `None`.
    ReleaseSoftLocks { lock_id: Option<Uuid> },

    /// Restart the flow from its last durable checkpoint.
    RetryFlowFromSafePoint { current_state: FlowState },

    ScheduleFlowTimeout { flow_id: FlowId },

    CancelFlowTimeout { flow_id: FlowId },
}

impl Action {
    /// Short label used in logs and tracing spans.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Action::TrackTransaction { .. } => "track_transaction",
            Action::PersistCheckpoint { .. } => "persist_checkpoint",
            Action::PersistDeduplicationFacts { .. } => "persist_deduplication_facts",
            Action::AcknowledgeMessages { .. } => "acknowledge_messages",
            Action::PropagateErrors { .. } => "propagate_errors",
            Action::ScheduleEvent { .. } => "schedule_event",
            Action::SleepUntil { .. } => "sleep_until",
            Action::RemoveCheckpoint { .. } => "remove_checkpoint",
            Action::SendInitial { .. } => "send_initial",
            Action::SendExisting { .. } => "send_existing",
            Action::AddSessionBinding { .. } => "add_session_binding",
            Action::RemoveSessionBindings { .. } => "remove_session_bindings",
            Action::SignalFlowHasStarted { .. } => "signal_flow_has_started",
            Action::RemoveFlow { .. } => "remove_flow",
            Action::CreateTransaction => "create_transaction",
            Action::RollbackTransaction => "rollback_transaction",
            Action::CommitTransaction => "commit_transaction",
            Action::ExecuteAsyncOperation { .. } => "execute_async_operation",
            Action::ReleaseSoftLocks { .. } => "release_soft_locks",
            Action::RetryFlowFromSafePoint { .. } => "retry_flow_from_safe_point",
            Action::ScheduleFlowTimeout { .. } => "schedule_flow_timeout",
            Action::CancelFlowTimeout { .. } => "cancel_flow_timeout",
        }
    }
}
