//! State machine manager seam.
//!
//! The manager owns live fibers, session-to-flow bindings, and per-flow
//! timeouts; it decides retries and hospitalization. The executor only
//! delegates to it — none of these calls are transactional.

use crate::checkpoint::FlowState;
use crate::errors::FlowError;
use crate::types::{FlowId, SessionId};

/// Why a flow is being removed from the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowRemovalReason {
    /// The flow ran to completion.
    Finished,
    /// The flow terminated with errors.
    Errored(Vec<FlowError>),
}

/// Internal surface of the state machine manager consumed by the executor.
///
/// Session bindings form a surjection from session id to flow id; the
/// manager removes binding sets atomically. Timeout scheduling is
/// edge-triggered: `schedule_flow_timeout` arms, `cancel_flow_timeout`
/// disarms, re-arming an armed timeout resets it.
pub trait StateMachineManager: Send + Sync {
    fn add_session_binding(&self, flow_id: FlowId, session_id: SessionId);

    fn remove_session_bindings(&self, session_ids: &[SessionId]);

    fn signal_flow_has_started(&self, flow_id: FlowId);

    fn remove_flow(&self, flow_id: FlowId, reason: FlowRemovalReason, last_state: FlowState);

    /// Restart the flow from its last durable checkpoint. The manager
    /// re-reads durable state; no checkpoint mutation happens here.
    fn retry_flow_from_safe_point(&self, current_state: FlowState);

    fn schedule_flow_timeout(&self, flow_id: FlowId);

    fn cancel_flow_timeout(&self, flow_id: FlowId);
}
