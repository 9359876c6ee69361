//! Checkpoint data and serialization.
//!
//! A checkpoint is the durable snapshot of a suspended flow. The executor
//! treats it opaquely: it runs the configured [`CheckpointSerializer`] and
//! hands the resulting bytes to storage, associated with the flow id. The
//! serialization framework proper lives outside this crate; the JSON
//! implementation here is the in-tree default.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionState;
use crate::types::FlowId;

/// A durable snapshot of a suspended flow's state.
///
/// Produced by the flow state machine at each suspension point. Everything a
/// restarted node needs to resume the flow idempotently lives here: the open
/// sessions (with their deduplication-relevant sequence state) and the
/// opaque suspended call-stack frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub flow_id: FlowId,
    /// Number of suspensions this flow has been through; the first persisted
    /// checkpoint of a flow carries 0.
    pub suspension_count: u64,
    /// Open sessions; each carries its own local session id.
    pub sessions: Vec<SessionState>,
    /// Opaque serialized flow frame; owned by the state machine.
    pub frame: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create an initial checkpoint for a flow with no open sessions.
    #[must_use]
    pub fn initial(flow_id: FlowId, frame: serde_json::Value) -> Self {
        Self {
            flow_id,
            suspension_count: 0,
            sessions: Vec::new(),
            frame,
            created_at: Utc::now(),
        }
    }

    /// Successor checkpoint with an advanced suspension count.
    #[must_use]
    pub fn next(mut self, frame: serde_json::Value) -> Self {
        self.suspension_count += 1;
        self.frame = frame;
        self.created_at = Utc::now();
        self
    }
}

/// The last known state of a flow, handed to the state machine manager on
/// removal or retry. Opaque to the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowState {
    pub flow_id: FlowId,
    /// The most recent checkpoint, if any was ever persisted.
    pub checkpoint: Option<Checkpoint>,
    /// Whether the flow got past its start barrier.
    pub is_started: bool,
}

/// Context threaded through checkpoint serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializationContext {
    /// Schema version stamped into the serialized form.
    pub schema_version: u16,
}

impl Default for SerializationContext {
    fn default() -> Self {
        Self { schema_version: 1 }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum SerializationError {
    #[error("checkpoint encode error: {0}")]
    #[diagnostic(
        code(spindle::checkpoint::encode),
        help("The checkpoint frame must be serde-serializable JSON.")
    )]
    Encode(#[from] serde_json::Error),

    #[error("unsupported checkpoint schema version: {0}")]
    #[diagnostic(code(spindle::checkpoint::schema))]
    UnsupportedSchema(u16),
}

/// Marshals checkpoints to the byte form the storage layer persists.
///
/// Implementations must be deterministic for a given `(checkpoint, context)`
/// pair: replayed persists after a crash must produce bytes the storage
/// layer can treat as an idempotent update.
pub trait CheckpointSerializer: Send + Sync {
    fn checkpoint_serialize(
        &self,
        checkpoint: &Checkpoint,
        context: SerializationContext,
    ) -> Result<Vec<u8>, SerializationError>;
}

/// Default serializer: canonical serde_json encoding.
#[derive(Debug, Default, Clone)]
pub struct JsonCheckpointSerializer;

impl CheckpointSerializer for JsonCheckpointSerializer {
    fn checkpoint_serialize(
        &self,
        checkpoint: &Checkpoint,
        context: SerializationContext,
    ) -> Result<Vec<u8>, SerializationError> {
        if context.schema_version != 1 {
            return Err(SerializationError::UnsupportedSchema(
                context.schema_version,
            ));
        }
        Ok(serde_json::to_vec(checkpoint)?)
    }
}
