//! Peer messaging seam.
//!
//! The messaging substrate is reliable and at-least-once; the executor's
//! obligation is only to hand every send a deduplication id that is stable
//! across crash-and-replay, so the receiving broker can drop duplicates.
//! Durability and retry are the substrate's concern.

pub mod dedup;

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{PartyId, SenderDeduplicationId, SessionId};

pub use dedup::{DeduplicationError, DeduplicationHandler};

#[derive(Debug, Error, Diagnostic)]
pub enum MessagingError {
    #[error("no route to party {party}")]
    #[diagnostic(
        code(spindle::messaging::no_route),
        help("Check the network map entry for `{party}`.")
    )]
    NoRoute { party: PartyId },

    #[error("send failed: {message}")]
    #[diagnostic(code(spindle::messaging::send))]
    Send { message: String },
}

/// First message of a new session, carrying the flow initiation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialSessionMessage {
    /// The initiating side's session id; the peer replies to it.
    pub initiator_session_id: SessionId,
    /// Registered name of the flow the peer should start.
    pub flow_name: String,
    /// Optional payload piggybacked on initiation.
    pub first_payload: Option<Vec<u8>>,
}

/// Payload of a message on an established session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPayload {
    Data(Vec<u8>),
    /// An error propagated to the peer; `error_id` keeps the propagation
    /// deduplicable.
    Error { error_id: Uuid, message: String },
}

/// A message on an established session, addressed to the peer's sink end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingSessionMessage {
    pub recipient_session_id: SessionId,
    pub payload: SessionPayload,
}

/// Any message the executor hands to the messaging substrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMessage {
    Initial(InitialSessionMessage),
    Existing(ExistingSessionMessage),
}

impl SessionMessage {
    /// Convenience constructor for an error payload to a peer sink session.
    #[must_use]
    pub fn error(recipient_session_id: SessionId, error_id: Uuid, message: String) -> Self {
        SessionMessage::Existing(ExistingSessionMessage {
            recipient_session_id,
            payload: SessionPayload::Error { error_id, message },
        })
    }
}

/// Reliable peer message transport.
///
/// `send_session_message` returns once the message is enqueued with the
/// substrate; delivery monitoring happens elsewhere.
#[async_trait]
pub trait FlowMessaging: Send + Sync {
    async fn send_session_message(
        &self,
        destination: &PartyId,
        message: SessionMessage,
        deduplication_id: SenderDeduplicationId,
    ) -> Result<(), MessagingError>;
}

/// One send as observed by [`InMemoryFlowMessaging`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSend {
    pub destination: PartyId,
    pub message: SessionMessage,
    pub deduplication_id: SenderDeduplicationId,
}

/// Recording transport for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryFlowMessaging {
    sends: Arc<Mutex<Vec<RecordedSend>>>,
    fail_with: Arc<Mutex<Option<String>>>,
}

impl InMemoryFlowMessaging {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All sends observed so far, in order.
    #[must_use]
    pub fn sends(&self) -> Vec<RecordedSend> {
        self.sends.lock().clone()
    }

    /// Make every subsequent send fail with the given message.
    pub fn fail_sends(&self, message: impl Into<String>) {
        *self.fail_with.lock() = Some(message.into());
    }
}

#[async_trait]
impl FlowMessaging for InMemoryFlowMessaging {
    async fn send_session_message(
        &self,
        destination: &PartyId,
        message: SessionMessage,
        deduplication_id: SenderDeduplicationId,
    ) -> Result<(), MessagingError> {
        if let Some(message) = self.fail_with.lock().clone() {
            return Err(MessagingError::Send { message });
        }
        self.sends.lock().push(RecordedSend {
            destination: destination.clone(),
            message,
            deduplication_id,
        });
        Ok(())
    }
}
