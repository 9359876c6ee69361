//! Core identifier types for the Spindle flow runtime.
//!
//! This module defines the fundamental types used throughout the system
//! for identifying flows, sessions, peers, and deduplicated sends. These
//! are the core domain concepts the rest of the crate is written against.
//!
//! # Key Types
//!
//! - [`FlowId`]: Globally unique identifier for one flow instance
//! - [`SessionId`]: Identifier for one end of a flow-to-flow session
//! - [`PartyId`]: Identity of a peer node
//! - [`TransactionHash`]: Identifier of a ledger transaction
//! - [`DeduplicationId`]: Identifier of a single send attempt, stable across replays
//!
//! # Examples
//!
//! ```rust
//! use spindle::types::{DeduplicationId, FlowId, SessionId};
//! use uuid::Uuid;
//!
//! let flow = FlowId::random();
//! let session = SessionId(42);
//!
//! // Deduplication ids for error propagation are derived deterministically,
//! // so a crash-and-replay produces bit-identical sends.
//! let error_id = Uuid::nil();
//! let a = DeduplicationId::for_error(error_id, session);
//! let b = DeduplicationId::for_error(error_id, session);
//! assert_eq!(a, b);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Globally unique identifier for a flow instance.
///
/// A `FlowId` names one logical flow for its whole lifetime: it keys the
/// flow's checkpoint in durable storage, its session bindings, and its
/// timeout entry in the state machine manager.
///
/// # Persistence
///
/// `FlowId` supports serde for checkpointing plus the
/// [`encode`](Self::encode)/[`decode`](Self::decode) string form used by
/// storage backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(pub Uuid);

impl FlowId {
    /// Create a fresh random flow identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Encode into the persisted string form.
    #[must_use]
    pub fn encode(&self) -> String {
        self.0.to_string()
    }

    /// Decode a persisted string form back into a `FlowId`.
    ///
    /// Returns `None` for strings that are not a valid UUID.
    pub fn decode(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for one end of a bidirectional session between two flows.
///
/// Each side of a session has its own `SessionId`; the peer's receiving end
/// is the *sink* session id carried inside
/// [`InitiatedState::Live`](crate::session::InitiatedState::Live).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Identity of a peer node, as known to the messaging layer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartyId(pub String);

impl PartyId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PartyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a ledger transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHash(pub [u8; 32]);

impl TransactionHash {
    /// Hex rendering of the full hash.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Abbreviated form for logs; full form via to_hex().
        for b in &self.0[..4] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "…")
    }
}

impl fmt::Debug for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionHash({self})")
    }
}

/// Value uniquely identifying a single send attempt.
///
/// The messaging substrate delivers at-least-once; the receiving broker uses
/// the deduplication id to drop replays. Two constructions exist:
///
/// - caller-supplied, for ordinary session sends (the id is part of the
///   flow's checkpointed state, so a replayed transition re-sends the same id)
/// - [`for_error`](Self::for_error), derived from `(error_id, sink session)`,
///   used on error-propagation paths where no checkpointed id exists
///
/// The derivation is deterministic: the same inputs always yield identical
/// bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeduplicationId(pub String);

impl DeduplicationId {
    /// Create a deduplication id from an arbitrary caller-supplied value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derive the deduplication id for propagating `error_id` to the peer's
    /// sink session.
    #[must_use]
    pub fn for_error(error_id: Uuid, sink_session_id: SessionId) -> Self {
        Self(format!("E-{error_id}-{}", sink_session_id.0))
    }
}

impl fmt::Display for DeduplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A [`DeduplicationId`] paired with the sending node's restart-scoped UUID.
///
/// The sender UUID changes on node restart, letting the receiver distinguish
/// "replay from the same process" from "fresh attempt after a restart" where
/// that matters to its dedup table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderDeduplicationId {
    pub deduplication_id: DeduplicationId,
    pub sender_uuid: Option<Uuid>,
}

impl SenderDeduplicationId {
    #[must_use]
    pub fn new(deduplication_id: DeduplicationId, sender_uuid: Option<Uuid>) -> Self {
        Self {
            deduplication_id,
            sender_uuid,
        }
    }
}
