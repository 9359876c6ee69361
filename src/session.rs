//! Session state for flow-to-flow channels.
//!
//! A session is one end of a bidirectional channel between two flows on two
//! nodes. The executor consults session state when propagating errors: only
//! sessions whose peer end is live are ever sent to.

use serde::{Deserialize, Serialize};

use crate::types::{PartyId, SessionId};

/// Initiation progress of a session, as seen from the local end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitiatedState {
    /// The initial message has been sent but the peer has not confirmed.
    Uninitiated,
    /// The peer confirmed; its sink session id is known and sends may target it.
    Live {
        peer_sink_session_id: SessionId,
    },
    /// The session has been closed by either end.
    Ended,
}

impl InitiatedState {
    /// The peer's sink session id, if the session is live.
    #[must_use]
    pub fn live_sink(&self) -> Option<SessionId> {
        match self {
            InitiatedState::Live {
                peer_sink_session_id,
            } => Some(*peer_sink_session_id),
            InitiatedState::Uninitiated | InitiatedState::Ended => None,
        }
    }
}

/// Local sequence metadata for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSequence {
    /// Sequence number the next outbound message will carry.
    pub next_sent_seq: u64,
    /// Highest inbound sequence number observed.
    pub last_received_seq: u64,
}

/// State of one local session end, persisted inside the flow checkpoint.
///
/// # Examples
///
/// ```rust
/// use spindle::session::{InitiatedState, SessionState};
/// use spindle::types::{PartyId, SessionId};
///
/// let session = SessionState::new(SessionId(1), PartyId::from("PartyB"));
/// assert_eq!(session.initiated_state, InitiatedState::Uninitiated);
///
/// let live = session.into_live(SessionId(9));
/// assert_eq!(live.initiated_state.live_sink(), Some(SessionId(9)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Local identifier of this session end.
    pub session_id: SessionId,
    /// Identity of the peer party.
    pub peer: PartyId,
    /// Initiation progress.
    pub initiated_state: InitiatedState,
    /// Local sequence metadata.
    pub sequence: SessionSequence,
}

impl SessionState {
    /// Create a freshly initiated (not yet confirmed) session.
    #[must_use]
    pub fn new(session_id: SessionId, peer: PartyId) -> Self {
        Self {
            session_id,
            peer,
            initiated_state: InitiatedState::Uninitiated,
            sequence: SessionSequence::default(),
        }
    }

    /// Transition to `Live` with the peer's sink session id.
    #[must_use]
    pub fn into_live(mut self, peer_sink_session_id: SessionId) -> Self {
        self.initiated_state = InitiatedState::Live {
            peer_sink_session_id,
        };
        self
    }

    /// Transition to `Ended`.
    #[must_use]
    pub fn into_ended(mut self) -> Self {
        self.initiated_state = InitiatedState::Ended;
        self
    }
}
