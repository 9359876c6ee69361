//! Flow-level error values carried through events, removal reasons, and
//! peer error propagation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An error produced by a flow or by one of the executor's collaborators.
///
/// `FlowError` is plain data rather than a `std::error::Error` implementor:
/// it crosses checkpoint serialization and the peer wire, so it carries an
/// identity (`error_id`) the receiving broker can dedupe on, plus an optional
/// cause chain for diagnostics.
///
/// # Examples
///
/// ```
/// use spindle::errors::FlowError;
///
/// let err = FlowError::msg("counterparty rejected proposal")
///     .with_cause(FlowError::msg("signature over wrong transaction"));
/// assert!(err.cause.is_some());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlowError {
    /// Stable identity of this error, used to derive deduplication ids when
    /// the error is propagated to peers.
    pub error_id: Uuid,
    pub message: String,
    #[serde(default)]
    pub cause: Option<Box<FlowError>>,
}

impl FlowError {
    /// Create an error with a fresh identity and the given message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            error_id: Uuid::new_v4(),
            message: message.into(),
            cause: None,
        }
    }

    /// Create an error with an explicit identity.
    ///
    /// Used when the identity must survive replays (e.g. errors re-propagated
    /// from a checkpoint after restart).
    pub fn with_id(error_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            error_id,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach a cause, returning the extended error.
    #[must_use]
    pub fn with_cause(mut self, cause: FlowError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        let mut next = self.cause.as_deref();
        while let Some(cause) = next {
            write!(f, ": {}", cause.message)?;
            next = cause.cause.as_deref();
        }
        Ok(())
    }
}
