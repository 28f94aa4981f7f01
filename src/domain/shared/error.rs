//! Session errors

use std::time::Duration;
use thiserror::Error;

/// Error taxonomy surfaced to the UI through the error sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Signaling channel failed to connect or reconnect
    Transport,
    /// Camera permission denied or no device
    MediaAcquisition,
    /// Description create/set failed, peer connection failed or timed out
    Negotiation,
    /// Message for an unknown or superseded session
    StaleMessage,
    /// Caller misuse or bad configuration
    Usage,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Peer connection failed: {0}")]
    PeerConnection(String),

    #[error("Negotiation timed out after {0:?}")]
    NegotiationTimeout(Duration),

    #[error("Stale message: {0}")]
    StaleMessage(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Transport(_) => ErrorKind::Transport,
            SessionError::MediaAcquisition(_) => ErrorKind::MediaAcquisition,
            SessionError::Negotiation(_)
            | SessionError::PeerConnection(_)
            | SessionError::NegotiationTimeout(_)
            | SessionError::InvalidStateTransition(_) => ErrorKind::Negotiation,
            SessionError::StaleMessage(_) => ErrorKind::StaleMessage,
            SessionError::InvalidOperation(_) | SessionError::Config(_) => ErrorKind::Usage,
        }
    }

    /// Stale messages are expected after supersession and are never reported
    pub fn is_stale(&self) -> bool {
        self.kind() == ErrorKind::StaleMessage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            SessionError::Transport("refused".into()).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            SessionError::NegotiationTimeout(Duration::from_secs(30)).kind(),
            ErrorKind::Negotiation
        );
        assert_eq!(
            SessionError::PeerConnection("ice failed".into()).kind(),
            ErrorKind::Negotiation
        );
        assert!(SessionError::StaleMessage("answer".into()).is_stale());
        assert!(!SessionError::MediaAcquisition("denied".into()).is_stale());
    }

    #[test]
    fn test_error_display() {
        let err = SessionError::MediaAcquisition("permission denied".into());
        assert_eq!(err.to_string(), "Media acquisition failed: permission denied");
    }
}
