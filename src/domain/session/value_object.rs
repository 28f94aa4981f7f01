//! Session value objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Negotiation state of one PeerSession
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    New,
    Negotiating,
    Connected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Check if state transition is valid
    pub fn can_transition_to(&self, new_state: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, new_state) {
            (New, Negotiating) => true,
            (Negotiating, Connected) => true,

            // Failure and teardown are reachable from every live state
            (New | Negotiating | Connected, Failed) => true,
            (New | Negotiating | Connected, Closed) => true,

            // Terminal
            (Failed, _) | (Closed, _) => false,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::New => "new",
            ConnectionState::Negotiating => "negotiating",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// State reported by the underlying peer transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    /// Temporarily lost; the transport may still recover
    Disconnected,
    Failed,
    Closed,
}

/// Why a session was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// stop_session / stop_all
    Stopped,
    /// A new session took over the key
    Superseded,
    /// The signaling channel dropped or reconnected
    ChannelLost,
    /// The peer transport closed underneath the session
    TransportClosed,
}

/// What happened to an inbound remote candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    Applied,
    Buffered,
}
