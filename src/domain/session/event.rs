//! Session domain events

use crate::domain::negotiation::role::SessionKey;
use crate::domain::session::value_object::{CloseReason, ConnectionState};
use crate::domain::shared::events::{DomainEvent, EventMetadata};
use crate::domain::shared::value_objects::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Things that happened to one PeerSession
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    CandidateBuffered {
        candidate: String,
        pending: usize,
    },
    CandidateApplied {
        candidate: String,
    },
    MediaAttached {
        track_id: String,
    },
    MediaReleased {
        track_id: String,
    },
    Closed {
        reason: CloseReason,
    },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::StateChanged { .. } => "session.state_changed",
            SessionEvent::CandidateBuffered { .. } => "session.candidate_buffered",
            SessionEvent::CandidateApplied { .. } => "session.candidate_applied",
            SessionEvent::MediaAttached { .. } => "session.media_attached",
            SessionEvent::MediaReleased { .. } => "session.media_released",
            SessionEvent::Closed { .. } => "session.closed",
        }
    }
}

/// A session event with its origin and metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEventRecord {
    pub metadata: EventMetadata,
    pub session_id: SessionId,
    pub key: SessionKey,
    pub event: SessionEvent,
}

impl SessionEventRecord {
    pub fn new(session_id: SessionId, key: SessionKey, event: SessionEvent) -> Self {
        Self {
            metadata: EventMetadata::stamp(event.name()),
            session_id,
            key,
            event,
        }
    }
}

impl DomainEvent for SessionEventRecord {
    fn event_type(&self) -> &'static str {
        self.event.name()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.metadata.occurred_at
    }

    fn session_id(&self) -> SessionId {
        self.session_id
    }
}
