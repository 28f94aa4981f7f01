//! Event plumbing shared by the session context

use crate::domain::shared::value_objects::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Something recorded by a session and fanned out to manager subscribers
pub trait DomainEvent: Send + Sync {
    fn event_type(&self) -> &'static str;

    fn occurred_at(&self) -> DateTime<Utc>;

    /// Session the event belongs to
    fn session_id(&self) -> SessionId;
}

/// Stamp attached to every recorded event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub event_type: String,
}

impl EventMetadata {
    pub fn stamp(event_type: &str) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            event_type: event_type.to_owned(),
        }
    }
}
