//! Latest-error slot observed by the UI

use crate::domain::negotiation::role::SessionKey;
use crate::domain::shared::error::SessionError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error};

/// An error surfaced to the user, with the session it came from
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedError {
    pub error: SessionError,
    pub key: Option<SessionKey>,
    pub at: DateTime<Utc>,
}

/// Single observable slot holding the most recent user-visible error
///
/// Stale messages are expected traffic after supersession and never land
/// here.
#[derive(Clone)]
pub struct ErrorSink {
    slot: Arc<watch::Sender<Option<ReportedError>>>,
}

impl ErrorSink {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { slot: Arc::new(tx) }
    }

    /// Record an error; returns false when it was suppressed
    pub fn report(&self, error: SessionError, key: Option<&SessionKey>) -> bool {
        if error.is_stale() {
            debug!("Dropping stale message: {}", error);
            return false;
        }

        match key {
            Some(key) => error!("Session {} error ({:?}): {}", key, error.kind(), error),
            None => error!("Error ({:?}): {}", error.kind(), error),
        }

        self.slot.send_replace(Some(ReportedError {
            error,
            key: key.cloned(),
            at: Utc::now(),
        }));
        true
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ReportedError>> {
        self.slot.subscribe()
    }

    pub fn current(&self) -> Option<ReportedError> {
        self.slot.borrow().clone()
    }

    pub fn clear(&self) {
        self.slot.send_replace(None);
    }
}

impl Default for ErrorSink {
    fn default() -> Self {
        Self::new()
    }
}
