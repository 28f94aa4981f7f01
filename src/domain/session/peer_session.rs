//! PeerSession aggregate root

use crate::domain::negotiation::message::{IceCandidate, SessionDescription};
use crate::domain::negotiation::role::{Role, SessionKey};
use crate::domain::session::event::{SessionEvent, SessionEventRecord};
use crate::domain::session::ports::{MediaTrack, PeerConnection};
use crate::domain::session::value_object::{CandidateDisposition, CloseReason, ConnectionState};
use crate::domain::shared::error::SessionError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AdminId, SessionId};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One negotiated peer connection and its local state
///
/// All state changes go through `transition_to`, which enforces the
/// `ConnectionState` transition table and records a `SessionEvent`. Remote
/// candidates that arrive before the remote description are queued and
/// applied in arrival order right after it is set.
pub struct PeerSession {
    id: SessionId,
    key: SessionKey,
    state: ConnectionState,
    connection: Arc<dyn PeerConnection>,
    local_description_set: bool,
    remote_description_set: bool,
    /// Transport reported connected, possibly before both descriptions were set
    transport_connected: bool,
    pending_candidates: VecDeque<IceCandidate>,
    local_track: Option<Arc<dyn MediaTrack>>,
    /// Admin that initiated this negotiation, when answering an admin offer
    remote_admin: Option<AdminId>,
    failure: Option<SessionError>,
    connection_released: bool,
    created_at: DateTime<Utc>,
    events: Vec<SessionEventRecord>,
}

impl PeerSession {
    pub fn new(key: SessionKey, connection: Arc<dyn PeerConnection>) -> Self {
        Self::with_id(SessionId::new(), key, connection)
    }

    pub fn with_id(id: SessionId, key: SessionKey, connection: Arc<dyn PeerConnection>) -> Self {
        Self {
            id,
            key,
            state: ConnectionState::New,
            connection,
            local_description_set: false,
            remote_description_set: false,
            transport_connected: false,
            pending_candidates: VecDeque::new(),
            local_track: None,
            remote_admin: None,
            failure: None,
            connection_released: false,
            created_at: Utc::now(),
            events: Vec::new(),
        }
    }

    pub fn with_remote_admin(mut self, admin: Option<AdminId>) -> Self {
        self.remote_admin = admin;
        self
    }

    /// Attach a freshly acquired local track; the session owns it from now on
    pub async fn attach_media(&mut self, track: Arc<dyn MediaTrack>) -> Result<()> {
        if !self.is_live() {
            track.stop();
            return Err(SessionError::InvalidOperation(format!(
                "session {} is {}",
                self.id, self.state
            )));
        }

        self.local_track = Some(track.clone());
        self.record(SessionEvent::MediaAttached {
            track_id: track.id().to_string(),
        });
        self.connection.add_track(track).await
    }

    /// Offer path: create the offer and set it as local description
    pub async fn create_offer(&mut self) -> Result<SessionDescription> {
        self.ensure_state(ConnectionState::New, "create offer")?;

        let offer = self.connection.create_offer().await?;
        self.connection.set_local_description(offer.clone()).await?;
        self.local_description_set = true;
        self.transition_to(ConnectionState::Negotiating)?;

        info!("Created offer for session {} ({})", self.id, self.key);
        Ok(offer)
    }

    /// Answer path, first half: apply the remote offer
    pub async fn apply_remote_offer(&mut self, offer: SessionDescription) -> Result<()> {
        self.ensure_state(ConnectionState::New, "apply remote offer")?;

        self.connection.set_remote_description(offer).await?;
        self.remote_description_set = true;
        self.transition_to(ConnectionState::Negotiating)?;

        info!("Set remote offer for session {} ({})", self.id, self.key);
        self.drain_pending_candidates().await
    }

    /// Answer path, second half: create the answer and set it locally
    pub async fn create_answer(&mut self) -> Result<SessionDescription> {
        self.ensure_state(ConnectionState::Negotiating, "create answer")?;
        if !self.remote_description_set || self.local_description_set {
            return Err(SessionError::InvalidStateTransition(
                "No offer to answer".to_string(),
            ));
        }

        let answer = self.connection.create_answer().await?;
        self.connection.set_local_description(answer.clone()).await?;
        self.local_description_set = true;

        info!("Created answer for session {} ({})", self.id, self.key);
        self.try_complete()?;
        Ok(answer)
    }

    /// Offer path, completion: apply the remote answer
    pub async fn apply_remote_answer(&mut self, answer: SessionDescription) -> Result<()> {
        if self.state != ConnectionState::Negotiating
            || !self.local_description_set
            || self.remote_description_set
        {
            return Err(SessionError::StaleMessage(format!(
                "session {} is not waiting for an answer",
                self.id
            )));
        }

        self.connection.set_remote_description(answer).await?;
        self.remote_description_set = true;

        info!("Set remote answer for session {} ({})", self.id, self.key);
        let drained = self.drain_pending_candidates().await;
        self.try_complete()?;
        drained
    }

    /// Apply a remote candidate now, or queue it until the remote description is set
    pub async fn add_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<CandidateDisposition> {
        if !self.is_live() {
            return Err(SessionError::StaleMessage(format!(
                "session {} is {}",
                self.id, self.state
            )));
        }

        if self.remote_description_set {
            self.apply_candidate(candidate).await?;
            return Ok(CandidateDisposition::Applied);
        }

        debug!(
            "Remote description not set yet for session {}, queuing candidate",
            self.id
        );
        self.pending_candidates.push_back(candidate.clone());
        let pending = self.pending_candidates.len();
        self.record(SessionEvent::CandidateBuffered {
            candidate: candidate.candidate,
            pending,
        });
        Ok(CandidateDisposition::Buffered)
    }

    /// Transport reported an established connection
    pub fn mark_transport_connected(&mut self) -> Result<()> {
        self.transport_connected = true;
        self.try_complete()
    }

    /// Transition to Failed and release resources; false if already terminal
    pub async fn fail(&mut self, error: SessionError) -> bool {
        if self.state.is_terminal() {
            return false;
        }

        warn!("Session {} ({}) failed: {}", self.id, self.key, error);
        self.failure = Some(error);
        // Live states always allow Failed
        let _ = self.transition_to(ConnectionState::Failed);
        self.release().await;
        true
    }

    /// Transition to Closed and release resources; false if already terminal
    pub async fn close(&mut self, reason: CloseReason) -> bool {
        if self.state.is_terminal() {
            return false;
        }

        let _ = self.transition_to(ConnectionState::Closed);
        self.record(SessionEvent::Closed { reason });
        self.release().await;
        info!("Closed session {} ({}): {:?}", self.id, self.key, reason);
        true
    }

    /// Take all pending events
    pub fn take_events(&mut self) -> Vec<SessionEventRecord> {
        std::mem::take(&mut self.events)
    }

    async fn drain_pending_candidates(&mut self) -> Result<()> {
        let mut first_error = None;

        while let Some(candidate) = self.pending_candidates.pop_front() {
            debug!("Applying pending candidate for session {}", self.id);
            if let Err(e) = self.apply_candidate(candidate).await {
                warn!("Failed to apply pending candidate: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        self.connection.add_ice_candidate(candidate.clone()).await?;
        self.record(SessionEvent::CandidateApplied {
            candidate: candidate.candidate,
        });
        Ok(())
    }

    fn try_complete(&mut self) -> Result<()> {
        if self.state == ConnectionState::Negotiating
            && self.local_description_set
            && self.remote_description_set
            && self.transport_connected
        {
            self.transition_to(ConnectionState::Connected)?;
            info!("Session {} ({}) connected", self.id, self.key);
        }
        Ok(())
    }

    async fn release(&mut self) {
        if let Some(track) = self.local_track.take() {
            track.stop();
            self.record(SessionEvent::MediaReleased {
                track_id: track.id().to_string(),
            });
        }

        if !self.connection_released {
            self.connection_released = true;
            self.pending_candidates.clear();
            if let Err(e) = self.connection.close().await {
                warn!("Error closing peer connection for session {}: {}", self.id, e);
            }
        }
    }

    fn ensure_state(&self, expected: ConnectionState, operation: &str) -> Result<()> {
        if self.state != expected {
            return Err(SessionError::InvalidStateTransition(format!(
                "Cannot {} in state {}",
                operation, self.state
            )));
        }
        Ok(())
    }

    /// Transition to a new state
    fn transition_to(&mut self, new_state: ConnectionState) -> Result<()> {
        if !self.state.can_transition_to(new_state) {
            return Err(SessionError::InvalidStateTransition(format!(
                "Cannot transition from {:?} to {:?}",
                self.state, new_state
            )));
        }

        let from = self.state;
        self.state = new_state;
        debug!("Session {} ({}): {} -> {}", self.id, self.key, from, new_state);
        self.record(SessionEvent::StateChanged {
            from,
            to: new_state,
        });
        Ok(())
    }

    fn record(&mut self, event: SessionEvent) {
        self.events
            .push(SessionEventRecord::new(self.id, self.key.clone(), event));
    }

    // Getters
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn role(&self) -> Role {
        self.key.role()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }

    pub fn local_description_set(&self) -> bool {
        self.local_description_set
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn pending_candidates(&self) -> impl Iterator<Item = &IceCandidate> {
        self.pending_candidates.iter()
    }

    pub fn has_local_media(&self) -> bool {
        self.local_track.is_some()
    }

    pub fn local_track(&self) -> Option<&Arc<dyn MediaTrack>> {
        self.local_track.as_ref()
    }

    pub fn remote_admin(&self) -> Option<&AdminId> {
        self.remote_admin.as_ref()
    }

    pub fn failure(&self) -> Option<&SessionError> {
        self.failure.as_ref()
    }

    pub fn created_at(&self) -> &DateTime<Utc> {
        &self.created_at
    }
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &self.state)
            .field("local_description_set", &self.local_description_set)
            .field("remote_description_set", &self.remote_description_set)
            .field("pending_candidates", &self.pending_candidates.len())
            .field("has_local_media", &self.local_track.is_some())
            .finish()
    }
}
