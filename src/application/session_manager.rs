//! Peer session manager
//!
//! Owns every PeerSession of the local device, the shared signaling channel
//! and the routing between them. All negotiation steps run while holding the
//! single state lock, so they are serialized in arrival order. Camera
//! acquisition is the only step that runs with the lock released; when it
//! completes, the manager checks that the same session is still live before
//! using the track.

use crate::application::stream::{MediaStream, MediaStreamHandle, StreamSlot};
use crate::domain::error_sink::ErrorSink;
use crate::domain::negotiation::message::{
    IceCandidate, MessageKind, Origin, SessionDescription, SignalingMessage, SuspiciousActivity,
};
use crate::domain::negotiation::protocol;
use crate::domain::negotiation::role::{Role, SessionKey};
use crate::domain::session::event::SessionEventRecord;
use crate::domain::session::peer_session::PeerSession;
use crate::domain::session::ports::{
    ChannelEvent, MediaConstraints, MediaSource, MediaTrack, PeerConnectionFactory, PeerEvent,
    PeerEventSender, SignalingChannel, SignalingConnector,
};
use crate::domain::session::value_object::{CloseReason, ConnectionState, TransportState};
use crate::domain::shared::error::SessionError;
use crate::domain::shared::events::DomainEvent;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AdminId, LocalIdentity, SessionId, StudentId};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

const EVENT_CAPACITY: usize = 256;
const ACTIVITY_CAPACITY: usize = 64;

/// Manager settings
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Signaling server URL
    pub endpoint: String,
    /// A session that is not Connected this long after creation fails
    pub negotiation_timeout: Duration,
    pub media_constraints: MediaConstraints,
}

impl ManagerConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            negotiation_timeout: Duration::from_secs(30),
            media_constraints: MediaConstraints::default(),
        }
    }

    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }
}

/// Notifications for observers of the manager
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    SessionCreated {
        key: SessionKey,
        session_id: SessionId,
    },
    /// State change, candidate or media bookkeeping of one session
    Session(SessionEventRecord),
    MessageDropped {
        kind: MessageKind,
        reason: String,
    },
    ChannelConnected {
        generation: u64,
    },
    ChannelDisconnected {
        reason: String,
    },
}

/// Read-only view of one session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub key: SessionKey,
    pub state: ConnectionState,
    pub local_description_set: bool,
    pub remote_description_set: bool,
    pub pending_candidates: Vec<IceCandidate>,
    pub has_local_media: bool,
    pub remote_admin: Option<AdminId>,
    pub failure: Option<SessionError>,
    pub created_at: DateTime<Utc>,
}

impl From<&PeerSession> for SessionSnapshot {
    fn from(session: &PeerSession) -> Self {
        Self {
            id: session.id(),
            key: session.key().clone(),
            state: session.state(),
            local_description_set: session.local_description_set(),
            remote_description_set: session.remote_description_set(),
            pending_candidates: session.pending_candidates().cloned().collect(),
            has_local_media: session.has_local_media(),
            remote_admin: session.remote_admin().cloned(),
            failure: session.failure().cloned(),
            created_at: *session.created_at(),
        }
    }
}

struct ChannelSlot {
    instance: u64,
    channel: Arc<dyn SignalingChannel>,
    connected: bool,
    pump: JoinHandle<()>,
}

#[derive(Default)]
struct ManagerState {
    channel: Option<ChannelSlot>,
    /// Live sessions plus terminal tombstones until stopped or replaced
    sessions: HashMap<SessionKey, PeerSession>,
    /// Keys started locally; recreated after a reconnect
    desired: HashSet<SessionKey>,
    streams: HashMap<SessionKey, watch::Sender<StreamSlot>>,
    /// Sessions with an offer initiation in flight
    initiating: HashSet<SessionId>,
}

impl ManagerState {
    fn is_current(&self, key: &SessionKey, id: SessionId) -> bool {
        matches!(self.sessions.get(key), Some(s) if s.id() == id && s.is_live())
    }

    fn live_key_of(&self, id: SessionId) -> Option<SessionKey> {
        self.sessions
            .values()
            .find(|s| s.id() == id && s.is_live())
            .map(|s| s.key().clone())
    }

    fn channel_connected(&self) -> bool {
        self.channel.as_ref().map(|c| c.connected).unwrap_or(false)
    }

    fn publish_stream(&self, key: &SessionKey, slot: StreamSlot) {
        if let Some(tx) = self.streams.get(key) {
            tx.send_replace(slot);
        }
    }

    fn live_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_live()).count()
    }
}

struct Inner {
    identity: LocalIdentity,
    config: ManagerConfig,
    connector: Arc<dyn SignalingConnector>,
    peers: Arc<dyn PeerConnectionFactory>,
    media: Arc<dyn MediaSource>,
    errors: ErrorSink,
    state: Mutex<ManagerState>,
    events: broadcast::Sender<ManagerEvent>,
    activity: broadcast::Sender<SuspiciousActivity>,
    peer_events: mpsc::UnboundedSender<(SessionId, PeerEvent)>,
    next_instance: AtomicU64,
}

/// Entry point for the UI layer; cheap to clone
///
/// Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct PeerSessionManager {
    inner: Arc<Inner>,
}

impl PeerSessionManager {
    pub fn new(
        identity: LocalIdentity,
        config: ManagerConfig,
        connector: Arc<dyn SignalingConnector>,
        peers: Arc<dyn PeerConnectionFactory>,
        media: Arc<dyn MediaSource>,
    ) -> Self {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (activity, _) = broadcast::channel(ACTIVITY_CAPACITY);

        let inner = Arc::new(Inner {
            identity,
            config,
            connector,
            peers,
            media,
            errors: ErrorSink::new(),
            state: Mutex::new(ManagerState::default()),
            events,
            activity,
            peer_events: peer_tx,
            next_instance: AtomicU64::new(1),
        });

        tokio::spawn(peer_event_pump(Arc::downgrade(&inner), peer_rx));
        info!("Peer session manager created for {}", inner.identity);

        Self { inner }
    }

    /// Start (or restart) the session for `role` and return its stream handle
    ///
    /// Only caller misuse is returned as an error; everything that goes wrong
    /// later is written to the error sink.
    pub async fn start_session(
        &self,
        role: Role,
        counterpart: Option<StudentId>,
    ) -> Result<MediaStreamHandle> {
        let inner = &self.inner;
        if !protocol::permits(&inner.identity, role) {
            return Err(SessionError::InvalidOperation(format!(
                "{} cannot start a {} session",
                inner.identity, role
            )));
        }
        let key = SessionKey::new(role, counterpart)?;

        let mut state = inner.state.lock().await;
        inner.ensure_channel(&mut state);
        state.desired.insert(key.clone());

        let (tx, rx) = watch::channel(StreamSlot::Pending);
        if let Some(previous) = state.streams.insert(key.clone(), tx) {
            previous.send_replace(StreamSlot::Unavailable);
        }

        info!("Starting {} session", key);
        if let Some(id) = inner.replace_session(&mut state, key.clone(), None).await {
            if state.channel_connected() && role.initiates_offer() {
                inner.spawn_initiation(&mut state, key.clone(), id);
            }
        }

        Ok(MediaStreamHandle::new(key, rx))
    }

    /// Close the session for `key` and forget it; idempotent
    pub async fn stop_session(&self, key: &SessionKey) {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        state.desired.remove(key);

        if let Some(mut session) = state.sessions.remove(key) {
            state.initiating.remove(&session.id());
            session.close(CloseReason::Stopped).await;
            inner.publish_events(&mut session);
        }
        if let Some(tx) = state.streams.remove(key) {
            tx.send_replace(StreamSlot::Unavailable);
        }
        inner.record_live(&state);
        debug!("Stopped session {}", key);
    }

    /// Close every session and release the signaling channel; idempotent
    pub async fn stop_all(&self) {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        state.desired.clear();
        state.initiating.clear();

        let sessions: Vec<PeerSession> = state.sessions.drain().map(|(_, s)| s).collect();
        for mut session in sessions {
            session.close(CloseReason::Stopped).await;
            inner.publish_events(&mut session);
        }
        for (_, tx) in state.streams.drain() {
            tx.send_replace(StreamSlot::Unavailable);
        }
        if let Some(slot) = state.channel.take() {
            slot.channel.disconnect();
            slot.pump.abort();
            info!("Signaling channel released");
        }
        inner.record_live(&state);
    }

    /// Run `stop_all` when the returned guard goes out of scope
    pub fn teardown_guard(&self) -> TeardownGuard {
        TeardownGuard {
            manager: Some(self.clone()),
        }
    }

    /// Feed one inbound message through routing
    pub async fn handle_message(&self, message: SignalingMessage) {
        self.inner.handle_message(message).await;
    }

    pub async fn session_snapshot(&self, key: &SessionKey) -> Option<SessionSnapshot> {
        let state = self.inner.state.lock().await;
        state.sessions.get(key).map(SessionSnapshot::from)
    }

    pub async fn session_state(&self, key: &SessionKey) -> Option<ConnectionState> {
        let state = self.inner.state.lock().await;
        state.sessions.get(key).map(|s| s.state())
    }

    pub async fn live_session_count(&self) -> usize {
        self.inner.state.lock().await.live_count()
    }

    pub async fn is_channel_connected(&self) -> bool {
        self.inner.state.lock().await.channel_connected()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ManagerEvent> {
        self.inner.events.subscribe()
    }

    pub fn subscribe_activity(&self) -> broadcast::Receiver<SuspiciousActivity> {
        self.inner.activity.subscribe()
    }

    pub fn errors(&self) -> ErrorSink {
        self.inner.errors.clone()
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.inner.identity
    }
}

/// Scoped teardown; see [`PeerSessionManager::teardown_guard`]
pub struct TeardownGuard {
    manager: Option<PeerSessionManager>,
}

impl TeardownGuard {
    /// Tear down now and wait for it
    pub async fn release(mut self) {
        if let Some(manager) = self.manager.take() {
            manager.stop_all().await;
        }
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { manager.stop_all().await });
                }
                Err(_) => warn!("Teardown guard dropped outside a runtime, sessions left open"),
            }
        }
    }
}

impl Inner {
    fn ensure_channel(self: &Arc<Self>, state: &mut ManagerState) {
        if state.channel.is_some() {
            return;
        }

        let instance = self.next_instance.fetch_add(1, Ordering::SeqCst);
        info!("Opening signaling channel #{} to {}", instance, self.config.endpoint);
        let handle = self.connector.connect(&self.config.endpoint);
        let pump = tokio::spawn(channel_pump(Arc::downgrade(self), instance, handle.events));

        state.channel = Some(ChannelSlot {
            instance,
            channel: handle.channel,
            connected: false,
            pump,
        });
    }

    /// Close whatever holds `key` and put a fresh session in its place
    async fn replace_session(
        self: &Arc<Self>,
        state: &mut ManagerState,
        key: SessionKey,
        remote_admin: Option<AdminId>,
    ) -> Option<SessionId> {
        if let Some(mut previous) = state.sessions.remove(&key) {
            state.initiating.remove(&previous.id());
            if previous.close(CloseReason::Superseded).await {
                debug!("Session {} superseded", previous.id());
            }
            self.publish_events(&mut previous);
        }

        let id = SessionId::new();
        let sender = PeerEventSender::new(id, self.peer_events.clone());
        let connection = match self.peers.create(&key, sender).await {
            Ok(connection) => connection,
            Err(e) => {
                self.errors.report(e, Some(&key));
                state.publish_stream(&key, StreamSlot::Unavailable);
                self.record_live(state);
                return None;
            }
        };

        let session = PeerSession::with_id(id, key.clone(), connection).with_remote_admin(remote_admin);
        info!("Created session {} for {}", id, key);
        metrics::counter!("proctorlink_sessions_started_total", "role" => key.role().as_str())
            .increment(1);
        let _ = self.events.send(ManagerEvent::SessionCreated {
            key: key.clone(),
            session_id: id,
        });

        state.sessions.insert(key.clone(), session);
        self.record_live(state);
        Some(id)
    }

    /// Fail the session if it is still short of Connected once the timeout
    /// elapses; armed when negotiation starts
    fn arm_negotiation_timeout(self: &Arc<Self>, key: SessionKey, id: SessionId) {
        let weak = Arc::downgrade(self);
        let timeout = self.config.negotiation_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut state = inner.state.lock().await;
            let stuck = matches!(
                state.sessions.get(&key),
                Some(s) if s.id() == id && s.is_live() && s.state() != ConnectionState::Connected
            );
            if stuck {
                warn!("Session {} ({}) did not connect within {:?}", id, key, timeout);
                inner
                    .fail_session(&mut state, &key, id, SessionError::NegotiationTimeout(timeout))
                    .await;
            }
        });
    }

    fn spawn_initiation(self: &Arc<Self>, state: &mut ManagerState, key: SessionKey, id: SessionId) {
        if !state.initiating.insert(id) {
            return;
        }
        tokio::spawn(self.clone().initiate(key, id));
    }

    /// Offer path: acquire media, create and send the offer
    async fn initiate(self: Arc<Self>, key: SessionKey, id: SessionId) {
        debug!("Acquiring media for {}", key);
        let acquired = self.media.acquire(self.config.media_constraints).await;

        let mut state = self.state.lock().await;
        state.initiating.remove(&id);
        if !self.attach_acquired(&mut state, &key, id, acquired).await {
            return;
        }

        let outcome = match state.sessions.get_mut(&key) {
            Some(session) if session.id() == id => {
                let offer = session.create_offer().await;
                let address =
                    protocol::outbound_address(&self.identity, session.key(), session.remote_admin());
                self.publish_events(session);
                offer.and_then(|offer| address.map(|address| (offer, address)))
            }
            _ => return,
        };

        match outcome {
            Ok((description, address)) => {
                self.arm_negotiation_timeout(key.clone(), id);
                self.send(&state, &key, SignalingMessage::Offer { description, address });
            }
            Err(e) => self.fail_session(&mut state, &key, id, e).await,
        }
    }

    /// Answer path for roles that send media: acquire, attach, then answer
    async fn answer_with_media(self: Arc<Self>, key: SessionKey, id: SessionId) {
        debug!("Acquiring media to answer {}", key);
        let acquired = self.media.acquire(self.config.media_constraints).await;

        let mut state = self.state.lock().await;
        if self.attach_acquired(&mut state, &key, id, acquired).await {
            self.answer(&mut state, &key, id).await;
        }
    }

    /// Returns true when the track now belongs to the still-live session
    async fn attach_acquired(
        &self,
        state: &mut ManagerState,
        key: &SessionKey,
        id: SessionId,
        acquired: Result<Arc<dyn MediaTrack>>,
    ) -> bool {
        let track = match acquired {
            Ok(track) => track,
            Err(e) => {
                if state.is_current(key, id) {
                    self.fail_session(state, key, id, e).await;
                } else {
                    debug!("Media acquisition failed for retired session {}: {}", id, e);
                }
                return false;
            }
        };

        if !state.is_current(key, id) {
            debug!("Session {} retired during media acquisition, releasing track", id);
            track.stop();
            return false;
        }

        let attached = match state.sessions.get_mut(key) {
            Some(session) => {
                let result = session.attach_media(track.clone()).await;
                self.publish_events(session);
                result
            }
            None => return false,
        };

        match attached {
            Ok(()) => {
                state.publish_stream(key, StreamSlot::Ready(MediaStream::Local(track)));
                true
            }
            Err(e) => {
                self.fail_session(state, key, id, e).await;
                false
            }
        }
    }

    async fn answer(&self, state: &mut ManagerState, key: &SessionKey, id: SessionId) {
        let outcome = match state.sessions.get_mut(key) {
            Some(session) if session.id() == id => {
                let answer = session.create_answer().await;
                let address =
                    protocol::outbound_address(&self.identity, session.key(), session.remote_admin());
                self.publish_events(session);
                answer.and_then(|answer| address.map(|address| (answer, address)))
            }
            _ => return,
        };

        match outcome {
            Ok((description, address)) => {
                self.send(state, key, SignalingMessage::Answer { description, address });
            }
            Err(e) => self.fail_session(state, key, id, e).await,
        }
    }

    async fn handle_message(self: &Arc<Self>, message: SignalingMessage) {
        let message = match message {
            SignalingMessage::SuspiciousActivity(activity) => {
                self.forward_activity(activity);
                return;
            }
            other => other,
        };

        let kind = message.kind();
        let Some(address) = message.address().cloned() else {
            return;
        };
        let key = match protocol::route(&self.identity, &address) {
            Ok(key) => key,
            Err(e) => {
                self.drop_message(kind, e);
                return;
            }
        };

        debug!("Routing {} to {}", kind, key);
        let mut state = self.state.lock().await;
        match message {
            SignalingMessage::Offer { description, .. } => {
                let remote_admin = match address.origin {
                    Origin::Admin => address.admin_id.clone(),
                    Origin::Student => None,
                };
                self.on_offer(&mut state, key, description, remote_admin).await;
            }
            SignalingMessage::Answer { description, .. } => {
                self.on_answer(&mut state, key, description).await;
            }
            SignalingMessage::Candidate { candidate, .. } => {
                self.on_candidate(&mut state, key, candidate).await;
            }
            SignalingMessage::SuspiciousActivity(_) => {}
        }
    }

    fn forward_activity(&self, activity: SuspiciousActivity) {
        if !matches!(self.identity, LocalIdentity::Admin { .. }) {
            self.drop_message(
                MessageKind::SuspiciousActivity,
                SessionError::StaleMessage("activity reports are for observers".to_string()),
            );
            return;
        }
        info!("Suspicious activity #{}: {}", activity.id, activity.activity);
        let _ = self.activity.send(activity);
    }

    async fn on_offer(
        self: &Arc<Self>,
        state: &mut ManagerState,
        key: SessionKey,
        description: SessionDescription,
        remote_admin: Option<AdminId>,
    ) {
        let role = key.role();
        // A viewer waiting for its first offer keeps its session
        let waiting = matches!(
            state.sessions.get(&key),
            Some(s) if s.state() == ConnectionState::New && !role.initiates_offer()
        );

        let id = if waiting {
            match state.sessions.get(&key) {
                Some(session) => session.id(),
                None => return,
            }
        } else if role.accepts_unsolicited_offers() || state.desired.contains(&key) {
            state.publish_stream(&key, StreamSlot::Pending);
            match self.replace_session(state, key.clone(), remote_admin).await {
                Some(id) => id,
                None => return,
            }
        } else {
            self.drop_message(
                MessageKind::Offer,
                SessionError::StaleMessage(format!("no {} session started", key)),
            );
            return;
        };

        let applied = match state.sessions.get_mut(&key) {
            Some(session) => {
                let result = session.apply_remote_offer(description).await;
                let remote_set = session.remote_description_set();
                self.publish_events(session);
                result.map_err(|e| (e, remote_set))
            }
            None => return,
        };

        match applied {
            Ok(()) => {}
            // Remote description is in place; only a buffered candidate failed
            Err((e, true)) => {
                self.errors.report(e, Some(&key));
            }
            Err((e, false)) => {
                self.fail_session(state, &key, id, e).await;
                return;
            }
        }
        self.arm_negotiation_timeout(key.clone(), id);

        if role.sends_media() {
            tokio::spawn(self.clone().answer_with_media(key, id));
        } else {
            self.answer(state, &key, id).await;
        }
    }

    async fn on_answer(&self, state: &mut ManagerState, key: SessionKey, description: SessionDescription) {
        let applied = match state.sessions.get_mut(&key) {
            Some(session) if session.is_live() => {
                let id = session.id();
                let result = session.apply_remote_answer(description).await;
                let remote_set = session.remote_description_set();
                self.publish_events(session);
                result.map_err(|e| (e, remote_set, id))
            }
            _ => {
                self.drop_message(
                    MessageKind::Answer,
                    SessionError::StaleMessage(format!("no live {} session", key)),
                );
                return;
            }
        };

        match applied {
            Ok(()) => self.record_live(state),
            Err((e, _, _)) if e.is_stale() => self.drop_message(MessageKind::Answer, e),
            Err((e, true, _)) => {
                self.errors.report(e, Some(&key));
            }
            Err((e, false, id)) => self.fail_session(state, &key, id, e).await,
        }
    }

    async fn on_candidate(&self, state: &mut ManagerState, key: SessionKey, candidate: IceCandidate) {
        let result = match state.sessions.get_mut(&key) {
            Some(session) if session.is_live() => {
                let result = session.add_remote_candidate(candidate).await;
                self.publish_events(session);
                result
            }
            _ => Err(SessionError::StaleMessage(format!("no live {} session", key))),
        };

        match result {
            Ok(disposition) => debug!("Remote candidate for {}: {:?}", key, disposition),
            Err(e) if e.is_stale() => self.drop_message(MessageKind::Candidate, e),
            // A bad candidate does not doom the session
            Err(e) => {
                self.errors.report(e, Some(&key));
            }
        }
    }

    async fn handle_peer_event(&self, id: SessionId, event: PeerEvent) {
        let mut state = self.state.lock().await;
        let Some(key) = state.live_key_of(id) else {
            debug!("Ignoring {:?} for retired session {}", event, id);
            return;
        };

        match event {
            PeerEvent::LocalCandidate(Some(candidate)) => {
                let address = match state.sessions.get(&key) {
                    Some(session) => {
                        protocol::outbound_address(&self.identity, session.key(), session.remote_admin())
                    }
                    None => return,
                };
                match address {
                    Ok(address) => {
                        self.send(&state, &key, SignalingMessage::Candidate { candidate, address })
                    }
                    Err(e) => {
                        self.errors.report(e, Some(&key));
                    }
                }
            }
            PeerEvent::LocalCandidate(None) => {
                debug!("ICE gathering complete for {}", key);
            }
            PeerEvent::TransportStateChanged(transport) => {
                self.on_transport_state(&mut state, &key, id, transport).await;
            }
            PeerEvent::RemoteTrack(track) => {
                if key.role().receives_media() {
                    info!("Remote track {} for {}", track.id, key);
                    state.publish_stream(&key, StreamSlot::Ready(MediaStream::Remote(track)));
                } else {
                    debug!("Ignoring remote track {} on sending session {}", track.id, key);
                }
            }
        }
    }

    async fn on_transport_state(
        &self,
        state: &mut ManagerState,
        key: &SessionKey,
        id: SessionId,
        transport: TransportState,
    ) {
        debug!("Transport for {} is {:?}", key, transport);
        match transport {
            TransportState::Connected => {
                let result = match state.sessions.get_mut(key) {
                    Some(session) => {
                        let result = session.mark_transport_connected();
                        self.publish_events(session);
                        result
                    }
                    None => return,
                };
                if let Err(e) = result {
                    self.fail_session(state, key, id, e).await;
                }
            }
            TransportState::Disconnected => {
                warn!("Transport for {} temporarily disconnected", key);
            }
            TransportState::Failed => {
                self.fail_session(
                    state,
                    key,
                    id,
                    SessionError::PeerConnection("transport failed".to_string()),
                )
                .await;
            }
            TransportState::Closed => {
                if let Some(session) = state.sessions.get_mut(key) {
                    session.close(CloseReason::TransportClosed).await;
                    self.publish_events(session);
                }
                // Nothing recreates a session whose transport closed
                state.publish_stream(key, StreamSlot::Unavailable);
                self.record_live(state);
            }
            TransportState::New | TransportState::Connecting => {}
        }
    }

    async fn handle_channel_event(self: &Arc<Self>, instance: u64, event: ChannelEvent) {
        let event = match event {
            ChannelEvent::Message(message) => {
                let current = {
                    let state = self.state.lock().await;
                    matches!(&state.channel, Some(slot) if slot.instance == instance)
                };
                if current {
                    self.handle_message(message).await;
                }
                return;
            }
            other => other,
        };

        let mut state = self.state.lock().await;
        let Some(slot) = state.channel.as_mut().filter(|slot| slot.instance == instance) else {
            debug!("Ignoring {:?} from released channel #{}", event, instance);
            return;
        };

        match event {
            ChannelEvent::Connected { generation } => {
                slot.connected = true;
                info!("Signaling connected (generation {})", generation);
                let _ = self.events.send(ManagerEvent::ChannelConnected { generation });

                self.recreate_desired(&mut state).await;
                self.initiate_pending(&mut state);
            }
            ChannelEvent::Disconnected { reason } => {
                slot.connected = false;
                warn!("Signaling disconnected: {}", reason);
                self.close_all(&mut state, CloseReason::ChannelLost).await;
                // Started keys come back with the next connection
                for (key, tx) in &state.streams {
                    tx.send_replace(if state.desired.contains(key) {
                        StreamSlot::Pending
                    } else {
                        StreamSlot::Unavailable
                    });
                }
                let _ = self.events.send(ManagerEvent::ChannelDisconnected { reason });
            }
            ChannelEvent::ConnectError { attempt, message } => {
                self.errors.report(
                    SessionError::Transport(format!(
                        "connect attempt {} failed: {}",
                        attempt, message
                    )),
                    None,
                );
            }
            ChannelEvent::Terminated => {
                warn!("Signaling channel #{} terminated", instance);
                state.channel = None;
                self.close_all(&mut state, CloseReason::ChannelLost).await;
                for tx in state.streams.values() {
                    tx.send_replace(StreamSlot::Unavailable);
                }
            }
            ChannelEvent::Message(_) => {}
        }
    }

    /// Replace started keys whose session is gone or terminal; negotiation
    /// state of an earlier connection or channel instance is invalid
    async fn recreate_desired(self: &Arc<Self>, state: &mut ManagerState) {
        let stale: Vec<SessionKey> = state
            .desired
            .iter()
            .filter(|key| !matches!(state.sessions.get(*key), Some(s) if s.is_live()))
            .cloned()
            .collect();
        for key in stale {
            info!("Recreating {} after reconnect", key);
            state.publish_stream(&key, StreamSlot::Pending);
            self.replace_session(state, key, None).await;
        }
    }

    fn initiate_pending(self: &Arc<Self>, state: &mut ManagerState) {
        let pending: Vec<(SessionKey, SessionId)> = state
            .sessions
            .values()
            .filter(|s| s.state() == ConnectionState::New && s.role().initiates_offer())
            .map(|s| (s.key().clone(), s.id()))
            .collect();

        for (key, id) in pending {
            self.spawn_initiation(state, key, id);
        }
    }

    async fn close_all(&self, state: &mut ManagerState, reason: CloseReason) {
        state.initiating.clear();
        for session in state.sessions.values_mut() {
            if session.close(reason).await {
                self.publish_events(session);
            }
        }
        self.record_live(state);
    }

    async fn fail_session(
        &self,
        state: &mut ManagerState,
        key: &SessionKey,
        id: SessionId,
        error: SessionError,
    ) {
        let failed = match state.sessions.get_mut(key) {
            Some(session) if session.id() == id => {
                let failed = session.fail(error.clone()).await;
                self.publish_events(session);
                failed
            }
            _ => false,
        };

        if failed {
            metrics::counter!("proctorlink_sessions_failed_total", "role" => key.role().as_str())
                .increment(1);
            self.errors.report(error, Some(key));
            state.publish_stream(key, StreamSlot::Unavailable);
            self.record_live(state);
        }
    }

    fn send(&self, state: &ManagerState, key: &SessionKey, message: SignalingMessage) {
        debug!("Sending {} for {}", message.kind(), key);
        let result = match &state.channel {
            Some(slot) => slot.channel.send(message),
            None => Err(SessionError::Transport("no signaling channel".to_string())),
        };
        if let Err(e) = result {
            self.errors.report(e, Some(key));
        }
    }

    fn drop_message(&self, kind: MessageKind, reason: SessionError) {
        metrics::counter!("proctorlink_messages_dropped_total", "kind" => kind.to_string())
            .increment(1);
        let _ = self.events.send(ManagerEvent::MessageDropped {
            kind,
            reason: reason.to_string(),
        });
        self.errors.report(reason, None);
    }

    fn publish_events(&self, session: &mut PeerSession) {
        for record in session.take_events() {
            trace!("{} for session {}", record.event_type(), record.session_id());
            let _ = self.events.send(ManagerEvent::Session(record));
        }
    }

    fn record_live(&self, state: &ManagerState) {
        metrics::gauge!("proctorlink_live_sessions").set(state.live_count() as f64);
    }
}

async fn peer_event_pump(
    inner: Weak<Inner>,
    mut rx: mpsc::UnboundedReceiver<(SessionId, PeerEvent)>,
) {
    while let Some((id, event)) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_peer_event(id, event).await;
    }
    debug!("Peer event pump stopped");
}

async fn channel_pump(
    inner: Weak<Inner>,
    instance: u64,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_channel_event(instance, event).await;
    }
    debug!("Channel pump #{} stopped", instance);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::ports::{ChannelHandle, MockMediaSource, PeerConnection};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct NullChannel;

    impl SignalingChannel for NullChannel {
        fn send(&self, _message: SignalingMessage) -> Result<()> {
            Ok(())
        }

        fn disconnect(&self) {}

        fn is_connected(&self) -> bool {
            true
        }
    }

    struct ScriptedConnector {
        events: std::sync::Mutex<Option<mpsc::UnboundedSender<ChannelEvent>>>,
    }

    impl SignalingConnector for ScriptedConnector {
        fn connect(&self, _endpoint: &str) -> ChannelHandle {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.events.lock().unwrap() = Some(tx);
            ChannelHandle {
                channel: Arc::new(NullChannel),
                events: rx,
            }
        }
    }

    struct QuietPeer;

    #[async_trait]
    impl PeerConnection for QuietPeer {
        async fn create_offer(&self) -> Result<SessionDescription> {
            Ok(SessionDescription::offer("offer"))
        }
        async fn create_answer(&self) -> Result<SessionDescription> {
            Ok(SessionDescription::answer("answer"))
        }
        async fn set_local_description(&self, _d: SessionDescription) -> Result<()> {
            Ok(())
        }
        async fn set_remote_description(&self, _d: SessionDescription) -> Result<()> {
            Ok(())
        }
        async fn add_ice_candidate(&self, _c: IceCandidate) -> Result<()> {
            Ok(())
        }
        async fn add_track(&self, _t: Arc<dyn MediaTrack>) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct QuietFactory;

    #[async_trait]
    impl PeerConnectionFactory for QuietFactory {
        async fn create(
            &self,
            _key: &SessionKey,
            _events: PeerEventSender,
        ) -> Result<Arc<dyn crate::domain::session::ports::PeerConnection>> {
            Ok(Arc::new(QuietPeer))
        }
    }

    struct Camera(AtomicBool);

    impl MediaTrack for Camera {
        fn id(&self) -> &str {
            "camera"
        }
        fn stop(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
        fn is_stopped(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn build_manager(
        identity: LocalIdentity,
        media: MockMediaSource,
    ) -> (PeerSessionManager, Arc<ScriptedConnector>) {
        let connector = Arc::new(ScriptedConnector {
            events: std::sync::Mutex::new(None),
        });
        let manager = PeerSessionManager::new(
            identity,
            ManagerConfig::new("ws://localhost:8080"),
            connector.clone(),
            Arc::new(QuietFactory),
            Arc::new(media),
        );
        (manager, connector)
    }

    #[tokio::test]
    async fn test_role_must_match_identity() {
        let (manager, _) = build_manager(LocalIdentity::student("42"), MockMediaSource::new());
        let result = manager.start_session(Role::Viewer, Some("7".into())).await;
        assert!(matches!(result, Err(SessionError::InvalidOperation(_))));

        let (manager, _) = build_manager(LocalIdentity::admin(None), MockMediaSource::new());
        assert!(manager.start_session(Role::Viewer, None).await.is_err());
        assert!(manager.start_session(Role::Sender, None).await.is_err());
        assert_eq!(manager.live_session_count().await, 0);
    }

    #[tokio::test]
    async fn test_media_acquired_on_connect() {
        let mut media = MockMediaSource::new();
        media
            .expect_acquire()
            .times(1)
            .returning(|_| Ok(Arc::new(Camera(AtomicBool::new(false))) as Arc<dyn MediaTrack>));

        let (manager, connector) = build_manager(LocalIdentity::student("42"), media);
        let mut handle = manager.start_session(Role::Sender, None).await.unwrap();
        assert_eq!(
            manager.session_state(&SessionKey::sender()).await,
            Some(ConnectionState::New)
        );

        let events = connector.events.lock().unwrap().clone().unwrap();
        events.send(ChannelEvent::Connected { generation: 1 }).unwrap();

        let stream = handle.wait().await.unwrap();
        assert_eq!(stream.track_id(), "camera");
        assert!(!stream.is_remote());
    }

    #[tokio::test]
    async fn test_media_denied_resolves_handle_to_none() {
        let mut media = MockMediaSource::new();
        media
            .expect_acquire()
            .returning(|_| Err(SessionError::MediaAcquisition("permission denied".into())));

        let (manager, connector) = build_manager(LocalIdentity::student("42"), media);
        let mut handle = manager.start_session(Role::Analysis, None).await.unwrap();
        let events = connector.events.lock().unwrap().clone().unwrap();
        events.send(ChannelEvent::Connected { generation: 1 }).unwrap();

        assert!(handle.wait().await.is_none());
        assert_eq!(
            manager.session_state(&SessionKey::analysis()).await,
            Some(ConnectionState::Failed)
        );
        let reported = manager.errors().current().unwrap();
        assert!(matches!(reported.error, SessionError::MediaAcquisition(_)));
    }
}
