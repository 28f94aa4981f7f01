//! Ports to the real-time transport, the camera and the signaling server
//!
//! The session aggregate and the manager only talk to these traits; the
//! webrtc-rs and WebSocket implementations live in the infrastructure layer.

use crate::domain::negotiation::message::{IceCandidate, SessionDescription, SignalingMessage};
use crate::domain::negotiation::role::SessionKey;
use crate::domain::session::value_object::TransportState;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::SessionId;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Callback output of a peer connection
#[derive(Clone)]
pub enum PeerEvent {
    /// A local candidate was gathered; `None` marks the end of gathering
    LocalCandidate(Option<IceCandidate>),
    TransportStateChanged(TransportState),
    RemoteTrack(RemoteTrack),
}

impl fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            PeerEvent::TransportStateChanged(s) => {
                f.debug_tuple("TransportStateChanged").field(s).finish()
            }
            PeerEvent::RemoteTrack(t) => f.debug_tuple("RemoteTrack").field(&t.id).finish(),
        }
    }
}

/// Queue every peer connection reports into, tagged with its session
#[derive(Clone)]
pub struct PeerEventSender {
    session_id: SessionId,
    tx: mpsc::UnboundedSender<(SessionId, PeerEvent)>,
}

impl PeerEventSender {
    pub fn new(session_id: SessionId, tx: mpsc::UnboundedSender<(SessionId, PeerEvent)>) -> Self {
        Self { session_id, tx }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Returns false once the manager has gone away
    pub fn emit(&self, event: PeerEvent) -> bool {
        self.tx.send((self.session_id, event)).is_ok()
    }
}

/// Inbound media from the remote peer
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: String,
    pub inner: Option<Arc<TrackRemote>>,
}

/// One negotiated peer connection
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates peer connections wired to the manager's event queue
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        key: &SessionKey,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>>;
}

/// A local capture track
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> &str {
        "video"
    }

    /// Release the underlying device
    fn stop(&self);

    fn is_stopped(&self) -> bool;

    /// Track handle understood by the webrtc-rs transport
    fn rtc_track(&self) -> Option<Arc<dyn TrackLocal + Send + Sync>> {
        None
    }
}

/// Requested media kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: true,
            audio: false,
        }
    }
}

/// Camera access; acquisition may wait indefinitely on user permission
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<Arc<dyn MediaTrack>>;
}

/// Notifications from a signaling channel instance
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Socket (re)connected; `generation` increases with every connection
    Connected { generation: u64 },
    Message(SignalingMessage),
    ConnectError { attempt: u32, message: String },
    Disconnected { reason: String },
    /// Retry budget exhausted or disconnect requested; no further events
    Terminated,
}

/// Bidirectional message channel to the signaling server
pub trait SignalingChannel: Send + Sync {
    fn send(&self, message: SignalingMessage) -> Result<()>;

    /// Release the socket; idempotent
    fn disconnect(&self);

    fn is_connected(&self) -> bool;
}

pub struct ChannelHandle {
    pub channel: Arc<dyn SignalingChannel>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Opens signaling channels; connection happens in the background and is
/// reported through the handle's event stream.
pub trait SignalingConnector: Send + Sync {
    fn connect(&self, endpoint: &str) -> ChannelHandle;
}
