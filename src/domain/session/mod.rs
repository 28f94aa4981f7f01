//! Session bounded context - one peer connection per session key

pub mod event;
pub mod peer_session;
pub mod ports;
pub mod value_object;

pub use event::{SessionEvent, SessionEventRecord};
pub use peer_session::PeerSession;
pub use ports::{
    ChannelEvent, ChannelHandle, MediaConstraints, MediaSource, MediaTrack, PeerConnection,
    PeerConnectionFactory, PeerEvent, PeerEventSender, RemoteTrack, SignalingChannel,
    SignalingConnector,
};
pub use value_object::{CandidateDisposition, CloseReason, ConnectionState, TransportState};
