//! Negotiation bounded context - message schema, roles and routing rules

pub mod message;
pub mod protocol;
pub mod role;

pub use message::{
    Address, IceCandidate, MessageKind, Origin, SdpKind, SessionDescription, SignalingMessage,
    SuspiciousActivity,
};
pub use role::{Role, SessionKey};
