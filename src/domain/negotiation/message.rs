//! Negotiation message schema
//!
//! These are the transport-agnostic messages exchanged over the signaling
//! channel. The JSON wire encoding lives in the signaling infrastructure.

use crate::domain::shared::value_objects::{AdminId, StudentId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SDP type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// One half of the offer/answer exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Remote or local ICE candidate as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }
}

/// Which kind of device produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    #[default]
    Student,
    Admin,
}

/// Routing information attached to every negotiation message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub student_id: StudentId,
    pub admin_id: Option<AdminId>,
    /// Message belongs to the background analysis session
    pub is_analysis: bool,
    /// Student reply to an admin-initiated negotiation
    pub from_admin: bool,
    pub origin: Origin,
}

impl Address {
    pub fn student(student_id: StudentId) -> Self {
        Self {
            student_id,
            admin_id: None,
            is_analysis: false,
            from_admin: false,
            origin: Origin::Student,
        }
    }

    pub fn analysis(student_id: StudentId) -> Self {
        Self {
            is_analysis: true,
            ..Self::student(student_id)
        }
    }

    pub fn from_admin(student_id: StudentId, admin_id: Option<AdminId>) -> Self {
        Self {
            student_id,
            admin_id,
            is_analysis: false,
            from_admin: false,
            origin: Origin::Admin,
        }
    }

    /// Student reply addressed back to a specific admin
    pub fn reply_to_admin(student_id: StudentId, admin_id: AdminId) -> Self {
        Self {
            student_id,
            admin_id: Some(admin_id),
            is_analysis: false,
            from_admin: true,
            origin: Origin::Student,
        }
    }
}

/// Suspicious behaviour reported by the analysis consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspiciousActivity {
    pub id: i64,
    pub student_id: Option<StudentId>,
    pub activity: String,
    pub timestamp: String,
}

/// Signaling message types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    Offer {
        description: SessionDescription,
        address: Address,
    },
    Answer {
        description: SessionDescription,
        address: Address,
    },
    Candidate {
        candidate: IceCandidate,
        address: Address,
    },
    /// Side channel forwarded to the roster UI, not part of negotiation
    SuspiciousActivity(SuspiciousActivity),
}

impl SignalingMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            SignalingMessage::Offer { .. } => MessageKind::Offer,
            SignalingMessage::Answer { .. } => MessageKind::Answer,
            SignalingMessage::Candidate { .. } => MessageKind::Candidate,
            SignalingMessage::SuspiciousActivity(_) => MessageKind::SuspiciousActivity,
        }
    }

    pub fn address(&self) -> Option<&Address> {
        match self {
            SignalingMessage::Offer { address, .. }
            | SignalingMessage::Answer { address, .. }
            | SignalingMessage::Candidate { address, .. } => Some(address),
            SignalingMessage::SuspiciousActivity(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Offer,
    Answer,
    Candidate,
    SuspiciousActivity,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Offer => "offer",
            MessageKind::Answer => "answer",
            MessageKind::Candidate => "candidate",
            MessageKind::SuspiciousActivity => "suspicious_activity",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_serializes_type_field() {
        let json = serde_json::to_value(SessionDescription::offer("v=0")).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0");
    }

    #[test]
    fn test_reply_to_admin_address() {
        let address = Address::reply_to_admin("42".into(), "sid-1".into());
        assert!(address.from_admin);
        assert_eq!(address.origin, Origin::Student);
        assert_eq!(address.admin_id, Some(AdminId::from("sid-1")));
    }

    #[test]
    fn test_message_kind() {
        let msg = SignalingMessage::Candidate {
            candidate: IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host"),
            address: Address::analysis("42".into()),
        };
        assert_eq!(msg.kind(), MessageKind::Candidate);
        assert!(msg.address().unwrap().is_analysis);
        assert_eq!(MessageKind::SuspiciousActivity.to_string(), "suspicious_activity");
    }
}
