//! JSON wire encoding of signaling messages
//!
//! Every WebSocket text frame is an envelope `{"event": ..., "data": ...}`.
//! Payload fields are camelCase. Observer-originated offers and candidates
//! travel as `admin_offer` / `admin_candidate`; the server rewrites them into
//! plain `offer` / `candidate` events flagged `isAdminOffer` / `fromAdmin`.

use crate::domain::negotiation::message::{
    Address, IceCandidate, Origin, SdpKind, SessionDescription, SignalingMessage,
    SuspiciousActivity,
};
use crate::domain::shared::error::SessionError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AdminId, StudentId};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
enum WireFrame {
    Offer(DescriptionPayload),
    Answer(DescriptionPayload),
    Candidate(CandidatePayload),
    AdminOffer(AdminOfferPayload),
    AdminCandidate(CandidatePayload),
    SuspiciousActivity(ActivityPayload),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescriptionPayload {
    sdp: String,
    #[serde(rename = "type")]
    kind: SdpKind,
    #[serde(deserialize_with = "lenient_id")]
    student_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    admin_id: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    is_analysis: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    is_admin_offer: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    from_admin: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidatePayload {
    candidate: String,
    #[serde(default)]
    sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    sdp_mline_index: Option<u16>,
    #[serde(deserialize_with = "lenient_id")]
    student_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    admin_id: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    is_analysis: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    from_admin: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminOfferPayload {
    sdp: SessionDescription,
    #[serde(deserialize_with = "lenient_id")]
    student_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityPayload {
    id: i64,
    #[serde(default)]
    student_id: Option<Value>,
    activity: String,
    #[serde(default)]
    timestamp: Value,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Student ids arrive as strings or numbers depending on the sender
fn lenient_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Encode a message as one text frame
pub fn encode(message: &SignalingMessage) -> Result<String> {
    let frame = match message {
        SignalingMessage::Offer {
            description,
            address,
        } if address.origin == Origin::Admin => WireFrame::AdminOffer(AdminOfferPayload {
            sdp: description.clone(),
            student_id: address.student_id.to_string(),
        }),
        SignalingMessage::Offer {
            description,
            address,
        } => WireFrame::Offer(description_payload(description, address)),
        SignalingMessage::Answer {
            description,
            address,
        } => WireFrame::Answer(description_payload(description, address)),
        SignalingMessage::Candidate { candidate, address } if address.origin == Origin::Admin => {
            WireFrame::AdminCandidate(CandidatePayload {
                admin_id: None,
                is_analysis: false,
                from_admin: false,
                ..candidate_payload(candidate, address)
            })
        }
        SignalingMessage::Candidate { candidate, address } => {
            WireFrame::Candidate(candidate_payload(candidate, address))
        }
        SignalingMessage::SuspiciousActivity(activity) => {
            WireFrame::SuspiciousActivity(ActivityPayload {
                id: activity.id,
                student_id: activity
                    .student_id
                    .as_ref()
                    .map(|id| Value::String(id.to_string())),
                activity: activity.activity.clone(),
                timestamp: Value::String(activity.timestamp.clone()),
            })
        }
    };

    serde_json::to_string(&frame)
        .map_err(|e| SessionError::Transport(format!("Failed to encode {}: {}", message.kind(), e)))
}

fn description_payload(description: &SessionDescription, address: &Address) -> DescriptionPayload {
    // An observer's answer goes to every other client; an adminId would make
    // the server bounce it back to the observer.
    let admin_id = match address.origin {
        Origin::Admin => None,
        Origin::Student => address.admin_id.as_ref().map(|id| id.to_string()),
    };

    DescriptionPayload {
        sdp: description.sdp.clone(),
        kind: description.kind,
        student_id: address.student_id.to_string(),
        admin_id,
        is_analysis: address.is_analysis,
        is_admin_offer: false,
        from_admin: address.from_admin || address.origin == Origin::Admin,
    }
}

fn candidate_payload(candidate: &IceCandidate, address: &Address) -> CandidatePayload {
    CandidatePayload {
        candidate: candidate.candidate.clone(),
        sdp_mid: candidate.sdp_mid.clone(),
        sdp_mline_index: candidate.sdp_mline_index,
        student_id: address.student_id.to_string(),
        admin_id: address.admin_id.as_ref().map(|id| id.to_string()),
        is_analysis: address.is_analysis,
        from_admin: address.from_admin,
    }
}

/// Decode one text frame
pub fn decode(text: &str) -> Result<SignalingMessage> {
    let frame: WireFrame = serde_json::from_str(text)
        .map_err(|e| SessionError::Transport(format!("Undecodable signaling frame: {}", e)))?;

    let message = match frame {
        WireFrame::Offer(p) => {
            let origin = if p.is_admin_offer { Origin::Admin } else { Origin::Student };
            let (description, address) = p.into_parts(origin);
            SignalingMessage::Offer { description, address }
        }
        WireFrame::Answer(p) => {
            let (description, address) = p.into_parts(Origin::Student);
            SignalingMessage::Answer { description, address }
        }
        WireFrame::Candidate(p) => {
            let (candidate, address) = p.into_parts(Origin::Student);
            SignalingMessage::Candidate { candidate, address }
        }
        WireFrame::AdminCandidate(p) => {
            let (candidate, address) = p.into_parts(Origin::Admin);
            SignalingMessage::Candidate { candidate, address }
        }
        WireFrame::AdminOffer(p) => SignalingMessage::Offer {
            description: p.sdp,
            address: address(p.student_id, None, false, false, Origin::Admin),
        },
        WireFrame::SuspiciousActivity(p) => SignalingMessage::SuspiciousActivity(SuspiciousActivity {
            id: p.id,
            student_id: p.student_id.and_then(value_to_string).map(StudentId::new),
            activity: p.activity,
            timestamp: value_to_string(p.timestamp).unwrap_or_default(),
        }),
    };

    Ok(message)
}

impl DescriptionPayload {
    fn into_parts(self, origin: Origin) -> (SessionDescription, Address) {
        let description = SessionDescription { kind: self.kind, sdp: self.sdp };
        let address = address(self.student_id, self.admin_id, self.is_analysis, self.from_admin, origin);
        (description, address)
    }
}

impl CandidatePayload {
    /// Observer candidates carry no routing flags of their own
    fn into_parts(self, origin: Origin) -> (IceCandidate, Address) {
        let candidate = IceCandidate {
            candidate: self.candidate,
            sdp_mid: self.sdp_mid,
            sdp_mline_index: self.sdp_mline_index,
        };
        let flags = origin == Origin::Student;
        let address = address(
            self.student_id,
            self.admin_id,
            flags && self.is_analysis,
            flags && self.from_admin,
            origin,
        );
        (candidate, address)
    }
}

fn address(
    student_id: String,
    admin_id: Option<String>,
    is_analysis: bool,
    from_admin: bool,
    origin: Origin,
) -> Address {
    Address {
        student_id: StudentId::new(student_id),
        admin_id: admin_id.map(AdminId::new),
        is_analysis,
        from_admin,
        origin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_admin_forwarded_offer() {
        let frame = json!({
            "event": "offer",
            "data": {
                "sdp": "v=0",
                "type": "offer",
                "studentId": "42",
                "isAdminOffer": true,
                "adminId": "sid-7",
                "fromAdmin": true
            }
        });

        let message = decode(&frame.to_string()).unwrap();
        match message {
            SignalingMessage::Offer {
                description,
                address,
            } => {
                assert_eq!(description, SessionDescription::offer("v=0"));
                assert_eq!(address.student_id.as_str(), "42");
                assert_eq!(address.admin_id, Some(AdminId::new("sid-7")));
                assert_eq!(address.origin, Origin::Admin);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_candidate_with_numeric_student_id() {
        let frame = json!({
            "event": "candidate",
            "data": {
                "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0,
                "studentId": 42,
                "isAnalysis": true
            }
        });

        let message = decode(&frame.to_string()).unwrap();
        let address = message.address().unwrap();
        assert_eq!(address.student_id.as_str(), "42");
        assert!(address.is_analysis);
        assert_eq!(address.origin, Origin::Student);
    }

    #[test]
    fn test_decode_suspicious_activity() {
        let frame = json!({
            "event": "suspicious_activity",
            "data": {
                "id": 9,
                "studentId": "42",
                "activity": "looking away",
                "timestamp": "2024-05-01T10:00:00"
            }
        });

        match decode(&frame.to_string()).unwrap() {
            SignalingMessage::SuspiciousActivity(activity) => {
                assert_eq!(activity.id, 9);
                assert_eq!(activity.student_id, Some(StudentId::from("42")));
                assert_eq!(activity.activity, "looking away");
                assert_eq!(activity.timestamp, "2024-05-01T10:00:00");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_encode_analysis_offer() {
        let message = SignalingMessage::Offer {
            description: SessionDescription::offer("v=0"),
            address: Address::analysis(StudentId::from("42")),
        };

        let value: Value = serde_json::from_str(&encode(&message).unwrap()).unwrap();
        assert_eq!(value["event"], "offer");
        assert_eq!(value["data"]["studentId"], "42");
        assert_eq!(value["data"]["isAnalysis"], true);
        assert_eq!(value["data"]["type"], "offer");
        assert!(value["data"].get("adminId").is_none());
    }

    #[test]
    fn test_encode_reply_to_admin_answer() {
        let message = SignalingMessage::Answer {
            description: SessionDescription::answer("v=0"),
            address: Address::reply_to_admin(StudentId::from("42"), AdminId::new("sid-7")),
        };

        let value: Value = serde_json::from_str(&encode(&message).unwrap()).unwrap();
        assert_eq!(value["event"], "answer");
        assert_eq!(value["data"]["adminId"], "sid-7");
        assert_eq!(value["data"]["fromAdmin"], true);
    }

    #[test]
    fn test_encode_observer_traffic() {
        let address = Address::from_admin(StudentId::from("42"), Some(AdminId::new("sid-7")));

        let offer = SignalingMessage::Offer {
            description: SessionDescription::offer("v=0"),
            address: address.clone(),
        };
        let value: Value = serde_json::from_str(&encode(&offer).unwrap()).unwrap();
        assert_eq!(value["event"], "admin_offer");
        assert_eq!(value["data"]["sdp"]["sdp"], "v=0");
        assert_eq!(value["data"]["sdp"]["type"], "offer");

        let candidate = SignalingMessage::Candidate {
            candidate: IceCandidate::new("candidate:1"),
            address: address.clone(),
        };
        let value: Value = serde_json::from_str(&encode(&candidate).unwrap()).unwrap();
        assert_eq!(value["event"], "admin_candidate");
        assert_eq!(value["data"]["sdpMLineIndex"], 0);
        assert!(value["data"].get("adminId").is_none());

        let answer = SignalingMessage::Answer {
            description: SessionDescription::answer("v=0"),
            address,
        };
        let value: Value = serde_json::from_str(&encode(&answer).unwrap()).unwrap();
        assert_eq!(value["event"], "answer");
        assert_eq!(value["data"]["fromAdmin"], true);
        assert!(value["data"].get("adminId").is_none());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"event":"bogus","data":{}}"#).is_err());
    }
}
