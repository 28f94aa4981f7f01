//! Roles and session routing keys

use crate::domain::shared::error::SessionError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::StudentId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Negotiation role of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Student device sending its camera to an observer
    Sender,
    /// Admin device receiving a specific student's camera
    Viewer,
    /// Student device sending its camera to the background analysis consumer
    Analysis,
}

impl Role {
    /// Whether this side emits the first offer
    pub fn initiates_offer(&self) -> bool {
        matches!(self, Role::Sender | Role::Analysis)
    }

    /// Whether this side must acquire and attach local camera media
    pub fn sends_media(&self) -> bool {
        matches!(self, Role::Sender | Role::Analysis)
    }

    pub fn receives_media(&self) -> bool {
        matches!(self, Role::Viewer)
    }

    /// Whether an inbound offer may create (or supersede) a session for this
    /// role without a prior local request
    pub fn accepts_unsolicited_offers(&self) -> bool {
        matches!(self, Role::Sender | Role::Analysis)
    }

    /// Student-device roles
    pub fn is_student_role(&self) -> bool {
        matches!(self, Role::Sender | Role::Analysis)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Sender => "sender",
            Role::Viewer => "viewer",
            Role::Analysis => "analysis",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing identity of one session on the shared channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    role: Role,
    counterpart: Option<StudentId>,
}

impl SessionKey {
    /// Viewer keys name the observed student; sender-side keys have no
    /// counterpart because a device runs one outbound session per role.
    pub fn new(role: Role, counterpart: Option<StudentId>) -> Result<Self> {
        match (role, &counterpart) {
            (Role::Viewer, None) => Err(SessionError::InvalidOperation(
                "viewer sessions require a student id".to_string(),
            )),
            (Role::Sender | Role::Analysis, Some(id)) => Err(SessionError::InvalidOperation(
                format!("{} sessions do not take a counterpart (got {})", role, id),
            )),
            _ => Ok(Self { role, counterpart }),
        }
    }

    pub fn viewer(student_id: impl Into<StudentId>) -> Self {
        Self {
            role: Role::Viewer,
            counterpart: Some(student_id.into()),
        }
    }

    pub fn sender() -> Self {
        Self {
            role: Role::Sender,
            counterpart: None,
        }
    }

    pub fn analysis() -> Self {
        Self {
            role: Role::Analysis,
            counterpart: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn counterpart(&self) -> Option<&StudentId> {
        self.counterpart.as_ref()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.counterpart {
            Some(id) => write!(f, "{}:{}", self.role, id),
            None => write!(f, "{}", self.role),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_directions() {
        assert!(Role::Sender.initiates_offer());
        assert!(Role::Analysis.sends_media());
        assert!(!Role::Viewer.initiates_offer());
        assert!(!Role::Viewer.sends_media());
        assert!(Role::Viewer.receives_media());
        assert!(!Role::Viewer.accepts_unsolicited_offers());
    }

    #[test]
    fn test_session_key_validation() {
        assert!(SessionKey::new(Role::Viewer, None).is_err());
        assert!(SessionKey::new(Role::Sender, Some("42".into())).is_err());
        assert_eq!(
            SessionKey::new(Role::Viewer, Some("42".into())).unwrap(),
            SessionKey::viewer("42")
        );
        assert_eq!(SessionKey::new(Role::Analysis, None).unwrap(), SessionKey::analysis());
    }

    #[test]
    fn test_session_key_display() {
        assert_eq!(SessionKey::viewer("42").to_string(), "viewer:42");
        assert_eq!(SessionKey::sender().to_string(), "sender");
    }
}
