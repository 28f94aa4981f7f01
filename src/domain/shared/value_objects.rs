//! Shared value objects used across the session and negotiation contexts

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies one PeerSession instance; successive sessions for the same key
/// get distinct ids so late callbacks can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exam-taker identifier as assigned by the roster service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(String);

impl StudentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StudentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Observer identifier; the signaling server uses the admin's socket id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdminId(String);

impl AdminId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AdminId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for AdminId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who this process is on the signaling channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocalIdentity {
    /// Exam-taker device
    Student { student_id: StudentId },
    /// Observer console; the id is optional because the server assigns it
    Admin { admin_id: Option<AdminId> },
}

impl LocalIdentity {
    pub fn student(id: impl Into<String>) -> Self {
        LocalIdentity::Student {
            student_id: StudentId::new(id),
        }
    }

    pub fn admin(id: Option<&str>) -> Self {
        LocalIdentity::Admin {
            admin_id: id.map(AdminId::from),
        }
    }
}

impl fmt::Display for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalIdentity::Student { student_id } => write!(f, "student:{}", student_id),
            LocalIdentity::Admin { admin_id: Some(id) } => write!(f, "admin:{}", id),
            LocalIdentity::Admin { admin_id: None } => f.write_str("admin"),
        }
    }
}
