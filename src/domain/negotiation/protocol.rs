//! Routing and addressing rules shared by every role
//!
//! A single signaling channel carries the traffic of several sessions. On a
//! student device the analysis flag separates the analysis session from the
//! sender session; on an admin console the student id selects the viewer
//! session. Anything that does not belong to this device is stale.

use crate::domain::negotiation::message::{Address, Origin};
use crate::domain::negotiation::role::{Role, SessionKey};
use crate::domain::shared::error::SessionError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AdminId, LocalIdentity};

/// Whether the local device may run sessions of this role
pub fn permits(identity: &LocalIdentity, role: Role) -> bool {
    match identity {
        LocalIdentity::Student { .. } => role.is_student_role(),
        LocalIdentity::Admin { .. } => role == Role::Viewer,
    }
}

/// Map an inbound address to the session key it belongs to
pub fn route(identity: &LocalIdentity, address: &Address) -> Result<SessionKey> {
    match identity {
        LocalIdentity::Student { student_id } => {
            if &address.student_id != student_id {
                return Err(SessionError::StaleMessage(format!(
                    "addressed to student {}",
                    address.student_id
                )));
            }
            if address.is_analysis {
                Ok(SessionKey::analysis())
            } else {
                Ok(SessionKey::sender())
            }
        }
        LocalIdentity::Admin { admin_id } => {
            if address.is_analysis {
                return Err(SessionError::StaleMessage(
                    "analysis traffic is not routed to observers".to_string(),
                ));
            }
            if address.origin == Origin::Admin {
                return Err(SessionError::StaleMessage(
                    "relayed traffic from another observer".to_string(),
                ));
            }
            if let (Some(own), Some(target)) = (admin_id, &address.admin_id) {
                if own != target {
                    return Err(SessionError::StaleMessage(format!(
                        "addressed to observer {}",
                        target
                    )));
                }
            }
            Ok(SessionKey::viewer(address.student_id.clone()))
        }
    }
}

/// Address for a message emitted by the session under `key`
///
/// `remote_admin` is the admin that initiated the negotiation, when the
/// local student is answering an admin offer.
pub fn outbound_address(
    identity: &LocalIdentity,
    key: &SessionKey,
    remote_admin: Option<&AdminId>,
) -> Result<Address> {
    match (identity, key.role()) {
        (LocalIdentity::Student { student_id }, Role::Analysis) => {
            Ok(Address::analysis(student_id.clone()))
        }
        (LocalIdentity::Student { student_id }, Role::Sender) => Ok(match remote_admin {
            Some(admin) => Address::reply_to_admin(student_id.clone(), admin.clone()),
            None => Address::student(student_id.clone()),
        }),
        (LocalIdentity::Admin { admin_id }, Role::Viewer) => {
            let student_id = key.counterpart().cloned().ok_or_else(|| {
                SessionError::InvalidOperation("viewer key without student id".to_string())
            })?;
            Ok(Address::from_admin(student_id, admin_id.clone()))
        }
        (identity, role) => Err(SessionError::InvalidOperation(format!(
            "{} cannot run {} sessions",
            identity, role
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::value_objects::StudentId;

    fn student() -> LocalIdentity {
        LocalIdentity::student("42")
    }

    #[test]
    fn test_permits() {
        assert!(permits(&student(), Role::Sender));
        assert!(permits(&student(), Role::Analysis));
        assert!(!permits(&student(), Role::Viewer));
        assert!(permits(&LocalIdentity::admin(None), Role::Viewer));
        assert!(!permits(&LocalIdentity::admin(None), Role::Sender));
    }

    #[test]
    fn test_student_routing() {
        let analysis = Address::analysis("42".into());
        assert_eq!(route(&student(), &analysis).unwrap(), SessionKey::analysis());

        let admin_offer = Address::from_admin("42".into(), Some("sid-1".into()));
        assert_eq!(route(&student(), &admin_offer).unwrap(), SessionKey::sender());

        let other = Address::student("43".into());
        assert!(route(&student(), &other).unwrap_err().is_stale());
    }

    #[test]
    fn test_admin_routing() {
        let admin = LocalIdentity::admin(Some("sid-1"));

        let reply = Address::reply_to_admin("42".into(), "sid-1".into());
        assert_eq!(route(&admin, &reply).unwrap(), SessionKey::viewer("42"));

        let plain = Address::student(StudentId::from("7"));
        assert_eq!(route(&admin, &plain).unwrap(), SessionKey::viewer("7"));

        let foreign = Address::reply_to_admin("42".into(), "sid-2".into());
        assert!(route(&admin, &foreign).is_err());

        let analysis = Address::analysis("42".into());
        assert!(route(&admin, &analysis).is_err());

        let relayed = Address::from_admin("42".into(), Some("sid-9".into()));
        assert!(route(&admin, &relayed).is_err());
    }

    #[test]
    fn test_outbound_addresses() {
        let analysis = outbound_address(&student(), &SessionKey::analysis(), None).unwrap();
        assert!(analysis.is_analysis);

        let admin = AdminId::from("sid-1");
        let reply = outbound_address(&student(), &SessionKey::sender(), Some(&admin)).unwrap();
        assert!(reply.from_admin);
        assert_eq!(reply.admin_id, Some(admin));

        let viewer = outbound_address(
            &LocalIdentity::admin(None),
            &SessionKey::viewer("42"),
            None,
        )
        .unwrap();
        assert_eq!(viewer.origin, Origin::Admin);
        assert_eq!(viewer.student_id, StudentId::from("42"));

        assert!(outbound_address(&student(), &SessionKey::viewer("42"), None).is_err());
    }
}
