//! Shared kernel - Common types used by the negotiation and session contexts

pub mod error;
pub mod events;
pub mod result;
pub mod value_objects;

pub use error::{ErrorKind, SessionError};
pub use result::Result;
pub use value_objects::*;
