//! Domain layer - negotiation rules, the session aggregate and its ports

pub mod error_sink;
pub mod negotiation;
pub mod session;
pub mod shared;

pub use error_sink::{ErrorSink, ReportedError};
