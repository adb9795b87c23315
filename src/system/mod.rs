//! System-level modules
//!
//! - Clock abstraction shared by cache expiry and rate-limit windows
//! - Logging initialization

pub mod clock;
pub mod logging;
