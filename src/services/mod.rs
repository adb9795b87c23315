//! Service layer
//!
//! Geolocation resolution shared by the CLI and any embedding application.

pub mod geoip;

pub use geoip::{GeoLocationRecord, GeoLocationResolver, RefreshTask};
