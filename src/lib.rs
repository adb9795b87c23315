//! Geolocator - IP geolocation resolver
//!
//! Resolves country, city, region, coordinates and network metadata for
//! public IP addresses through an external lookup provider.
//!
//! # Features
//! - **cli**: Command-line interface (default)
//! - **redis**: Redis cache backend (default)
//! - **full**: All features enabled
//!
//! # Architecture
//! - `utils::ip`: public-address validation
//! - `cache`: TTL cache with per-IP single-flight over memory / Redis / null stores
//! - `services::geoip`: rate limiter, provider client, resolver and refresh task
//! - `config`: Configuration management
//! - `runtime`: Component wiring
//! - `system`: Clock and logging

pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod errors;
pub mod interfaces;
pub mod runtime;
pub mod services;
pub mod system;
pub mod utils;

pub use errors::GeoLocationError;
pub use services::geoip::{GeoLocationRecord, GeoLocationResolver};
