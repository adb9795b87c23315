//! Application lifecycle

pub mod lifetime;
