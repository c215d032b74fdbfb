//! Traffic proxy following the active port

pub mod manager;
pub mod relay;
