//! Deployment module

pub mod fsm;
pub mod hooks;
pub mod orchestrator;
pub mod short_downtime;
pub mod zero_downtime;
