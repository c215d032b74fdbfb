//! Revlay Library
//!
//! Release store, process supervisor, traffic proxy and the deployment
//! orchestrator built on top of them.

pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod proxy;
pub mod storage;
pub mod supervisor;
pub mod template;
pub mod utils;
