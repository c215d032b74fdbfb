//! Process supervision of the managed service

pub mod health;
pub mod pidfile;
pub mod process;
