//! Persistent configuration and deployment state

pub mod deployed;
pub mod settings;
