//! Data models

pub mod events;
pub mod manifest;
pub mod spec;
