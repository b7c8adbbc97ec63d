//! Local HTTP surface for the flash gate

pub mod handlers;
pub mod serve;
pub mod state;
