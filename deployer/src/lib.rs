//! Nugget Deployer Library
//!
//! Device deployment orchestration for nugget projects: dependency ordering,
//! runtime provisioning, human-gated flashing and redeploy classification.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod hardware;
pub mod logs;
pub mod models;
pub mod registry;
pub mod server;
pub mod storage;
pub mod utils;
