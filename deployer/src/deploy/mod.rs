//! Device deployment orchestration

pub mod cloud;
pub mod esptool;
pub mod events;
pub mod fsm;
pub mod gate;
pub mod mapper;
pub mod orchestrator;
pub mod outputs;
pub mod provision;
pub mod redeploy;
pub mod resolver;
pub mod serial;
pub mod strategy;
