//! Integration tests

mod fakes;
mod test_orchestrator;
mod test_server;
