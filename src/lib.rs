pub mod activity;
pub mod agent;
pub mod branch;
pub mod config;
pub mod coordination;
pub mod errors;
pub mod issue;
pub mod orchestrator;
pub mod queue;
pub mod review;
pub mod session;
pub mod settings;
pub mod silo;
pub mod ui;
pub mod util;
pub mod verify;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
