pub mod cache;
pub mod error;
pub mod gateway;
pub mod notify;
pub mod orchestrator;
pub mod scheduler;
