pub mod bootstrap;
pub mod config;
pub mod http;
pub mod intake;
pub mod metrics;
pub mod orchestrator;
pub mod origin;
pub mod simplifier;
