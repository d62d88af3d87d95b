pub mod command;
pub mod config;
pub mod error;
pub mod generator;
pub mod mqtt;
pub mod relay;
pub mod shutdown;
pub mod store;
pub mod telemetry;
pub mod util;
