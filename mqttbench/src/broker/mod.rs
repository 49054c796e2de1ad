//! Broker capabilities of the CLI, next to the simulated broker of the library.

pub mod mqtt;
