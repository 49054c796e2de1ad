#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

pub mod aggregate;
pub mod broker;
pub mod client;
pub mod coordinator;
pub mod message;
pub mod payload;
pub mod pipeline;
pub mod stats;
pub mod utils;

#[cfg(test)]
mod test;
