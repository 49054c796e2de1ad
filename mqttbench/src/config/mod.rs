//! Command line and file configuration of a benchmark run.

mod client;
mod file;
mod mock;
mod payload;
mod tls;

pub use self::{client::ClientArgs, mock::MockArgs, payload::PayloadFormat};
