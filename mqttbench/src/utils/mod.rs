#[cfg(target_family = "unix")]
pub mod os;
pub mod telemetry;
