pub mod agent;
pub mod config;
pub mod grpcapi;
pub mod log_broadcast;
pub mod masterclient;
pub mod runtime;

#[cfg(test)]
test_r::enable!();

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
