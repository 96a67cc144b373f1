pub mod api;
pub mod config;
pub mod measure;
pub mod tseries;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
