pub mod client;
pub mod logging;
pub mod metrics;
pub mod types;
