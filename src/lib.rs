pub mod config;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod ratelimit;
pub mod routing;
pub mod server;

pub use error::GatewayError;
