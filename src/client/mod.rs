mod config;
mod cluster;
mod core;
mod metrics;

pub use self::cluster::Cluster;
pub use self::config::{ClientConfig, DEFAULT_KAFKA_PORT, DEFAULT_RETRY_BACKOFF_MILLIS};
pub use self::core::{ClientCore, DispatchResults, StaticBoxFuture};
pub use self::metrics::Metrics;
