use std::time::Duration;

/// Port assumed for bootstrap hosts given without one.
pub const DEFAULT_KAFKA_PORT: u16 = 9092;

/// Pause between retries of coordinator-directed requests.
pub const DEFAULT_RETRY_BACKOFF_MILLIS: u64 = 100;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Bootstrap hosts in `host` or `host:port` form.
    pub hosts: Vec<String>,

    /// Client id sent in every request preamble.
    pub client_id: Option<String>,

    /// Registers prometheus counters for requests and messages when set.
    pub metrics: bool,

    /// Milliseconds to wait before retrying a retriable coordinator error.
    pub retry_backoff: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            hosts: Vec::new(),
            client_id: Some("sund".to_owned()),
            metrics: false,
            retry_backoff: DEFAULT_RETRY_BACKOFF_MILLIS,
        }
    }
}

impl ClientConfig {
    pub fn with_bootstrap_hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ClientConfig {
            hosts: hosts.into_iter().map(|h| h.into()).collect(),
            ..Default::default()
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff)
    }
}
