pub const DEFAULT_MAX_WAIT_TIME_MILLIS: i32 = 1000;

pub const DEFAULT_MIN_BYTES: i32 = 1;

pub const DEFAULT_MAX_BYTES: i32 = 1024 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Milliseconds a broker may block waiting for `min_bytes` of messages.
    pub max_wait_time: i32,

    /// Minimum bytes of messages a fetch must return.
    pub min_bytes: i32,

    /// Fetch budget per request; split evenly over the partitions asked of
    /// a single broker.
    pub max_bytes: i32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            max_wait_time: DEFAULT_MAX_WAIT_TIME_MILLIS,
            min_bytes: DEFAULT_MIN_BYTES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// Extra configuration for group-coordinated consumption.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Consumer group name, also the key of the coordination paths.
    pub group: String,

    /// Commit offsets automatically after every successful consume.
    pub autocommit: bool,
}

impl Default for GroupConfig {
    fn default() -> Self {
        GroupConfig {
            group: String::new(),
            autocommit: true,
        }
    }
}

impl GroupConfig {
    pub fn new<S: Into<String>>(group: S) -> Self {
        GroupConfig {
            group: group.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConsumerConfig::default();

        assert_eq!(config.max_wait_time, 1000);
        assert_eq!(config.min_bytes, 1);
        assert_eq!(config.max_bytes, 1024 * 1024);

        assert!(GroupConfig::new("g").autocommit);
    }
}
