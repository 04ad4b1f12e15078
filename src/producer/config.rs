use compression::Compression;
use protocol::RequiredAcks;

/// Flush after every call unless raised; `0` flushes unconditionally.
pub const DEFAULT_BATCH_SIZE: usize = 1;

/// Wait for all in-sync replicas to acknowledge.
pub const DEFAULT_REQUIRED_ACKS: RequiredAcks = -1;

pub const DEFAULT_ACK_TIMEOUT_MILLIS: u64 = 500;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Messages buffered before a flush is triggered.
    pub batch_size: usize,

    pub compression: Compression,

    /// `-1` = all in-sync replicas, `1` = leader only, `0` = fire and
    /// forget.
    pub required_acks: RequiredAcks,

    /// Milliseconds the broker may wait to satisfy `required_acks`.
    pub ack_timeout: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        ProducerConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            compression: Compression::None,
            required_acks: DEFAULT_REQUIRED_ACKS,
            ack_timeout: DEFAULT_ACK_TIMEOUT_MILLIS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProducerConfig::default();

        assert_eq!(config.batch_size, 1);
        assert_eq!(config.compression, Compression::None);
        assert_eq!(config.required_acks, -1);
        assert_eq!(config.ack_timeout, 500);
    }
}
