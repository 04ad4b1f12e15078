use protocol::{ApiKeys, KafkaCode};

error_chain! {
    foreign_links {
        IoError(::std::io::Error);
        JsonError(::serde_json::Error);
        TimerError(::tokio_timer::TimerError);
    }

    errors {
        /// None of the configured or discovered brokers could be reached.
        NoBrokers {
            description("no brokers available")
            display("no broker in the cluster could be reached")
        }
        /// A consumer failed fatally while determining partition offsets.
        NoOffsets {
            description("unable to determine offsets")
            display("unable to determine partition offsets")
        }
        /// A response arrived for an api the caller did not install a handler for.
        UnhandledResponse(api: ApiKeys) {
            description("unhandled response api")
            display("no handler for '{}' api responses", api)
        }
        /// The connection to a single broker went bad.
        ConnectionError(host: String, port: u16) {
            description("broker connection error")
            display("error connecting to {}:{}", host, port)
        }
        /// The broker closed the stream mid-request.
        StreamClosed {
            description("stream closed")
            display("connection to broker lost")
        }
        /// An error code reported by a broker.
        KafkaError(code: KafkaCode) {
            description("kafka error code")
            display("broker reported {}", code)
        }
        CodecError(reason: &'static str) {
            description("codec error")
            display("codec error: {}", reason)
        }
        /// Rejected configuration value, reported at construction time.
        InvalidCompression(value: String) {
            description("invalid compression value")
            display("invalid compression value '{}', must be one of none, gzip, snappy", value)
        }
        Canceled(reason: &'static str) {
            description("canceled")
            display("canceled: {}", reason)
        }
    }
}
