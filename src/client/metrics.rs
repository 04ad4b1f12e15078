use prometheus::{self, Counter, CounterVec};

use protocol::ApiKeys;

/// Request and message counters, registered against the default prometheus
/// registry when `ClientConfig::metrics` is set.
pub struct Metrics {
    requests: CounterVec,
    responses: CounterVec,
    produced: Counter,
    consumed: Counter,
}

impl Metrics {
    pub fn new() -> Result<Metrics, prometheus::Error> {
        Ok(Metrics {
               requests: register_counter_vec!(opts!("sund_requests_total",
                                                     "Requests sent to brokers"),
                                               &["api"])?,
               responses: register_counter_vec!(opts!("sund_responses_total",
                                                      "Responses handled"),
                                                &["api"])?,
               produced: register_counter!(opts!("sund_messages_produced_total",
                                                 "Messages flushed to produce requests"))?,
               consumed: register_counter!(opts!("sund_messages_consumed_total",
                                                 "Messages decoded from fetch responses"))?,
           })
    }

    pub fn request_sent(&self, api: ApiKeys) {
        self.requests.with_label_values(&[api.name()]).inc();
    }

    pub fn response_handled(&self, api: ApiKeys) {
        self.responses.with_label_values(&[api.name()]).inc();
    }

    pub fn messages_produced(&self, count: usize) {
        let _ = self.produced.inc_by(count as f64);
    }

    pub fn messages_consumed(&self, count: usize) {
        let _ = self.consumed.inc_by(count as f64);
    }
}
