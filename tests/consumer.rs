#[macro_use]
extern crate serde_json;
extern crate byteorder;
extern crate bytes;
extern crate pretty_env_logger;
extern crate sund;
extern crate tokio_core;

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_core::reactor::Core;

use support::{fetch_body, message_set_bytes, metadata_body, offsets_body, parse_fetch_request,
              FakeBroker};
use sund::{ClientConfig, ConsumerConfig, SingleConsumer, StartPosition};

#[test]
fn test_consume_advances_offsets() {
    drop(pretty_env_logger::init());

    let broker3 = FakeBroker::start(3);
    let broker8 = FakeBroker::start(8);

    let brokers = [(3, broker3.port), (8, broker8.port)];
    let topics = [("test.topic", vec![(0, 3), (1, 8)])];

    // partition 0 on broker 3 returns two messages, then nothing
    {
        let brokers = brokers.to_vec();
        let topics = topics.to_vec();
        let fetches = AtomicUsize::new(0);

        broker3.set_behavior(move |request| match request.api_key {
            3 => metadata_body(&brokers, &topics),
            2 => offsets_body("test.topic", &[(0, 0, vec![0])]),
            1 => {
                if fetches.fetch_add(1, Ordering::SeqCst) == 0 {
                    fetch_body("test.topic",
                               &[(0,
                                  0,
                                  message_set_bytes(&[(0, "{\"foo\":\"bar\"}"),
                                                      (1, "{\"bwee\":\"bwoo\"}")]))])
                } else {
                    fetch_body("test.topic", &[(0, 0, Vec::new())])
                }
            }
            other => panic!("unexpected api {}", other),
        });
    }

    // partition 1 on broker 8 returns one message, then nothing
    {
        let brokers = brokers.to_vec();
        let topics = topics.to_vec();
        let fetches = AtomicUsize::new(0);

        broker8.set_behavior(move |request| match request.api_key {
            3 => metadata_body(&brokers, &topics),
            2 => offsets_body("test.topic", &[(1, 0, vec![0])]),
            1 => {
                if fetches.fetch_add(1, Ordering::SeqCst) == 0 {
                    fetch_body("test.topic",
                               &[(1, 0, message_set_bytes(&[(0, "{\"meow\":\"bark\"}")]))])
                } else {
                    fetch_body("test.topic", &[(1, 0, Vec::new())])
                }
            }
            other => panic!("unexpected api {}", other),
        });
    }

    let mut core = Core::new().unwrap();

    let consumer = SingleConsumer::new(ClientConfig::with_bootstrap_hosts(vec![broker3.host()]),
                                       ConsumerConfig::default(),
                                       core.handle());

    core.run(consumer.connect()).unwrap();

    let mut values = core.run(consumer.consume("test.topic", None)).unwrap();
    values.sort_by_key(|value| value.to_string());

    assert_eq!(values,
               vec![json!({"bwee": "bwoo"}), json!({"foo": "bar"}), json!({"meow": "bark"})]);

    // first fetches started from the determined offsets
    let first3 = parse_fetch_request(&broker3.requests_for(1)[0].body);
    assert_eq!(first3, vec![("test.topic".to_owned(), vec![(0, 0, 1024 * 1024)])]);

    // the next consume starts where the messages left off
    core.run(consumer.consume("test.topic", None)).unwrap();

    let next3 = parse_fetch_request(&broker3.requests_for(1)[1].body);
    assert_eq!(next3[0].1, vec![(0, 2, 1024 * 1024)]);

    let next8 = parse_fetch_request(&broker8.requests_for(1)[1].body);
    assert_eq!(next8[0].1, vec![(1, 1, 1024 * 1024)]);

    // offsets were only determined once
    assert_eq!(broker3.requests_for(2).len(), 1);
    assert_eq!(broker8.requests_for(2).len(), 1);
}

#[test]
fn test_offset_out_of_range_redetermines_offsets() {
    let broker = FakeBroker::start(1);
    let port = broker.port;

    let fetches = AtomicUsize::new(0);
    broker.set_behavior(move |request| match request.api_key {
        3 => metadata_body(&[(1, port)], &[("t", vec![(0, 1)])]),
        2 => offsets_body("t", &[(0, 0, vec![7])]),
        1 => {
            // offset_out_of_range first, then an empty set
            if fetches.fetch_add(1, Ordering::SeqCst) == 0 {
                fetch_body("t", &[(0, 1, Vec::new())])
            } else {
                fetch_body("t", &[(0, 0, Vec::new())])
            }
        }
        other => panic!("unexpected api {}", other),
    });

    let mut core = Core::new().unwrap();

    let consumer = SingleConsumer::new(ClientConfig::with_bootstrap_hosts(vec![broker.host()]),
                                       ConsumerConfig::default(),
                                       core.handle());

    core.run(consumer.connect()).unwrap();

    let values = core.run(consumer.consume("t", None)).unwrap();
    assert!(values.is_empty());

    core.run(consumer.consume("t", None)).unwrap();

    // the out-of-range response forced a second offset determination, and
    // the follow-up fetch used the freshly returned offset
    assert_eq!(broker.requests_for(2).len(), 2);

    let fetch_offsets: Vec<i64> = broker
        .requests_for(1)
        .iter()
        .map(|request| parse_fetch_request(&request.body)[0].1[0].1)
        .collect();
    assert_eq!(fetch_offsets, vec![7, 7]);
}

#[test]
fn test_consume_from_beginning_uses_earliest_time() {
    let broker = FakeBroker::start(1);
    let port = broker.port;
    broker.set_behavior(move |request| match request.api_key {
        3 => metadata_body(&[(1, port)], &[("t", vec![(0, 1)])]),
        2 => {
            // replica id, topic framing, then partition id / time / max
            let mut reader = support::Reader::new(&request.body);
            assert_eq!(reader.i32(), -1);
            assert_eq!(reader.i32(), 1);
            assert_eq!(reader.string(), Some("t".to_owned()));
            assert_eq!(reader.i32(), 1);
            assert_eq!(reader.i32(), 0);
            assert_eq!(reader.i64(), -2);
            assert_eq!(reader.i32(), 1);

            offsets_body("t", &[(0, 0, vec![0])])
        }
        1 => fetch_body("t", &[(0, 0, Vec::new())]),
        other => panic!("unexpected api {}", other),
    });

    let mut core = Core::new().unwrap();

    let consumer = SingleConsumer::new(ClientConfig::with_bootstrap_hosts(vec![broker.host()]),
                                       ConsumerConfig::default(),
                                       core.handle());

    core.run(consumer.connect()).unwrap();
    core.run(consumer.consume("t", Some(StartPosition::Beginning))).unwrap();

    assert_eq!(broker.requests_for(2).len(), 1);
}

#[test]
fn test_fetch_budget_is_split_across_partitions() {
    let broker = FakeBroker::start(1);
    let port = broker.port;
    broker.set_behavior(move |request| match request.api_key {
        3 => metadata_body(&[(1, port)], &[("t", vec![(0, 1), (1, 1), (2, 1)])]),
        2 => offsets_body("t", &[(0, 0, vec![0]), (1, 0, vec![0]), (2, 0, vec![0])]),
        1 => {
            fetch_body("t",
                       &[(0, 0, Vec::new()), (1, 0, Vec::new()), (2, 0, Vec::new())])
        }
        other => panic!("unexpected api {}", other),
    });

    let mut core = Core::new().unwrap();

    let config = ConsumerConfig {
        max_bytes: 999,
        ..Default::default()
    };
    let consumer = SingleConsumer::new(ClientConfig::with_bootstrap_hosts(vec![broker.host()]),
                                       config,
                                       core.handle());

    core.run(consumer.connect()).unwrap();
    core.run(consumer.consume("t", None)).unwrap();

    let fetch = parse_fetch_request(&broker.requests_for(1)[0].body);
    for &(_, _, max_bytes) in &fetch[0].1 {
        assert_eq!(max_bytes, 333);
    }
}
