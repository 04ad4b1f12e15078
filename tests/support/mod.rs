//! A scripted in-process broker for driving the client end to end.
//!
//! Each `FakeBroker` listens on a loopback port, frames requests off the
//! socket, records them, and answers with whatever body its behavior
//! closure returns.  Response bodies are built with the helpers below.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use byteorder::{BigEndian, ByteOrder};
use bytes::BytesMut;

use sund::{Message, MessageSet};

pub type Behavior = Fn(&RecordedRequest) -> Vec<u8> + Send + Sync;

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub api_key: i16,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: Option<String>,
    pub body: Vec<u8>,
}

pub struct FakeBroker {
    pub broker_id: i32,
    pub port: u16,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    behavior: Arc<Mutex<Arc<Behavior>>>,
}

impl FakeBroker {
    pub fn start(broker_id: i32) -> FakeBroker {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake broker");
        let port = listener.local_addr().unwrap().port();

        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let behavior: Arc<Mutex<Arc<Behavior>>> =
            Arc::new(Mutex::new(Arc::new(|request: &RecordedRequest| {
                panic!("no behavior installed for api {}", request.api_key)
            })));

        {
            let requests = requests.clone();
            let behavior = behavior.clone();

            thread::spawn(move || for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let requests = requests.clone();
                        let behavior = behavior.clone();

                        thread::spawn(move ||

                            serve_connection(stream, requests, behavior));
                    }
                    Err(_) => break,
                }
            });
        }

        FakeBroker {
            broker_id: broker_id,
            port: port,
            requests: requests,
            behavior: behavior,
        }
    }

    pub fn set_behavior<F>(&self, behavior: F)
    where
        F: Fn(&RecordedRequest) -> Vec<u8> + Send + Sync + 'static,
    {
        *self.behavior.lock().unwrap() = Arc::new(behavior);
    }

    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, api_key: i16) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.api_key == api_key)
            .collect()
    }
}

fn serve_connection(mut stream: TcpStream,
                    requests: Arc<Mutex<Vec<RecordedRequest>>>,
                    behavior: Arc<Mutex<Arc<Behavior>>>) {
    loop {
        let mut size = [0u8; 4];
        if stream.read_exact(&mut size).is_err() {
            return;
        }

        let mut payload = vec![0u8; BigEndian::read_i32(&size) as usize];
        if stream.read_exact(&mut payload).is_err() {
            return;
        }

        let request = parse_request(&payload);
        requests.lock().unwrap().push(request.clone());

        let body = {
            let behavior = behavior.lock().unwrap().clone();
            behavior(&request)
        };

        let mut response = Vec::with_capacity(body.len() + 8);
        let mut frame = [0u8; 8];
        BigEndian::write_i32(&mut frame[0..4], body.len() as i32 + 4);
        BigEndian::write_i32(&mut frame[4..8], request.correlation_id);
        response.extend_from_slice(&frame);
        response.extend_from_slice(&body);

        if stream.write_all(&response).is_err() {
            return;
        }
    }
}

fn parse_request(payload: &[u8]) -> RecordedRequest {
    let mut reader = Reader::new(payload);

    let api_key = reader.i16();
    let api_version = reader.i16();
    let correlation_id = reader.i32();
    let client_id = reader.string();

    RecordedRequest {
        api_key: api_key,
        api_version: api_version,
        correlation_id: correlation_id,
        client_id: client_id,
        body: reader.rest(),
    }
}

/// Cursor over big-endian request bytes.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Reader<'a> {
        Reader { data: data, pos: 0 }
    }

    pub fn i8(&mut self) -> i8 {
        let value = self.data[self.pos] as i8;
        self.pos += 1;
        value
    }

    pub fn i16(&mut self) -> i16 {
        let value = BigEndian::read_i16(&self.data[self.pos..]);
        self.pos += 2;
        value
    }

    pub fn i32(&mut self) -> i32 {
        let value = BigEndian::read_i32(&self.data[self.pos..]);
        self.pos += 4;
        value
    }

    pub fn i64(&mut self) -> i64 {
        let value = BigEndian::read_i64(&self.data[self.pos..]);
        self.pos += 8;
        value
    }

    pub fn string(&mut self) -> Option<String> {
        let len = self.i16();

        if len < 0 {
            return None;
        }

        let raw = &self.data[self.pos..self.pos + len as usize];
        self.pos += len as usize;

        Some(String::from_utf8_lossy(raw).into_owned())
    }

    pub fn bytes(&mut self) -> Option<Vec<u8>> {
        let len = self.i32();

        if len < 0 {
            return None;
        }

        let raw = self.data[self.pos..self.pos + len as usize].to_vec();
        self.pos += len as usize;

        Some(raw)
    }

    pub fn take(&mut self, len: usize) -> &'a [u8] {
        let raw = &self.data[self.pos..self.pos + len];
        self.pos += len;
        raw
    }

    pub fn rest(&mut self) -> Vec<u8> {
        self.data[self.pos..].to_vec()
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }
}

/// Big-endian response body writer.
pub struct Writer {
    data: Vec<u8>,
}

impl Writer {
    pub fn new() -> Writer {
        Writer { data: Vec::new() }
    }

    pub fn i16(mut self, value: i16) -> Writer {
        let mut raw = [0u8; 2];
        BigEndian::write_i16(&mut raw, value);
        self.data.extend_from_slice(&raw);
        self
    }

    pub fn i32(mut self, value: i32) -> Writer {
        let mut raw = [0u8; 4];
        BigEndian::write_i32(&mut raw, value);
        self.data.extend_from_slice(&raw);
        self
    }

    pub fn i64(mut self, value: i64) -> Writer {
        let mut raw = [0u8; 8];
        BigEndian::write_i64(&mut raw, value);
        self.data.extend_from_slice(&raw);
        self
    }

    pub fn string(mut self, value: &str) -> Writer {
        self = self.i16(value.len() as i16);
        self.data.extend_from_slice(value.as_bytes());
        self
    }

    pub fn raw(mut self, value: &[u8]) -> Writer {
        self.data.extend_from_slice(value);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}

/// Metadata response listing loopback brokers and single-error-free topics.
pub fn metadata_body(brokers: &[(i32, u16)], topics: &[(&str, Vec<(i32, i32)>)]) -> Vec<u8> {
    let mut writer = Writer::new().i32(brokers.len() as i32);

    for &(broker_id, port) in brokers {
        writer = writer
            .i32(broker_id)
            .string("127.0.0.1")
            .i32(port as i32);
    }

    writer = writer.i32(topics.len() as i32);

    for &(name, ref partitions) in topics {
        writer = writer.i16(0).string(name).i32(partitions.len() as i32);

        for &(partition_id, leader) in partitions {
            writer = writer
                .i16(0)
                .i32(partition_id)
                .i32(leader)
                .i32(0) // replicas
                .i32(0); // isrs
        }
    }

    writer.finish()
}

pub fn produce_body(topic: &str, partitions: &[(i32, i16, i64)]) -> Vec<u8> {
    let mut writer = Writer::new()
        .i32(1)
        .string(topic)
        .i32(partitions.len() as i32);

    for &(partition_id, error_code, offset) in partitions {
        writer = writer.i32(partition_id).i16(error_code).i64(offset);
    }

    writer.finish()
}

pub fn fetch_body(topic: &str, partitions: &[(i32, i16, Vec<u8>)]) -> Vec<u8> {
    let mut writer = Writer::new()
        .i32(1)
        .string(topic)
        .i32(partitions.len() as i32);

    for &(partition_id, error_code, ref message_set) in partitions {
        writer = writer
            .i32(partition_id)
            .i16(error_code)
            .i64(0) // highwater mark
            .i32(message_set.len() as i32)
            .raw(message_set);
    }

    writer.finish()
}

/// Renders a message set of JSON payloads at the given broker offsets.
pub fn message_set_bytes(entries: &[(i64, &str)]) -> Vec<u8> {
    let messages = entries
        .iter()
        .map(|&(offset, payload)| {
                 let mut message =
                     Message::new(None, Some(payload.as_bytes().into()));
                 message.offset = offset;
                 message
             })
        .collect();

    let mut buf = BytesMut::with_capacity(256);
    MessageSet::new(messages)
        .encode::<BigEndian>(&mut buf)
        .expect("encode message set");

    buf.to_vec()
}

pub fn offsets_body(topic: &str, partitions: &[(i32, i16, Vec<i64>)]) -> Vec<u8> {
    let mut writer = Writer::new()
        .i32(1)
        .string(topic)
        .i32(partitions.len() as i32);

    for &(partition_id, error_code, ref offsets) in partitions {
        writer = writer
            .i32(partition_id)
            .i16(error_code)
            .i32(offsets.len() as i32);

        for &offset in offsets {
            writer = writer.i64(offset);
        }
    }

    writer.finish()
}

pub fn offset_commit_body(topic: &str, partitions: &[(i32, i16)]) -> Vec<u8> {
    let mut writer = Writer::new()
        .i32(1)
        .string(topic)
        .i32(partitions.len() as i32);

    for &(partition_id, error_code) in partitions {
        writer = writer.i32(partition_id).i16(error_code);
    }

    writer.finish()
}

pub fn offset_fetch_body(topic: &str, partitions: &[(i32, i64, i16)]) -> Vec<u8> {
    let mut writer = Writer::new()
        .i32(1)
        .string(topic)
        .i32(partitions.len() as i32);

    for &(partition_id, offset, error_code) in partitions {
        writer = writer
            .i32(partition_id)
            .i64(offset)
            .string("")
            .i16(error_code);
    }

    writer.finish()
}

pub fn group_coordinator_body(error_code: i16, broker_id: i32, port: u16) -> Vec<u8> {
    Writer::new()
        .i16(error_code)
        .i32(broker_id)
        .string("127.0.0.1")
        .i32(port as i32)
        .finish()
}

/// Produce request body, flattened to
/// `(topic, partition, decoded message values)` triples.
pub fn parse_produce_request(body: &[u8]) -> ProduceRequestView {
    let mut reader = Reader::new(body);

    let required_acks = reader.i16();
    let timeout = reader.i32();

    let mut topics = Vec::new();

    for _ in 0..reader.i32() {
        let name = reader.string().expect("topic name");

        let mut partitions = Vec::new();

        for _ in 0..reader.i32() {
            let partition_id = reader.i32();
            let set_size = reader.i32() as usize;
            let raw_set = reader.take(set_size);

            partitions.push((partition_id, message_values(raw_set)));
        }

        topics.push((name, partitions));
    }

    ProduceRequestView {
        required_acks: required_acks,
        timeout: timeout,
        topics: topics,
    }
}

pub struct ProduceRequestView {
    pub required_acks: i16,
    pub timeout: i32,
    pub topics: Vec<(String, Vec<(i32, Vec<Vec<u8>>)>)>,
}

fn message_values(raw_set: &[u8]) -> Vec<Vec<u8>> {
    let mut reader = Reader::new(raw_set);
    let mut values = Vec::new();

    while !reader.is_empty() {
        let _offset = reader.i64();
        let message_size = reader.i32() as usize;

        let mut message = Reader::new(reader.take(message_size));
        let _crc = message.i32();
        let _magic = message.i8();
        let _attributes = message.i8();
        let _key = message.bytes();

        values.push(message.bytes().unwrap_or_default());
    }

    values
}

/// Fetch request body as `(topic, [(partition, offset, max_bytes)])` pairs.
pub fn parse_fetch_request(body: &[u8]) -> Vec<(String, Vec<(i32, i64, i32)>)> {
    let mut reader = Reader::new(body);

    let _replica_id = reader.i32();
    let _max_wait = reader.i32();
    let _min_bytes = reader.i32();

    let mut topics = Vec::new();

    for _ in 0..reader.i32() {
        let name = reader.string().expect("topic name");

        let mut partitions = Vec::new();

        for _ in 0..reader.i32() {
            partitions.push((reader.i32(), reader.i64(), reader.i32()));
        }

        topics.push((name, partitions));
    }

    topics
}

/// Offset commit request body as
/// `(group, [(topic, [(partition, offset, metadata)])])`.
pub fn parse_offset_commit_request(body: &[u8])
                                   -> (String, Vec<(String, Vec<(i32, i64, Option<String>)>)>) {
    let mut reader = Reader::new(body);

    let group = reader.string().expect("group name");

    let mut topics = Vec::new();

    for _ in 0..reader.i32() {
        let name = reader.string().expect("topic name");

        let mut partitions = Vec::new();

        for _ in 0..reader.i32() {
            partitions.push((reader.i32(), reader.i64(), reader.string()));
        }

        topics.push((name, partitions));
    }

    (group, topics)
}
