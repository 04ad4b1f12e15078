use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::env;
use std::hash::Hasher;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use std::process;
use std::rc::Rc;

use byteorder::BigEndian;
use byteorder::ByteOrder;
use bytes::BytesMut;
use futures::future::{loop_fn, Future, Loop};
use futures::unsync::{mpsc, oneshot};
use futures::{Async, Poll, Stream};
use tokio_core::net::TcpStream;
use tokio_core::reactor::Handle;
use tokio_io::io::{read_exact, write_all};
use tokio_io::{AsyncRead, AsyncWrite};
use twox_hash::XxHash;

use client::StaticBoxFuture;
use errors::{Error, ErrorKind, Result};
use network::{parse_response, KafkaRequest, KafkaResponse};
use protocol::{ApiKeys, CorrelationId};

lazy_static! {
    /// Per-process seed for correlation ids, derived from the host name and
    /// pid so ids from restarted processes sharing a connection view are
    /// unlikely to collide.
    static ref CORRELATION_SEED: CorrelationId = {
        let mut hasher = XxHash::with_seed(0);
        let hostname = env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_owned());
        hasher.write(hostname.as_bytes());

        ((hasher.finish() as u32).wrapping_add(process::id()) & 0xff_ffff) as CorrelationId
    };
}

pub type ConnectFuture = StaticBoxFuture<Connection>;

pub type SendResponse = StaticBoxFuture<KafkaResponse>;

/// A single connection to a single broker host.
///
/// Outgoing requests are serialized through a write queue; responses come
/// back in any order and are matched to their pending futures by correlation
/// id.  Correlation ids only have meaning within one connection.
///
/// There is no reconnect: once a connection aborts, the cluster builds a
/// fresh one on the next heal.
#[derive(Clone)]
pub struct Connection {
    inner: Rc<Inner>,
}

struct Inner {
    host: String,
    port: u16,
    client_id: Option<String>,
    stream: Rc<TcpStream>,
    closing: Cell<bool>,
    // dropped on close/abort so the writer task drains and exits
    tx: RefCell<Option<mpsc::UnboundedSender<BytesMut>>>,
    state: RefCell<State>,
}

struct State {
    last_correlation_id: CorrelationId,
    pending: HashMap<CorrelationId, oneshot::Sender<Result<KafkaResponse>>>,
    api_of: HashMap<CorrelationId, ApiKeys>,
}

impl Connection {
    /// Opens a TCP stream to the broker and spawns its read loop and write
    /// queue on the reactor.
    pub fn connect(host: &str,
                   port: u16,
                   client_id: Option<String>,
                   handle: &Handle)
                   -> ConnectFuture {
        let addr = match resolve(host, port) {
            Ok(addr) => addr,
            Err(err) => return ConnectFuture::err(err),
        };

        info!("connecting to broker {}:{}", host, port);

        let host = host.to_owned();
        let handle = handle.clone();

        ConnectFuture::new(TcpStream::connect(&addr, &handle)
                               .from_err()
                               .map(move |stream| {
                                        Connection::from_stream(host,
                                                                port,
                                                                client_id,
                                                                stream,
                                                                &handle)
                                    }))
    }

    fn from_stream(host: String,
                   port: u16,
                   client_id: Option<String>,
                   stream: TcpStream,
                   handle: &Handle)
                   -> Connection {
        let (tx, rx) = mpsc::unbounded();

        let conn = Connection {
            inner: Rc::new(Inner {
                               host: host,
                               port: port,
                               client_id: client_id,
                               stream: Rc::new(stream),
                               closing: Cell::new(false),
                               tx: RefCell::new(Some(tx)),
                               state: RefCell::new(State {
                                                       last_correlation_id: *CORRELATION_SEED,
                                                       pending: HashMap::new(),
                                                       api_of: HashMap::new(),
                                                   }),
                           }),
        };

        conn.spawn_writer(rx, handle);
        conn.spawn_reader(handle);

        conn
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn closing(&self) -> bool {
        self.inner.closing.get()
    }

    /// Monotonically increasing per connection; wrap-around is acceptable
    /// because the wire field is a plain `i32`.
    pub fn next_correlation_id(&self) -> CorrelationId {
        let mut state = self.inner.state.borrow_mut();
        state.last_correlation_id = state.last_correlation_id.wrapping_add(1);
        state.last_correlation_id
    }

    pub fn send(&self, request: KafkaRequest) -> SendResponse {
        let correlation_id = self.next_correlation_id();
        self.send_with_id(correlation_id, request)
    }

    /// Sends a request under a correlation id obtained earlier from
    /// `next_correlation_id`, so callers can index their own bookkeeping by
    /// it before dispatching.
    pub fn send_with_id(&self,
                        correlation_id: CorrelationId,
                        request: KafkaRequest)
                        -> SendResponse {
        if self.inner.closing.get() {
            self.abort();
            return SendResponse::err(self.connection_error());
        }

        let api = request.api_key();

        let mut buf = BytesMut::with_capacity(64);
        if let Err(err) = request.encode::<BigEndian>(correlation_id,
                                                      self.inner
                                                          .client_id
                                                          .as_ref()
                                                          .map(|s| s.as_str()),
                                                      &mut buf) {
            return SendResponse::err(err);
        }

        trace!("sending {} request #{} to {}:{} ({} bytes)",
               api,
               correlation_id,
               self.inner.host,
               self.inner.port,
               buf.len());

        let (sender, receiver) = oneshot::channel();

        {
            let mut state = self.inner.state.borrow_mut();
            state.pending.insert(correlation_id, sender);
            state.api_of.insert(correlation_id, api);
        }

        let queued = match *self.inner.tx.borrow() {
            Some(ref tx) => tx.unbounded_send(buf).is_ok(),
            None => false,
        };

        if !queued {
            // writer task is gone, the stream must have failed
            {
                let mut state = self.inner.state.borrow_mut();
                state.pending.remove(&correlation_id);
                state.api_of.remove(&correlation_id);
            }
            self.abort();
            return SendResponse::err(self.connection_error());
        }

        let host = self.inner.host.clone();
        let port = self.inner.port;

        SendResponse::new(receiver.then(move |result| match result {
            Ok(result) => result,
            Err(_) => Err(ErrorKind::ConnectionError(host, port).into()),
        }))
    }

    /// Marks the connection as closing and shuts the socket down, letting
    /// the read loop wind itself down.
    pub fn close(&self) {
        self.inner.closing.set(true);
        self.inner.tx.borrow_mut().take();
        let _ = self.inner.stream.shutdown(Shutdown::Both);
    }

    /// Idempotent teardown: closes the stream and fails every pending
    /// request with `ConnectionError`.
    pub fn abort(&self) {
        let host = self.inner.host.clone();
        let port = self.inner.port;

        Inner::abort_with(&self.inner,
                          &move || ErrorKind::ConnectionError(host.clone(), port).into());
    }

    fn connection_error(&self) -> Error {
        ErrorKind::ConnectionError(self.inner.host.clone(), self.inner.port).into()
    }

    fn spawn_writer(&self, rx: mpsc::UnboundedReceiver<BytesMut>, handle: &Handle) {
        let inner = self.inner.clone();
        let writer = SharedStream(self.inner.stream.clone());

        let task = rx.fold(writer, move |writer, buf| {
                let inner = inner.clone();

                write_all(writer, buf)
                    .map(|(writer, _)| writer)
                    .map_err(move |err| {
                        if !inner.closing.get() {
                            warn!("error writing to {}:{}, {}", inner.host, inner.port, err);
                        }
                        Inner::abort_with(&inner, &|| ErrorKind::StreamClosed.into());
                    })
            })
            .map(|_| ());

        handle.spawn(task);
    }

    fn spawn_reader(&self, handle: &Handle) {
        let inner = self.inner.clone();
        let reader = SharedStream(self.inner.stream.clone());

        let task = loop_fn((reader, inner), |(reader, inner)| {
            read_exact(reader, [0u8; 8])
                .and_then(|(reader, header)| {
                    let size = BigEndian::read_i32(&header[0..4]);
                    let correlation_id = BigEndian::read_i32(&header[4..8]);

                    if size < 4 {
                        return Err(io::Error::new(io::ErrorKind::InvalidData,
                                                  "response size underflow"));
                    }

                    Ok((reader, correlation_id, size as usize - 4))
                })
                .and_then(|(reader, correlation_id, payload_len)| {
                    read_exact(reader, vec![0u8; payload_len])
                        .map(move |(reader, payload)| (reader, correlation_id, payload))
                })
                .then(move |result| match result {
                    Ok((reader, correlation_id, payload)) => {
                        Inner::complete(&inner, correlation_id, &payload);

                        if inner.closing.get() {
                            Ok::<_, ()>(Loop::Break(()))
                        } else {
                            Ok(Loop::Continue((reader, inner)))
                        }
                    }
                    Err(err) => {
                        if !inner.closing.get() {
                            warn!("error reading from {}:{}, {}", inner.host, inner.port, err);
                        }
                        Inner::abort_with(&inner, &|| ErrorKind::StreamClosed.into());
                        Ok(Loop::Break(()))
                    }
                })
        });

        handle.spawn(task);
    }
}

impl Inner {
    fn complete(inner: &Rc<Inner>, correlation_id: CorrelationId, payload: &[u8]) {
        let (sender, api) = {
            let mut state = inner.state.borrow_mut();
            let sender = state.pending.remove(&correlation_id);
            let api = state.api_of.remove(&correlation_id);
            (sender, api)
        };

        match (sender, api) {
            (Some(sender), Some(api)) => {
                trace!("received {} response #{} from {}:{} ({} bytes)",
                       api,
                       correlation_id,
                       inner.host,
                       inner.port,
                       payload.len());

                drop(sender.send(parse_response(api, correlation_id, payload)));
            }
            _ => {
                warn!("discarding response #{} from {}:{} with no pending request",
                      correlation_id,
                      inner.host,
                      inner.port);
            }
        }
    }

    fn abort_with(inner: &Rc<Inner>, make_err: &Fn() -> Error) {
        if inner.closing.get() {
            return;
        }

        warn!("aborting connection to {}:{}", inner.host, inner.port);

        inner.closing.set(true);
        inner.tx.borrow_mut().take();
        let _ = inner.stream.shutdown(Shutdown::Both);

        let mut state = inner.state.borrow_mut();
        state.api_of.clear();

        let pending: Vec<_> = state.pending.drain().collect();
        for (_, sender) in pending {
            drop(sender.send(Err(make_err())));
        }
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| ErrorKind::ConnectionError(host.to_owned(), port).into())
}

/// Read/write handle over the shared TCP stream, so the read loop and the
/// write queue can own their halves without splitting.
struct SharedStream(Rc<TcpStream>);

impl Read for SharedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self.0).read(buf)
    }
}

impl Write for SharedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self.0).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self.0).flush()
    }
}

impl AsyncRead for SharedStream {}

impl AsyncWrite for SharedStream {
    fn shutdown(&mut self) -> Poll<(), io::Error> {
        self.0.shutdown(Shutdown::Write)?;
        Ok(Async::Ready(()))
    }
}
