use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use futures::future::{self, Future, IntoFuture};
use futures::stream::{futures_unordered, Stream};
use futures::Poll;
use tokio_core::reactor::Handle;
use tokio_timer::Timer;

use client::{ClientConfig, Cluster, Metrics};
use errors::{Error, ErrorKind, Result};
use network::{KafkaRequest, KafkaResponse};
use protocol::{BrokerId, CorrelationId};

/// A boxed future pinned to the event loop's thread.
pub struct StaticBoxFuture<T = (), E = Error>(Box<Future<Item = T, Error = E> + 'static>)
where
    T: 'static,
    E: 'static;

impl<T, E> StaticBoxFuture<T, E> {
    pub fn new<F>(inner: F) -> Self
    where
        F: IntoFuture<Item = T, Error = E> + 'static,
        T: 'static,
        E: 'static,
    {
        StaticBoxFuture(Box::new(inner.into_future()))
    }

    pub fn ok(item: T) -> Self {
        StaticBoxFuture(Box::new(future::ok(item)))
    }

    pub fn err(err: E) -> Self {
        StaticBoxFuture(Box::new(future::err(err)))
    }
}

impl<T, E> From<ErrorKind> for StaticBoxFuture<T, E>
where
    E: From<ErrorKind>,
{
    fn from(err: ErrorKind) -> Self {
        Self::err(err.into())
    }
}

impl<T, E> Future for StaticBoxFuture<T, E> {
    type Item = T;
    type Error = E;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        self.0.poll()
    }
}

/// Handler results keyed by originating broker, in response-arrival order.
pub type DispatchResults<R> = StaticBoxFuture<Vec<(BrokerId, R)>>;

/// Shared base of every client: the cluster, the closing/heal flags, and
/// the fan-out dispatcher.
///
/// All state is event-loop-local; handlers mutate client state without
/// locking because they always run on the loop.
#[derive(Clone)]
pub struct ClientCore {
    inner: Rc<Inner>,
}

struct Inner {
    config: ClientConfig,
    handle: Handle,
    cluster: Cluster,
    timer: Timer,
    metrics: Option<Rc<Metrics>>,
    closing: Cell<bool>,
    heal_requested: Cell<bool>,
}

impl ClientCore {
    pub fn new(config: ClientConfig, handle: Handle) -> ClientCore {
        trace!("creating client from config: {:?}", config);

        let metrics = if config.metrics {
            Some(Rc::new(Metrics::new().expect("fail to register metrics")))
        } else {
            None
        };

        let cluster = Cluster::new(config.hosts.clone(), config.client_id.clone(), handle.clone());

        ClientCore {
            inner: Rc::new(Inner {
                               config: config,
                               handle: handle,
                               cluster: cluster,
                               timer: Timer::default(),
                               metrics: metrics,
                               closing: Cell::new(false),
                               heal_requested: Cell::new(false),
                           }),
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    pub fn cluster(&self) -> &Cluster {
        &self.inner.cluster
    }

    pub fn metrics(&self) -> Option<Rc<Metrics>> {
        self.inner.metrics.clone()
    }

    pub fn is_closing(&self) -> bool {
        self.inner.closing.get()
    }

    pub fn set_closing(&self) {
        self.inner.closing.set(true);
    }

    /// Flags the cluster for a heal after the in-flight dispatch completes.
    pub fn request_heal(&self) {
        self.inner.heal_requested.set(true);
    }

    pub fn heal_requested(&self) -> bool {
        self.inner.heal_requested.get()
    }

    pub fn retry_backoff(&self) -> Duration {
        self.inner.config.retry_backoff()
    }

    pub fn sleep(&self, duration: Duration) -> StaticBoxFuture<()> {
        StaticBoxFuture::new(self.inner.timer.sleep(duration).from_err())
    }

    pub fn connect(&self) -> StaticBoxFuture<()> {
        self.inner.cluster.start()
    }

    /// Fans requests out to their brokers, handing each response to
    /// `handler` as it arrives.  Correlation ids are assigned at send time.
    pub fn dispatch<R, F>(&self, requests: HashMap<BrokerId, KafkaRequest>, handler: F)
                          -> DispatchResults<R>
    where
        R: 'static,
        F: FnMut(KafkaResponse) -> Result<R> + 'static,
    {
        let prepared = requests
            .into_iter()
            .map(|(broker_id, request)| {
                let correlation_id = self.inner
                    .cluster
                    .connection(broker_id)
                    .map(|conn| conn.next_correlation_id())
                    .unwrap_or_default();
                (broker_id, correlation_id, request)
            })
            .collect();

        self.dispatch_prepared(prepared, handler)
    }

    /// Dispatch with caller-assigned correlation ids, for clients that index
    /// their own bookkeeping by correlation id before sending.
    ///
    /// Responses are handled in completion order.  A lost connection is
    /// logged and flags a heal; a closed stream is logged and skipped; any
    /// other send failure flags a heal.  Handler errors fail the whole
    /// dispatch.  Once every response has resolved, a flagged heal runs
    /// before the results are returned.
    pub fn dispatch_prepared<R, F>(&self,
                                   requests: Vec<(BrokerId, CorrelationId, KafkaRequest)>,
                                   mut handler: F)
                                   -> DispatchResults<R>
    where
        R: 'static,
        F: FnMut(KafkaResponse) -> Result<R> + 'static,
    {
        let mut sends: Vec<SendAttempt> = Vec::new();

        for (broker_id, correlation_id, request) in requests {
            if let Some(metrics) = self.metrics() {
                metrics.request_sent(request.api_key());
            }

            match self.inner.cluster.connection(broker_id) {
                Some(conn) => {
                    sends.push(Box::new(conn.send_with_id(correlation_id, request)
                                            .then(move |result| {
                                                      Ok::<_, Error>((broker_id, result))
                                                  })));
                }
                None => {
                    let err = ErrorKind::KafkaError(::protocol::KafkaCode::BrokerNotAvailable);
                    sends.push(Box::new(future::ok::<_, Error>((broker_id, Err(err.into())))));
                }
            }
        }

        let core = self.clone();

        let collected = futures_unordered(sends).fold(Vec::new(), move |mut results, item| {
            let (broker_id, result): (BrokerId, Result<KafkaResponse>) = item;

            match result {
                Ok(response) => {
                    if let Some(metrics) = core.metrics() {
                        metrics.response_handled(response.body.api());
                    }

                    match handler(response) {
                        Ok(value) => results.push((broker_id, value)),
                        Err(err) => return Err(err),
                    }
                }
                Err(Error(ErrorKind::ConnectionError(host, port), _)) => {
                    info!("connection to {}:{} lost", host, port);
                    core.request_heal();
                }
                Err(Error(ErrorKind::StreamClosed, _)) => {
                    info!("connection to broker lost");
                }
                Err(err) => {
                    error!("error sending request, {}", err);
                    core.request_heal();
                }
            }

            Ok(results)
        });

        let core = self.clone();

        StaticBoxFuture::new(collected.and_then(move |results| -> StaticBoxFuture<Vec<(BrokerId, R)>> {
            if core.inner.heal_requested.get() {
                let core = core.clone();

                StaticBoxFuture::new(core.clone().inner.cluster.heal().map(move |_| {
                    core.inner.heal_requested.set(false);
                    results
                }))
            } else {
                StaticBoxFuture::ok(results)
            }
        }))
    }
}

type SendAttempt = Box<Future<Item = (BrokerId, Result<KafkaResponse>), Error = Error>>;
