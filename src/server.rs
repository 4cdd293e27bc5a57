//! The public entry point: binds every configured listen address, starts the worker pool, and
//! hands accepted connections to whichever worker currently has the fewest clients (spec §5
//! "Load balancing is performed only at accept time").
//!
//! Grounded on the teacher's `listener.rs`/`multilistener.rs`: one acceptor per listen address,
//! each with its own `mio::Poll` and a reserved `LISTEN_TOKEN`/`WAKE_TOKEN` pair, differs only in
//! that an accepted connection is routed to an external `Worker` thread over a channel (as the
//! teacher's plain `Listener` already does) picked by load rather than always the same one.

use std::io;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::config::{Address, ServerOptions, TlsConfig};
use crate::error::RaskError;
use crate::net::tcp_listener::TcpListener;
use crate::net::tcp_stream::TcpStream;
use crate::router::Router;
use crate::worker::{Accepted, Worker};

/// Reserved token an acceptor's listening socket is registered under.
const LISTEN_TOKEN: Token = Token(usize::MAX);
/// Reserved token an acceptor's shutdown waker fires on.
const WAKE_TOKEN: Token = Token(usize::MAX - 1);

/// One worker's inbound channel and load counter, as seen by every acceptor thread.
struct WorkerHandle<S> {
    sender: Sender<Accepted<S>>,
    waker: Arc<Waker>,
    connection_count: Arc<AtomicUsize>,
}

/// Binds listen addresses and drives the worker pool. `T` is the listening-socket type and `S`
/// the connected-stream type it produces; both default to the `mio` implementations in
/// production, and are left generic only so tests can substitute fakes.
pub struct Server<T, S> {
    options: Arc<ServerOptions>,
    router: Arc<Router>,
    _marker: std::marker::PhantomData<(T, S)>,
}

/// A handle to a running server: stop it gracefully and wait for every connection already in
/// flight to finish (spec §5 has no explicit shutdown contract; this is this crate's own
/// addition, needed for embedding and for end-to-end tests that want a clean teardown).
pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
    acceptor_wakers: Vec<Arc<Waker>>,
    acceptors: Vec<JoinHandle<()>>,
    worker_wakers: Vec<Arc<Waker>>,
    workers: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Stops every acceptor, waits for them to exit (which drops their share of each worker's
    /// `Sender`), then wakes every worker once more — now guaranteed to observe its inbound
    /// channel as disconnected — and waits for those to drain their remaining clients and exit.
    ///
    /// The two-phase join matters: a worker can only safely conclude no more connections are
    /// coming once every acceptor's `Sender` clone has actually been dropped, which only happens
    /// once that acceptor's thread has fully returned.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for waker in &self.acceptor_wakers {
            let _ = waker.wake();
        }
        for handle in self.acceptors {
            let _ = handle.join();
        }

        for waker in &self.worker_wakers {
            let _ = waker.wake();
        }
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

impl<T, S> Server<T, S>
where
    T: TcpListener<S> + Source + Send + 'static,
    S: TcpStream + io::Read + io::Write + Source + AsRawFd + Send + 'static,
{
    /// Builds a server that will dispatch every accepted connection through `router`.
    pub fn new(options: ServerOptions, router: Router) -> Self {
        Server {
            options: Arc::new(options),
            router: Arc::new(router),
            _marker: std::marker::PhantomData,
        }
    }

    /// Masks `SIGPIPE` (spec §6 `mask_sigpipe`), starts the configured worker pool, binds every
    /// listen address on its own acceptor thread, and returns a handle to shut the whole thing
    /// down. Does not block — `main` is expected to wait on some external signal and then call
    /// [`ServerHandle::shutdown`].
    pub fn run(&self) -> Result<ServerHandle, RaskError> {
        if self.options.mask_sigpipe {
            mask_sigpipe();
        }

        let mut worker_handles = Vec::with_capacity(self.options.num_threads);
        let mut worker_wakers = Vec::with_capacity(self.options.num_threads);
        let mut worker_threads = Vec::with_capacity(self.options.num_threads);

        for id in 0..self.options.num_threads.max(1) {
            let (tx, rx) = crossbeam_channel::unbounded();
            let connection_count = Arc::new(AtomicUsize::new(0));
            let mut worker = Worker::new(
                id,
                rx,
                Arc::clone(&connection_count),
                Arc::clone(&self.options),
                Arc::clone(&self.router),
            )
            .map_err(RaskError::Fatal)?;

            let waker = worker.waker();
            worker_wakers.push(Arc::clone(&waker));
            worker_handles.push(WorkerHandle {
                sender: tx,
                waker,
                connection_count,
            });
            worker_threads.push(
                std::thread::Builder::new()
                    .name(format!("rask-worker-{id}"))
                    .spawn(move || {
                        if let Err(e) = worker.run() {
                            log::error!("worker {id} exited: {e}");
                        }
                    })
                    .map_err(RaskError::Fatal)?,
            );
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_handles = Arc::new(worker_handles);
        let mut acceptor_wakers = Vec::with_capacity(self.options.listens.len());
        let mut acceptor_threads = Vec::with_capacity(self.options.listens.len());

        for address in &self.options.listens {
            let acceptor = Acceptor::<T, S>::bind(
                address,
                Arc::clone(&worker_handles),
                self.options.max_connections,
            )
            .map_err(RaskError::Fatal)?;
            acceptor_wakers.push(acceptor.waker());
            let shutdown = Arc::clone(&shutdown);
            let addr_display = format!("{}:{}", address.host, address.port);
            acceptor_threads.push(
                std::thread::Builder::new()
                    .name(format!("rask-acceptor-{}", address.index))
                    .spawn(move || {
                        let mut acceptor = acceptor;
                        if let Err(e) = acceptor.run(&shutdown) {
                            log::error!("acceptor for {addr_display} exited: {e}");
                        }
                    })
                    .map_err(RaskError::Fatal)?,
            );
        }

        Ok(ServerHandle {
            shutdown,
            acceptor_wakers,
            acceptors: acceptor_threads,
            worker_wakers,
            workers: worker_threads,
        })
    }
}

#[cfg(unix)]
fn mask_sigpipe() {
    // SAFETY: installs the default ignore-disposition for SIGPIPE; no signal handler state is
    // otherwise touched.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

#[cfg(not(unix))]
fn mask_sigpipe() {}

/// One listen address's acceptor loop: accepts connections non-blockingly and forwards each to
/// the currently least-loaded worker.
struct Acceptor<T, S> {
    listener: T,
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
    address_index: usize,
    tls: Option<Arc<TlsConfig>>,
    workers: Arc<Vec<WorkerHandle<S>>>,
    max_connections: usize,
}

impl<T, S> Acceptor<T, S>
where
    T: TcpListener<S> + Source,
    S: TcpStream + io::Read + io::Write + Source + AsRawFd,
{
    fn bind(
        address: &Address,
        workers: Arc<Vec<WorkerHandle<S>>>,
        max_connections: usize,
    ) -> io::Result<Self> {
        let socket_addr = address.socket_addr()?;
        let mut listener = T::bind(socket_addr)?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTEN_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);

        Ok(Acceptor {
            listener,
            poll,
            events: Events::with_capacity(256),
            waker,
            address_index: address.index,
            tls: address.tls.clone(),
            workers,
            max_connections,
        })
    }

    fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    fn run(&mut self, shutdown: &AtomicBool) -> io::Result<()> {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }

            match self.poll.poll(&mut self.events, None) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in self.events.iter() {
                if event.token() == LISTEN_TOKEN {
                    self.accept()?;
                }
            }

            if shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }
        }
    }

    /// Drains the accept backlog, routing each connection to the least-loaded worker. A server at
    /// `max_connections` capacity accepts and immediately closes the connection rather than
    /// leaving it in the backlog — leaving it there would just spin the poller on the listening
    /// socket's readiness, since the backlog doesn't drain itself (spec §6 `max_connections`).
    fn accept(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, _peer)) => {
                    if self.total_connections() >= self.max_connections {
                        drop(stream);
                        continue;
                    }
                    self.dispatch(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Summed across every worker's own counter rather than tracked separately, so there's only
    /// one source of truth for "how many connections are currently open" (spec §9 resolves this
    /// exact tradeoff for per-worker reads; the same reasoning applies to the sum an acceptor
    /// computes at accept time — staleness here just means the cap is soft, not exact).
    fn total_connections(&self) -> usize {
        self.workers
            .iter()
            .map(|w| w.connection_count.load(Ordering::Relaxed))
            .sum()
    }

    fn dispatch(&self, stream: S) {
        let Some(worker) = self
            .workers
            .iter()
            .min_by_key(|w| w.connection_count.load(Ordering::Relaxed))
        else {
            return;
        };

        let accepted = Accepted {
            stream,
            address_index: self.address_index,
            tls: self.tls.clone(),
        };
        if worker.sender.send(accepted).is_ok() {
            let _ = worker.waker.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Composition, FilterChain};
    use crate::http::response::Response;
    use crate::http::Method;
    use crate::router::{RouteBuilder, Scope};
    use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream};
    use std::net::TcpStream as StdTcpStream;
    use std::time::Duration;

    fn echo_router() -> Router {
        let mut router = Router::new(FilterChain::new(Composition::Embrace));
        router.register(
            Scope::any(),
            Method::Get,
            RouteBuilder::new().exact("ping"),
            Arc::new(|_req| Ok(Response::text("pong"))),
        );
        router
    }

    #[test]
    fn run_binds_every_listen_address_and_shuts_down_cleanly() {
        let mut options = ServerOptions::new();
        options.push_listen("127.0.0.1", 0);
        options.num_threads = 1;
        options.timeout = Some(Duration::from_secs(5));

        let server = Server::<MioTcpListener, MioTcpStream>::new(options, echo_router());
        let handle = server.run().unwrap();

        // The ephemeral port chosen by `push_listen("127.0.0.1", 0)` isn't observable from here
        // without plumbing the bound address back out; this test only asserts that startup and
        // a clean shutdown both complete under a real (if momentarily idle) socket.
        std::thread::sleep(Duration::from_millis(50));
        handle.shutdown();
    }

    #[test]
    fn dispatch_picks_the_least_loaded_worker() {
        let (tx_a, _rx_a) = crossbeam_channel::unbounded();
        let (tx_b, _rx_b) = crossbeam_channel::unbounded();
        let count_a = Arc::new(AtomicUsize::new(3));
        let count_b = Arc::new(AtomicUsize::new(0));

        let poll = Poll::new().unwrap();
        let waker_a = Arc::new(Waker::new(poll.registry(), Token(1)).unwrap());
        let waker_b = Arc::new(Waker::new(poll.registry(), Token(2)).unwrap());

        let workers = Arc::new(vec![
            WorkerHandle {
                sender: tx_a,
                waker: waker_a,
                connection_count: count_a,
            },
            WorkerHandle {
                sender: tx_b,
                waker: waker_b,
                connection_count: Arc::clone(&count_b),
            },
        ]);

        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();
        let _client = StdTcpStream::connect(addr).unwrap();
        let (server_stream, _) = std_listener.accept().unwrap();
        server_stream.set_nonblocking(true).unwrap();

        let acceptor_poll = Poll::new().unwrap();
        let acceptor = Acceptor::<MioTcpListener, MioTcpStream> {
            listener: MioTcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap(),
            waker: Arc::new(Waker::new(acceptor_poll.registry(), WAKE_TOKEN).unwrap()),
            poll: acceptor_poll,
            events: Events::with_capacity(8),
            address_index: 0,
            tls: None,
            workers: Arc::clone(&workers),
            max_connections: usize::MAX,
        };
        acceptor.dispatch(MioTcpStream::from_std(server_stream));

        assert_eq!(1, count_b.load(Ordering::Relaxed));
    }

    #[test]
    fn total_connections_sums_every_worker_and_respects_the_cap() {
        let (tx_a, _rx_a) = crossbeam_channel::unbounded();
        let (tx_b, _rx_b) = crossbeam_channel::unbounded();
        let poll = Poll::new().unwrap();
        let waker_a = Arc::new(Waker::new(poll.registry(), Token(1)).unwrap());
        let waker_b = Arc::new(Waker::new(poll.registry(), Token(2)).unwrap());
        let workers = Arc::new(vec![
            WorkerHandle {
                sender: tx_a,
                waker: waker_a,
                connection_count: Arc::new(AtomicUsize::new(2)),
            },
            WorkerHandle {
                sender: tx_b,
                waker: waker_b,
                connection_count: Arc::new(AtomicUsize::new(3)),
            },
        ]);

        let acceptor_poll = Poll::new().unwrap();
        let acceptor = Acceptor::<MioTcpListener, MioTcpStream> {
            listener: MioTcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap(),
            waker: Arc::new(Waker::new(acceptor_poll.registry(), WAKE_TOKEN).unwrap()),
            poll: acceptor_poll,
            events: Events::with_capacity(8),
            address_index: 0,
            tls: None,
            workers: Arc::clone(&workers),
            max_connections: 5,
        };

        assert_eq!(5, acceptor.total_connections());
        assert!(acceptor.total_connections() >= acceptor.max_connections);
    }
}
