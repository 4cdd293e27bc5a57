//! The per-worker cooperative scheduler (spec §4.1): one per OS thread, running every client
//! assigned to it to its next suspension point, waking clients whose descriptors are ready or
//! whose idle deadlines have passed.
//!
//! This crate has no generic `Task` type distinct from [`crate::client::Client`] — see that
//! module's docs for why. Concretely, that means the spec's `{ready_queue, sleep_heap, registry}`
//! (spec §3 `Worker`) collapse onto a single [`slab::Slab<Slot<S>>`] keyed by the `Token` a
//! client is registered under: `Slot::registered` stands in for "is this token currently in the
//! registry, and for which direction", `ready` is the FIFO spec §4.1 describes verbatim, and
//! `sleep_heap` tracks the same idle-timeout deadlines [`crate::client::Client::timeout_deadline`]
//! already computes rather than a separate generic `sleep()` primitive, since nothing in this
//! server ever suspends a task that isn't a client waiting on its own socket.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, TryRecvError};
use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};
use rustls::ServerConnection;
use slab::Slab;

use crate::client::{Client, Direction, StepOutcome};
use crate::config::{ServerOptions, TlsConfig};
use crate::net::tcp_stream::TcpStream;
use crate::router::Router;

/// Reserved token the acceptor's [`Waker`] fires on; no client ever occupies it since
/// `slab::Slab` hands out dense small indices.
const WAKE_TOKEN: Token = Token(usize::MAX);

/// How many ready tasks a worker runs in one iteration of its loop before re-polling, bounding
/// per-iteration latency under load (spec §4.1 step 1 "Budget").
const READY_BUDGET: usize = 256;

/// Initial capacity of the `mio::Events` buffer reused across every `poll()` call.
const EVENTS_CAPACITY: usize = 1024;

/// A freshly accepted connection, handed from an acceptor to whichever worker currently has the
/// fewest live clients (spec §5 "Load balancing is performed only at accept time").
pub struct Accepted<S> {
    /// The accepted, non-blocking stream.
    pub stream: S,
    /// Dense index of the listen address it arrived on (spec §3 `Address.index`).
    pub address_index: usize,
    /// TLS material to terminate with, if the listen address is a TLS one.
    pub tls: Option<Arc<TlsConfig>>,
}

/// One client's entry in the worker's registry (spec §3: "descriptor → task").
struct Slot<S> {
    client: Client<S>,
    /// `Some(direction)` while registered with the poller and waiting on that direction;
    /// `None` while runnable (in `ready`) or freshly accepted and not yet polled at all.
    registered: Option<Direction>,
    /// The deadline most recently pushed to `sleep_heap` for this client, used to recognize and
    /// discard stale heap entries superseded by a later suspension (spec §3 "a task appears in
    /// at most one of {ready_queue, sleep_heap, registry[fd]}" — a client can be re-suspended
    /// with a later deadline before its earlier heap entry is popped).
    heap_deadline: Option<Instant>,
}

/// One worker thread's complete scheduling state (spec §3 `Worker`): its own poller, ready
/// queue, sleep heap, and client registry. Owns every [`Client`] assigned to it for that
/// client's entire lifetime; clients never migrate between workers (spec §5).
pub struct Worker<S> {
    id: usize,
    poll: Poll,
    events: Events,
    clients: Slab<Slot<S>>,
    ready: VecDeque<Token>,
    sleep_heap: BinaryHeap<Reverse<(Instant, Token)>>,
    inbound: Receiver<Accepted<S>>,
    waker: Arc<Waker>,
    connection_count: Arc<AtomicUsize>,
    options: Arc<ServerOptions>,
    router: Arc<Router>,
}

impl<S> Worker<S>
where
    S: TcpStream + Read + Write + Source + AsRawFd,
{
    /// Builds a worker with its own poller and an empty client registry. `inbound` is the
    /// channel an acceptor pushes newly accepted connections onto; the returned waker must be
    /// handed to every acceptor that might route work to this worker, so they can notify it
    /// without the worker busy-polling the channel.
    pub fn new(
        id: usize,
        inbound: Receiver<Accepted<S>>,
        connection_count: Arc<AtomicUsize>,
        options: Arc<ServerOptions>,
        router: Arc<Router>,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        Ok(Worker {
            id,
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            clients: Slab::new(),
            ready: VecDeque::new(),
            sleep_heap: BinaryHeap::new(),
            inbound,
            waker,
            connection_count,
            options,
            router,
        })
    }

    /// This worker's id, stable for its lifetime.
    pub fn id(&self) -> usize {
        self.id
    }

    /// A clone of this worker's waker, for an acceptor to notify after pushing onto `inbound`.
    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    /// Current live-client count, the same atomic an acceptor reads to pick the least-loaded
    /// worker (spec §5).
    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::Relaxed)
    }

    /// Runs this worker's event loop. Returns only on a fatal poller error — normal shutdown is
    /// driven externally by dropping the `inbound` sender and waking the worker one last time,
    /// at which point `run` returns `Ok(())` once every remaining client has drained (see
    /// [`crate::server::Server::shutdown`]).
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.drain_ready();

            let disconnected = self.drain_inbound();
            if disconnected && self.clients.is_empty() && self.ready.is_empty() {
                return Ok(());
            }

            let timeout = self.next_timeout();
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            self.handle_events();
            self.sweep_timeouts();
        }
    }

    /// Main loop step 1: run ready tasks to their next suspension point, FIFO, bounded by
    /// `READY_BUDGET` so a burst of always-ready clients can't starve the poller.
    fn drain_ready(&mut self) {
        for _ in 0..READY_BUDGET {
            let Some(token) = self.ready.pop_front() else {
                break;
            };
            self.step(token);
        }
    }

    fn step(&mut self, token: Token) {
        let Some(slot) = self.clients.get_mut(token.0) else {
            return;
        };

        match slot.client.advance() {
            StepOutcome::Blocked(direction) => {
                if self.register_interest(token, direction).is_err() {
                    self.close_client(token);
                }
            }
            StepOutcome::Yielded => self.ready.push_back(token),
            StepOutcome::Done => self.close_client(token),
        }
    }

    /// Registers (or re-registers) `token`'s socket for `direction` readiness, deferring to the
    /// client's own TLS-aware preference (spec §4.2 "the adapter also wraps TLS"), and refreshes
    /// its entry in `sleep_heap` to the client's current idle deadline.
    fn register_interest(&mut self, token: Token, default_direction: Direction) -> io::Result<()> {
        let slot = self
            .clients
            .get_mut(token.0)
            .expect("register_interest called with a live token");

        let direction = slot.client.wants(default_direction);
        let interest = match direction {
            Direction::Read => Interest::READABLE,
            Direction::Write => Interest::WRITABLE,
        };
        let was_registered = slot.registered.is_some();
        slot.registered = Some(direction);
        let deadline = slot.client.timeout_deadline();
        slot.heap_deadline = deadline;

        let stream = slot.client.raw_stream_mut();
        if was_registered {
            self.poll.registry().reregister(stream, token, interest)?;
        } else {
            self.poll.registry().register(stream, token, interest)?;
        }

        if let Some(deadline) = deadline {
            self.sleep_heap.push(Reverse((deadline, token)));
        }
        Ok(())
    }

    /// Main loop steps 3-4: poll, then for each woken token remove it from the registry
    /// (logically — the socket stays registered with the poller until the next suspend decides
    /// what to re-arm) and enqueue it as runnable.
    fn handle_events(&mut self) {
        for event in self.events.iter() {
            let token = event.token();
            if token == WAKE_TOKEN {
                // Draining happens once per loop iteration at the top of `run`, not here — doing
                // it here too would risk a `try_recv` racing a sender between this event and that
                // check and silently consuming a connection neither side accounts for.
                continue;
            }
            if let Some(slot) = self.clients.get_mut(token.0) {
                slot.registered = None;
                self.ready.push_back(token);
            }
        }
    }

    /// Pulls every currently queued connection off `inbound` and spawns it, returning whether the
    /// channel is now disconnected (every `Sender` dropped). Always drains to `Empty` or
    /// `Disconnected` before returning, so a caller never needs a second, racing `try_recv` just
    /// to check disconnection — that would risk silently consuming a connection a concurrent
    /// sender just queued.
    fn drain_inbound(&mut self) -> bool {
        loop {
            match self.inbound.try_recv() {
                Ok(accepted) => self.spawn_client(accepted),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => return true,
            }
        }
    }

    /// `spawn(task)` (spec §4.1): inserts a freshly accepted connection and places it at the
    /// tail of the ready queue so its first `advance()` runs on the next drain.
    fn spawn_client(&mut self, accepted: Accepted<S>) {
        let entry = self.clients.vacant_entry();
        let token = Token(entry.key());

        let client = match accepted.tls {
            Some(tls) => match ServerConnection::new(Arc::clone(&tls.server_config)) {
                Ok(session) => Client::new_tls(
                    accepted.stream,
                    session,
                    token,
                    accepted.address_index,
                    Arc::clone(&self.router),
                    &self.options,
                ),
                Err(_) => return,
            },
            None => Client::new(
                accepted.stream,
                token,
                accepted.address_index,
                Arc::clone(&self.router),
                &self.options,
            ),
        };

        entry.insert(Slot {
            client,
            registered: None,
            heap_deadline: None,
        });
        self.connection_count.fetch_add(1, Ordering::Relaxed);
        self.ready.push_back(token);
    }

    /// `close_client(c)` (spec §4.1): deregisters (if the socket was still registered with the
    /// poller — spec §3 "no descriptor is closed while a task is blocked on it; the task must
    /// first be moved out of the registry") and drops the client, freeing its descriptor.
    fn close_client(&mut self, token: Token) {
        if let Some(mut slot) = self.clients.try_remove(token.0) {
            if slot.registered.is_some() {
                let _ = self.poll.registry().deregister(slot.client.raw_stream_mut());
            }
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Main loop step 2: `min(earliest sleep_heap deadline, earliest client I/O timeout) − now`,
    /// clamped non-negative — trivially satisfied here since the sleep heap and the I/O-timeout
    /// heap are the same structure (see module docs). A non-empty ready queue means the next
    /// poll must not block at all.
    fn next_timeout(&mut self) -> Option<Duration> {
        if !self.ready.is_empty() {
            return Some(Duration::ZERO);
        }

        let now = Instant::now();
        loop {
            let Some(&Reverse((deadline, token))) = self.sleep_heap.peek() else {
                return None;
            };
            if self.is_current_deadline(token, deadline) {
                return Some(deadline.saturating_duration_since(now));
            }
            self.sleep_heap.pop();
        }
    }

    /// Main loop step 6: sweep clients whose deadline has passed and mark them for close.
    fn sweep_timeouts(&mut self) {
        let now = Instant::now();
        while let Some(&Reverse((deadline, token))) = self.sleep_heap.peek() {
            if deadline > now {
                break;
            }
            self.sleep_heap.pop();
            if self.is_current_deadline(token, deadline) {
                self.close_client(token);
            }
        }
    }

    /// A sleep-heap entry is only authoritative if it's the most recent one pushed for `token` —
    /// a client that suspended again (refreshing its deadline) before this older entry was
    /// popped leaves a stale duplicate behind, which this discards instead of closing a client
    /// that's actually still making progress.
    fn is_current_deadline(&self, token: Token, deadline: Instant) -> bool {
        self.clients
            .get(token.0)
            .is_some_and(|slot| slot.heap_deadline == Some(deadline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Composition, FilterChain};
    use crate::http::response::Response;
    use crate::http::Method;
    use crate::router::{RouteBuilder, Scope};
    use mio::net::TcpStream as MioTcpStream;
    use std::io::{Read as _, Write as _};
    use std::net::{TcpListener as StdTcpListener, TcpStream as StdTcpStream};
    use std::time::Duration;

    fn accepted_pair() -> (MioTcpStream, StdTcpStream) {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client_std = StdTcpStream::connect(addr).unwrap();
        let (server_std, _) = listener.accept().unwrap();
        server_std.set_nonblocking(true).unwrap();
        (MioTcpStream::from_std(server_std), client_std)
    }

    fn echo_router() -> Arc<Router> {
        let mut router = Router::new(FilterChain::new(Composition::Embrace));
        router.register(
            Scope::any(),
            Method::Get,
            RouteBuilder::new().exact("ping"),
            Arc::new(|_req| Ok(Response::text("pong"))),
        );
        Arc::new(router)
    }

    fn new_worker() -> (Worker<MioTcpStream>, crossbeam_channel::Sender<Accepted<MioTcpStream>>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = Worker::new(
            0,
            rx,
            Arc::new(AtomicUsize::new(0)),
            Arc::new(ServerOptions::new()),
            echo_router(),
        )
        .unwrap();
        (worker, tx)
    }

    #[test]
    fn spawning_a_client_enqueues_it_ready_and_bumps_connection_count() {
        let (mut worker, tx) = new_worker();
        let (server_stream, _client_stream) = accepted_pair();
        tx.send(Accepted {
            stream: server_stream,
            address_index: 0,
            tls: None,
        })
        .unwrap();

        worker.drain_inbound();
        assert_eq!(1, worker.connection_count());
        assert_eq!(1, worker.ready.len());
    }

    #[test]
    fn a_full_request_drains_through_one_drain_ready_pass() {
        let (mut worker, tx) = new_worker();
        let (server_stream, mut client_stream) = accepted_pair();
        client_stream
            .write_all(b"GET /ping HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .unwrap();

        tx.send(Accepted {
            stream: server_stream,
            address_index: 0,
            tls: None,
        })
        .unwrap();
        worker.drain_inbound();

        // Drive a handful of iterations: an immediately-writable loopback socket finishes the
        // whole cycle without ever needing a real poll() wait.
        for _ in 0..10 {
            worker.drain_ready();
            if worker.clients.is_empty() {
                break;
            }
        }

        assert_eq!(0, worker.connection_count());
        client_stream
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let mut buf = [0u8; 256];
        let n = client_stream.read(&mut buf).unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn next_timeout_does_not_block_while_ready_queue_is_non_empty() {
        let (mut worker, _tx) = new_worker();
        worker.ready.push_back(Token(0));
        assert_eq!(Some(Duration::ZERO), worker.next_timeout());
    }

    #[test]
    fn next_timeout_is_none_with_nothing_ready_or_sleeping() {
        let (mut worker, _tx) = new_worker();
        assert_eq!(None, worker.next_timeout());
    }

    #[test]
    fn stale_sleep_heap_entries_are_discarded_without_closing_the_client() {
        let (mut worker, tx) = new_worker();
        let (server_stream, _client_stream) = accepted_pair();
        tx.send(Accepted {
            stream: server_stream,
            address_index: 0,
            tls: None,
        })
        .unwrap();
        worker.drain_inbound();
        let token = Token(0);

        // Simulate two suspensions with different deadlines; only the later one is current.
        let first = Instant::now();
        worker.sleep_heap.push(Reverse((first, token)));
        let second = first + Duration::from_secs(60);
        worker.clients.get_mut(token.0).unwrap().heap_deadline = Some(second);
        worker.sleep_heap.push(Reverse((second, token)));

        assert!(!worker.is_current_deadline(token, first));
        assert!(worker.is_current_deadline(token, second));
    }
}
