//! Transport-level primitives: the listener/stream traits and the non-blocking I/O adapter that
//! sits between a raw socket and the HTTP layer.

pub mod nonblocking;
pub mod tcp_listener;
pub mod tcp_stream;

pub use nonblocking::{IoOutcome, NonBlocking};
