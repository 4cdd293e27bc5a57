// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![deny(missing_docs, rust_2018_idioms, unused_imports)]
// temporary
#![allow(dead_code)]

//! rask is a low-level, sharded, cooperatively-scheduled HTTP/1.1 server core.
//!
//! Each worker thread owns its own non-blocking event loop, ready queue, and client registry;
//! clients never migrate between workers, so no lock is ever taken on the request path itself
//! (see [`worker`]). Request parsing and response serialization live in [`http`]; routing and
//! filters in [`router`] and [`filter`]; static-file serving in [`filecache`].
//!
//! ## Examples
//!
//! A minimal server:
//!
//! ```no_run
//! use std::sync::Arc;
//! use rask::config::ServerOptions;
//! use rask::filter::{Composition, FilterChain};
//! use rask::http::response::Response;
//! use rask::http::Method;
//! use rask::router::{RouteBuilder, Router, Scope};
//! use rask::server::Server;
//!
//! let mut options = ServerOptions::new();
//! options.push_listen("127.0.0.1", 8080);
//!
//! let mut router = Router::new(FilterChain::new(Composition::Embrace));
//! router.register(
//!     Scope::any(),
//!     Method::Get,
//!     RouteBuilder::new().exact("ping"),
//!     Arc::new(|_req| Ok(Response::text("pong"))),
//! );
//!
//! let server = Server::<mio::net::TcpListener, mio::net::TcpStream>::new(options, router);
//! let handle = server.run().expect("failed to start");
//! # handle.shutdown();
//! ```

pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod filecache;
pub mod filter;
pub mod http;
pub mod mutex;
pub mod net;
pub mod router;
pub mod server;
pub mod worker;

pub use config::{Address, DirectoryOptions, ServerOptions, TlsConfig};
pub use error::{HandlerError, RaskError};
pub use router::{Request, Router};
pub use server::{Server, ServerHandle};
