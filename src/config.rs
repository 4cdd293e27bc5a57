//! Explicit, process-wide configuration, passed once at construction time rather than read from
//! mutable module-level state (spec §9 "Global state").

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::ServerConfig;

use crate::error::RaskError;

/// How a request for a directory (as opposed to a file) is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryBehavior {
    /// Serve `index.html` if present, else `403`.
    Index,
    /// Always render a directory listing.
    Lists,
    /// Serve `index.html` if present, else render a listing.
    IndexOrLists,
    /// Always `403`.
    Forbidden,
}

/// Per-directory handler configuration (spec §6 "Configuration options").
#[derive(Debug, Clone)]
pub struct DirectoryOptions {
    /// Filesystem root this handler serves from.
    pub root: PathBuf,
    /// Whether `GET`/`HEAD` downloads are permitted.
    pub download: bool,
    /// How directory (non-file) requests are handled.
    pub dir_behavior: DirectoryBehavior,
    /// Whether `DELETE` is permitted.
    pub delete: bool,
    /// Whether `PUT`/`POST` uploads are permitted.
    pub upload: bool,
    /// Hard cap on an uploaded body, in bytes.
    pub max_upload_size: u64,
}

impl DirectoryOptions {
    /// A read-only handler rooted at `root`: downloads and index pages allowed, uploads and
    /// deletes refused.
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        DirectoryOptions {
            root: root.into(),
            download: true,
            dir_behavior: DirectoryBehavior::IndexOrLists,
            delete: false,
            upload: false,
            max_upload_size: 0,
        }
    }
}

/// TLS material for one listen address, loaded once at startup.
pub struct TlsConfig {
    /// The `rustls` server configuration built from the loaded certificate chain and key.
    pub server_config: Arc<ServerConfig>,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig").finish_non_exhaustive()
    }
}

impl TlsConfig {
    /// Loads a PEM certificate chain and private key from disk and builds a `rustls`
    /// configuration accepting no client certificates.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, RaskError> {
        let cert_file = std::fs::File::open(cert_path)?;
        let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
            .collect::<Result<Vec<_>, _>>()?;

        let key_file = std::fs::File::open(key_path)?;
        let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))?
            .ok_or_else(|| {
                RaskError::Fatal(std::io::Error::other(format!(
                    "no private key found in {}",
                    key_path.display()
                )))
            })?;

        let server_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| RaskError::Fatal(std::io::Error::other(e)))?;

        Ok(TlsConfig {
            server_config: Arc::new(server_config),
        })
    }
}

/// One listen address (spec §3 `Address`). `index` is assigned by
/// [`ServerOptions::push_listen`] and used as a dense key for per-address routing scope.
#[derive(Debug, Clone)]
pub struct Address {
    /// Hostname or IP to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Whether `SO_REUSEADDR` is set before binding.
    pub reuse_addr: bool,
    /// Dense index assigned at registration time.
    pub index: usize,
    /// TLS material to terminate on this address, if any. `None` means plaintext.
    pub tls: Option<Arc<TlsConfig>>,
}

impl Address {
    /// The `std::net::SocketAddr` this address resolves to.
    pub fn socket_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        use std::net::ToSocketAddrs;
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::AddrNotAvailable))
    }
}

/// Top-level server configuration (spec §6). Built once and shared read-only across workers via
/// `Arc`.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Addresses to listen on.
    pub listens: Vec<Address>,
    /// Hard cap on concurrently open connections across all workers; the acceptor stops
    /// accepting once reached.
    pub max_connections: usize,
    /// Number of worker threads.
    pub num_threads: usize,
    /// Idle timeout. `None` disables timeout enforcement entirely (spec §6: "negative = disabled").
    pub timeout: Option<Duration>,
    /// Size of each client's read/write buffers.
    pub buf_size: usize,
    /// Hard cap on a request body's decoded size, independent of any per-route
    /// `DirectoryOptions::max_upload_size`. Since the whole body is materialized before a handler
    /// runs (spec §9 "Cooperative tasks without language-native coroutines"), this bounds worst-case
    /// per-connection memory use.
    pub max_body_bytes: usize,
    /// Whether to mask `SIGPIPE` at startup so a write to a closed socket surfaces as an `EPIPE`
    /// error instead of terminating the process.
    pub mask_sigpipe: bool,
}

impl ServerOptions {
    /// Defaults matching a small, single-box deployment: one worker per available core, a 30s
    /// idle timeout, 8 KiB buffers, no connection cap.
    pub fn new() -> Self {
        ServerOptions {
            listens: Vec::new(),
            max_connections: usize::MAX,
            num_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            timeout: Some(Duration::from_secs(30)),
            buf_size: 8 * 1024,
            max_body_bytes: 10 * 1024 * 1024,
            mask_sigpipe: true,
        }
    }

    /// Registers a plaintext listen address, assigning it the next dense index.
    pub fn push_listen(&mut self, host: impl Into<String>, port: u16) -> &mut Self {
        let index = self.listens.len();
        self.listens.push(Address {
            host: host.into(),
            port,
            reuse_addr: true,
            index,
            tls: None,
        });
        self
    }

    /// Registers a TLS-terminating listen address, assigning it the next dense index.
    pub fn push_listen_tls(
        &mut self,
        host: impl Into<String>,
        port: u16,
        tls: Arc<TlsConfig>,
    ) -> &mut Self {
        let index = self.listens.len();
        self.listens.push(Address {
            host: host.into(),
            port,
            reuse_addr: true,
            index,
            tls: Some(tls),
        });
        self
    }

    /// Sets the worker-thread count.
    pub fn num_threads(&mut self, n: usize) -> &mut Self {
        self.num_threads = n;
        self
    }

    /// Sets the idle timeout. `None` disables enforcement.
    pub fn timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.timeout = timeout;
        self
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_listen_assigns_dense_indices() {
        let mut opts = ServerOptions::new();
        opts.push_listen("127.0.0.1", 8080).push_listen("127.0.0.1", 8443);
        assert_eq!(0, opts.listens[0].index);
        assert_eq!(1, opts.listens[1].index);
    }

    #[test]
    fn default_options_pick_at_least_one_thread() {
        assert!(ServerOptions::new().num_threads >= 1);
    }
}
