//! Content-addressed cache mapping a filesystem path to a ready-to-serve response body variant
//! (spec §4.5).

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::error::RaskError;
use crate::http::date::{format_http_date, parse_http_date};
use crate::http::request::RequestHead;
use crate::http::response::Response;
use crate::http::status::Status;

/// Which shape a cached file's body takes on the wire, chosen by a [`CachePolicy`] parameterised
/// on size, MIME type, and `Accept-Encoding` (spec §4.5 "Variants").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Open a fresh file descriptor per request; nothing is retained between requests.
    NoCache,
    /// Materialize the file's contents in memory once and serve every request from that copy.
    MemCache,
    /// Like [`CachePolicy::MemCache`], but the cached bytes are pre-compressed for `encoding`;
    /// requests that don't advertise support for it fall back to [`CachePolicy::MemCache`]
    /// behavior (an uncompressed in-memory copy, built lazily the first time it's needed).
    CompressCache,
    /// A single file descriptor shared by every request, served via per-request-offset
    /// `sendfile` (spec §4.5 "the descriptor's kernel offset is not relied on").
    SendFileCache,
    /// Like [`CachePolicy::SendFileCache`], but the descriptor is opened per request and closed
    /// after — no descriptor is retained between requests.
    SendFile,
}

/// A compressor plugged into [`CachePolicy::CompressCache`]. The compression *algorithm* itself
/// is out of scope (spec §1: "the compression filter" is an external collaborator) — this is
/// just the seam a caller wires a real compressor into.
pub trait Compressor: Send + Sync {
    /// The `Content-Encoding` token this compressor produces, e.g. `"deflate"`.
    fn encoding(&self) -> &str;
    /// Compresses `input` completely.
    fn compress(&self, input: &[u8]) -> Vec<u8>;
}

enum Variant {
    InMemory(Arc<Vec<u8>>),
    CompressedInMemory { encoding: String, bytes: Arc<Vec<u8>>, uncompressed: Arc<Vec<u8>> },
    SharedFd(Arc<fs::File>),
}

/// One cached file: its last observed mtime and the body variant built for it.
struct Entry {
    mtime: SystemTime,
    size: u64,
    variant: Variant,
}

/// Guards concurrent rebuilds of the same cache key so at most one build runs per key; the rest
/// of spec §4.5's "Concurrent rebuilds on the same key must be coalesced" wait on it.
struct BuildLock;

/// Maps a filesystem path to a cached response-body variant, invalidating and rebuilding entries
/// when the file's on-disk mtime moves.
pub struct FileCache {
    policy: CachePolicy,
    compressor: Option<Arc<dyn Compressor>>,
    entries: Mutex<HashMap<PathBuf, Arc<Entry>>>,
    building: Mutex<HashMap<PathBuf, Arc<Mutex<BuildLock>>>>,
}

impl FileCache {
    /// A cache serving every request under `policy`, with no compressor wired in.
    pub fn new(policy: CachePolicy) -> Self {
        FileCache {
            policy,
            compressor: None,
            entries: Mutex::new(HashMap::new()),
            building: Mutex::new(HashMap::new()),
        }
    }

    /// Wires a compressor in for [`CachePolicy::CompressCache`]. A no-op (falls back to
    /// [`CachePolicy::MemCache`] behavior) for every other policy.
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// Builds the response for `path`, honoring conditional-GET headers on `request` and this
    /// cache's configured [`CachePolicy`]. Rejects `..` traversal with `403` before ever touching
    /// the filesystem (spec §4.5 "Safety").
    pub fn response_for(&self, path: &Path, request: &RequestHead) -> Result<Response, RaskError> {
        if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(RaskError::policy(Status::Forbidden, "path traversal rejected"));
        }

        let entry = self.entry_for(path)?;

        let etag = format!("\"{}\"", mtime_fixed_precision(entry.mtime));
        if conditional_get_satisfied(request, &etag, entry.mtime) {
            return Ok(Response::new(Status::NotModified)
                .header("ETag", etag)
                .header("Date", format_http_date(SystemTime::now())));
        }

        let accepts_encoding = |encoding: &str| {
            request
                .header("accept-encoding")
                .is_some_and(|h| h.value().split(',').any(|t| t.trim().eq_ignore_ascii_case(encoding)))
        };

        let response = Response::new(Status::r#Ok)
            .header("ETag", etag)
            .header("Date", format_http_date(SystemTime::now()));

        let response = match &entry.variant {
            Variant::InMemory(bytes) => response.bytes(bytes.as_ref().clone()),
            Variant::CompressedInMemory { encoding, bytes, uncompressed } => {
                if accepts_encoding(encoding) {
                    response
                        .header("Content-Encoding", encoding.clone())
                        .bytes(bytes.as_ref().clone())
                } else {
                    response.bytes(uncompressed.as_ref().clone())
                }
            }
            Variant::SharedFd(file) => response.file(Arc::clone(file), entry.size),
        };

        Ok(response)
    }

    fn entry_for(&self, path: &Path) -> Result<Arc<Entry>, RaskError> {
        if self.policy == CachePolicy::NoCache || self.policy == CachePolicy::SendFile {
            return Ok(Arc::new(self.build_entry(path)?));
        }

        if let Some(entry) = self.entries.lock().unwrap().get(path).cloned() {
            if fs::metadata(path).ok().and_then(|m| m.modified().ok()) == Some(entry.mtime) {
                return Ok(entry);
            }
        }

        let lock = {
            let mut building = self.building.lock().unwrap();
            Arc::clone(
                building
                    .entry(path.to_path_buf())
                    .or_insert_with(|| Arc::new(Mutex::new(BuildLock))),
            )
        };
        let _guard = lock.lock().unwrap();

        if let Some(entry) = self.entries.lock().unwrap().get(path).cloned() {
            if fs::metadata(path).ok().and_then(|m| m.modified().ok()) == Some(entry.mtime) {
                self.building.lock().unwrap().remove(path);
                return Ok(entry);
            }
        }

        let entry = Arc::new(self.build_entry(path)?);
        self.entries.lock().unwrap().insert(path.to_path_buf(), Arc::clone(&entry));
        self.building.lock().unwrap().remove(path);
        Ok(entry)
    }

    fn build_entry(&self, path: &Path) -> Result<Entry, RaskError> {
        let metadata = fs::metadata(path).map_err(RaskError::from)?;
        let mtime = metadata.modified().map_err(RaskError::from)?;
        let size = metadata.len();

        let variant = match self.policy {
            CachePolicy::NoCache | CachePolicy::SendFile => {
                Variant::SharedFd(Arc::new(fs::File::open(path)?))
            }
            CachePolicy::SendFileCache => Variant::SharedFd(Arc::new(fs::File::open(path)?)),
            CachePolicy::MemCache => Variant::InMemory(Arc::new(read_whole_file(path)?)),
            CachePolicy::CompressCache => {
                let bytes = read_whole_file(path)?;
                match &self.compressor {
                    Some(compressor) => Variant::CompressedInMemory {
                        encoding: compressor.encoding().to_string(),
                        bytes: Arc::new(compressor.compress(&bytes)),
                        uncompressed: Arc::new(bytes),
                    },
                    None => Variant::InMemory(Arc::new(bytes)),
                }
            }
        };

        Ok(Entry { mtime, size, variant })
    }
}

fn read_whole_file(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = fs::File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Renders `mtime` as the fixed-precision float ETag spec §4.5 calls for: seconds since the Unix
/// epoch with sub-second precision, so two saves within the same second still produce distinct
/// tags.
fn mtime_fixed_precision(mtime: SystemTime) -> String {
    let duration = mtime
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:06}", duration.as_secs(), duration.subsec_micros())
}

fn conditional_get_satisfied(request: &RequestHead, etag: &str, mtime: SystemTime) -> bool {
    if let Some(header) = request.header("if-none-match") {
        return header.value() == etag || header.value() == "*";
    }
    if let Some(header) = request.header("if-modified-since") {
        if let Some(since) = parse_http_date(header.value()) {
            return mtime <= since;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::{parse_head, Progress};
    use std::io::Write as _;

    fn head(raw: &[u8]) -> RequestHead {
        let Progress::Complete(head, _) = parse_head(raw).unwrap() else {
            panic!("expected complete parse");
        };
        head
    }

    fn write_temp_file(contents: &[u8]) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("rask-filecache-test-{:?}", std::thread::current().id()));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents).unwrap();
        path
    }

    #[test]
    fn rejects_parent_dir_traversal_with_403() {
        let cache = FileCache::new(CachePolicy::MemCache);
        let request = head(b"GET / HTTP/1.1\r\n\r\n");
        let err = cache
            .response_for(Path::new("../etc/passwd"), &request)
            .unwrap_err();
        assert_eq!(Some(Status::Forbidden), err.status());
    }

    #[test]
    fn serves_200_with_etag_on_first_request() {
        let path = write_temp_file(b"hello world");
        let cache = FileCache::new(CachePolicy::MemCache);
        let request = head(b"GET / HTTP/1.1\r\n\r\n");

        let response = cache.response_for(&path, &request).unwrap();
        assert_eq!(Status::r#Ok.code(), response.status().code());
        fs::remove_file(path).ok();
    }

    #[test]
    fn matching_if_none_match_yields_304() {
        let path = write_temp_file(b"hello world");
        let cache = FileCache::new(CachePolicy::MemCache);
        let plain = head(b"GET / HTTP/1.1\r\n\r\n");
        let first = cache.response_for(&path, &plain).unwrap();
        let _ = &first;

        let mtime = fs::metadata(&path).unwrap().modified().unwrap();
        let etag = mtime_fixed_precision(mtime);
        let conditional_raw = format!("GET / HTTP/1.1\r\nIf-None-Match: \"{}\"\r\n\r\n", etag);
        let conditional = head(conditional_raw.as_bytes());

        let response = cache.response_for(&path, &conditional).unwrap();
        assert_eq!(Status::NotModified.code(), response.status().code());
        fs::remove_file(path).ok();
    }
}
