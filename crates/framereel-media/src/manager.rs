//! The stream directory.
//!
//! A path-keyed cache of open streams with reference-counted release.
//! Repeated opens of the same file return the same stream; the underlying
//! contexts close when the last reference is released and every emitted
//! `Arc` has been dropped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use framereel_core::Result;
use parking_lot::Mutex;
use tracing::debug;

use crate::backend::{FfmpegBackend, VideoBackend};
use crate::options::DecoderOptions;
use crate::stream::Stream;

struct Entry<B: VideoBackend> {
    stream: Arc<Stream<B>>,
    refs: usize,
}

/// Directory of open streams, keyed by file path.
pub struct Manager<B: VideoBackend = FfmpegBackend> {
    streams: Mutex<HashMap<PathBuf, Entry<B>>>,
}

impl<B: VideoBackend> Manager<B> {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Drop one reference to the stream for `path`, closing it when the
    /// count reaches zero. Releasing an unknown path is a no-op.
    pub fn release_stream(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut streams = self.streams.lock();
        match streams.get_mut(path) {
            Some(entry) if entry.refs > 1 => entry.refs -= 1,
            Some(_) => {
                streams.remove(path);
            }
            None => debug!("release of unopened stream {}", path.display()),
        }
    }

    pub(crate) fn get_or_open(
        &self,
        path: &Path,
        open: impl FnOnce() -> Result<Stream<B>>,
    ) -> Result<Arc<Stream<B>>> {
        let mut streams = self.streams.lock();
        if let Some(entry) = streams.get_mut(path) {
            entry.refs += 1;
            return Ok(entry.stream.clone());
        }
        let stream = Arc::new(open()?);
        streams.insert(
            path.to_path_buf(),
            Entry {
                stream: stream.clone(),
                refs: 1,
            },
        );
        Ok(stream)
    }
}

impl Manager<FfmpegBackend> {
    /// Return the stream for `path`, opening it on first use. Subsequent
    /// calls with the same path return the same stream and bump its
    /// reference count; `options` only apply to the first open.
    pub fn get_stream(
        &self,
        path: impl AsRef<Path>,
        options: &DecoderOptions,
    ) -> Result<Arc<Stream>> {
        let path = path.as_ref();
        self.get_or_open(path, || Stream::open(path, options))
    }
}

impl<B: VideoBackend> Default for Manager<B> {
    fn default() -> Self {
        Self::new()
    }
}
