//! Session configuration and JSON persistence.

use std::path::Path;
use std::time::Duration;
use std::{fs, io};

use devproxy_proto::{CodecKind, MAX_FRAME, Reference};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tunables for a [`Session`](crate::Session).
///
/// Missing fields take their defaults when loaded from JSON, so a config
/// file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct SessionConfig {
    /// Wire format spoken with the proxy.
    pub codec: CodecKind,
    /// Default time to wait for a response, in milliseconds.
    pub request_timeout_ms: u64,
    /// Largest accepted frame, in bytes.
    pub max_frame: usize,
    /// Capacity of the outbound frame queue.
    pub outbound_queue: usize,
    /// How long a polled stream lets the proxy hold a poll, in milliseconds.
    pub poll_timeout_ms: u64,
    /// Fixed source reference; a random one is generated when unset.
    pub source: Option<Reference>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            codec: CodecKind::Pack,
            request_timeout_ms: 30_000,
            max_frame: MAX_FRAME,
            outbound_queue: 64,
            poll_timeout_ms: 10_000,
            source: None,
        }
    }
}

impl SessionConfig {
    /// Sets the wire format.
    #[must_use]
    pub const fn codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    /// Sets the default request timeout.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the frame size limit.
    #[must_use]
    pub const fn max_frame(mut self, bytes: usize) -> Self {
        self.max_frame = bytes;
        self
    }

    /// Sets the outbound queue capacity.
    #[must_use]
    pub const fn outbound_queue(mut self, frames: usize) -> Self {
        self.outbound_queue = frames;
        self
    }

    /// Sets the poll hold time for polled streams.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Pins the session's source reference.
    #[must_use]
    pub const fn source(mut self, source: Reference) -> Self {
        self.source = Some(source);
        self
    }

    /// Default request timeout as a [`Duration`].
    pub const fn request_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Poll hold time as a [`Duration`].
    pub const fn poll_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Checks that every limit is usable.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(Error::Config("request_timeout_ms must be nonzero".into()));
        }
        if self.outbound_queue == 0 {
            return Err(Error::Config("outbound_queue must be nonzero".into()));
        }
        if self.max_frame == 0 || u32::try_from(self.max_frame).is_err() {
            return Err(Error::Config(format!(
                "max_frame must be between 1 and {}",
                u32::MAX
            )));
        }
        Ok(())
    }

    /// Loads a config from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let config: Self =
            serde_json::from_str(&data).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Persists the config to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(|e| Error::Io(io::Error::other(e)))
    }
}
