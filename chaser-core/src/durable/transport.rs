//! Durable channel transport
//!
//! Abstract publisher/subscriber pair with two implementations:
//!
//! - **Channel**: in-process crossbeam bounded channels, used by tests and
//!   single-process runs.
//! - **Shm**: a length-prefixed append-only stream file on a tmpfs path
//!   (default `/dev/shm/chaser`), readable by other processes and across
//!   restarts. One file per stream id.
//!
//! Transports are created through an explicitly-constructed
//! [`DurableContext`] handed down via config; there is no process-global
//! driver. Dropping the context ends the process's use of the channel but
//! leaves stream files in place so a restarted process can replay them.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for transport operations
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Channel/connection is closed
    #[error("channel closed")]
    ChannelClosed,

    /// Buffer is full (backpressure)
    #[error("buffer full")]
    Full,

    /// IO error on the stream file
    #[error("IO error: {0}")]
    Io(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// Message publisher interface. Implementations are thread-safe.
pub trait Publisher: Send + Sync {
    /// Publish one serialized frame
    fn publish(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Whether the publisher is still usable
    fn is_active(&self) -> bool {
        true
    }
}

/// Message subscriber interface. `poll` is non-blocking and invokes the
/// handler once per complete frame.
pub trait Subscriber: Send {
    fn poll(&self, handler: &mut dyn FnMut(&[u8])) -> Result<usize, TransportError>;

    fn has_messages(&self) -> bool {
        true
    }
}

// ============================================================================
// In-process channel transport
// ============================================================================

/// One in-process stream, keyed by the same stream id the shm transport
/// uses for its file name. Holds both channel ends so every publisher and
/// subscriber handed out for a given id is connected to the same queue;
/// the stream going away (context drop) is what closes the channel for
/// outstanding publishers.
pub struct ChannelStream {
    stream_id: i32,
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl ChannelStream {
    pub fn new(stream_id: i32, capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        tracing::debug!(stream_id, capacity, "in-process stream ready");
        Self { stream_id, tx, rx }
    }

    pub fn publisher(&self) -> ChannelPublisher {
        ChannelPublisher {
            stream_id: self.stream_id,
            tx: self.tx.clone(),
        }
    }

    pub fn subscriber(&self) -> ChannelSubscriber {
        ChannelSubscriber {
            rx: self.rx.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ChannelPublisher {
    stream_id: i32,
    tx: Sender<Vec<u8>>,
}

impl Publisher for ChannelPublisher {
    fn publish(&self, data: &[u8]) -> Result<(), TransportError> {
        self.tx.try_send(data.to_vec()).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Full,
            TrySendError::Disconnected(_) => {
                tracing::debug!(stream_id = self.stream_id, "stream gone, publish dropped");
                TransportError::ChannelClosed
            }
        })
    }
}

pub struct ChannelSubscriber {
    rx: Receiver<Vec<u8>>,
}

impl Subscriber for ChannelSubscriber {
    fn poll(&self, handler: &mut dyn FnMut(&[u8])) -> Result<usize, TransportError> {
        Ok(self.rx.try_iter().map(|frame| handler(&frame)).count())
    }

    fn has_messages(&self) -> bool {
        !self.rx.is_empty()
    }
}

// ============================================================================
// Shared-memory stream transport
// ============================================================================

/// Appends `u32`-length-prefixed frames to the stream file
pub struct ShmPublisher {
    file: Mutex<File>,
    path: PathBuf,
}

impl ShmPublisher {
    pub fn open(path: &Path) -> Result<Self, TransportError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Publisher for ShmPublisher {
    fn publish(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut file = self.file.lock();
        // Single write call per frame keeps concurrent tail readers from
        // observing a length prefix without its payload in most cases;
        // the subscriber tolerates a short tail either way.
        let mut frame = Vec::with_capacity(4 + data.len());
        frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
        frame.extend_from_slice(data);
        file.write_all(&frame)?;
        file.flush()?;
        Ok(())
    }
}

/// Reads frames appended to the stream file since the last poll
pub struct ShmSubscriber {
    path: PathBuf,
    offset: Mutex<u64>,
}

impl ShmSubscriber {
    /// Attach at the start of the stream (replays everything written so
    /// far, then follows new frames).
    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            offset: Mutex::new(0),
        }
    }

    /// Attach at the current end of the stream (follow-only)
    pub fn open_at_end(path: &Path) -> Result<Self, TransportError> {
        let offset = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path: path.to_path_buf(),
            offset: Mutex::new(offset),
        })
    }
}

impl Subscriber for ShmSubscriber {
    fn poll(&self, handler: &mut dyn FnMut(&[u8])) -> Result<usize, TransportError> {
        let mut offset = self.offset.lock();
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            // Stream not created yet; nothing to read.
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        if *offset >= len {
            return Ok(0);
        }
        file.seek(SeekFrom::Start(*offset))?;
        let mut buf = Vec::with_capacity((len - *offset) as usize);
        file.read_to_end(&mut buf)?;

        let mut pos = 0usize;
        let mut count = 0usize;
        while pos + 4 <= buf.len() {
            let frame_len =
                u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]) as usize;
            if pos + 4 + frame_len > buf.len() {
                // Writer mid-append; leave the partial frame for next poll.
                break;
            }
            handler(&buf[pos + 4..pos + 4 + frame_len]);
            pos += 4 + frame_len;
            count += 1;
        }
        *offset += pos as u64;
        Ok(count)
    }
}

// ============================================================================
// Configuration and context
// ============================================================================

/// Transport type selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// In-process channel
    Channel,
    /// Shared-memory stream files
    #[default]
    Shm,
}

/// Durable channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(rename = "type", default)]
    pub kind: TransportKind,

    /// Directory holding the stream files (shm transport)
    #[serde(default = "default_channel_dir")]
    pub channel_dir: PathBuf,

    /// Bounded capacity of the in-process channel
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_channel_dir() -> PathBuf {
    PathBuf::from("/dev/shm/chaser")
}

fn default_capacity() -> usize {
    8192
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Shm,
            channel_dir: default_channel_dir(),
            capacity: default_capacity(),
        }
    }
}

impl TransportConfig {
    fn stream_path(&self, stream_id: i32) -> PathBuf {
        self.channel_dir.join(format!("stream-{}.dat", stream_id))
    }
}

/// Explicitly-constructed transport context
///
/// Owns the channel endpoints for every stream id so that a publisher and
/// subscriber created for the same stream are actually connected. Passed
/// to components via config wiring; dropping it tears down in-process
/// channels while shm stream files remain for replay.
pub struct DurableContext {
    config: TransportConfig,
    streams: Mutex<HashMap<i32, ChannelStream>>,
}

impl DurableContext {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        if config.kind == TransportKind::Shm {
            std::fs::create_dir_all(&config.channel_dir)?;
        }
        Ok(Self {
            config,
            streams: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn with_stream<T>(&self, stream_id: i32, f: impl FnOnce(&ChannelStream) -> T) -> T {
        let mut streams = self.streams.lock();
        let stream = streams
            .entry(stream_id)
            .or_insert_with(|| ChannelStream::new(stream_id, self.config.capacity));
        f(stream)
    }

    /// Publisher for `stream_id`
    pub fn create_publisher(&self, stream_id: i32) -> Result<Box<dyn Publisher>, TransportError> {
        match self.config.kind {
            TransportKind::Channel => {
                Ok(Box::new(self.with_stream(stream_id, ChannelStream::publisher)))
            }
            TransportKind::Shm => Ok(Box::new(ShmPublisher::open(
                &self.config.stream_path(stream_id),
            )?)),
        }
    }

    /// Subscriber for `stream_id`. For the shm transport the subscriber
    /// replays the stream from the beginning.
    pub fn create_subscriber(&self, stream_id: i32) -> Result<Box<dyn Subscriber>, TransportError> {
        match self.config.kind {
            TransportKind::Channel => {
                Ok(Box::new(self.with_stream(stream_id, ChannelStream::subscriber)))
            }
            TransportKind::Shm => Ok(Box::new(ShmSubscriber::open(
                &self.config.stream_path(stream_id),
            ))),
        }
    }
}

impl Drop for DurableContext {
    fn drop(&mut self) {
        tracing::debug!(dir = %self.config.channel_dir.display(), "durable context torn down");
    }
}
