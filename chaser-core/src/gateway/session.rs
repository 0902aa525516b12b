//! Blocking WebSocket session with fragment reassembly
//!
//! One session per channel (public feed, private trade), each driven by
//! its own thread. The socket read timeout doubles as the poll cadence,
//! so a quiet connection still returns control to the caller every
//! `read_timeout` to check the shutdown flag and drain outbound work.
//!
//! Inbound payloads may arrive fragmented; the session buffers fragments
//! per connection and hands the caller one complete message at a time,
//! parsed exactly once downstream.

use std::fmt;
use std::net::TcpStream;
use std::time::Duration;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

/// Session-level failures. Transient ones surface to the owning loop,
/// which drops the session and reconnects with backoff.
#[derive(Debug, Clone)]
pub enum SessionError {
    /// Could not establish or configure the connection
    Connect(String),
    /// Socket-level failure mid-session
    Io(String),
    /// Protocol violation reported by the WS layer
    Protocol(String),
    /// Peer closed the connection
    Closed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Connect(msg) => write!(f, "connect failed: {}", msg),
            SessionError::Io(msg) => write!(f, "socket error: {}", msg),
            SessionError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            SessionError::Closed => write!(f, "connection closed by peer"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Buffers message fragments until the final one arrives
///
/// `push` returns the reassembled message exactly once, on the fragment
/// flagged final. Disconnects must clear the buffer so a new session
/// never parses a stitch of two messages.
#[derive(Default)]
pub struct FrameAssembler {
    buf: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, payload: &[u8], is_final: bool) -> Option<String> {
        self.buf.extend_from_slice(payload);
        if !is_final {
            return None;
        }
        let complete = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(complete)
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// A connected WebSocket with the per-session reassembly buffer
pub struct WsSession {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    assembler: FrameAssembler,
}

impl WsSession {
    /// Connect and set the socket read timeout used as poll cadence
    pub fn connect(url: &str, read_timeout: Duration) -> Result<Self, SessionError> {
        let (socket, _response) =
            tungstenite::connect(url).map_err(|e| SessionError::Connect(e.to_string()))?;

        match socket.get_ref() {
            MaybeTlsStream::Plain(stream) => stream
                .set_read_timeout(Some(read_timeout))
                .map_err(|e| SessionError::Connect(e.to_string()))?,
            MaybeTlsStream::NativeTls(stream) => stream
                .get_ref()
                .set_read_timeout(Some(read_timeout))
                .map_err(|e| SessionError::Connect(e.to_string()))?,
            _ => {}
        }

        tracing::info!(url, "websocket connected");
        Ok(Self {
            socket,
            assembler: FrameAssembler::new(),
        })
    }

    /// Send one text payload
    pub fn send_text(&mut self, payload: &str) -> Result<(), SessionError> {
        self.socket
            .send(Message::Text(payload.to_string()))
            .map_err(map_ws_error)
    }

    /// Poll for the next complete inbound message.
    ///
    /// Returns `Ok(None)` on read timeout, control frames, or a
    /// non-final fragment. Errors mean the session is no longer usable.
    pub fn poll_message(&mut self) -> Result<Option<String>, SessionError> {
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(self.assembler.push(text.as_bytes(), true)),
            Ok(Message::Binary(bytes)) => Ok(self.assembler.push(&bytes, true)),
            Ok(Message::Frame(frame)) => {
                let is_final = frame.header().is_final;
                Ok(self.assembler.push(&frame.into_data(), is_final))
            }
            Ok(Message::Ping(payload)) => {
                // tungstenite queues the pong; send flushes it.
                let _ = self.socket.send(Message::Pong(payload));
                Ok(None)
            }
            Ok(Message::Pong(_)) => Ok(None),
            Ok(Message::Close(_)) => Err(SessionError::Closed),
            Err(e) => match classify_read_error(e) {
                ReadOutcome::Timeout => Ok(None),
                ReadOutcome::Fatal(err) => Err(err),
            },
        }
    }
}

enum ReadOutcome {
    Timeout,
    Fatal(SessionError),
}

fn classify_read_error(error: tungstenite::Error) -> ReadOutcome {
    use std::io::ErrorKind;
    match error {
        tungstenite::Error::Io(ref io_err)
            if matches!(io_err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
        {
            ReadOutcome::Timeout
        }
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            ReadOutcome::Fatal(SessionError::Closed)
        }
        tungstenite::Error::Io(io_err) => ReadOutcome::Fatal(SessionError::Io(io_err.to_string())),
        other => ReadOutcome::Fatal(SessionError::Protocol(other.to_string())),
    }
}

fn map_ws_error(error: tungstenite::Error) -> SessionError {
    match error {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            SessionError::Closed
        }
        tungstenite::Error::Io(io_err) => SessionError::Io(io_err.to_string()),
        other => SessionError::Protocol(other.to_string()),
    }
}
