//! Worker-to-main event transport: newline-delimited JSON messages.

use std::io::{self, ErrorKind, Write};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;

use common::WorkerMessage;
use parking_lot::Mutex;
use tracing::warn;

const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(20);

#[derive(Debug, thiserror::Error)]
pub enum IpcDeliveryError {
    #[error("ipc write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("ipc encode failed: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("ipc decode failed: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("ipc receiver is gone")]
    Disconnected,
}

/// Where the scan coordinator publishes its events.
pub trait EventSink: Send + Sync {
    fn deliver(&self, message: &WorkerMessage) -> Result<(), IpcDeliveryError>;
}

pub fn encode_message(message: &WorkerMessage) -> Result<String, IpcDeliveryError> {
    let mut line = serde_json::to_string(message).map_err(IpcDeliveryError::Encode)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_message(line: &str) -> Result<WorkerMessage, IpcDeliveryError> {
    serde_json::from_str(line.trim()).map_err(IpcDeliveryError::Decode)
}

/// Writes one JSON line per message, retrying transient write failures.
pub struct IpcBridge<W> {
    writer: Mutex<W>,
    attempts: u32,
    backoff: Duration,
}

impl<W: Write + Send> IpcBridge<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            attempts: DEFAULT_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> EventSink for IpcBridge<W> {
    /// Resumes a partially written line instead of rewriting it. `attempts`
    /// bounds consecutive failures; any progress resets the count.
    fn deliver(&self, message: &WorkerMessage) -> Result<(), IpcDeliveryError> {
        let line = encode_message(message)?;
        let bytes = line.as_bytes();
        let mut writer = self.writer.lock();
        let mut written = 0;
        let mut attempt = 1;
        while written < bytes.len() {
            match writer.write(&bytes[written..]) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero).into()),
                Ok(n) => {
                    written += n;
                    attempt = 1;
                }
                Err(err) => attempt = self.backoff_or_fail(err, attempt)?,
            }
        }
        loop {
            match writer.flush() {
                Ok(()) => return Ok(()),
                Err(err) => attempt = self.backoff_or_fail(err, attempt)?,
            }
        }
    }
}

impl<W> IpcBridge<W> {
    fn backoff_or_fail(&self, err: io::Error, attempt: u32) -> Result<u32, IpcDeliveryError> {
        if err.kind() == ErrorKind::Interrupted {
            return Ok(attempt);
        }
        if attempt < self.attempts && is_transient(&err) {
            warn!("IPC write failed (attempt {}): {}", attempt, err);
            thread::sleep(self.backoff * attempt);
            return Ok(attempt + 1);
        }
        Err(err.into())
    }
}

impl EventSink for Sender<WorkerMessage> {
    fn deliver(&self, message: &WorkerMessage) -> Result<(), IpcDeliveryError> {
        self.send(message.clone())
            .map_err(|_| IpcDeliveryError::Disconnected)
    }
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
    )
}
