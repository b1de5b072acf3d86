use std::io;
use thiserror::Error;

/// Errors raised by the mock device, its transports and the client driver.
#[derive(Debug, Error)]
pub enum DeviceError {
  /// The caller asked the reply queue for more bytes than were queued.
  #[error("reply queue underflow: requested {requested} bytes, {available} available")]
  ReplyUnderflow { requested: usize, available: usize },

  /// The peer closed the connection.
  #[error("connection closed by peer")]
  Disconnected,

  /// No connection is open on the transport.
  #[error("transport is not connected")]
  NotConnected,

  /// The polling worker has exited and no longer takes commands.
  #[error("polling worker has stopped")]
  WorkerStopped,

  #[error(transparent)]
  Io(#[from] io::Error),
}

impl DeviceError {
  /// Map an I/O error to `Disconnected` when it means the peer went away.
  pub fn from_io(err: io::Error) -> Self {
    match err.kind() {
      io::ErrorKind::UnexpectedEof
      | io::ErrorKind::ConnectionReset
      | io::ErrorKind::ConnectionAborted
      | io::ErrorKind::BrokenPipe => DeviceError::Disconnected,
      _ => DeviceError::Io(err),
    }
  }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
