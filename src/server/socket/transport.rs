/// Byte transports the mock device is served over
use crate::error::{DeviceError, Result};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 4096;

/// How long a reply may sit unread before the client is dropped.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Device-side end of a byte stream.
///
/// `deliver` never blocks and never assumes message-aligned reads: it hands
/// back whatever arrived since the last call, possibly nothing.
pub trait Transport: Send {
  /// Start accepting connections.
  fn listen(&mut self) -> Result<()>;

  /// Pick up a pending connection. Returns true once a peer is attached.
  fn accept(&mut self) -> Result<bool>;

  fn is_connected(&self) -> bool;

  /// Bytes received since the last call. `Disconnected` once the peer is gone.
  fn deliver(&mut self) -> Result<Vec<u8>>;

  fn send(&mut self, bytes: &[u8]) -> Result<()>;

  /// Drop the current connection but keep listening.
  fn close(&mut self);

  /// Drop the connection and stop listening.
  fn shutdown(&mut self) {
    self.close();
  }
}

/// TCP server transport. One client at a time.
pub struct TcpTransport {
  addr: String,
  listener: Option<TcpListener>,
  conn: Option<TcpStream>,
  peer_closed: bool,
  write_timeout: Duration,
}

impl TcpTransport {
  pub fn new(addr: impl Into<String>) -> Self {
    Self {
      addr: addr.into(),
      listener: None,
      conn: None,
      peer_closed: false,
      write_timeout: DEFAULT_WRITE_TIMEOUT,
    }
  }

  pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
    self.write_timeout = timeout;
    self
  }

  /// Address actually bound, useful when listening on port 0.
  pub fn local_addr(&self) -> Option<SocketAddr> {
    self.listener.as_ref().and_then(|l| l.local_addr().ok())
  }
}

impl Transport for TcpTransport {
  fn listen(&mut self) -> Result<()> {
    if self.listener.is_some() {
      return Ok(());
    }
    let listener = TcpListener::bind(&self.addr)?;
    listener.set_nonblocking(true)?;
    info!("Socket server listening on {}", listener.local_addr()?);
    self.listener = Some(listener);
    Ok(())
  }

  fn accept(&mut self) -> Result<bool> {
    if self.conn.is_some() {
      return Ok(true);
    }
    let listener = match self.listener.as_ref() {
      Some(l) => l,
      None => return Ok(false),
    };
    match listener.accept() {
      Ok((stream, peer)) => {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(self.write_timeout))?;
        info!("Connected: {}", peer);
        self.conn = Some(stream);
        self.peer_closed = false;
        Ok(true)
      },
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
      Err(e) => Err(e.into()),
    }
  }

  fn is_connected(&self) -> bool {
    self.conn.is_some()
  }

  fn deliver(&mut self) -> Result<Vec<u8>> {
    if self.peer_closed {
      self.close();
      return Err(DeviceError::Disconnected);
    }
    let stream = match self.conn.as_mut() {
      Some(s) => s,
      None => return Ok(Vec::new()),
    };

    let mut out = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
      match stream.read(&mut chunk) {
        Ok(0) => {
          if out.is_empty() {
            self.close();
            return Err(DeviceError::Disconnected);
          }
          // hand over what we got, report the hang-up next call
          self.peer_closed = true;
          break;
        },
        Ok(n) => out.extend_from_slice(&chunk[..n]),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => {
          self.close();
          return Err(DeviceError::from_io(e));
        },
      }
    }
    if !out.is_empty() {
      debug!("deliver(): {} bytes", out.len());
    }
    Ok(out)
  }

  fn send(&mut self, bytes: &[u8]) -> Result<()> {
    let stream = self.conn.as_mut().ok_or(DeviceError::NotConnected)?;
    // blocking write so large replies are not cut short by WouldBlock
    stream.set_nonblocking(false)?;
    let result = stream.write_all(bytes).and_then(|_| stream.flush());
    stream.set_nonblocking(true)?;
    match result {
      Ok(()) => Ok(()),
      Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
        warn!("client not reading, dropping connection after {:?}", self.write_timeout);
        self.close();
        Err(e.into())
      },
      Err(e) => Err(DeviceError::from_io(e)),
    }
  }

  fn close(&mut self) {
    if let Some(stream) = self.conn.take() {
      let _ = stream.shutdown(Shutdown::Both);
      info!("Connection closed");
    }
    self.peer_closed = false;
  }

  fn shutdown(&mut self) {
    self.close();
    self.listener = None;
  }
}

/// Channel-backed transport for socket-free tests. Created with [`pair`].
pub struct InProcessTransport {
  rx: Receiver<Vec<u8>>,
  tx: Sender<Vec<u8>>,
  accepted: bool,
  closed: bool,
}

/// Client end of an [`InProcessTransport`].
pub struct InProcessPeer {
  tx: Sender<Vec<u8>>,
  rx: Receiver<Vec<u8>>,
  pending: VecDeque<u8>,
  timeout: Duration,
}

pub fn pair() -> (InProcessTransport, InProcessPeer) {
  let (to_device, device_rx) = mpsc::channel();
  let (to_peer, peer_rx) = mpsc::channel();
  (
    InProcessTransport {
      rx: device_rx,
      tx: to_peer,
      accepted: false,
      closed: false,
    },
    InProcessPeer {
      tx: to_device,
      rx: peer_rx,
      pending: VecDeque::new(),
      timeout: Duration::from_secs(5),
    },
  )
}

impl Transport for InProcessTransport {
  fn listen(&mut self) -> Result<()> {
    Ok(())
  }

  fn accept(&mut self) -> Result<bool> {
    if !self.closed {
      self.accepted = true;
    }
    Ok(self.accepted)
  }

  fn is_connected(&self) -> bool {
    self.accepted && !self.closed
  }

  fn deliver(&mut self) -> Result<Vec<u8>> {
    if !self.is_connected() {
      return Ok(Vec::new());
    }
    let mut out = Vec::new();
    loop {
      match self.rx.try_recv() {
        Ok(chunk) => out.extend_from_slice(&chunk),
        Err(TryRecvError::Empty) => break,
        Err(TryRecvError::Disconnected) => {
          if out.is_empty() {
            self.close();
            return Err(DeviceError::Disconnected);
          }
          break;
        },
      }
    }
    Ok(out)
  }

  fn send(&mut self, bytes: &[u8]) -> Result<()> {
    if !self.is_connected() {
      return Err(DeviceError::NotConnected);
    }
    self.tx.send(bytes.to_vec()).map_err(|_| DeviceError::Disconnected)
  }

  fn close(&mut self) {
    self.accepted = false;
    self.closed = true;
  }
}

impl InProcessPeer {
  pub fn set_timeout(&mut self, timeout: Duration) {
    self.timeout = timeout;
  }

  /// Send one chunk. Chunk boundaries are preserved on the device side.
  pub fn send(&self, bytes: &[u8]) -> Result<()> {
    self.tx.send(bytes.to_vec()).map_err(|_| DeviceError::Disconnected)
  }

  /// Block until exactly `n` bytes arrived.
  pub fn recv_exact(&mut self, n: usize) -> Result<Vec<u8>> {
    let deadline = Instant::now() + self.timeout;
    while self.pending.len() < n {
      let remaining = deadline.saturating_duration_since(Instant::now());
      match self.rx.recv_timeout(remaining) {
        Ok(chunk) => self.pending.extend(chunk),
        Err(RecvTimeoutError::Timeout) => {
          return Err(io::Error::new(io::ErrorKind::TimedOut, "timed out waiting for reply").into())
        },
        Err(RecvTimeoutError::Disconnected) => return Err(DeviceError::Disconnected),
      }
    }
    Ok(self.pending.drain(..n).collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn in_process_chunks_coalesce() {
    let (mut device, peer) = pair();
    assert!(device.accept().unwrap());
    peer.send(&[1, 2]).unwrap();
    peer.send(&[3]).unwrap();
    assert_eq!(device.deliver().unwrap(), vec![1, 2, 3]);
    assert!(device.deliver().unwrap().is_empty());
  }

  #[test]
  fn in_process_peer_drop_is_disconnect() {
    let (mut device, peer) = pair();
    device.accept().unwrap();
    drop(peer);
    assert!(matches!(device.deliver(), Err(DeviceError::Disconnected)));
    assert!(!device.is_connected());
  }

  #[test]
  fn in_process_recv_exact_spans_chunks() {
    let (mut device, mut peer) = pair();
    device.accept().unwrap();
    device.send(&[1, 2, 3]).unwrap();
    device.send(&[4, 5]).unwrap();
    assert_eq!(peer.recv_exact(4).unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(peer.recv_exact(1).unwrap(), vec![5]);
  }

  #[test]
  fn closed_transport_refuses_send() {
    let (mut device, _peer) = pair();
    device.accept().unwrap();
    device.close();
    assert!(matches!(device.send(&[0]), Err(DeviceError::NotConnected)));
    assert!(!device.accept().unwrap());
  }

  #[test]
  fn stalled_tcp_client_is_dropped() {
    let mut server = TcpTransport::new("127.0.0.1:0").with_write_timeout(Duration::from_millis(200));
    server.listen().unwrap();
    let _client = TcpStream::connect(server.local_addr().unwrap()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while !server.accept().unwrap() {
      assert!(Instant::now() < deadline, "no connection accepted");
      std::thread::sleep(Duration::from_millis(10));
    }

    // far more than the socket buffers hold, and the client never reads
    let reply = vec![0u8; 64 << 20];
    let start = Instant::now();
    assert!(server.send(&reply).is_err());
    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(!server.is_connected());
  }
}
