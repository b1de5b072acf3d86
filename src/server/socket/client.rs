use super::protocol::{Request, MAX_SAMPLES_READ_BUFFER, REG_REPLY_SIZE};
use super::transport::InProcessPeer;
use crate::device::MockDevice;
use crate::error::{DeviceError, Result};
use log::{debug, info};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Byte pipe the client driver talks through.
pub trait DeviceLink {
  fn send_bytes(&mut self, bytes: &[u8]) -> Result<()>;

  /// Block until exactly `n` bytes were read.
  fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>>;
}

/// Live TCP connection to a device.
pub struct TcpLink {
  stream: TcpStream,
}

impl TcpLink {
  pub fn connect(addr: impl ToSocketAddrs, read_timeout: Option<Duration>) -> Result<Self> {
    let stream = TcpStream::connect(addr).map_err(|e| {
      io::Error::new(
        io::ErrorKind::ConnectionRefused,
        format!("Failed to connect to device: {}", e),
      )
    })?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(read_timeout)?;
    info!("[DeviceClient] Connected to {}", stream.peer_addr()?);
    Ok(Self { stream })
  }

  pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
    self.stream.set_read_timeout(timeout)?;
    Ok(())
  }
}

impl DeviceLink for TcpLink {
  fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
    self
      .stream
      .write_all(bytes)
      .and_then(|_| self.stream.flush())
      .map_err(DeviceError::from_io)
  }

  fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    self.stream.read_exact(&mut buf).map_err(DeviceError::from_io)?;
    Ok(buf)
  }
}

/// Direct call mode: requests are parsed synchronously, replies come from
/// the device's reply queue.
impl DeviceLink for MockDevice {
  fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
    self.send_request(bytes);
    Ok(())
  }

  fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
    self.read_reply(n)
  }
}

impl DeviceLink for InProcessPeer {
  fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
    self.send(bytes)
  }

  fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
    self.recv_exact(n)
  }
}

/// Register-level driver for the device.
pub struct DeviceClient<L: DeviceLink> {
  link: L,
  buffer_len: usize,
}

impl DeviceClient<TcpLink> {
  pub fn connect(addr: impl ToSocketAddrs, read_timeout: Option<Duration>) -> Result<Self> {
    Ok(Self::new(TcpLink::connect(addr, read_timeout)?))
  }
}

impl<L: DeviceLink> DeviceClient<L> {
  pub fn new(link: L) -> Self {
    Self {
      link,
      buffer_len: MAX_SAMPLES_READ_BUFFER,
    }
  }

  /// Expected length of READ_BUFFER replies.
  pub fn with_buffer_len(mut self, buffer_len: usize) -> Self {
    self.buffer_len = buffer_len;
    self
  }

  pub fn link(&self) -> &L {
    &self.link
  }

  pub fn write_register(&mut self, addr: u32, value: u32) -> Result<()> {
    debug!("write_register({:#x}, {:#x})", addr, value);
    self.link.send_bytes(&Request::WriteReg { addr, data: value }.to_bytes())
  }

  pub fn read_register(&mut self, addr: u32) -> Result<u32> {
    Ok(self.read_register_i32(addr)? as u32)
  }

  pub fn read_register_i32(&mut self, addr: u32) -> Result<i32> {
    self.link.send_bytes(&Request::ReadReg { addr, reserved: 0 }.to_bytes())?;
    let bytes = self.link.read_bytes(REG_REPLY_SIZE)?;
    let raw = <[u8; REG_REPLY_SIZE]>::try_from(bytes.as_slice()).map_err(|_| DeviceError::ReplyUnderflow {
      requested: REG_REPLY_SIZE,
      available: bytes.len(),
    })?;
    let value = i32::from_le_bytes(raw);
    debug!("read_register({:#x}) = {}", addr, value);
    Ok(value)
  }

  pub fn read_buffer(&mut self) -> Result<Vec<u8>> {
    self.read_buffer_at(0, self.buffer_len as u32)
  }

  pub fn read_buffer_at(&mut self, addr: u32, number_of_points: u32) -> Result<Vec<u8>> {
    self.link.send_bytes(
      &Request::ReadBuffer {
        addr,
        number_of_points,
      }
      .to_bytes(),
    )?;
    self.link.read_bytes(self.buffer_len)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::device::DeviceConfig;
  use crate::server::socket::protocol::INVALID_READ;

  #[test]
  fn check_readreg_against_mock() {
    let mut dev = DeviceClient::new(MockDevice::default());
    dev.write_register(100 * 4, 10).unwrap();
    assert_eq!(dev.read_register(100 * 4).unwrap(), 10);
    assert_eq!(dev.read_register_i32(2334234 + 2).unwrap(), INVALID_READ);
  }

  #[test]
  fn read_buffer_uses_configured_length() {
    let device = MockDevice::new(DeviceConfig {
      max_samples: 64,
      reply_latency: Duration::ZERO,
    });
    let mut dev = DeviceClient::new(device).with_buffer_len(64);
    assert_eq!(dev.read_buffer().unwrap().len(), 64);
    assert_eq!(dev.link().queued_reply_len(), 0);
  }

  #[test]
  fn short_reply_is_underflow() {
    let device = MockDevice::new(DeviceConfig {
      max_samples: 8,
      reply_latency: Duration::ZERO,
    });
    let mut dev = DeviceClient::new(device).with_buffer_len(16);
    assert!(matches!(
      dev.read_buffer(),
      Err(DeviceError::ReplyUnderflow {
        requested: 16,
        available: 8
      })
    ));
  }

  /// Link that answers every read with fewer bytes than asked for.
  struct ShortLink;

  impl DeviceLink for ShortLink {
    fn send_bytes(&mut self, _bytes: &[u8]) -> Result<()> {
      Ok(())
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
      Ok(vec![0; n.saturating_sub(2)])
    }
  }

  #[test]
  fn short_register_reply_is_an_error() {
    let mut dev = DeviceClient::new(ShortLink);
    assert!(matches!(
      dev.read_register(0),
      Err(DeviceError::ReplyUnderflow {
        requested: 4,
        available: 2
      })
    ));
  }
}
