/// Byte queues and the inbound frame accumulator
use crate::error::{DeviceError, Result};
use crate::server::socket::protocol::{decode_body, decode_header, DecodeError, Request, MAGIC_SIZE};
use log::warn;
use std::collections::VecDeque;

/// Growable FIFO of bytes. Bytes leave only from the front, in order.
#[derive(Debug, Clone, Default)]
pub struct ByteQueue {
  bytes: VecDeque<u8>,
}

impl ByteQueue {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn append(&mut self, bytes: &[u8]) {
    self.bytes.extend(bytes.iter().copied());
  }

  /// Remove and return exactly `n` bytes from the front.
  pub fn consume_front(&mut self, n: usize) -> Result<Vec<u8>> {
    if n > self.bytes.len() {
      return Err(DeviceError::ReplyUnderflow {
        requested: n,
        available: self.bytes.len(),
      });
    }
    Ok(self.bytes.drain(..n).collect())
  }

  /// Contiguous view of the queued bytes.
  pub fn as_slice(&mut self) -> &[u8] {
    self.bytes.make_contiguous()
  }

  pub fn len(&self) -> usize {
    self.bytes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bytes.is_empty()
  }

  pub fn clear(&mut self) {
    self.bytes.clear();
  }
}

/// Result of one parse attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parsed {
  /// A complete frame was removed from the buffer.
  Frame { request: Request, consumed: usize },
  /// The leading magic matched no opcode; its 4 bytes were dropped.
  Skipped { magic: u32, consumed: usize },
  /// Not enough bytes yet. Nothing was consumed.
  Incomplete,
}

impl Parsed {
  pub fn consumed(&self) -> usize {
    match self {
      Parsed::Frame { consumed, .. } | Parsed::Skipped { consumed, .. } => *consumed,
      Parsed::Incomplete => 0,
    }
  }
}

/// Holds received bytes until a whole frame is available.
#[derive(Debug, Clone, Default)]
pub struct StreamAccumulator {
  buffer: ByteQueue,
}

impl StreamAccumulator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn feed(&mut self, bytes: &[u8]) {
    self.buffer.append(bytes);
  }

  pub fn pending(&self) -> usize {
    self.buffer.len()
  }

  /// Try to take exactly one frame off the head of the buffer.
  pub fn try_parse_one(&mut self) -> Parsed {
    let decoded = {
      let bytes = self.buffer.as_slice();
      decode_header(bytes).and_then(|opcode| decode_body(opcode, bytes))
    };

    match decoded {
      Ok((request, consumed)) => {
        self.discard(consumed);
        Parsed::Frame { request, consumed }
      },
      Err(DecodeError::NeedMoreData) => Parsed::Incomplete,
      Err(DecodeError::UnrecognizedOpcode(magic)) => {
        warn!("unrecognized magic_bytes {:#x}, dropping {} bytes", magic, MAGIC_SIZE);
        self.discard(MAGIC_SIZE);
        Parsed::Skipped {
          magic,
          consumed: MAGIC_SIZE,
        }
      },
    }
  }

  pub fn clear(&mut self) {
    self.buffer.clear();
  }

  fn discard(&mut self, n: usize) {
    // n never exceeds what decode just looked at
    let _ = self.buffer.consume_front(n);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::server::socket::protocol::FRAME_SIZE;

  #[test]
  fn consume_front_takes_exact_prefix() {
    let mut q = ByteQueue::new();
    q.append(&[1, 2, 3, 4, 5]);
    assert_eq!(q.consume_front(2).unwrap(), vec![1, 2]);
    assert_eq!(q.consume_front(3).unwrap(), vec![3, 4, 5]);
    assert!(q.is_empty());
  }

  #[test]
  fn consume_front_underflow_keeps_bytes() {
    let mut q = ByteQueue::new();
    q.append(&[9, 9]);
    match q.consume_front(3) {
      Err(DeviceError::ReplyUnderflow { requested, available }) => {
        assert_eq!((requested, available), (3, 2));
      },
      other => panic!("expected underflow, got {:?}", other),
    }
    assert_eq!(q.len(), 2);
  }

  #[test]
  fn partial_frame_stays_buffered() {
    let frame = Request::ReadReg { addr: 4, reserved: 0 }.to_bytes();
    let mut acc = StreamAccumulator::new();
    acc.feed(&frame[..7]);
    assert_eq!(acc.try_parse_one(), Parsed::Incomplete);
    assert_eq!(acc.pending(), 7);
    acc.feed(&frame[7..]);
    assert_eq!(
      acc.try_parse_one(),
      Parsed::Frame {
        request: Request::ReadReg { addr: 4, reserved: 0 },
        consumed: FRAME_SIZE
      }
    );
    assert_eq!(acc.pending(), 0);
  }

  #[test]
  fn one_frame_per_call() {
    let mut acc = StreamAccumulator::new();
    acc.feed(&Request::WriteReg { addr: 0, data: 1 }.to_bytes());
    acc.feed(&Request::WriteReg { addr: 4, data: 2 }.to_bytes());
    assert_eq!(acc.try_parse_one().consumed(), FRAME_SIZE);
    assert_eq!(acc.pending(), FRAME_SIZE);
    assert!(matches!(
      acc.try_parse_one(),
      Parsed::Frame {
        request: Request::WriteReg { addr: 4, data: 2 },
        ..
      }
    ));
    assert_eq!(acc.try_parse_one(), Parsed::Incomplete);
  }

  #[test]
  fn unknown_magic_is_skipped_and_stream_recovers() {
    let mut acc = StreamAccumulator::new();
    acc.feed(&0xDEAD_BEEFu32.to_le_bytes());
    acc.feed(&Request::ReadReg { addr: 8, reserved: 0 }.to_bytes());
    assert_eq!(
      acc.try_parse_one(),
      Parsed::Skipped {
        magic: 0xDEAD_BEEF,
        consumed: MAGIC_SIZE
      }
    );
    assert!(matches!(acc.try_parse_one(), Parsed::Frame { .. }));
  }
}
