/// Mock of the monitor-tcp device server
use super::dispatch::Dispatcher;
use super::register_file::RegisterFile;
use super::stream::{ByteQueue, Parsed, StreamAccumulator};
use crate::error::{DeviceError, Result};
use crate::server::socket::protocol::{encode_reply, MAX_SAMPLES_READ_BUFFER};
use crate::server::socket::transport::Transport;
use crate::utils::trace::TraceWriter;
use log::{debug, info};
use std::thread;
use std::time::Duration;

/// 设备配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceConfig {
  /// READ_BUFFER 回复长度（字节）
  pub max_samples: usize,
  /// 回复前的人为延迟
  pub reply_latency: Duration,
}

impl Default for DeviceConfig {
  fn default() -> Self {
    Self {
      max_samples: MAX_SAMPLES_READ_BUFFER,
      reply_latency: Duration::ZERO,
    }
  }
}

pub struct MockDevice {
  regs: RegisterFile,
  accumulator: StreamAccumulator,
  dispatcher: Dispatcher,
  replies: ByteQueue,
  reply_latency: Duration,
  trace: Option<TraceWriter>,
}

impl MockDevice {
  pub fn new(config: DeviceConfig) -> Self {
    Self {
      regs: RegisterFile::new(),
      accumulator: StreamAccumulator::new(),
      dispatcher: Dispatcher::new(config.max_samples),
      replies: ByteQueue::new(),
      reply_latency: config.reply_latency,
      trace: None,
    }
  }

  pub fn with_trace(mut self, trace: TraceWriter) -> Self {
    self.trace = Some(trace);
    self
  }

  pub fn registers(&self) -> &RegisterFile {
    &self.regs
  }

  pub fn reply_latency(&self) -> Duration {
    self.reply_latency
  }

  pub fn set_reply_latency(&mut self, latency: Duration) {
    info!("reply latency set to {:.3}s", latency.as_secs_f64());
    self.reply_latency = latency;
  }

  pub fn buffer_len(&self) -> usize {
    self.dispatcher.buffer_len()
  }

  /// Bytes received but not yet parsed.
  pub fn pending(&self) -> usize {
    self.accumulator.pending()
  }

  /// Bytes queued for `read_reply`.
  pub fn queued_reply_len(&self) -> usize {
    self.replies.len()
  }

  pub fn feed(&mut self, bytes: &[u8]) {
    self.accumulator.feed(bytes);
  }

  /// Parse at most one frame from the stream buffer and dispatch it.
  /// Returns the encoded reply, if any, and the number of bytes consumed.
  pub fn try_parse_one(&mut self) -> (Option<Vec<u8>>, usize) {
    match self.accumulator.try_parse_one() {
      Parsed::Frame { request, consumed } => {
        let reply = self.dispatcher.dispatch(&mut self.regs, &request);
        if let Some(trace) = self.trace.as_mut() {
          trace.record(&request, reply.as_ref());
        }
        debug!(
          "try_parse_one(): {} consumed={} reply={}",
          request.opcode(),
          consumed,
          reply.as_ref().map_or(0, |r| r.len())
        );
        // a zero-length sample buffer puts nothing on the wire
        (reply.filter(|r| !r.is_empty()).as_ref().map(encode_reply), consumed)
      },
      parsed @ Parsed::Skipped { .. } => (None, parsed.consumed()),
      Parsed::Incomplete => (None, 0),
    }
  }

  // ---------------------------------
  // direct call mode
  // ---------------------------------

  /// Feed request bytes and handle every complete frame now buffered.
  /// Replies go to the reply queue; no latency is applied.
  pub fn send_request(&mut self, bytes: &[u8]) {
    self.feed(bytes);
    loop {
      let (reply, consumed) = self.try_parse_one();
      if let Some(reply) = reply {
        self.replies.append(&reply);
      }
      if consumed == 0 {
        break;
      }
    }
  }

  /// Take exactly `n` reply bytes. Fails if fewer are queued.
  pub fn read_reply(&mut self, n: usize) -> Result<Vec<u8>> {
    self.replies.consume_front(n)
  }

  // ---------------------------------
  // transport-backed mode
  // ---------------------------------

  /// Pull what the transport has and parse one frame. Returns the encoded
  /// reply, if the frame produced one, without sending it.
  ///
  /// When the peer has hung up, every complete frame still buffered is
  /// dispatched (their replies are dropped) before `Disconnected` is returned.
  pub fn receive_once(&mut self, transport: &mut dyn Transport) -> Result<Option<Vec<u8>>> {
    let incoming = match transport.deliver() {
      Ok(bytes) => bytes,
      Err(DeviceError::Disconnected) => {
        self.drain_orphaned();
        return Err(DeviceError::Disconnected);
      },
      Err(e) => return Err(e),
    };
    if !incoming.is_empty() {
      self.feed(&incoming);
    }

    let (reply, _) = self.try_parse_one();
    Ok(reply)
  }

  /// One service round: `receive_once`, then after `reply_latency` send
  /// the reply back. Returns the reply size.
  pub fn serve_once(&mut self, transport: &mut dyn Transport) -> Result<usize> {
    let Some(reply) = self.receive_once(transport)? else {
      return Ok(0);
    };

    debug!("sending {} bytes after {:.3}s", reply.len(), self.reply_latency.as_secs_f64());
    if !self.reply_latency.is_zero() {
      thread::sleep(self.reply_latency);
    }
    transport.send(&reply)?;
    Ok(reply.len())
  }

  fn drain_orphaned(&mut self) {
    loop {
      let (reply, consumed) = self.try_parse_one();
      if consumed == 0 {
        break;
      }
      if let Some(reply) = reply {
        debug!("peer gone, dropping {} byte reply", reply.len());
      }
    }
  }

  /// Forget bytes of a half-received frame, e.g. after the peer went away.
  pub fn reset_stream(&mut self) {
    self.accumulator.clear();
  }
}

impl Default for MockDevice {
  fn default() -> Self {
    Self::new(DeviceConfig::default())
  }
}
