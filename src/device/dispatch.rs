/// Routes decoded requests to their handlers
use super::register_file::RegisterFile;
use crate::server::socket::protocol::{Reply, Request};
use log::debug;

pub struct Dispatcher {
  /// Contents returned by READ_BUFFER.
  sample_buffer: Vec<u8>,
}

impl Dispatcher {
  pub fn new(max_samples: usize) -> Self {
    Self {
      sample_buffer: vec![0; max_samples],
    }
  }

  pub fn buffer_len(&self) -> usize {
    self.sample_buffer.len()
  }

  pub fn dispatch(&self, regs: &mut RegisterFile, request: &Request) -> Option<Reply> {
    match *request {
      Request::WriteReg { addr, data } => {
        debug!("WRITE_REG addr={:#x} data={:#x}", addr, data);
        regs.write(addr, data);
        None
      },
      Request::ReadReg { addr, .. } => {
        let value = regs.read(addr);
        debug!("READ_REG addr={:#x} -> {}", addr, value);
        Some(Reply::Register(value))
      },
      Request::ReadBuffer { .. } => {
        debug!("READ_BUFFER -> {} bytes", self.sample_buffer.len());
        Some(Reply::Buffer(self.sample_buffer.clone()))
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::server::socket::protocol::INVALID_READ;

  #[test]
  fn write_reg_has_no_reply() {
    let d = Dispatcher::new(16);
    let mut regs = RegisterFile::new();
    assert_eq!(d.dispatch(&mut regs, &Request::WriteReg { addr: 400, data: 10 }), None);
    assert_eq!(regs.read(400), 10);
  }

  #[test]
  fn read_reg_hit_and_miss() {
    let d = Dispatcher::new(16);
    let mut regs = RegisterFile::new();
    regs.write(12, 0xFFFF_FFFF);
    assert_eq!(
      d.dispatch(&mut regs, &Request::ReadReg { addr: 12, reserved: 0 }),
      Some(Reply::Register(-1))
    );
    assert_eq!(
      d.dispatch(&mut regs, &Request::ReadReg { addr: 16, reserved: 0 }),
      Some(Reply::Register(INVALID_READ))
    );
  }

  #[test]
  fn read_buffer_ignores_registers() {
    let d = Dispatcher::new(32);
    let mut regs = RegisterFile::new();
    regs.write(0, 5);
    let reply = d.dispatch(
      &mut regs,
      &Request::ReadBuffer {
        addr: 0,
        number_of_points: 3,
      },
    );
    assert_eq!(reply, Some(Reply::Buffer(vec![0; 32])));
  }
}
