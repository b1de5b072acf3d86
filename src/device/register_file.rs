/// Emulated register space of the device
use crate::server::socket::protocol::INVALID_READ;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 稀疏寄存器文件：字地址 -> 32位值
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFile {
  regs: BTreeMap<u32, u32>,
}

impl RegisterFile {
  pub fn new() -> Self {
    Self::default()
  }

  /// Byte address to register index. Misaligned addresses are truncated.
  pub fn word_address(addr: u32) -> u32 {
    addr / 4
  }

  /// 按字节地址写入
  pub fn write(&mut self, addr: u32, data: u32) {
    self.regs.insert(Self::word_address(addr), data);
  }

  /// 按字节地址读取，未写过的地址返回 INVALID_READ
  pub fn read(&self, addr: u32) -> i32 {
    self
      .get(Self::word_address(addr))
      .map_or(INVALID_READ, |value| value as i32)
  }

  /// Raw lookup by word address.
  pub fn get(&self, word: u32) -> Option<u32> {
    self.regs.get(&word).copied()
  }

  pub fn len(&self) -> usize {
    self.regs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.regs.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
    self.regs.iter().map(|(word, value)| (*word, *value))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unwritten_reads_sentinel() {
    let regs = RegisterFile::new();
    assert_eq!(regs.read(0), INVALID_READ);
    assert_eq!(regs.read(9336936 + 8), INVALID_READ);
    assert!(regs.is_empty());
  }

  #[test]
  fn write_then_read() {
    let mut regs = RegisterFile::new();
    regs.write(400, 10);
    assert_eq!(regs.read(400), 10);
    assert_eq!(regs.get(100), Some(10));
  }

  #[test]
  fn misaligned_address_truncates() {
    let mut regs = RegisterFile::new();
    regs.write(403, 7);
    assert_eq!(regs.read(400), 7);
    assert_eq!(regs.len(), 1);
  }

  #[test]
  fn writing_sentinel_bit_pattern_still_stores_entry() {
    let mut regs = RegisterFile::new();
    regs.write(8, INVALID_READ as u32);
    assert_eq!(regs.get(2), Some(INVALID_READ as u32));
    assert_eq!(regs.len(), 1);
  }
}
