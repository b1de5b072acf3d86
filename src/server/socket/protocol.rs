/// Wire format shared by the mock device and the client driver.
/// Matches the packed C structures in monitor-tcp's packets.h.

// Socket configuration
pub const SOCKET_PORT: u16 = 5000;
pub const SOCKET_HOST: &str = "127.0.0.1";

/// Every frame starts with a 4-byte magic value.
pub const MAGIC_SIZE: usize = 4;

/// WRITE_REG, READ_REG and READ_BUFFER frames are all three words long.
pub const FRAME_SIZE: usize = 12;

/// Size of a READ_REG reply.
pub const REG_REPLY_SIZE: usize = 4;

/// Value returned for registers that were never written.
pub const INVALID_READ: i32 = -1111;

/// Default length in bytes of the READ_BUFFER reply.
pub const MAX_SAMPLES_READ_BUFFER: usize = 1 << 14;

// Message types
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
  WriteReg = 0xABCD_1233,
  ReadReg = 0xABCD_1234,
  ReadBuffer = 0xABCD_1235,
}

impl Opcode {
  pub fn from_magic(magic: u32) -> Option<Self> {
    match magic {
      0xABCD_1233 => Some(Opcode::WriteReg),
      0xABCD_1234 => Some(Opcode::ReadReg),
      0xABCD_1235 => Some(Opcode::ReadBuffer),
      _ => None,
    }
  }

  pub fn magic(self) -> u32 {
    self as u32
  }

  /// Total frame length, magic included.
  pub fn frame_size(self) -> usize {
    match self {
      Opcode::WriteReg | Opcode::ReadReg | Opcode::ReadBuffer => FRAME_SIZE,
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      Opcode::WriteReg => "WRITE_REG",
      Opcode::ReadReg => "READ_REG",
      Opcode::ReadBuffer => "READ_BUFFER",
    }
  }
}

impl std::fmt::Display for Opcode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.name())
  }
}

/// A decoded request frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
  WriteReg { addr: u32, data: u32 },
  ReadReg { addr: u32, reserved: u32 },
  ReadBuffer { addr: u32, number_of_points: u32 },
}

impl Request {
  pub fn opcode(&self) -> Opcode {
    match self {
      Request::WriteReg { .. } => Opcode::WriteReg,
      Request::ReadReg { .. } => Opcode::ReadReg,
      Request::ReadBuffer { .. } => Opcode::ReadBuffer,
    }
  }

  /// Byte address carried by the frame.
  pub fn addr(&self) -> u32 {
    match *self {
      Request::WriteReg { addr, .. } | Request::ReadReg { addr, .. } | Request::ReadBuffer { addr, .. } => addr,
    }
  }

  /// Serialize to raw bytes (little-endian)
  pub fn to_bytes(&self) -> [u8; FRAME_SIZE] {
    let (second, third) = match *self {
      Request::WriteReg { addr, data } => (addr, data),
      Request::ReadReg { addr, reserved } => (addr, reserved),
      Request::ReadBuffer { addr, number_of_points } => (addr, number_of_points),
    };
    let mut bytes = [0u8; FRAME_SIZE];
    bytes[0..4].copy_from_slice(&self.opcode().magic().to_le_bytes());
    bytes[4..8].copy_from_slice(&second.to_le_bytes());
    bytes[8..12].copy_from_slice(&third.to_le_bytes());
    bytes
  }
}

/// A reply produced by the device for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
  Register(i32),
  Buffer(Vec<u8>),
}

impl Reply {
  pub fn len(&self) -> usize {
    match self {
      Reply::Register(_) => REG_REPLY_SIZE,
      Reply::Buffer(data) => data.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
  /// Not enough bytes buffered yet; nothing was consumed.
  NeedMoreData,
  UnrecognizedOpcode(u32),
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
  u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

/// Identify the frame at the head of `bytes`. Only the magic is inspected.
pub fn decode_header(bytes: &[u8]) -> Result<Opcode, DecodeError> {
  if bytes.len() < MAGIC_SIZE {
    return Err(DecodeError::NeedMoreData);
  }
  let magic = read_u32(bytes, 0);
  Opcode::from_magic(magic).ok_or(DecodeError::UnrecognizedOpcode(magic))
}

/// Decode the full frame for `opcode`, returning the request and the number
/// of bytes it occupies.
pub fn decode_body(opcode: Opcode, bytes: &[u8]) -> Result<(Request, usize), DecodeError> {
  let size = opcode.frame_size();
  if bytes.len() < size {
    return Err(DecodeError::NeedMoreData);
  }
  let addr = read_u32(bytes, 4);
  let third = read_u32(bytes, 8);
  let request = match opcode {
    Opcode::WriteReg => Request::WriteReg { addr, data: third },
    Opcode::ReadReg => Request::ReadReg { addr, reserved: third },
    Opcode::ReadBuffer => Request::ReadBuffer {
      addr,
      number_of_points: third,
    },
  };
  Ok((request, size))
}

/// Header then body in one step.
pub fn decode(bytes: &[u8]) -> Result<(Request, usize), DecodeError> {
  let opcode = decode_header(bytes)?;
  decode_body(opcode, bytes)
}

/// Convert a reply to raw bytes (little-endian)
pub fn encode_reply(reply: &Reply) -> Vec<u8> {
  match reply {
    Reply::Register(value) => value.to_le_bytes().to_vec(),
    Reply::Buffer(data) => data.clone(),
  }
}
