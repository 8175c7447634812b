use crate::types::WORD_SIZE;

/// Where the value of a syscall argument lives before the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgLocation {
  /// The n-th syscall argument register.
  Register(usize),
  /// A byte range on the application stack.
  Stack { addr: u64, size: usize },
}

/// Answers questions about the memory-safety state of application memory.
pub trait ShadowOracle {
  fn is_byte_addressable(&self, addr: u64) -> bool;

  fn is_byte_defined(&self, addr: u64) -> bool;

  fn is_byte_undefined(&self, addr: u64) -> bool {
    self.is_byte_addressable(addr) && !self.is_byte_defined(addr)
  }

  fn is_register_defined(&self, _ordinal: usize) -> bool {
    true
  }
}

/// The instrumented process, as seen from inside a syscall hook.
pub trait Host {
  /// The raw value of argument `ordinal`, if it can be read.
  fn read_argument(&self, ordinal: usize) -> Option<u64>;

  fn result_register(&self) -> u64;

  /// Fills `buf` from application memory at `addr`; false on any fault.
  fn safe_read(&self, addr: u64, buf: &mut [u8]) -> bool;

  fn safe_write(&self, addr: u64, buf: &[u8]) -> bool;

  fn argument_location(&self, ordinal: usize) -> ArgLocation {
    ArgLocation::Register(ordinal)
  }

  fn shadow(&self) -> Option<&dyn ShadowOracle> {
    None
  }
}

/// Shadow queries with the fallbacks used when no oracle is attached.
pub(crate) struct Shadow<'a> {
  oracle: Option<&'a dyn ShadowOracle>,
}

impl<'a> Shadow<'a> {
  pub fn of(host: &'a dyn Host) -> Self {
    Self {
      oracle: host.shadow(),
    }
  }

  pub fn is_addressable(&self, addr: u64) -> bool {
    self.oracle.map_or(true, |o| o.is_byte_addressable(addr))
  }

  pub fn is_defined(&self, addr: u64) -> bool {
    self.oracle.map_or(true, |o| o.is_byte_defined(addr))
  }

  pub fn is_undefined(&self, addr: u64) -> bool {
    self.oracle.map_or(false, |o| o.is_byte_undefined(addr))
  }

  pub fn is_location_defined(&self, location: ArgLocation) -> bool {
    match location {
      ArgLocation::Register(ordinal) => self.oracle.map_or(true, |o| o.is_register_defined(ordinal)),
      ArgLocation::Stack { addr, size } => (0..size as u64).all(|i| self.is_defined(addr.wrapping_add(i))),
    }
  }
}

pub(crate) fn read_u32(host: &dyn Host, addr: u64) -> Option<u32> {
  let mut buf = [0u8; 4];
  host.safe_read(addr, &mut buf).then(|| u32::from_ne_bytes(buf))
}

pub(crate) fn read_u16(host: &dyn Host, addr: u64) -> Option<u16> {
  let mut buf = [0u8; 2];
  host.safe_read(addr, &mut buf).then(|| u16::from_ne_bytes(buf))
}

pub(crate) fn read_word(host: &dyn Host, addr: u64) -> Option<u64> {
  let mut buf = [0u8; WORD_SIZE];
  host.safe_read(addr, &mut buf).then(|| u64::from_ne_bytes(buf))
}

/// Reads an unsigned integer of `width` bytes (1, 2, 4 or 8).
pub(crate) fn read_uint(host: &dyn Host, addr: u64, width: u64) -> Option<u64> {
  match width {
    1 => {
      let mut buf = [0u8; 1];
      host.safe_read(addr, &mut buf).then(|| buf[0] as u64)
    }
    2 => read_u16(host, addr).map(u64::from),
    4 => read_u32(host, addr).map(u64::from),
    _ => read_word(host, addr),
  }
}
