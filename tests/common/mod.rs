#![allow(dead_code)]

use std::{
  cell::{Cell, RefCell},
  collections::{BTreeMap, HashSet},
};

use syscall_memargs::{Host, ShadowOracle, MAX_ARGS};

pub fn init_logging() {
  let _ = env_logger::builder().is_test(true).try_init();
}

/// An application address space held in a map, one entry per mapped byte.
#[derive(Default)]
pub struct FakeHost {
  memory: RefCell<BTreeMap<u64, u8>>,
  undefined: RefCell<HashSet<u64>>,
  read_only: HashSet<u64>,
  args: [Option<u64>; MAX_ARGS],
  result: Cell<u64>,
  with_shadow: bool,
}

impl FakeHost {
  pub fn new(args: &[u64]) -> Self {
    let mut host = Self::default();
    for (slot, value) in host.args.iter_mut().zip(args) {
      *slot = Some(*value);
    }
    host
  }

  /// Answers shadow queries from the mapped and undefined bytes.
  pub fn with_shadow(mut self) -> Self {
    self.with_shadow = true;
    self
  }

  pub fn map(self, addr: u64, bytes: &[u8]) -> Self {
    self.poke(addr, bytes);
    self
  }

  pub fn map_zeroed(self, addr: u64, len: usize) -> Self {
    self.map(addr, &vec![0; len])
  }

  pub fn map_u32(self, addr: u64, value: u32) -> Self {
    self.map(addr, &value.to_ne_bytes())
  }

  pub fn map_u64(self, addr: u64, value: u64) -> Self {
    self.map(addr, &value.to_ne_bytes())
  }

  pub fn undefined(self, addr: u64, len: usize) -> Self {
    self
      .undefined
      .borrow_mut()
      .extend((0..len as u64).map(|i| addr + i));
    self
  }

  pub fn read_only(mut self, addr: u64, len: usize) -> Self {
    self.read_only.extend((0..len as u64).map(|i| addr + i));
    self
  }

  /// Writes as the kernel would, bypassing the read-only set.
  pub fn poke(&self, addr: u64, bytes: &[u8]) {
    let mut memory = self.memory.borrow_mut();
    for (i, b) in bytes.iter().enumerate() {
      memory.insert(addr + i as u64, *b);
    }
  }

  pub fn peek(&self, addr: u64, len: usize) -> Vec<u8> {
    let memory = self.memory.borrow();
    (0..len as u64).map(|i| memory[&(addr + i)]).collect()
  }

  pub fn set_result(&self, result: u64) {
    self.result.set(result);
  }
}

impl Host for FakeHost {
  fn read_argument(&self, ordinal: usize) -> Option<u64> {
    self.args.get(ordinal).copied().flatten()
  }

  fn result_register(&self) -> u64 {
    self.result.get()
  }

  fn safe_read(&self, addr: u64, buf: &mut [u8]) -> bool {
    let memory = self.memory.borrow();
    for (i, byte) in buf.iter_mut().enumerate() {
      match memory.get(&(addr + i as u64)) {
        Some(b) => *byte = *b,
        None => return false,
      }
    }
    true
  }

  fn safe_write(&self, addr: u64, buf: &[u8]) -> bool {
    let range = addr..addr + buf.len() as u64;
    let writable = {
      let memory = self.memory.borrow();
      range
        .clone()
        .all(|a| memory.contains_key(&a) && !self.read_only.contains(&a))
    };
    if writable {
      self.poke(addr, buf);
    }
    writable
  }

  fn shadow(&self) -> Option<&dyn ShadowOracle> {
    if self.with_shadow {
      Some(self)
    } else {
      None
    }
  }
}

impl ShadowOracle for FakeHost {
  fn is_byte_addressable(&self, addr: u64) -> bool {
    self.memory.borrow().contains_key(&addr)
  }

  fn is_byte_defined(&self, addr: u64) -> bool {
    self.is_byte_addressable(addr) && !self.undefined.borrow().contains(&addr)
  }
}
