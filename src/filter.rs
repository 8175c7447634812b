use std::{
  collections::HashSet,
  sync::atomic::{AtomicBool, Ordering},
};

use log::trace;
use parking_lot::RwLock;

/// The set of primary syscall numbers the consumer wants to see.
#[derive(Debug, Default)]
pub struct SyscallFilter {
  numbers: RwLock<HashSet<u32>>,
  all: AtomicBool,
}

impl SyscallFilter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn filter(&self, primary: u32) {
    trace!("filtering syscall {primary}");
    self.numbers.write().insert(primary);
  }

  pub fn filter_all(&self) {
    self.all.store(true, Ordering::Release);
  }

  pub fn is_filtered(&self, primary: u32) -> bool {
    self.all.load(Ordering::Acquire) || self.numbers.read_recursive().contains(&primary)
  }
}
