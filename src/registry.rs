use std::{collections::HashMap, sync::Arc};

use itertools::Itertools;
use log::{debug, trace};
use parking_lot::RwLock;

use crate::{
  descriptor::SyscallDescriptor,
  number::{SyscallNumber, CATCH_ALL_SECONDARY},
};

#[derive(Debug, Default)]
struct Tables {
  primary: HashMap<u32, Arc<SyscallDescriptor>>,
  secondary: HashMap<SyscallNumber, Arc<SyscallDescriptor>>,
  by_name: HashMap<String, Arc<SyscallDescriptor>>,
}

/// Maps syscall numbers to their descriptors.
///
/// Filled once while the engine is built, then only read.
#[derive(Debug, Default)]
pub struct Registry {
  tables: RwLock<Tables>,
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds a descriptor keyed on its primary number alone.
  pub(crate) fn register(&self, descriptor: SyscallDescriptor) {
    self.insert(descriptor, false)
  }

  /// Adds a sub-call of a multiplexed syscall, keyed on the full pair.
  ///
  /// Secondary code 0 is a valid key and never collides with the parent.
  pub(crate) fn register_secondary(&self, descriptor: SyscallDescriptor) {
    self.insert(descriptor, true)
  }

  pub(crate) fn register_all(&self, descriptors: impl IntoIterator<Item = SyscallDescriptor>) {
    for descriptor in descriptors {
      self.register(descriptor);
    }
  }

  pub(crate) fn register_all_secondary(&self, descriptors: impl IntoIterator<Item = SyscallDescriptor>) {
    for descriptor in descriptors {
      self.register_secondary(descriptor);
    }
  }

  fn insert(&self, descriptor: SyscallDescriptor, secondary: bool) {
    let descriptor = Arc::new(descriptor);
    let mut tables = self.tables.write();
    let number = descriptor.number;
    let replaced = if secondary {
      tables.secondary.insert(number, descriptor.clone())
    } else {
      tables.primary.insert(number.primary, descriptor.clone())
    };
    if let Some(replaced) = replaced {
      debug!("{} replaces descriptor {}", descriptor.name, replaced.name);
    }
    tables
      .by_name
      .entry(descriptor.name.clone())
      .or_insert(descriptor);
  }

  /// Finds the descriptor of `number`.
  ///
  /// With `resolve_secondary`, the full (primary, secondary) pair is tried
  /// first and the primary descriptor is the fallback.
  pub fn lookup(&self, number: SyscallNumber, resolve_secondary: bool) -> Option<Arc<SyscallDescriptor>> {
    let tables = self.tables.read_recursive();
    if resolve_secondary {
      if let Some(descriptor) = tables.secondary.get(&number) {
        return Some(descriptor.clone());
      }
    }
    tables.primary.get(&number.primary).cloned()
  }

  pub fn lookup_by_name(&self, name: &str) -> Option<Arc<SyscallDescriptor>> {
    self.tables.read_recursive().by_name.get(name).cloned()
  }

  /// Forms the full number of a multiplexed syscall from its code argument.
  ///
  /// An unregistered code resolves to the catch-all entry when one exists.
  pub fn resolve_multiplex(
    &self,
    primary: u32,
    read_param: impl FnOnce(usize) -> Option<u64>,
  ) -> SyscallNumber {
    let number = SyscallNumber::primary(primary);
    let Some(descriptor) = self.lookup(number, false) else {
      return number;
    };
    let Some(ordinal) = descriptor.code_ordinal() else {
      return number;
    };
    let Some(code) = read_param(ordinal) else {
      debug!("failed to read the code argument of {}", descriptor.name);
      return number;
    };
    let full = number.with_secondary(code as u32);
    let tables = self.tables.read_recursive();
    if tables.secondary.contains_key(&full) {
      trace!("{} resolved to {full}", descriptor.name);
      full
    } else if tables
      .secondary
      .contains_key(&number.with_secondary(CATCH_ALL_SECONDARY))
    {
      trace!("{} code {code:#x} resolved to the catch-all entry", descriptor.name);
      SyscallNumber::catch_all(primary)
    } else {
      full
    }
  }

  /// Visits every descriptor, primary table first, while holding the read lock.
  ///
  /// Visiting stops when `cb` returns `false`.
  pub fn iterate(&self, mut cb: impl FnMut(&SyscallDescriptor) -> bool) {
    let tables = self.tables.read_recursive();
    let primary = tables.primary.values().sorted_by_key(|d| d.number);
    let secondary = tables.secondary.values().sorted_by_key(|d| d.number);
    for descriptor in primary.chain(secondary) {
      if !cb(descriptor) {
        break;
      }
    }
  }

  pub fn len(&self) -> usize {
    let tables = self.tables.read_recursive();
    tables.primary.len() + tables.secondary.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
