use nix::unistd::{sysconf, SysconfVar};
use once_cell::sync::OnceCell;

use crate::{
  descriptor::{SyscallDescriptor, SyscallFlags},
  number::SyscallNumber,
};

static PAGE_SIZE: OnceCell<u64> = OnceCell::new();

pub fn page_size() -> u64 {
  *PAGE_SIZE.get_or_init(|| match sysconf(SysconfVar::PAGE_SIZE) {
    Ok(Some(size)) if size > 0 => size as u64,
    _ => 4096,
  })
}

/// A failed call that still filled the caller's buffer up to its capacity,
/// e.g. an error code meaning "buffer too small, here is what fits".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityRule {
  pub number: SyscallNumber,
  pub error_code: u64,
}

/// Platform-specific special cases of result interpretation.
#[derive(Debug, Clone)]
pub struct Policy {
  /// Syscalls returning an address, where only the top page of the range
  /// encodes an error.
  pub address_returning: Vec<SyscallNumber>,
  pub capacity_rules: Vec<CapacityRule>,
}

impl Default for Policy {
  fn default() -> Self {
    let mut address_returning = Vec::new();
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "riscv64"))]
    {
      address_returning.push(SyscallNumber::primary(crate::syscalls::SYS_mmap));
      address_returning.push(SyscallNumber::primary(crate::syscalls::SYS_mremap));
    }
    Self {
      address_returning,
      capacity_rules: Vec::new(),
    }
  }
}

impl Policy {
  pub fn with_capacity_rule(mut self, number: SyscallNumber, error_code: u64) -> Self {
    self.capacity_rules.push(CapacityRule { number, error_code });
    self
  }

  pub fn syscall_succeeded(&self, descriptor: Option<&SyscallDescriptor>, number: SyscallNumber, result: u64) -> bool {
    let signed = result as i64;
    if self.address_returning.contains(&number) {
      return signed >= 0 || signed < -(page_size() as i64);
    }
    if let Some(descriptor) = descriptor {
      if descriptor.flags.contains(SyscallFlags::RetZeroFail) {
        return result != 0;
      }
      if descriptor.flags.contains(SyscallFlags::RetMinus1Fail) {
        return signed != -1;
      }
    }
    signed >= 0
  }

  /// Whether a failed call with this result still wrote up to the buffer capacity.
  pub fn fills_capacity_on_failure(&self, number: SyscallNumber, result: u64) -> bool {
    let error_code = (result as i64).wrapping_neg() as u64;
    self
      .capacity_rules
      .iter()
      .any(|rule| rule.number == number && rule.error_code == error_code)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn negative_results_fail() {
    let policy = Policy::default();
    let number = SyscallNumber::primary(0);
    assert!(policy.syscall_succeeded(None, number, 42));
    assert!(policy.syscall_succeeded(None, number, 0));
    assert!(!policy.syscall_succeeded(None, number, (-14i64) as u64));
  }

  #[test]
  fn address_results_only_fail_in_the_top_page() {
    let number = SyscallNumber::primary(9999);
    let policy = Policy {
      address_returning: vec![number],
      capacity_rules: vec![],
    };
    let high_address = (-(page_size() as i64) - 4096) as u64;
    assert!(policy.syscall_succeeded(None, number, high_address));
    assert!(!policy.syscall_succeeded(None, number, (-12i64) as u64));
  }

  #[test]
  fn capacity_rules_match_number_and_error() {
    let number = SyscallNumber::primary(55);
    let policy = Policy::default().with_capacity_rule(number, 34);
    assert!(policy.fills_capacity_on_failure(number, (-34i64) as u64));
    assert!(!policy.fills_capacity_on_failure(number, (-22i64) as u64));
    assert!(!policy.fills_capacity_on_failure(SyscallNumber::primary(54), (-34i64) as u64));
  }
}
