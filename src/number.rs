use std::fmt::Display;

/// Secondary code that matches every sub-call of a multiplexed syscall
/// without an explicit entry of its own.
pub const CATCH_ALL_SECONDARY: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SyscallNumber {
  pub primary: u32,
  pub secondary: u32,
}

impl SyscallNumber {
  pub const fn new(primary: u32, secondary: u32) -> Self {
    Self { primary, secondary }
  }

  pub const fn primary(primary: u32) -> Self {
    Self::new(primary, 0)
  }

  pub const fn catch_all(primary: u32) -> Self {
    Self::new(primary, CATCH_ALL_SECONDARY)
  }

  pub fn is_catch_all(&self) -> bool {
    self.secondary == CATCH_ALL_SECONDARY
  }

  pub fn with_secondary(self, secondary: u32) -> Self {
    Self::new(self.primary, secondary)
  }
}

impl From<u32> for SyscallNumber {
  fn from(primary: u32) -> Self {
    Self::primary(primary)
  }
}

impl Display for SyscallNumber {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.secondary {
      0 => write!(f, "{}", self.primary),
      CATCH_ALL_SECONDARY => write!(f, "{}.*", self.primary),
      secondary => write!(f, "{}.{:#x}", self.primary, secondary),
    }
  }
}
