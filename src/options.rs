/// Engine-wide knobs, fixed for the lifetime of an [`Engine`](crate::Engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
  /// Diff memory around pointer-like arguments of syscalls the tables do not describe.
  pub analyze_unknown_syscalls: bool,
  /// Write a sentinel over undefined bytes before an unknown syscall runs.
  pub syscall_sentinels: bool,
  /// Report detected writes as whole aligned dwords.
  pub syscall_dword_granularity: bool,
}

impl Default for Options {
  fn default() -> Self {
    Self {
      analyze_unknown_syscalls: true,
      syscall_sentinels: false,
      syscall_dword_granularity: true,
    }
  }
}

impl Options {
  pub fn analyze_unknown_syscalls(mut self, enabled: bool) -> Self {
    self.analyze_unknown_syscalls = enabled;
    self
  }

  pub fn syscall_sentinels(mut self, enabled: bool) -> Self {
    self.syscall_sentinels = enabled;
    self
  }

  pub fn syscall_dword_granularity(mut self, enabled: bool) -> Self {
    self.syscall_dword_granularity = enabled;
    self
  }
}
