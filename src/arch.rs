//! Where the syscall number, arguments and result live in the register file.

cfg_if::cfg_if! {
  if #[cfg(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "riscv64"))] {
    pub type PtraceRegisters = nix::libc::user_regs_struct;
  } else {
    compile_error!("Unsupported architecture");
  }
}

#[cfg(target_arch = "x86_64")]
macro_rules! syscall_no_from_regs {
  ($regs:expr) => {
    $regs.orig_rax
  };
}

#[cfg(target_arch = "aarch64")]
macro_rules! syscall_no_from_regs {
  ($regs:expr) => {
    $regs.regs[8]
  };
}

#[cfg(target_arch = "riscv64")]
macro_rules! syscall_no_from_regs {
  ($regs:expr) => {
    $regs.a7
  };
}

#[cfg(target_arch = "x86_64")]
macro_rules! syscall_res_from_regs {
  ($regs:expr) => {
    $regs.rax
  };
}

#[cfg(target_arch = "aarch64")]
macro_rules! syscall_res_from_regs {
  ($regs:expr) => {
    $regs.regs[0]
  };
}

#[cfg(target_arch = "riscv64")]
macro_rules! syscall_res_from_regs {
  ($regs:expr) => {
    $regs.a0
  };
}

#[cfg(target_arch = "x86_64")]
macro_rules! syscall_arg {
  ($regs:expr, 0) => { $regs.rdi };
  ($regs:expr, 1) => { $regs.rsi };
  ($regs:expr, 2) => { $regs.rdx };
  ($regs:expr, 3) => { $regs.r10 };
  ($regs:expr, 4) => { $regs.r8 };
  ($regs:expr, 5) => { $regs.r9 };
}

#[cfg(target_arch = "aarch64")]
macro_rules! syscall_arg {
  ($regs:expr, $i:literal) => {
    $regs.regs[$i]
  };
}

#[cfg(target_arch = "riscv64")]
macro_rules! syscall_arg {
  ($regs:expr, 0) => { $regs.a0 };
  ($regs:expr, 1) => { $regs.a1 };
  ($regs:expr, 2) => { $regs.a2 };
  ($regs:expr, 3) => { $regs.a3 };
  ($regs:expr, 4) => { $regs.a4 };
  ($regs:expr, 5) => { $regs.a5 };
}

pub(crate) use {syscall_no_from_regs, syscall_res_from_regs};

/// Argument `ordinal` as captured in `regs`.
pub(crate) fn arg_from_regs(regs: &PtraceRegisters, ordinal: usize) -> Option<u64> {
  let value = match ordinal {
    0 => syscall_arg!(regs, 0),
    1 => syscall_arg!(regs, 1),
    2 => syscall_arg!(regs, 2),
    3 => syscall_arg!(regs, 3),
    4 => syscall_arg!(regs, 4),
    5 => syscall_arg!(regs, 5),
    _ => return None,
  };
  Some(value as u64)
}
