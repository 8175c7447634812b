use std::mem::size_of;

use syscall_memargs_macros::gen_syscall_table;

use crate::{
  descriptor::{fd_req, mem, syscall_flags, ArgFlags::*, Param, SyscallDescriptor},
  number::SyscallNumber,
  syscalls::SYS_ioctl,
  types::{ParamType as T, ReturnType},
};

/// Kernel `struct termios`, without the speed fields of the libc one.
pub(crate) const KERNEL_TERMIOS_SIZE: usize = 36;
pub(crate) const WINSIZE_SIZE: usize = 8;
pub(crate) const IFREQ_SIZE: usize = 40;

gen_syscall_table! {
  fn linux_ioctls for SYS_ioctl as "ioctl";

  TCGETS (fd, request, argp) { fd_req(fd, request), mem(argp, KERNEL_TERMIOS_SIZE, Write) } -> Long
    for code 0x5401,
  TCSETS (fd, request, argp) { fd_req(fd, request), mem(argp, KERNEL_TERMIOS_SIZE, Read) } -> Long
    for code 0x5402,
  TCSETSW (fd, request, argp) { fd_req(fd, request), mem(argp, KERNEL_TERMIOS_SIZE, Read) } -> Long
    for code 0x5403,
  TCSETSF (fd, request, argp) { fd_req(fd, request), mem(argp, KERNEL_TERMIOS_SIZE, Read) } -> Long
    for code 0x5404,
  TIOCGPGRP (fd, request, argp) {
    fd_req(fd, request),
    mem(argp, size_of::<i32>(), Write).typed(T::Int)
  } -> Long for code 0x540F,
  TIOCSPGRP (fd, request, argp) {
    fd_req(fd, request),
    mem(argp, size_of::<i32>(), Read).typed(T::Int)
  } -> Long for code 0x5410,
  TIOCOUTQ (fd, request, argp) {
    fd_req(fd, request),
    mem(argp, size_of::<i32>(), Write).typed(T::Int)
  } -> Long for code 0x5411,
  TIOCGWINSZ (fd, request, argp) { fd_req(fd, request), mem(argp, WINSIZE_SIZE, Write) } -> Long
    for code 0x5413,
  TIOCSWINSZ (fd, request, argp) { fd_req(fd, request), mem(argp, WINSIZE_SIZE, Read) } -> Long
    for code 0x5414,
  FIONREAD (fd, request, argp) {
    fd_req(fd, request),
    mem(argp, size_of::<i32>(), Write).typed(T::Int)
  } -> Long for code 0x541B,
  FIONBIO (fd, request, argp) {
    fd_req(fd, request),
    mem(argp, size_of::<i32>(), Read).typed(T::Int)
  } -> Long for code 0x5421,
  FIONCLEX (fd, request) { fd_req(fd, request) } -> Long
    for code 0x5450,
  FIOCLEX (fd, request) { fd_req(fd, request) } -> Long
    for code 0x5451,
  FIOASYNC (fd, request, argp) {
    fd_req(fd, request),
    mem(argp, size_of::<i32>(), Read).typed(T::Int)
  } -> Long for code 0x5452,
  SIOCGIFFLAGS (fd, request, argp) { fd_req(fd, request), mem(argp, IFREQ_SIZE, Read | Write) } -> Long
    for code 0x8913,
  SIOCGIFINDEX (fd, request, argp) { fd_req(fd, request), mem(argp, IFREQ_SIZE, Read | Write) } -> Long
    for code 0x8933,
  TIOCGPTN (fd, request, argp) {
    fd_req(fd, request),
    mem(argp, size_of::<u32>(), Write).typed(T::UnsignedInt)
  } -> Long for code 0x80045430,
  TIOCSPTLCK (fd, request, argp) {
    fd_req(fd, request),
    mem(argp, size_of::<i32>(), Read).typed(T::Int)
  } -> Long for code 0x40045431,
}

/// Entry for ioctl requests without a table entry: the descriptor and
/// request are known, the memory behind the third argument is not.
pub(crate) fn ioctl_catch_all() -> SyscallDescriptor {
  let [fd, request] = fd_req(Param(0), Param(1));
  SyscallDescriptor::new(
    SyscallNumber::catch_all(SYS_ioctl),
    "ioctl",
    3,
    vec![fd, request],
    ReturnType::Long,
    syscall_flags(&[]),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::descriptor::SizeRule;

  #[test]
  fn requests_are_secondary_numbers_of_ioctl() {
    let table = linux_ioctls();
    let tcgets = table.iter().find(|d| d.name == "ioctl.TCGETS").unwrap();
    assert_eq!(tcgets.number, SyscallNumber::new(SYS_ioctl, IOCTL_TCGETS));
    assert_eq!(tcgets.args.len(), 3);
    assert_eq!(tcgets.args[2].size, SizeRule::Fixed(KERNEL_TERMIOS_SIZE as u64));
    assert!(tcgets.args[2].is_write());
    assert!(tcgets.all_params_known());
  }

  #[test]
  fn catch_all_describes_nothing_behind_argp() {
    let catch_all = ioctl_catch_all();
    assert!(catch_all.number.is_catch_all());
    assert!(!catch_all.all_params_known());
    assert!(catch_all.args.iter().all(|arg| arg.is_inlined()));
  }
}
