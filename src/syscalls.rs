#![allow(non_upper_case_globals)]

use std::mem::size_of;

use nix::libc::{
  epoll_event, gid_t, pollfd, rlimit, rusage, sembuf, stat, sysinfo, timespec, timeval, utsname,
};
use syscall_memargs_macros::gen_syscall_table;

use crate::{
  descriptor::{cstring, code, inlined, mem, ArgFlags::*, Decoder as D, RET},
  types::ParamType as T,
};

/// Kernel `sigset_t`, as opposed to the much larger libc one.
pub(crate) const KERNEL_SIGSET_SIZE: usize = 8;
/// Kernel `struct sigaction`: handler, flags, restorer (where present) and mask.
pub(crate) const KERNEL_SIGACTION_SIZE: usize = if cfg!(target_arch = "riscv64") { 24 } else { 32 };
pub(crate) const IOVEC_SIZE: usize = 16;
pub(crate) const MSGHDR_SIZE: usize = 56;
pub(crate) const STATX_SIZE: usize = 256;
pub(crate) const TIMEZONE_SIZE: usize = 8;

gen_syscall_table! {
  fn linux_syscalls;

  read (fd, buf, count) { mem(buf, count, Write), mem(buf, RET, Write) } -> Long
    for [x86_64: 0, aarch64: 63, riscv64: 63],
  write (fd, buf, count) { mem(buf, count, Read) } -> Long
    for [x86_64: 1, aarch64: 64, riscv64: 64],
  open (pathname, flags, mode) { cstring(pathname) } -> Int
    for [x86_64: 2],
  close (fd) { } -> Int
    for [x86_64: 3, aarch64: 57, riscv64: 57],
  stat (pathname, statbuf) { cstring(pathname), mem(statbuf, size_of::<stat>(), Write) } -> Int
    for [x86_64: 4],
  fstat (fd, statbuf) { mem(statbuf, size_of::<stat>(), Write) } -> Int
    for [x86_64: 5, aarch64: 80, riscv64: 80],
  lstat (pathname, statbuf) { cstring(pathname), mem(statbuf, size_of::<stat>(), Write) } -> Int
    for [x86_64: 6],
  // the kernel reads fd and events of each pollfd and writes revents
  poll (fds, nfds, timeout) {
    mem(fds, nfds, Read | Write).elements(size_of::<pollfd>()).decoded(D::Pollfd),
    inlined(nfds, 8)
  } -> Int
    for [x86_64: 7],
  lseek (fd, offset, whence) { } -> Long
    for [x86_64: 8, aarch64: 62, riscv64: 62],
  mmap (addr, length, prot, flags, fd, offset) { } -> Pointer
    for [x86_64: 9, aarch64: 222, riscv64: 222],
  mprotect (addr, len, prot) { } -> Int
    for [x86_64: 10, aarch64: 226, riscv64: 226],
  munmap (addr, length) { } -> Int
    for [x86_64: 11, aarch64: 215, riscv64: 215],
  brk (addr) { } -> Pointer
    for [x86_64: 12, aarch64: 214, riscv64: 214],
  rt_sigaction (signum, act, oldact, sigsetsize) {
    mem(act, KERNEL_SIGACTION_SIZE, Read),
    mem(oldact, KERNEL_SIGACTION_SIZE, Write)
  } -> Int for [x86_64: 13, aarch64: 134, riscv64: 134],
  rt_sigprocmask (how, set, oldset, sigsetsize) {
    mem(set, KERNEL_SIGSET_SIZE, Read),
    mem(oldset, KERNEL_SIGSET_SIZE, Write)
  } -> Int for [x86_64: 14, aarch64: 135, riscv64: 135],
  ioctl (fd, request, argp) [Multiplexed] { code(request) } -> Long
    for [x86_64: 16, aarch64: 29, riscv64: 29],
  pread64 (fd, buf, count, offset) { mem(buf, count, Write), mem(buf, RET, Write) } -> Long
    for [x86_64: 17, aarch64: 67, riscv64: 67],
  pwrite64 (fd, buf, count, offset) { mem(buf, count, Read) } -> Long
    for [x86_64: 18, aarch64: 68, riscv64: 68],
  readv (fd, iov, iovcnt) {
    mem(iov, iovcnt, Write).elements(IOVEC_SIZE).decoded(D::Iovec)
  } -> Long for [x86_64: 19, aarch64: 65, riscv64: 65],
  writev (fd, iov, iovcnt) {
    mem(iov, iovcnt, Read).elements(IOVEC_SIZE).decoded(D::Iovec)
  } -> Long for [x86_64: 20, aarch64: 66, riscv64: 66],
  pipe (pipefd) { mem(pipefd, 2 * size_of::<i32>(), Write) } -> Int
    for [x86_64: 22],
  mremap (old_address, old_size, new_size, flags, new_address) { } -> Pointer
    for [x86_64: 25, aarch64: 216, riscv64: 216],
  nanosleep (req, rem) {
    mem(req, size_of::<timespec>(), Read),
    mem(rem, size_of::<timespec>(), Write)
  } -> Int for [x86_64: 35, aarch64: 101, riscv64: 101],
  getpid () { } -> Int
    for [x86_64: 39, aarch64: 172, riscv64: 172],
  socket (domain, kind, protocol) { } -> Int
    for [x86_64: 41, aarch64: 198, riscv64: 198],
  connect (sockfd, addr, addrlen) {
    mem(addr, addrlen, Read).decoded(D::Sockaddr),
    inlined(addrlen, 4).typed(T::UnsignedInt)
  } -> Int for [x86_64: 42, aarch64: 203, riscv64: 203],
  accept (sockfd, addr, addrlen) {
    mem(addr, addrlen.inout(), Write | LengthInOut).decoded(D::Sockaddr),
    mem(addrlen, 4usize, Write).typed(T::UnsignedInt)
  } -> Int for [x86_64: 43, aarch64: 202, riscv64: 202],
  sendto (sockfd, buf, len, flags, dest_addr, addrlen) {
    mem(buf, len, Read),
    mem(dest_addr, addrlen, Read).decoded(D::Sockaddr),
    inlined(addrlen, 4).typed(T::UnsignedInt)
  } -> Long for [x86_64: 44, aarch64: 206, riscv64: 206],
  recvfrom (sockfd, buf, len, flags, src_addr, addrlen) {
    mem(buf, len, Write),
    mem(buf, RET, Write),
    mem(src_addr, addrlen.inout(), Write | LengthInOut).decoded(D::Sockaddr),
    mem(addrlen, 4usize, Read | Write | IgnoreIfPrevNull).typed(T::UnsignedInt)
  } -> Long for [x86_64: 45, aarch64: 207, riscv64: 207],
  sendmsg (sockfd, msg, flags) { mem(msg, MSGHDR_SIZE, Read).decoded(D::Msghdr) } -> Long
    for [x86_64: 46, aarch64: 211, riscv64: 211],
  recvmsg (sockfd, msg, flags) { mem(msg, MSGHDR_SIZE, Write).decoded(D::Msghdr) } -> Long
    for [x86_64: 47, aarch64: 212, riscv64: 212],
  bind (sockfd, addr, addrlen) {
    mem(addr, addrlen, Read).decoded(D::Sockaddr),
    inlined(addrlen, 4).typed(T::UnsignedInt)
  } -> Int for [x86_64: 49, aarch64: 200, riscv64: 200],
  listen (sockfd, backlog) { } -> Int
    for [x86_64: 50, aarch64: 201, riscv64: 201],
  getsockname (sockfd, addr, addrlen) {
    mem(addr, addrlen.inout(), Write | LengthInOut).decoded(D::Sockaddr),
    mem(addrlen, 4usize, Write).typed(T::UnsignedInt)
  } -> Int for [x86_64: 51, aarch64: 204, riscv64: 204],
  getpeername (sockfd, addr, addrlen) {
    mem(addr, addrlen.inout(), Write | LengthInOut).decoded(D::Sockaddr),
    mem(addrlen, 4usize, Write).typed(T::UnsignedInt)
  } -> Int for [x86_64: 52, aarch64: 205, riscv64: 205],
  socketpair (domain, kind, protocol, sv) { mem(sv, 2 * size_of::<i32>(), Write) } -> Int
    for [x86_64: 53, aarch64: 199, riscv64: 199],
  setsockopt (sockfd, level, optname, optval, optlen) {
    mem(optval, optlen, Read),
    inlined(optlen, 4).typed(T::UnsignedInt)
  } -> Int for [x86_64: 54, aarch64: 208, riscv64: 208],
  getsockopt (sockfd, level, optname, optval, optlen) {
    mem(optval, optlen.inout(), Write | LengthInOut),
    mem(optlen, 4usize, Write).typed(T::UnsignedInt)
  } -> Int for [x86_64: 55, aarch64: 209, riscv64: 209],
  execve (pathname, argv, envp) {
    cstring(pathname),
    mem(argv, size_of::<usize>(), Read).decoded(D::CStringArray),
    mem(envp, size_of::<usize>(), Read).decoded(D::CStringArray)
  } -> Int for [x86_64: 59, aarch64: 221, riscv64: 221],
  exit (status) { } -> Void
    for [x86_64: 60, aarch64: 93, riscv64: 93],
  wait4 (pid, wstatus, options, rusage) {
    mem(wstatus, size_of::<i32>(), Write),
    mem(rusage, size_of::<rusage>(), Write)
  } -> Int for [x86_64: 61, aarch64: 260, riscv64: 260],
  kill (pid, sig) { } -> Int
    for [x86_64: 62, aarch64: 129, riscv64: 129],
  uname (buf) { mem(buf, size_of::<utsname>(), Write) } -> Int
    for [x86_64: 63, aarch64: 160, riscv64: 160],
  semop (semid, sops, nsops) { mem(sops, nsops, Read).elements(size_of::<sembuf>()) } -> Int
    for [x86_64: 65, aarch64: 193, riscv64: 193],
  // the third argument is only read for some commands
  fcntl (fd, cmd) { } -> Int
    for [x86_64: 72, aarch64: 25, riscv64: 25],
  getcwd (buf, size) { mem(buf, size, Write), mem(buf, RET, Write) } -> Long
    for [x86_64: 79, aarch64: 17, riscv64: 17],
  chdir (path) { cstring(path) } -> Int
    for [x86_64: 80, aarch64: 49, riscv64: 49],
  readlink (pathname, buf, bufsiz) {
    cstring(pathname),
    mem(buf, bufsiz, Write),
    mem(buf, RET, Write)
  } -> Long for [x86_64: 89],
  gettimeofday (tv, tz) {
    mem(tv, size_of::<timeval>(), Write),
    mem(tz, TIMEZONE_SIZE, Write)
  } -> Int for [x86_64: 96, aarch64: 169, riscv64: 169],
  getrlimit (resource, rlim) { mem(rlim, size_of::<rlimit>(), Write) } -> Int
    for [x86_64: 97, aarch64: 163, riscv64: 163],
  getrusage (who, usage) { mem(usage, size_of::<rusage>(), Write) } -> Int
    for [x86_64: 98, aarch64: 165, riscv64: 165],
  sysinfo (info) { mem(info, size_of::<sysinfo>(), Write) } -> Int
    for [x86_64: 99, aarch64: 179, riscv64: 179],
  // a zero size asks for the number of groups without filling the list
  getgroups (size, list) {
    mem(list, size, Write).elements(size_of::<gid_t>()),
    mem(list, RET, Write | NoWriteIfCountZero).elements(size_of::<gid_t>())
  } -> Int for [x86_64: 115, aarch64: 158, riscv64: 158],
  getdents64 (fd, dirp, count) { mem(dirp, count, Write), mem(dirp, RET, Write) } -> Long
    for [x86_64: 217, aarch64: 61, riscv64: 61],
  clock_gettime (clockid, tp) { mem(tp, size_of::<timespec>(), Write) } -> Int
    for [x86_64: 228, aarch64: 113, riscv64: 113],
  exit_group (status) { } -> Void
    for [x86_64: 231, aarch64: 94, riscv64: 94],
  epoll_wait (epfd, events, maxevents, timeout) {
    mem(events, maxevents, Write).elements(size_of::<epoll_event>()),
    mem(events, RET, Write).elements(size_of::<epoll_event>())
  } -> Int for [x86_64: 232],
  openat (dirfd, pathname, flags, mode) { cstring(pathname) } -> Int
    for [x86_64: 257, aarch64: 56, riscv64: 56],
  newfstatat (dirfd, pathname, statbuf, flags) {
    cstring(pathname),
    mem(statbuf, size_of::<stat>(), Write)
  } -> Int for [x86_64: 262, aarch64: 79, riscv64: 79],
  readlinkat (dirfd, pathname, buf, bufsiz) {
    cstring(pathname),
    mem(buf, bufsiz, Write),
    mem(buf, RET, Write)
  } -> Long for [x86_64: 267, aarch64: 78, riscv64: 78],
  ppoll (fds, nfds, tmo_p, sigmask, sigsetsize) {
    mem(fds, nfds, Read | Write).elements(size_of::<pollfd>()).decoded(D::Pollfd),
    inlined(nfds, 8),
    mem(tmo_p, size_of::<timespec>(), Read),
    mem(sigmask, KERNEL_SIGSET_SIZE, Read)
  } -> Int for [x86_64: 271, aarch64: 73, riscv64: 73],
  epoll_pwait (epfd, events, maxevents, timeout, sigmask, sigsetsize) {
    mem(events, maxevents, Write).elements(size_of::<epoll_event>()),
    mem(events, RET, Write).elements(size_of::<epoll_event>()),
    mem(sigmask, KERNEL_SIGSET_SIZE, Read)
  } -> Int for [x86_64: 281, aarch64: 22, riscv64: 22],
  accept4 (sockfd, addr, addrlen, flags) {
    mem(addr, addrlen.inout(), Write | LengthInOut).decoded(D::Sockaddr),
    mem(addrlen, 4usize, Write).typed(T::UnsignedInt)
  } -> Int for [x86_64: 288, aarch64: 242, riscv64: 242],
  pipe2 (pipefd, flags) {
    mem(pipefd, 2 * size_of::<i32>(), Write),
    inlined(flags, 4)
  } -> Int for [x86_64: 293, aarch64: 59, riscv64: 59],
  preadv (fd, iov, iovcnt, pos_l, pos_h) {
    mem(iov, iovcnt, Write).elements(IOVEC_SIZE).decoded(D::Iovec)
  } -> Long for [x86_64: 295, aarch64: 69, riscv64: 69],
  pwritev (fd, iov, iovcnt, pos_l, pos_h) {
    mem(iov, iovcnt, Read).elements(IOVEC_SIZE).decoded(D::Iovec)
  } -> Long for [x86_64: 296, aarch64: 70, riscv64: 70],
  prlimit64 (pid, resource, new_limit, old_limit) {
    inlined(pid, 4),
    inlined(resource, 4),
    mem(new_limit, size_of::<rlimit>(), Read),
    mem(old_limit, size_of::<rlimit>(), Write)
  } -> Int for [x86_64: 302, aarch64: 261, riscv64: 261],
  getrandom (buf, buflen, flags) {
    mem(buf, buflen, Write),
    inlined(buflen, 8),
    inlined(flags, 4)
  } -> Long for [x86_64: 318, aarch64: 278, riscv64: 278],
  statx (dirfd, pathname, flags, mask, statxbuf) {
    cstring(pathname),
    mem(statxbuf, STATX_SIZE, Write)
  } -> Int for [x86_64: 332, aarch64: 291, riscv64: 291],
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::descriptor::{Decoder, SizeRule, SyscallFlags};

  #[test]
  fn entries_bind_parameter_ordinals() {
    let table = linux_syscalls();
    let read = table.iter().find(|d| d.name == "read").unwrap();
    assert_eq!(read.arg_count, 3);
    assert_eq!(read.args[0].ordinal, 1);
    assert_eq!(read.args[0].size, SizeRule::Param(2));
    assert_eq!(read.args[1].size, SizeRule::Retval);
    assert!(read.all_params_known());
  }

  #[test]
  fn ioctl_is_multiplexed_on_its_request() {
    let table = linux_syscalls();
    let ioctl = table.iter().find(|d| d.name == "ioctl").unwrap();
    assert!(ioctl.flags.contains(SyscallFlags::Multiplexed));
    assert!(!ioctl.all_params_known());
    assert_eq!(ioctl.code_ordinal(), Some(1));
    assert_eq!(ioctl.number.primary, SYS_ioctl);
  }

  #[test]
  fn pollfd_arrays_are_tagged_for_decoding() {
    let table = linux_syscalls();
    let polls: Vec<_> = table.iter().filter(|d| d.name == "poll" || d.name == "ppoll").collect();
    assert!(!polls.is_empty());
    for poll in polls {
      let fds = &poll.args[0];
      assert_eq!(fds.ordinal, 0);
      assert_eq!(fds.decoder, Some(Decoder::Pollfd));
      assert!(fds.is_read() && fds.is_write());
      assert_eq!(fds.size, SizeRule::Param(1));
    }
  }

  #[test]
  fn numbers_are_unique() {
    let table = linux_syscalls();
    let mut numbers: Vec<_> = table.iter().map(|d| d.number).collect();
    numbers.sort();
    numbers.dedup();
    assert_eq!(numbers.len(), table.len());
  }
}
