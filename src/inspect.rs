//! [`Host`] implementation for a tracee stopped at a syscall stop.

use std::{
  io::IoSliceMut,
  sync::atomic::{AtomicBool, Ordering},
};

use log::{debug, trace};
use nix::{
  errno::Errno,
  libc::c_long,
  sys::{
    ptrace::{self, AddressType},
    uio::{process_vm_readv, RemoteIoVec},
  },
  unistd::Pid,
};

use crate::{
  arch::{arg_from_regs, syscall_no_from_regs, syscall_res_from_regs, PtraceRegisters},
  host::Host,
  policy::page_size,
  types::WORD_SIZE,
};

pub fn ptrace_getregs(pid: Pid) -> Result<PtraceRegisters, Errno> {
  // Don't use GETREGSET on x86_64.
  // It sometimes fills only part of `regs` around exec syscall exit.
  cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
      ptrace::getregs(pid)
    } else {
      // https://github.com/torvalds/linux/blob/v6.9/include/uapi/linux/elf.h#L378
      // libc crate doesn't provide this constant when using musl libc.
      const NT_PRSTATUS: std::ffi::c_int = 1;

      let mut regs = std::mem::MaybeUninit::<PtraceRegisters>::uninit();
      let iovec = nix::libc::iovec {
        iov_base: regs.as_mut_ptr() as AddressType,
        iov_len: std::mem::size_of::<PtraceRegisters>(),
      };
      let ptrace_result = unsafe {
        nix::libc::ptrace(
          nix::libc::PTRACE_GETREGSET,
          pid.as_raw(),
          NT_PRSTATUS,
          &iovec as *const _ as *const nix::libc::c_void,
        )
      };
      if -1 == ptrace_result {
        return Err(Errno::last());
      }
      if iovec.iov_len != std::mem::size_of::<PtraceRegisters>() {
        return Err(Errno::EIO);
      }
      Ok(unsafe { regs.assume_init() })
    }
  }
}

static SHOULD_USE_PROCESS_VM_READV: AtomicBool = AtomicBool::new(true);

/// Upper bound of iovecs per `process_vm_readv` call.
const IOV_MAX: usize = 1024;

/// Read a remote memory buffer into `dest`. Succeeds only if all of it was read.
fn read_remote_memory(pid: Pid, remote_addr: u64, dest: &mut [u8]) -> Result<(), Errno> {
  // short reads are cheaper by peeking
  if dest.len() < WORD_SIZE * 2 {
    read_by_ptrace_peek(pid, remote_addr, dest)
  } else if SHOULD_USE_PROCESS_VM_READV.load(Ordering::Relaxed) {
    read_by_process_vm_readv(pid, remote_addr, dest).or_else(|e| {
      if e == Errno::ENOSYS || e == Errno::EPERM {
        debug!("process_vm_readv unusable ({e}), falling back to ptrace peek");
        SHOULD_USE_PROCESS_VM_READV.store(false, Ordering::SeqCst);
      }
      read_by_ptrace_peek(pid, remote_addr, dest)
    })
  } else {
    read_by_ptrace_peek(pid, remote_addr, dest)
  }
}

/// Read a remote memory buffer word by word.
fn read_by_ptrace_peek(pid: Pid, remote_addr: u64, dest: &mut [u8]) -> Result<(), Errno> {
  remote_addr
    .checked_add(dest.len() as u64)
    .ok_or(Errno::EFAULT)?;
  let mut done = 0;
  while done < dest.len() {
    let cur = remote_addr + done as u64;
    let aligned = cur & !(WORD_SIZE as u64 - 1);
    let offset = (cur - aligned) as usize;
    let word = ptrace::read(pid, aligned as AddressType)?.to_ne_bytes();
    let len = (WORD_SIZE - offset).min(dest.len() - done);
    dest[done..done + len].copy_from_slice(&word[offset..offset + len]);
    done += len;
  }
  Ok(())
}

/// Read a remote memory buffer by process_vm_readv, one iovec per page so
/// that a fault shows up as a short read.
fn read_by_process_vm_readv(pid: Pid, remote_addr: u64, dest: &mut [u8]) -> Result<(), Errno> {
  let end = remote_addr
    .checked_add(dest.len() as u64)
    .ok_or(Errno::EFAULT)?;
  let page_size = page_size();
  let mut remote = Vec::new();
  let mut cur = remote_addr;
  while cur < end {
    let misalignment = cur & (page_size - 1);
    let len = (page_size - misalignment).min(end - cur);
    remote.push(RemoteIoVec {
      base: cur as usize,
      len: len as usize,
    });
    cur += len;
  }
  let mut total_read = 0;
  for chunk in remote.chunks(IOV_MAX) {
    let chunk_len: usize = chunk.iter().map(|iov| iov.len).sum();
    let mut local = [IoSliceMut::new(&mut dest[total_read..total_read + chunk_len])];
    let read = process_vm_readv(pid, &mut local, chunk)?;
    total_read += read;
    if read < chunk_len {
      return Err(Errno::EFAULT);
    }
  }
  Ok(())
}

/// Write `src` into the tracee, merging partial words with their current content.
fn write_by_ptrace_poke(pid: Pid, remote_addr: u64, src: &[u8]) -> Result<(), Errno> {
  remote_addr
    .checked_add(src.len() as u64)
    .ok_or(Errno::EFAULT)?;
  let mut done = 0;
  while done < src.len() {
    let cur = remote_addr + done as u64;
    let aligned = cur & !(WORD_SIZE as u64 - 1);
    let offset = (cur - aligned) as usize;
    let len = (WORD_SIZE - offset).min(src.len() - done);
    let mut word = if len == WORD_SIZE {
      [0u8; WORD_SIZE]
    } else {
      ptrace::read(pid, aligned as AddressType)?.to_ne_bytes()
    };
    word[offset..offset + len].copy_from_slice(&src[done..done + len]);
    ptrace::write(pid, aligned as AddressType, c_long::from_ne_bytes(word))?;
    done += len;
  }
  Ok(())
}

/// A tracee stopped at a syscall-enter or syscall-exit stop.
///
/// Registers are captured once; call [`PtraceHost::refresh`] after the
/// tracee has moved on to the next stop.
#[derive(Clone)]
pub struct PtraceHost {
  pid: Pid,
  regs: PtraceRegisters,
}

impl PtraceHost {
  pub fn new(pid: Pid) -> Result<Self, Errno> {
    Ok(Self {
      pid,
      regs: ptrace_getregs(pid)?,
    })
  }

  pub fn refresh(&mut self) -> Result<(), Errno> {
    self.regs = ptrace_getregs(self.pid)?;
    Ok(())
  }

  pub fn pid(&self) -> Pid {
    self.pid
  }

  pub fn regs(&self) -> &PtraceRegisters {
    &self.regs
  }

  /// The primary syscall number of the current stop.
  pub fn syscall_number(&self) -> u32 {
    syscall_no_from_regs!(self.regs) as u32
  }
}

impl Host for PtraceHost {
  fn read_argument(&self, ordinal: usize) -> Option<u64> {
    arg_from_regs(&self.regs, ordinal)
  }

  fn result_register(&self) -> u64 {
    syscall_res_from_regs!(self.regs) as u64
  }

  fn safe_read(&self, addr: u64, buf: &mut [u8]) -> bool {
    match read_remote_memory(self.pid, addr, buf) {
      Ok(()) => true,
      Err(e) => {
        trace!("{}: cannot read {} bytes at {addr:#x}: {e}", self.pid, buf.len());
        false
      }
    }
  }

  fn safe_write(&self, addr: u64, buf: &[u8]) -> bool {
    match write_by_ptrace_poke(self.pid, addr, buf) {
      Ok(()) => true,
      Err(e) => {
        trace!("{}: cannot write {} bytes at {addr:#x}: {e}", self.pid, buf.len());
        false
      }
    }
  }
}
