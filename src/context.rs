use std::sync::Arc;

use log::{trace, warn};

use crate::{descriptor::SyscallDescriptor, host::Host, number::SyscallNumber};

/// Number of argument registers a syscall can take.
pub const MAX_ARGS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Pre,
  Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkState {
  Idle,
  PreWalking,
  AwaitingResult,
  PostWalking,
  Done,
}

/// Values captured during the pre-call walk that the post-call walk needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraSlot {
  /// A buffer length read from a field inside the buffer.
  SizeFromField,
  /// The socklen of a written socket address.
  Sockaddr,
  MsgControl,
  MsgControlLen,
}

impl ExtraSlot {
  fn index(self) -> usize {
    self as usize
  }
}

/// Memory around one argument of an unknown syscall, as it was before the call.
#[derive(Debug, Default)]
pub(crate) struct TrackedBuffer {
  pub start: u64,
  pub snapshot: Vec<u8>,
  /// Leading bytes covered by sentinel writes.
  pub sentinel_len: usize,
}

impl TrackedBuffer {
  pub fn end(&self) -> u64 {
    self.start + self.snapshot.len() as u64
  }

  pub fn contains(&self, addr: u64) -> bool {
    (self.start..self.end()).contains(&addr)
  }
}

/// State of one occurrence of one syscall on one thread.
#[derive(Debug)]
pub struct InvocationContext {
  pub(crate) number: SyscallNumber,
  pub(crate) descriptor: Option<Arc<SyscallDescriptor>>,
  pub(crate) known: bool,
  pub(crate) args: [Option<u64>; MAX_ARGS],
  pub(crate) result: Option<u64>,
  pub(crate) phase: Phase,
  pub(crate) walk: WalkState,
  pub(crate) first_iter: bool,
  pub(crate) memargs_iterated: bool,
  /// Pointer arguments of an incompletely described syscall were snapshotted.
  pub(crate) unknown_snapshotted: bool,
  extra: [Option<u64>; 4],
  pub(crate) known_sizes: [u64; MAX_ARGS],
  pub(crate) tracked: [Option<TrackedBuffer>; MAX_ARGS],
}

impl InvocationContext {
  pub(crate) fn new(number: SyscallNumber, args: [Option<u64>; MAX_ARGS]) -> Self {
    Self {
      number,
      descriptor: None,
      known: false,
      args,
      result: None,
      phase: Phase::Pre,
      walk: WalkState::Idle,
      first_iter: true,
      memargs_iterated: false,
      unknown_snapshotted: false,
      extra: [None; 4],
      known_sizes: [0; MAX_ARGS],
      tracked: Default::default(),
    }
  }

  pub fn number(&self) -> SyscallNumber {
    self.number
  }

  pub fn descriptor(&self) -> Option<&Arc<SyscallDescriptor>> {
    self.descriptor.as_ref()
  }

  /// Whether every memory parameter of the syscall is described.
  pub fn is_known(&self) -> bool {
    self.known
  }

  pub fn phase(&self) -> Phase {
    self.phase
  }

  pub fn walk_state(&self) -> WalkState {
    self.walk
  }

  pub fn is_first_iteration(&self) -> bool {
    self.first_iter
  }

  /// The argument captured at syscall entry, if it could be read.
  pub fn arg(&self, ordinal: usize) -> Option<u64> {
    self.args.get(ordinal).copied().flatten()
  }

  /// The argument as used for size computations: unreadable reads as zero.
  pub(crate) fn param(&self, ordinal: usize) -> u64 {
    self.arg(ordinal).unwrap_or_else(|| {
      warn!("argument #{ordinal} of syscall {} was not captured", self.number);
      0
    })
  }

  pub fn result(&self) -> Option<u64> {
    self.result
  }

  pub(crate) fn extra(&self, slot: ExtraSlot) -> Option<u64> {
    self.extra[slot.index()]
  }

  pub(crate) fn set_extra(&mut self, slot: ExtraSlot, value: u64) {
    self.extra[slot.index()] = Some(value);
  }

  pub(crate) fn is_post(&self) -> bool {
    self.phase == Phase::Post
  }

  pub(crate) fn mark_pre_phase_complete(&mut self) {
    if self.walk == WalkState::PreWalking {
      self.walk = WalkState::AwaitingResult;
    }
  }

  pub(crate) fn enter_post_phase(&mut self, result: u64) {
    self.phase = Phase::Post;
    self.result = Some(result);
  }
}

/// Per-thread stack of in-flight syscalls.
///
/// A syscall issued while another is being processed on the same thread
/// gets its own frame on top.
#[derive(Debug, Default)]
pub struct ThreadState {
  frames: Vec<InvocationContext>,
  spare_buffers: Vec<Vec<u8>>,
}

impl ThreadState {
  pub fn new() -> Self {
    Self::default()
  }

  /// Pushes a frame for `number`, capturing each argument best-effort.
  pub(crate) fn enter(&mut self, number: SyscallNumber, host: &dyn Host) -> &mut InvocationContext {
    let args = std::array::from_fn(|ordinal| host.read_argument(ordinal));
    trace!("enter syscall {number} at depth {}", self.frames.len());
    self.frames.push(InvocationContext::new(number, args));
    let depth = self.frames.len() - 1;
    &mut self.frames[depth]
  }

  /// Pops the innermost frame, keeping its snapshot buffers for reuse.
  pub(crate) fn exit(&mut self) -> Option<InvocationContext> {
    let mut frame = self.frames.pop()?;
    trace!("exit syscall {} at depth {}", frame.number, self.frames.len());
    for tracked in frame.tracked.iter_mut().filter_map(Option::take) {
      let mut buffer = tracked.snapshot;
      buffer.clear();
      self.spare_buffers.push(buffer);
    }
    Some(frame)
  }

  /// The innermost frame together with the pool of snapshot buffers.
  pub(crate) fn current_with_buffers(&mut self) -> Option<(&mut InvocationContext, &mut Vec<Vec<u8>>)> {
    let frame = self.frames.last_mut()?;
    Some((frame, &mut self.spare_buffers))
  }

  pub fn current(&self) -> Option<&InvocationContext> {
    self.frames.last()
  }

  pub(crate) fn current_mut(&mut self) -> Option<&mut InvocationContext> {
    self.frames.last_mut()
  }

  pub fn depth(&self) -> usize {
    self.frames.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::host::Host;

  struct Args;

  impl Host for Args {
    fn read_argument(&self, ordinal: usize) -> Option<u64> {
      (ordinal != 3).then_some(ordinal as u64 * 10)
    }

    fn result_register(&self) -> u64 {
      0
    }

    fn safe_read(&self, _addr: u64, _buf: &mut [u8]) -> bool {
      false
    }

    fn safe_write(&self, _addr: u64, _buf: &[u8]) -> bool {
      false
    }
  }

  #[test]
  fn frames_nest() {
    let mut thread = ThreadState::new();
    thread.enter(SyscallNumber::primary(0), &Args);
    thread.enter(SyscallNumber::primary(1), &Args);
    assert_eq!(thread.depth(), 2);
    assert_eq!(thread.current().unwrap().number(), SyscallNumber::primary(1));
    thread.exit();
    assert_eq!(thread.current().unwrap().number(), SyscallNumber::primary(0));
    thread.exit();
    assert!(thread.exit().is_none());
  }

  #[test]
  fn unreadable_arguments_stay_unset() {
    let mut thread = ThreadState::new();
    let frame = thread.enter(SyscallNumber::primary(0), &Args);
    assert_eq!(frame.arg(2), Some(20));
    assert_eq!(frame.arg(3), None);
    assert_eq!(frame.param(3), 0);
    assert_eq!(frame.arg(9), None);
  }

  #[test]
  fn extra_slots_are_independent() {
    let mut frame = InvocationContext::new(SyscallNumber::primary(0), [None; MAX_ARGS]);
    frame.set_extra(ExtraSlot::Sockaddr, 16);
    assert_eq!(frame.extra(ExtraSlot::Sockaddr), Some(16));
    assert_eq!(frame.extra(ExtraSlot::MsgControl), None);
  }
}
