use std::{borrow::Cow, ops::ControlFlow};

use enumflags2::BitFlags;
use log::{debug, trace};

use crate::{
  context::InvocationContext,
  decode,
  descriptor::{mode_from_flags, ArgFlags, SizeRule, SyscallDescriptor},
  host::Host,
  report::{param_id, MemArg},
  size::{resolve_size, DYNAMIC_SIZE},
  types::{ParamMode, ParamType},
};

pub(crate) type MemArgSink<'s> = dyn FnMut(&MemArg) -> ControlFlow<()> + 's;

/// One pass over the memory arguments of the current invocation.
///
/// Once the sink breaks, nothing more is delivered to it. Walking still goes
/// on during the first iteration of an invocation so that values the post-call
/// pass relies on get recorded.
pub(crate) struct Walk<'a, 's> {
  pub host: &'a dyn Host,
  pub frame: &'a mut InvocationContext,
  pub descriptor: &'a SyscallDescriptor,
  /// Whether this is a pre-call pass. Argument iteration walks in pre mode
  /// even after the call.
  pub pre: bool,
  sink: &'a mut MemArgSink<'s>,
  stopped: bool,
}

impl<'a, 's> Walk<'a, 's> {
  pub fn new(
    host: &'a dyn Host,
    frame: &'a mut InvocationContext,
    descriptor: &'a SyscallDescriptor,
    pre: bool,
    sink: &'a mut MemArgSink<'s>,
  ) -> Self {
    Self {
      host,
      frame,
      descriptor,
      pre,
      sink,
      stopped: false,
    }
  }

  pub fn should_continue(&self) -> bool {
    self.frame.first_iter || !self.stopped
  }

  /// Delivers a range to the sink. Returns whether the caller should go on.
  pub fn report(
    &mut self,
    ordinal: usize,
    mode: BitFlags<ParamMode>,
    start: u64,
    size: u64,
    ty: ParamType,
    id: Cow<'static, str>,
  ) -> bool {
    self.deliver(MemArg {
      number: self.frame.number,
      ordinal,
      mode,
      start,
      size,
      ty,
      containing_type: None,
      id,
      pre: self.pre,
    })
  }

  /// Like [`Walk::report`] with the mode derived from table flags.
  pub fn report_flags(
    &mut self,
    ordinal: usize,
    flags: BitFlags<ArgFlags>,
    start: u64,
    size: u64,
    ty: ParamType,
    id: Cow<'static, str>,
  ) -> bool {
    self.report(ordinal, mode_from_flags(flags), start, size, ty, id)
  }

  /// Reports a field of a structure of type `containing`.
  #[allow(clippy::too_many_arguments)]
  pub fn report_field(
    &mut self,
    ordinal: usize,
    flags: BitFlags<ArgFlags>,
    start: u64,
    size: u64,
    ty: ParamType,
    containing: ParamType,
    id: Cow<'static, str>,
  ) -> bool {
    self.deliver(MemArg {
      number: self.frame.number,
      ordinal,
      mode: mode_from_flags(flags),
      start,
      size,
      ty,
      containing_type: Some(containing),
      id,
      pre: self.pre,
    })
  }

  fn deliver(&mut self, arg: MemArg) -> bool {
    if !self.pre && !arg.mode.contains(ParamMode::Out) {
      return true;
    }
    if arg.size == 0 {
      return self.should_continue();
    }
    trace!("report {arg}");
    if !self.stopped && (self.sink)(&arg).is_break() {
      trace!("consumer stopped the walk of syscall {}", arg.number);
      self.stopped = true;
    }
    self.should_continue()
  }

  /// The pointer passed in `ordinal`, or zero when it was not captured.
  pub fn pointer(&self, ordinal: usize) -> u64 {
    self.frame.arg(ordinal).unwrap_or(0)
  }

  /// Whether the entry is to be skipped because a neighbouring pointer is null.
  fn ignored_for_null_sibling(&self, index: usize) -> bool {
    let flags = self.descriptor.args[index].flags;
    let sibling = if flags.contains(ArgFlags::IgnoreIfNextNull) {
      index.checked_add(1)
    } else if flags.contains(ArgFlags::IgnoreIfPrevNull) {
      index.checked_sub(1)
    } else {
      return false;
    };
    sibling
      .and_then(|i| self.descriptor.args.get(i))
      .is_some_and(|sibling| self.pointer(sibling.ordinal) == 0)
  }
}

/// Walks the table entries before the call: every memory argument with its
/// pre-call size, which is also remembered for clamping after the call.
pub(crate) fn pre_walk(walk: &mut Walk) {
  let descriptor = walk.descriptor;
  trace!("pre walk of {} ({})", descriptor.name, walk.frame.number);
  let mut last_ordinal = None;
  for (index, arg) in descriptor.args.iter().enumerate() {
    // the second entry of a pair only matters after the call
    if last_ordinal == Some(arg.ordinal) {
      continue;
    }
    last_ordinal = Some(arg.ordinal);
    if arg.flags.intersects(ArgFlags::Inlined | ArgFlags::NonMemarg) {
      continue;
    }
    let start = walk.pointer(arg.ordinal);
    let size = resolve_size(walk, index, start);
    if let Some(known) = walk.frame.known_sizes.get_mut(arg.ordinal) {
      *known = size;
    }
    trace!("  parameter #{} at {start:#x} has pre size {size:#x}", arg.ordinal);
    if !walk.should_continue() {
      break;
    }
    if start == 0 || size == 0 {
      continue;
    }
    let real_size = if size == DYNAMIC_SIZE { 0 } else { size };
    let handled = decode::handle_access(walk, arg, start, real_size);
    if !walk.should_continue() {
      break;
    }
    if handled || walk.ignored_for_null_sibling(index) {
      continue;
    }
    if !walk.report_flags(
      arg.ordinal,
      arg.flags,
      start,
      real_size,
      arg.param_type(),
      param_id(arg.ordinal),
    ) {
      break;
    }
  }
}

/// Walks the written entries after the call, sized by what the kernel wrote.
///
/// `fills_capacity` is set when the call failed in a way that still filled
/// output buffers up to their capacity.
pub(crate) fn post_walk(walk: &mut Walk, fills_capacity: bool) {
  let descriptor = walk.descriptor;
  trace!(
    "post walk of {} ({}) res={:#x}",
    descriptor.name,
    walk.frame.number,
    walk.frame.result.unwrap_or(0)
  );
  let mut last_ordinal = None;
  let mut last_size = 0;
  for (index, arg) in descriptor.args.iter().enumerate() {
    if !arg.is_write() {
      continue;
    }
    let start = walk.pointer(arg.ordinal);
    let mut size = resolve_size(walk, index, start);
    if !walk.should_continue() {
      break;
    }
    if let Some(&known) = walk.frame.known_sizes.get(arg.ordinal) {
      // a too-small buffer can make the kernel report the size it needed
      if size > known {
        debug!(
          "truncating out size of parameter #{} from {size:#x} to {known:#x}",
          arg.ordinal
        );
        size = known;
      }
    }
    if last_ordinal == Some(arg.ordinal) {
      if size == 0 || fills_capacity {
        size = last_size;
      }
      if arg.flags.contains(ArgFlags::NoWriteIfCountZero) {
        let count = index
          .checked_sub(1)
          .and_then(|i| descriptor.args.get(i))
          .and_then(|first| match first.size {
            SizeRule::Param(n) | SizeRule::InOut(n) => Some(walk.frame.param(n)),
            _ => None,
          });
        if count == Some(0) {
          size = 0;
        }
      }
      if !report_written(walk, index, start, size) {
        break;
      }
      continue;
    }
    last_ordinal = Some(arg.ordinal);
    last_size = size;
    // the second entry of a pair carries the written size
    if descriptor.second_of_pair(index).is_some() {
      continue;
    }
    if !report_written(walk, index, start, size) {
      break;
    }
  }
}

fn report_written(walk: &mut Walk, index: usize, start: u64, size: u64) -> bool {
  if start == 0 || size == 0 {
    return true;
  }
  let descriptor = walk.descriptor;
  let arg = &descriptor.args[index];
  trace!("  parameter #{} at {start:#x} has post size {size:#x}", arg.ordinal);
  let handled = decode::handle_access(walk, arg, start, size);
  if !walk.should_continue() {
    return false;
  }
  if handled || walk.ignored_for_null_sibling(index) {
    return true;
  }
  walk.report_flags(
    arg.ordinal,
    arg.flags,
    start,
    size,
    arg.param_type(),
    param_id(arg.ordinal),
  )
}
