use std::{ops::ControlFlow, sync::Arc};

use enumflags2::BitFlags;
use log::{debug, trace, warn};

use crate::{
  context::{ThreadState, WalkState, MAX_ARGS},
  descriptor::{SyscallDescriptor, SyscallFlags},
  error::{Error, Result},
  filter::SyscallFilter,
  host::Host,
  ioctls,
  number::SyscallNumber,
  options::Options,
  policy::Policy,
  registry::Registry,
  report::{MemArg, SyscallArg},
  syscalls, unknown,
  types::{ParamMode, ParamType, WORD_SIZE},
  walk::{post_walk, pre_walk, MemArgSink, Walk},
};

/// Classifies the memory each syscall reads and writes.
///
/// The host calls the `on_*` hooks around every syscall it dispatches here
/// and the consumer queries the current invocation from inside them.
#[derive(Debug)]
pub struct Engine {
  registry: Registry,
  filter: SyscallFilter,
  options: Options,
  policy: Policy,
}

impl Default for Engine {
  fn default() -> Self {
    Self::new()
  }
}

impl Engine {
  pub fn new() -> Self {
    Self::with_options(Options::default())
  }

  pub fn with_options(options: Options) -> Self {
    Self::with_policy(options, Policy::default())
  }

  pub fn with_policy(options: Options, policy: Policy) -> Self {
    let registry = Registry::new();
    registry.register_all(syscalls::linux_syscalls());
    registry.register_all_secondary(ioctls::linux_ioctls());
    registry.register_secondary(ioctls::ioctl_catch_all());
    debug!("registered {} syscall descriptors", registry.len());
    Self {
      registry,
      filter: SyscallFilter::new(),
      options,
      policy,
    }
  }

  pub fn registry(&self) -> &Registry {
    &self.registry
  }

  pub fn options(&self) -> &Options {
    &self.options
  }

  pub fn policy(&self) -> &Policy {
    &self.policy
  }

  /// Starts a new invocation of syscall `raw` on `thread`.
  ///
  /// Always lets the syscall run.
  pub fn on_pre_syscall(&self, thread: &mut ThreadState, host: &dyn Host, raw: u32) -> bool {
    let number = self
      .registry
      .resolve_multiplex(raw, |ordinal| host.read_argument(ordinal));
    let descriptor = self.registry.lookup(number, true);
    let frame = thread.enter(number, host);
    match &descriptor {
      Some(descriptor) => {
        trace!("pre syscall {} ({number})", descriptor.name);
        frame.known = descriptor.all_params_known();
      }
      None => debug!("no descriptor for syscall {number}"),
    }
    frame.descriptor = descriptor;
    frame.walk = WalkState::PreWalking;
    true
  }

  /// Records the result of the innermost invocation.
  pub fn on_post_syscall(&self, thread: &mut ThreadState, host: &dyn Host, raw: u32) {
    let Some(frame) = thread.current_mut() else {
      warn!("post syscall {raw} without a matching pre syscall");
      return;
    };
    if frame.number.primary != raw {
      warn!("post syscall {raw} does not match the current syscall {}", frame.number);
    }
    frame.mark_pre_phase_complete();
    frame.enter_post_phase(host.result_register());
  }

  /// Ends the innermost invocation after every consumer has seen it.
  pub fn on_post_syscall_last(&self, thread: &mut ThreadState, host: &dyn Host, raw: u32) {
    if let Some(frame) = thread.current() {
      trace!("post syscall {raw} done");
      if !frame.known {
        unknown::restore(host, frame, &self.options);
      }
    }
    thread.exit();
  }

  /// Delivers the memory ranges the current syscall reads (before the call)
  /// or wrote (after it) to `cb`, until `cb` breaks.
  ///
  /// After the call this fails with [`Error::InvalidCall`] unless the same
  /// invocation was iterated before the call.
  pub fn iterate_memory_arguments<F>(&self, thread: &mut ThreadState, host: &dyn Host, mut cb: F) -> Result<()>
  where
    F: FnMut(&MemArg) -> ControlFlow<()>,
  {
    let (frame, spare) = thread
      .current_with_buffers()
      .ok_or(Error::InvalidParameter("no syscall in progress"))?;
    if !frame.memargs_iterated {
      if frame.is_post() {
        return Err(Error::InvalidCall);
      }
      frame.memargs_iterated = true;
    }
    let descriptor = frame.descriptor.clone();
    let fallback;
    let table: &SyscallDescriptor = match &descriptor {
      Some(descriptor) => descriptor,
      None => {
        fallback = SyscallDescriptor::unknown(frame.number);
        &fallback
      }
    };
    let sink: &mut MemArgSink = &mut cb;
    if frame.is_post() {
      let result = frame.result.unwrap_or_else(|| host.result_register());
      let succeeded = self
        .policy
        .syscall_succeeded(descriptor.as_deref(), frame.number, result);
      let fills_capacity = !succeeded && self.policy.fills_capacity_on_failure(frame.number, result);
      frame.walk = WalkState::PostWalking;
      let mut walk = Walk::new(host, frame, table, false, sink);
      if descriptor.is_some() {
        if succeeded || fills_capacity {
          post_walk(&mut walk, fills_capacity);
        } else {
          debug!("syscall {} {} failed with {result:#x}", table.name, walk.frame.number);
        }
      }
      if !walk.frame.known && walk.should_continue() {
        unknown::post(&mut walk, &self.options);
      }
      walk.frame.walk = WalkState::Done;
      walk.frame.first_iter = false;
    } else {
      let mut walk = Walk::new(host, frame, table, true, sink);
      if descriptor.is_some() {
        pre_walk(&mut walk);
      }
      // argument iteration may already have consumed the first iteration
      if !walk.frame.known && !walk.frame.unknown_snapshotted {
        unknown::pre(host, walk.frame, &self.options, spare);
        walk.frame.unknown_snapshotted = true;
      }
      walk.frame.mark_pre_phase_complete();
      walk.frame.first_iter = false;
    }
    Ok(())
  }

  /// Every memory range of the current phase, collected.
  pub fn memory_arguments(&self, thread: &mut ThreadState, host: &dyn Host) -> Result<Vec<MemArg>> {
    let mut args = Vec::new();
    self.iterate_memory_arguments(thread, host, |arg| {
      args.push(arg.clone());
      ControlFlow::Continue(())
    })?;
    Ok(args)
  }

  /// Delivers each parameter of the current syscall with its value, then the
  /// return value.
  pub fn iterate_arguments<F>(&self, thread: &mut ThreadState, host: &dyn Host, mut cb: F) -> Result<()>
  where
    F: FnMut(&SyscallArg) -> ControlFlow<()>,
  {
    let frame = thread
      .current_mut()
      .ok_or(Error::InvalidParameter("no syscall in progress"))?;
    let descriptor = frame.descriptor.clone().ok_or(Error::DetailsUnknown)?;
    trace!("iterating over args of {} ({})", descriptor.name, frame.number);
    let live = Live {
      values: frame.args,
      result: frame.is_post().then_some(frame.result).flatten(),
      host,
    };
    let _ = describe_args(&descriptor, Some(&live), &mut cb);
    // table entries with a complex type cache what later memory iteration needs
    if frame.first_iter {
      let mut nop = |_: &MemArg| ControlFlow::Continue(());
      let mut walk = Walk::new(host, frame, &descriptor, true, &mut nop);
      pre_walk(&mut walk);
    }
    frame.first_iter = false;
    Ok(())
  }

  /// Delivers the declared type of each parameter of `descriptor`, then the
  /// return type. Nothing is read from any invocation.
  pub fn iterate_arg_types<F>(&self, descriptor: &SyscallDescriptor, mut cb: F)
  where
    F: FnMut(&SyscallArg) -> ControlFlow<()>,
  {
    let _ = describe_args(descriptor, None, &mut cb);
  }

  pub fn lookup_by_number(&self, number: SyscallNumber) -> Option<Arc<SyscallDescriptor>> {
    self.registry.lookup(number, true)
  }

  pub fn lookup_by_name(&self, name: &str) -> Option<Arc<SyscallDescriptor>> {
    self.registry.lookup_by_name(name)
  }

  /// Visits every registered syscall until `cb` returns `false`.
  ///
  /// Lookups from inside `cb` are allowed.
  pub fn iterate_syscalls(&self, cb: impl FnMut(&SyscallDescriptor) -> bool) {
    self.registry.iterate(cb)
  }

  /// Asks the host to dispatch syscall `primary` to this engine.
  pub fn filter(&self, primary: u32) {
    self.filter.filter(primary)
  }

  pub fn filter_all(&self) {
    self.filter.filter_all()
  }

  pub fn is_filtered(&self, primary: u32) -> bool {
    self.filter.is_filtered(primary)
  }

  /// The descriptor of the innermost invocation.
  pub fn current_syscall(&self, thread: &ThreadState) -> Result<Arc<SyscallDescriptor>> {
    let frame = thread
      .current()
      .ok_or(Error::InvalidParameter("no syscall in progress"))?;
    frame.descriptor.clone().ok_or(Error::NotFound)
  }

  /// `(succeeded, value, error_code)` of the innermost invocation, where the
  /// error code is the negated value of a failed call and zero otherwise.
  pub fn current_result(&self, thread: &ThreadState) -> Result<(bool, u64, u64)> {
    let frame = thread
      .current()
      .ok_or(Error::InvalidParameter("no syscall in progress"))?;
    let value = frame.result.ok_or(Error::InvalidCall)?;
    let succeeded = self
      .policy
      .syscall_succeeded(frame.descriptor.as_deref(), frame.number, value);
    let error_code = if succeeded {
      0
    } else {
      (value as i64).wrapping_neg() as u64
    };
    Ok((succeeded, value, error_code))
  }

  /// The value argument `ordinal` had when the innermost syscall was entered.
  pub fn pre_syscall_arg(&self, thread: &ThreadState, ordinal: usize) -> Result<u64> {
    if ordinal >= MAX_ARGS {
      return Err(Error::InvalidParameter("argument ordinal out of range"));
    }
    let frame = thread
      .current()
      .ok_or(Error::InvalidParameter("no syscall in progress"))?;
    frame
      .arg(ordinal)
      .ok_or(Error::InvalidParameter("argument was not captured"))
  }

  pub fn syscall_succeeded(&self, descriptor: &SyscallDescriptor, result: u64) -> bool {
    self
      .policy
      .syscall_succeeded(Some(descriptor), descriptor.number, result)
  }
}

/// Values of an invocation for argument iteration.
struct Live<'a> {
  values: [Option<u64>; MAX_ARGS],
  result: Option<u64>,
  host: &'a dyn Host,
}

fn mask_to_width(value: u64, width: usize) -> u64 {
  match width {
    1 => value & 0xff,
    2 => value & 0xffff,
    4 => value & 0xffff_ffff,
    _ => value,
  }
}

fn describe_args(
  descriptor: &SyscallDescriptor,
  live: Option<&Live<'_>>,
  cb: &mut dyn FnMut(&SyscallArg) -> ControlFlow<()>,
) -> ControlFlow<()> {
  for ordinal in 0..descriptor.arg_count {
    let mut arg = SyscallArg {
      number: descriptor.number,
      ordinal: Some(ordinal),
      mode: ParamMode::In.into(),
      value: live.and_then(|live| live.values.get(ordinal).copied().flatten()),
      size: WORD_SIZE,
      ty: ParamType::Unknown,
      location: live.map(|live| live.host.argument_location(ordinal)),
    };
    // the first entry of a parameter describes it; later ones only size it after the call
    if let Some(entry) = descriptor.args.iter().find(|entry| entry.ordinal == ordinal) {
      arg.ty = entry.param_type();
      arg.mode = entry.mode();
      if entry.is_inlined() {
        arg.size = entry.fixed_size().map_or(WORD_SIZE, |size| size as usize);
        arg.value = arg.value.map(|value| mask_to_width(value, arg.size));
      }
    }
    cb(&arg)?;
  }
  if live.is_none() || !descriptor.flags.contains(SyscallFlags::RetTypeVaries) {
    let ret = SyscallArg {
      number: descriptor.number,
      ordinal: None,
      mode: BitFlags::from(ParamMode::Retval) | ParamMode::Inlined,
      value: live.and_then(|live| live.result),
      size: descriptor.return_type.size(),
      ty: descriptor.return_type.param_type(),
      location: None,
    };
    cb(&ret)?;
  }
  ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tables_are_registered() {
    let engine = Engine::new();
    let read = engine.lookup_by_name("read").unwrap();
    assert_eq!(read.number, SyscallNumber::primary(syscalls::SYS_read));
    let tcgets = engine
      .lookup_by_number(SyscallNumber::new(syscalls::SYS_ioctl, ioctls::IOCTL_TCGETS))
      .unwrap();
    assert_eq!(tcgets.name, "ioctl.TCGETS");
    let catch_all = engine
      .lookup_by_number(SyscallNumber::catch_all(syscalls::SYS_ioctl))
      .unwrap();
    assert!(catch_all.number.is_catch_all());
  }

  #[test]
  fn static_types_of_read() {
    let engine = Engine::new();
    let read = engine.lookup_by_name("read").unwrap();
    let mut seen = Vec::new();
    engine.iterate_arg_types(&read, |arg| {
      seen.push((arg.ordinal, arg.ty, arg.value));
      ControlFlow::Continue(())
    });
    assert_eq!(
      seen,
      vec![
        (Some(0), ParamType::Unknown, None),
        (Some(1), ParamType::Struct, None),
        (Some(2), ParamType::Unknown, None),
        (None, ParamType::Int, None),
      ]
    );
  }

  #[test]
  fn inlined_values_are_masked() {
    assert_eq!(mask_to_width(0xdead_beef_0000_0001, 4), 1);
    assert_eq!(mask_to_width(0x1_0203, 2), 0x0203);
    assert_eq!(mask_to_width(u64::MAX, 8), u64::MAX);
  }

  #[test]
  fn iterating_syscalls_allows_nested_lookups() {
    let engine = Engine::new();
    let mut count = 0;
    engine.iterate_syscalls(|descriptor| {
      assert!(engine.lookup_by_name(&descriptor.name).is_some());
      count += 1;
      true
    });
    assert_eq!(count, engine.registry().len());
  }
}
