//! Heuristic write detection for syscalls the tables do not fully describe.
//!
//! Memory that looks like it is pointed to by an argument is copied before
//! the call and compared after it. Undefined bytes that changed are reported
//! as written.

use log::{debug, trace, warn};

use crate::{
  context::{InvocationContext, TrackedBuffer, MAX_ARGS},
  host::{Host, Shadow},
  options::Options,
  report::param_id,
  types::{ParamMode, ParamType},
  walk::Walk,
};

/// Bytes tracked per argument.
pub const TRACK_MAX_SIZE: usize = 2048;
/// Written over undefined bytes before the call to catch writes of unchanged values.
pub const SENTINEL: u8 = 0xab;

fn align_up(value: usize, align: usize) -> usize {
  value.div_ceil(align) * align
}

fn overlaps_earlier(tracked: &[Option<TrackedBuffer>], start: u64, addr: u64) -> bool {
  tracked
    .iter()
    .flatten()
    .any(|prev| prev.start <= addr && prev.end() > start)
}

/// Snapshots the memory around pointer-like arguments.
pub(crate) fn pre(
  host: &dyn Host,
  frame: &mut InvocationContext,
  options: &Options,
  spare: &mut Vec<Vec<u8>>,
) {
  if !options.analyze_unknown_syscalls {
    return;
  }
  debug!("unknown syscall {}", frame.number);
  let shadow = Shadow::of(host);
  for i in 0..MAX_ARGS {
    if let Some(old) = frame.tracked[i].take() {
      spare.push(old.snapshot);
    }
    if !shadow.is_location_defined(host.argument_location(i)) {
      continue;
    }
    let Some(start) = frame.arg(i) else {
      continue;
    };
    if start == 0 || start % 4 != 0 || !shadow.is_addressable(start) {
      continue;
    }
    // stop at the first unaddressable byte or at an earlier argument's range
    let mut len = 0;
    while len < TRACK_MAX_SIZE {
      let Some(addr) = start.checked_add(len as u64) else {
        break;
      };
      if overlaps_earlier(&frame.tracked[..i], start, addr) || !shadow.is_addressable(addr) {
        break;
      }
      len += 1;
    }
    if len == 0 {
      continue;
    }
    trace!("unknown syscall {}: param {i} == {start:#x} {len} bytes", frame.number);
    let mut snapshot = spare.pop().unwrap_or_default();
    snapshot.clear();
    snapshot.reserve(align_up(len, 64));
    snapshot.resize(len, 0);
    if !host.safe_read(start, &mut snapshot) {
      warn!("unable to read syscall arg {start:#x}-{:#x}", start + len as u64);
      spare.push(snapshot);
      continue;
    }
    let mut tracked = TrackedBuffer {
      start,
      snapshot,
      sentinel_len: 0,
    };
    if options.syscall_sentinels {
      tracked.sentinel_len = write_sentinels(host, &shadow, &tracked);
    }
    frame.tracked[i] = Some(tracked);
  }
}

/// Returns how many leading bytes are covered by sentinel writes.
fn write_sentinels(host: &dyn Host, shadow: &Shadow, tracked: &TrackedBuffer) -> usize {
  for j in 0..tracked.snapshot.len() {
    let addr = tracked.start + j as u64;
    if shadow.is_undefined(addr) && !host.safe_write(addr, &[SENTINEL]) {
      // a read-only page is assumed not to be an output
      warn!("unable to write sentinel value at {addr:#x}");
      return j;
    }
  }
  tracked.snapshot.len()
}

/// Undefined bytes of `tracked` whose post-call value tells whether the
/// kernel wrote them, as `(offset, post value, written)`.
fn diff(host: &dyn Host, shadow: &Shadow, tracked: &TrackedBuffer, sentinels: bool) -> Option<Vec<(usize, u8, bool)>> {
  let mut post = vec![0u8; tracked.snapshot.len()];
  if !host.safe_read(tracked.start, &mut post) {
    warn!("unable to read app sysarg at {:#x}", tracked.start);
    return None;
  }
  Some(
    post
      .iter()
      .enumerate()
      .filter(|(j, _)| shadow.is_undefined(tracked.start + *j as u64))
      .map(|(j, &value)| {
        let written = if sentinels && j < tracked.sentinel_len {
          value != SENTINEL
        } else {
          value != tracked.snapshot[j]
        };
        (j, value, written)
      })
      .collect(),
  )
}

/// Reports the undefined bytes the kernel changed. Runs whether or not the
/// call succeeded, since failing calls sometimes still write.
pub(crate) fn post(walk: &mut Walk, options: &Options) {
  if !options.analyze_unknown_syscalls {
    return;
  }
  let shadow = Shadow::of(walk.host);
  let mut writes = Vec::new();
  for (i, tracked) in walk.frame.tracked.iter().enumerate() {
    let Some(tracked) = tracked else {
      continue;
    };
    let Some(bytes) = diff(walk.host, &shadow, tracked, options.syscall_sentinels) else {
      continue;
    };
    for (j, _, written) in bytes {
      if !written {
        continue;
      }
      let addr = tracked.start + j as u64;
      let range = if options.syscall_dword_granularity {
        // unchanged bytes next to a write are usually written too
        (addr & !3, 4)
      } else {
        (addr, 1)
      };
      if writes.last() != Some(&(i, range.0, range.1)) {
        writes.push((i, range.0, range.1));
      }
    }
  }
  for (ordinal, start, size) in writes {
    if !walk.report(
      ordinal,
      ParamMode::Out.into(),
      start,
      size,
      ParamType::Unknown,
      param_id(ordinal),
    ) {
      return;
    }
  }
}

/// Puts back application bytes that still hold a sentinel the kernel did not overwrite.
pub(crate) fn restore(host: &dyn Host, frame: &InvocationContext, options: &Options) {
  if !options.analyze_unknown_syscalls || !options.syscall_sentinels {
    return;
  }
  let shadow = Shadow::of(host);
  for tracked in frame.tracked.iter().flatten() {
    let Some(bytes) = diff(host, &shadow, tracked, true) else {
      continue;
    };
    for (j, value, written) in bytes {
      if written || value != SENTINEL || tracked.snapshot[j] == SENTINEL {
        continue;
      }
      let addr = tracked.start + j as u64;
      trace!("restoring app sysval at {addr:#x}");
      if !host.safe_write(addr, &tracked.snapshot[j..=j]) {
        warn!("unable to restore app sysval at {addr:#x}");
      }
    }
  }
}
