use std::borrow::Cow;

use enumflags2::BitFlags;
use log::warn;

use crate::{
  descriptor::ArgFlags,
  host::{read_word, Host},
  report::param_id,
  types::{ParamType, WORD_SIZE},
  walk::Walk,
};

/// Scan limit for strings without a declared maximum.
const MAX_PATH: u64 = 4096;
/// Upper bound on the entries of a string array.
const STR_ARRAY_MAX_ITER: u64 = 64 * 1024;
const SCAN_CHUNK: usize = 64;

/// Length of the NUL-terminated string at `start`, looking at no more than
/// `max` bytes. Stops early at the first unreadable byte.
pub(crate) fn strnlen(host: &dyn Host, start: u64, max: u64) -> (u64, bool) {
  let mut buf = [0u8; SCAN_CHUNK];
  let mut scanned = 0u64;
  while scanned < max {
    let len = (max - scanned).min(SCAN_CHUNK as u64) as usize;
    let addr = start.wrapping_add(scanned);
    if host.safe_read(addr, &mut buf[..len]) {
      if let Some(nul) = buf[..len].iter().position(|&b| b == 0) {
        return (scanned + nul as u64, true);
      }
      scanned += len as u64;
      continue;
    }
    // the chunk may straddle the end of a mapping
    for i in 0..len {
      let mut byte = [0u8; 1];
      if !host.safe_read(addr.wrapping_add(i as u64), &mut byte) {
        return (scanned + i as u64, false);
      }
      if byte[0] == 0 {
        return (scanned + i as u64, true);
      }
    }
    scanned += len as u64;
  }
  (max, false)
}

/// Reports a C string up to and including its terminator.
///
/// Returns false, leaving the entry to the generic walk, for a null pointer,
/// for a string only written by the kernel before the call and for a string
/// only read by the kernel after the call.
pub(crate) fn handle_cstring(
  walk: &mut Walk,
  ordinal: usize,
  flags: BitFlags<ArgFlags>,
  id: Cow<'static, str>,
  start: u64,
  size: u64,
) -> bool {
  if start == 0 {
    return false;
  }
  if walk.pre && !flags.contains(ArgFlags::Read) {
    return false;
  }
  if !walk.pre && !flags.contains(ArgFlags::Write) {
    return false;
  }
  let max = if size == 0 { MAX_PATH } else { size };
  let (len, terminated) = strnlen(walk.host, start, max);
  if !terminated && len < max {
    warn!("unable to read syscall param string at {:#x}", start.wrapping_add(len));
  }
  walk.report_flags(ordinal, flags, start, len.saturating_add(1).min(max), ParamType::CString, id);
  true
}

/// Reports every string of a NULL-terminated array of string pointers.
pub(crate) fn handle_cstring_array(walk: &mut Walk, ordinal: usize, array: u64) {
  let mut i = 0;
  while i < STR_ARRAY_MAX_ITER {
    let Some(ptr) = read_word(walk.host, array.wrapping_add(i * WORD_SIZE as u64)) else {
      break;
    };
    if ptr == 0 {
      break;
    }
    handle_cstring(walk, ordinal, ArgFlags::Read.into(), param_id(ordinal), ptr, 0);
    if !walk.should_continue() {
      return;
    }
    i += 1;
  }
  // the pointers themselves, terminator included
  walk.report_flags(
    ordinal,
    ArgFlags::Read.into(),
    array,
    (i + 1) * WORD_SIZE as u64,
    ParamType::CStringArray,
    param_id(ordinal),
  );
}
