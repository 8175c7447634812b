use std::borrow::Cow;

use log::{trace, warn};

use crate::{
  context::ExtraSlot,
  descriptor::{ArgFlags, Multiplier, SizeRule},
  host::{read_u32, read_uint},
  types::{ParamMode, ParamType, WORD_SIZE},
  walk::Walk,
};

/// Size of a buffer whose length is only found by scanning it.
pub(crate) const DYNAMIC_SIZE: u64 = u64::MAX;

/// The byte length of the memory behind entry `index` for this invocation.
///
/// Inputs that cannot be read count as zero.
pub(crate) fn resolve_size(walk: &mut Walk, index: usize, start: u64) -> u64 {
  let descriptor = walk.descriptor;
  let arg = &descriptor.args[index];
  let mut size = match arg.size {
    SizeRule::Dynamic => return DYNAMIC_SIZE,
    SizeRule::Fixed(size) => size,
    SizeRule::Retval => {
      if walk.pre {
        0
      } else {
        walk.frame.result.unwrap_or(0)
      }
    }
    SizeRule::Field { offset } => size_from_field(walk, arg.ordinal, start, offset),
    SizeRule::Param(n) => {
      let value = walk.frame.param(n);
      match descriptor.width_entry(index, n).and_then(|e| e.fixed_size()) {
        Some(4) => value as u32 as u64,
        _ => value,
      }
    }
    SizeRule::InOut(n) => {
      let ptr = walk.frame.param(n);
      let width = descriptor
        .width_entry(index, n)
        .and_then(|e| e.fixed_size())
        .unwrap_or(WORD_SIZE as u64);
      if ptr == 0 {
        0
      } else {
        read_uint(walk.host, ptr, width).unwrap_or_else(|| {
          warn!("cannot read the in/out length of parameter #{} at {ptr:#x}", arg.ordinal);
          0
        })
      }
    }
  };
  if arg.flags.contains(ArgFlags::SizePlusOne) {
    trace!("  adding 1 to size {size:#x}");
    size = size.saturating_add(1);
  }
  match arg.multiplier {
    Some(Multiplier::Const(n)) => size.saturating_mul(n),
    Some(Multiplier::Param(n)) => size.saturating_mul(walk.frame.param(n)),
    None => size,
  }
}

/// A 4-byte length stored inside the buffer itself.
///
/// The kernel may overwrite the field during the call, so the value read on
/// the first pre-call pass is the one every later pass uses.
fn size_from_field(walk: &mut Walk, ordinal: usize, start: u64, offset: u64) -> u64 {
  if !walk.pre {
    return walk.frame.extra(ExtraSlot::SizeFromField).unwrap_or(0);
  }
  let mut size = 0;
  if start != 0 {
    let field = start.wrapping_add(offset);
    if !walk.report(
      ordinal,
      ParamMode::In.into(),
      field,
      std::mem::size_of::<u32>() as u64,
      ParamType::Int,
      Cow::Borrowed("size field"),
    ) {
      return 0;
    }
    if walk.frame.first_iter {
      match read_u32(walk.host, field) {
        Some(value) => size = value as u64,
        None => warn!("cannot read struct size field at {field:#x}"),
      }
    } else {
      size = walk.frame.extra(ExtraSlot::SizeFromField).unwrap_or(0);
    }
  }
  if walk.frame.first_iter {
    walk.frame.set_extra(ExtraSlot::SizeFromField, size);
  }
  size
}
