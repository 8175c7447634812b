use std::{borrow::Cow, fmt::Display};

use enumflags2::BitFlags;

use crate::{
  host::ArgLocation,
  number::SyscallNumber,
  types::{ParamMode, ParamType},
};

/// A memory range a syscall reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemArg {
  pub number: SyscallNumber,
  /// The syscall parameter the range hangs off.
  pub ordinal: usize,
  pub mode: BitFlags<ParamMode>,
  pub start: u64,
  pub size: u64,
  pub ty: ParamType,
  /// For a field, the type of the structure around it.
  pub containing_type: Option<ParamType>,
  /// `parameter #N`, or the name of a field.
  pub id: Cow<'static, str>,
  /// Whether the range was reported before the syscall ran.
  pub pre: bool,
}

impl MemArg {
  pub fn end(&self) -> u64 {
    self.start.saturating_add(self.size)
  }

  pub fn is_write(&self) -> bool {
    self.mode.contains(ParamMode::Out)
  }
}

impl Display for MemArg {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let direction = match (self.mode.contains(ParamMode::In), self.mode.contains(ParamMode::Out)) {
      (true, true) => "rw",
      (false, true) => "w",
      _ => "r",
    };
    write!(
      f,
      "{direction} {:#x}..{:#x} ({} bytes) {} {}",
      self.start,
      self.end(),
      self.size,
      self.ty,
      self.id
    )
  }
}

/// One syscall parameter or the return value, as seen by argument iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallArg {
  pub number: SyscallNumber,
  /// `None` for the return value.
  pub ordinal: Option<usize>,
  pub mode: BitFlags<ParamMode>,
  /// Absent for static iteration and for the return value before the call.
  pub value: Option<u64>,
  pub size: usize,
  pub ty: ParamType,
  pub location: Option<ArgLocation>,
}

impl SyscallArg {
  pub fn is_return_value(&self) -> bool {
    self.ordinal.is_none()
  }
}

/// Builds `parameter #N`, the identifier of a whole parameter.
pub(crate) fn param_id(ordinal: usize) -> Cow<'static, str> {
  Cow::Owned(format!("parameter #{ordinal}"))
}
