use enumflags2::{bitflags, BitFlags};

use crate::{
  number::SyscallNumber,
  types::{ParamMode, ParamType, ReturnType},
};

/// Per-entry behaviour flags of an [`ArgumentDescriptor`].
#[bitflags]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ArgFlags {
  /// The kernel reads the pointed-to memory.
  Read = 0x0001,
  /// The kernel writes the pointed-to memory.
  Write = 0x0002,
  /// The whole value lives in the argument slot.
  Inlined = 0x0004,
  /// Only meaningful for argument iteration; memory is handled elsewhere.
  NonMemarg = 0x0008,
  /// The length lives behind a pointer that the kernel updates.
  LengthInOut = 0x0010,
  /// Add one to the resolved size, typically a string terminator.
  SizePlusOne = 0x0020,
  /// Skip this entry if the pointer of the next entry is null.
  IgnoreIfNextNull = 0x0040,
  /// Skip this entry if the pointer of the previous entry is null.
  IgnoreIfPrevNull = 0x0080,
  /// Nothing is written when the count named by the first entry of the pair is zero.
  NoWriteIfCountZero = 0x0100,
}

/// Per-syscall flags of a [`SyscallDescriptor`].
#[bitflags]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyscallFlags {
  /// Every memory parameter is described, so no heuristic diffing is needed.
  AllParamsKnown = 0x0001,
  /// The first entry names the argument holding a secondary code.
  Multiplexed = 0x0002,
  /// Only a zero return value indicates failure.
  RetZeroFail = 0x0004,
  /// Only a return value of -1 indicates failure.
  RetMinus1Fail = 0x0008,
  /// The return type is only known dynamically.
  RetTypeVaries = 0x0010,
  /// The return value is 64 bits wide even on 32-bit ABIs.
  Ret64Bit = 0x0020,
}

pub fn syscall_flags(flags: &[SyscallFlags]) -> BitFlags<SyscallFlags> {
  flags.iter().fold(BitFlags::empty(), |acc, flag| acc | *flag)
}

/// A parameter ordinal, as bound by the table macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Param(pub usize);

impl Param {
  /// The size is behind the pointer passed in this parameter.
  pub fn inout(self) -> SizeRule {
    SizeRule::InOut(self.0)
  }
}

/// Where the byte length of a memory argument comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeRule {
  Fixed(u64),
  /// The value of another parameter.
  Param(usize),
  /// The current value behind the pointer in another parameter.
  InOut(usize),
  /// A 4-byte field at `offset` inside the buffer itself.
  Field { offset: u64 },
  /// The syscall's return value.
  Retval,
  /// Only discoverable by scanning the content.
  Dynamic,
}

pub const RET: SizeRule = SizeRule::Retval;

impl From<usize> for SizeRule {
  fn from(size: usize) -> Self {
    SizeRule::Fixed(size as u64)
  }
}

impl From<Param> for SizeRule {
  fn from(param: Param) -> Self {
    SizeRule::Param(param.0)
  }
}

/// Scales a resolved size into bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplier {
  Const(u64),
  Param(usize),
}

impl From<usize> for Multiplier {
  fn from(size: usize) -> Self {
    Multiplier::Const(size as u64)
  }
}

impl From<Param> for Multiplier {
  fn from(param: Param) -> Self {
    Multiplier::Param(param.0)
  }
}

/// Structures whose memory effects must be walked field by field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
  CString,
  CStringArray,
  Sockaddr,
  Msghdr,
  Iovec,
  /// `struct pollfd` arrays: `fd` and `events` in, `revents` out.
  Pollfd,
}

impl Decoder {
  pub fn param_type(self) -> ParamType {
    match self {
      Decoder::CString => ParamType::CString,
      Decoder::CStringArray => ParamType::CStringArray,
      Decoder::Sockaddr => ParamType::Sockaddr,
      Decoder::Msghdr => ParamType::Msghdr,
      Decoder::Iovec => ParamType::Iovec,
      Decoder::Pollfd => ParamType::Struct,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentDescriptor {
  pub ordinal: usize,
  pub size: SizeRule,
  pub flags: BitFlags<ArgFlags>,
  pub multiplier: Option<Multiplier>,
  pub ty: Option<ParamType>,
  pub decoder: Option<Decoder>,
}

impl ArgumentDescriptor {
  pub fn new(
    ordinal: usize,
    size: impl Into<SizeRule>,
    flags: impl Into<BitFlags<ArgFlags>>,
  ) -> Self {
    Self {
      ordinal,
      size: size.into(),
      flags: flags.into(),
      multiplier: None,
      ty: None,
      decoder: None,
    }
  }

  pub fn typed(mut self, ty: ParamType) -> Self {
    self.ty = Some(ty);
    self
  }

  pub fn decoded(mut self, decoder: Decoder) -> Self {
    self.decoder = Some(decoder);
    self
  }

  pub fn elements(mut self, multiplier: impl Into<Multiplier>) -> Self {
    self.multiplier = Some(multiplier.into());
    self
  }

  pub fn with(mut self, flags: impl Into<BitFlags<ArgFlags>>) -> Self {
    self.flags |= flags.into();
    self
  }

  pub fn is_read(&self) -> bool {
    self.flags.contains(ArgFlags::Read)
  }

  pub fn is_write(&self) -> bool {
    self.flags.contains(ArgFlags::Write)
  }

  pub fn is_inlined(&self) -> bool {
    self.flags.contains(ArgFlags::Inlined)
  }

  /// Declared width in bytes, if the entry has a constant one.
  pub fn fixed_size(&self) -> Option<u64> {
    match self.size {
      SizeRule::Fixed(size) => Some(size),
      _ => None,
    }
  }

  pub fn mode(&self) -> BitFlags<ParamMode> {
    mode_from_flags(self.flags)
  }

  /// The type reported for the entry as a whole.
  pub fn param_type(&self) -> ParamType {
    self
      .ty
      .or_else(|| self.decoder.map(Decoder::param_type))
      .unwrap_or(if self.is_inlined() {
        ParamType::Unknown
      } else {
        ParamType::Struct
      })
  }
}

pub fn mode_from_flags(flags: BitFlags<ArgFlags>) -> BitFlags<ParamMode> {
  let mut mode = BitFlags::empty();
  if flags.contains(ArgFlags::Write) {
    mode |= ParamMode::Out;
  }
  if flags.intersects(ArgFlags::Read | ArgFlags::Inlined) {
    mode |= ParamMode::In;
  }
  if flags.contains(ArgFlags::Inlined) {
    mode |= ParamMode::Inlined;
  }
  mode
}

/// A memory argument of `size` bytes.
pub fn mem(
  param: Param,
  size: impl Into<SizeRule>,
  flags: impl Into<BitFlags<ArgFlags>>,
) -> ArgumentDescriptor {
  ArgumentDescriptor::new(param.0, size, flags)
}

/// A scalar passed in the argument slot itself.
pub fn inlined(param: Param, width: usize) -> ArgumentDescriptor {
  ArgumentDescriptor::new(param.0, width, ArgFlags::Inlined).typed(ParamType::Int)
}

/// A NUL-terminated string read by the kernel.
pub fn cstring(param: Param) -> ArgumentDescriptor {
  ArgumentDescriptor::new(param.0, SizeRule::Dynamic, ArgFlags::Read).decoded(Decoder::CString)
}

/// Names the argument a multiplexed syscall takes its secondary code from.
pub fn code(param: Param) -> ArgumentDescriptor {
  ArgumentDescriptor::new(param.0, std::mem::size_of::<u32>(), ArgFlags::Inlined | ArgFlags::NonMemarg)
    .typed(ParamType::UnsignedInt)
}

/// The descriptor and request code every ioctl takes.
pub fn fd_req(fd: Param, request: Param) -> [ArgumentDescriptor; 2] {
  [
    inlined(fd, std::mem::size_of::<i32>()),
    inlined(request, std::mem::size_of::<u32>()).typed(ParamType::UnsignedInt),
  ]
}

/// Collects one or more argument entries written in a table.
pub trait IntoArgs {
  fn push_into(self, args: &mut Vec<ArgumentDescriptor>);
}

impl IntoArgs for ArgumentDescriptor {
  fn push_into(self, args: &mut Vec<ArgumentDescriptor>) {
    args.push(self);
  }
}

impl<const N: usize> IntoArgs for [ArgumentDescriptor; N] {
  fn push_into(self, args: &mut Vec<ArgumentDescriptor>) {
    args.extend(self);
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallDescriptor {
  pub number: SyscallNumber,
  pub name: String,
  pub arg_count: usize,
  pub args: Vec<ArgumentDescriptor>,
  pub return_type: ReturnType,
  pub flags: BitFlags<SyscallFlags>,
}

impl SyscallDescriptor {
  pub fn new(
    number: SyscallNumber,
    name: impl Into<String>,
    arg_count: usize,
    args: Vec<ArgumentDescriptor>,
    return_type: ReturnType,
    flags: BitFlags<SyscallFlags>,
  ) -> Self {
    Self {
      number,
      name: name.into(),
      arg_count,
      args,
      return_type,
      flags,
    }
  }

  /// Stand-in for a syscall without a table entry.
  pub(crate) fn unknown(number: SyscallNumber) -> Self {
    Self::new(number, "<unknown>", 0, Vec::new(), ReturnType::Long, BitFlags::empty())
  }

  pub fn all_params_known(&self) -> bool {
    self.flags.contains(SyscallFlags::AllParamsKnown)
  }

  pub fn is_multiplexed(&self) -> bool {
    self.flags.contains(SyscallFlags::Multiplexed)
  }

  /// Ordinal of the argument holding the secondary code of a multiplexed syscall.
  pub fn code_ordinal(&self) -> Option<usize> {
    if self.is_multiplexed() {
      self.args.first().map(|arg| arg.ordinal)
    } else {
      None
    }
  }

  /// The entry after `index` when it describes the same parameter.
  pub(crate) fn second_of_pair(&self, index: usize) -> Option<&ArgumentDescriptor> {
    let first = self.args.get(index)?;
    self.args.get(index + 1).filter(|next| next.ordinal == first.ordinal)
  }

  /// The entry declaring the width of parameter `ordinal`, searched the way a
  /// size reference is resolved: from the start if the parameter precedes
  /// the referencing entry, otherwise from the entry after it.
  pub(crate) fn width_entry(&self, referencing: usize, ordinal: usize) -> Option<&ArgumentDescriptor> {
    let from_ordinal = self.args.get(referencing)?.ordinal;
    let start = if ordinal < from_ordinal { 0 } else { referencing + 1 };
    self.args.iter().skip(start).find(|arg| arg.ordinal == ordinal)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mode_follows_direction_flags() {
    assert_eq!(mode_from_flags(ArgFlags::Read.into()), ParamMode::In);
    assert_eq!(mode_from_flags(ArgFlags::Write.into()), ParamMode::Out);
    assert_eq!(
      mode_from_flags(ArgFlags::Read | ArgFlags::Write),
      ParamMode::In | ParamMode::Out
    );
    assert_eq!(
      mode_from_flags(ArgFlags::Inlined.into()),
      ParamMode::In | ParamMode::Inlined
    );
  }

  #[test]
  fn untyped_memory_is_a_struct() {
    assert_eq!(mem(Param(1), 8usize, ArgFlags::Write).param_type(), ParamType::Struct);
    assert_eq!(cstring(Param(0)).param_type(), ParamType::CString);
    assert_eq!(inlined(Param(0), 4).param_type(), ParamType::Int);
  }

  #[test]
  fn width_entry_search_direction() {
    // recvfrom-like: buf sized by param 2, addr sized through param 5
    let desc = SyscallDescriptor::new(
      SyscallNumber::primary(45),
      "recvfrom",
      6,
      vec![
        inlined(Param(2), 8),
        mem(Param(1), Param(2), ArgFlags::Write),
        mem(Param(4), Param(5).inout(), ArgFlags::Write).decoded(Decoder::Sockaddr),
        mem(Param(5), 4usize, ArgFlags::Read | ArgFlags::Write),
      ],
      ReturnType::Long,
      syscall_flags(&[SyscallFlags::AllParamsKnown]),
    );
    assert_eq!(desc.width_entry(1, 2).and_then(|a| a.fixed_size()), Some(8));
    assert_eq!(desc.width_entry(2, 5).and_then(|a| a.fixed_size()), Some(4));
    assert!(desc.second_of_pair(1).is_none());
  }

  #[test]
  fn code_ordinal_only_for_multiplexed() {
    let desc = SyscallDescriptor::new(
      SyscallNumber::primary(16),
      "ioctl",
      3,
      vec![code(Param(1))],
      ReturnType::Long,
      syscall_flags(&[SyscallFlags::Multiplexed]),
    );
    assert_eq!(desc.code_ordinal(), Some(1));
    assert!(!desc.all_params_known());
  }
}
