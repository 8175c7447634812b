use std::fmt::Display;

use enumflags2::bitflags;

/// Semantic type of a parameter, a reported memory range or a field inside one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
  Unknown,
  Void,
  Bool,
  Int,
  UnsignedInt,
  Size,
  Pointer,
  Struct,
  CArray,
  CString,
  CStringArray,
  Sockaddr,
  Msghdr,
  Iovec,
}

impl ParamType {
  pub fn name(self) -> &'static str {
    match self {
      ParamType::Unknown => "<unknown>",
      ParamType::Void => "void",
      ParamType::Bool => "bool",
      ParamType::Int => "int",
      ParamType::UnsignedInt => "unsigned int",
      ParamType::Size => "size_t",
      ParamType::Pointer => "void *",
      ParamType::Struct => "<struct>",
      ParamType::CArray => "<C array>",
      ParamType::CString => "char *",
      ParamType::CStringArray => "char **",
      ParamType::Sockaddr => "struct sockaddr",
      ParamType::Msghdr => "struct msghdr",
      ParamType::Iovec => "struct iovec",
    }
  }
}

impl Display for ParamType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.name())
  }
}

/// Width and signedness of a syscall's return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
  /// Register-wide signed value, the common case.
  Long,
  /// 32-bit signed value.
  Int,
  /// 32-bit unsigned value.
  UInt,
  /// An address, e.g. mmap.
  Pointer,
  Void,
}

impl ReturnType {
  pub fn param_type(self) -> ParamType {
    match self {
      ReturnType::Long | ReturnType::Int => ParamType::Int,
      ReturnType::UInt => ParamType::UnsignedInt,
      ReturnType::Pointer => ParamType::Pointer,
      ReturnType::Void => ParamType::Void,
    }
  }

  pub fn size(self) -> usize {
    match self {
      ReturnType::Int | ReturnType::UInt => 4,
      ReturnType::Long | ReturnType::Pointer | ReturnType::Void => WORD_SIZE,
    }
  }
}

pub const WORD_SIZE: usize = std::mem::size_of::<u64>();

/// How a reported parameter is accessed.
#[bitflags]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ParamMode {
  /// Read by the kernel.
  In = 0x01,
  /// Written by the kernel.
  Out = 0x02,
  /// The value lives in the argument slot itself.
  Inlined = 0x04,
  /// The syscall's return value.
  Retval = 0x08,
}
