use std::borrow::Cow;

use enumflags2::BitFlags;
use log::warn;
use nix::libc::{sa_family_t, AF_INET, AF_INET6, AF_NETLINK, AF_UNIX};

use super::cstring::strnlen;
use crate::{
  context::ExtraSlot,
  descriptor::ArgFlags,
  host::read_u16,
  types::ParamType,
  walk::Walk,
};

const FAMILY_SIZE: u64 = std::mem::size_of::<sa_family_t>() as u64;
/// Capacity of `sun_path`.
const UNIX_PATH_MAX: u64 = 108;

/// A field of a socket address the kernel looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SockaddrField {
  pub offset: u64,
  pub size: u64,
  pub ty: ParamType,
  pub name: &'static str,
}

const fn field(offset: u64, size: u64, ty: ParamType, name: &'static str) -> SockaddrField {
  SockaddrField {
    offset,
    size,
    ty,
    name,
  }
}

const INET_FIELDS: &[SockaddrField] = &[
  field(2, 2, ParamType::Int, "sin_port"),
  field(4, 4, ParamType::Struct, "sin_addr"),
];

const INET6_FIELDS: &[SockaddrField] = &[
  field(2, 2, ParamType::Int, "sin6_port"),
  field(4, 4, ParamType::Int, "sin6_flowinfo"),
  field(8, 16, ParamType::Struct, "sin6_addr"),
  field(24, 4, ParamType::Int, "sin6_scope_id"),
];

const NETLINK_FIELDS: &[SockaddrField] = &[
  field(2, 2, ParamType::Int, "nl_pad"),
  field(4, 4, ParamType::Int, "nl_pid"),
  field(8, 4, ParamType::Int, "nl_groups"),
];

/// The fixed-size fields of a `family` address that fit in `socklen` bytes.
///
/// `None` for families without fixed fields, including `AF_UNIX` whose path
/// length depends on its content.
pub fn sockaddr_fields(family: u16, socklen: u64) -> Option<Vec<SockaddrField>> {
  let fields = match family as i32 {
    AF_INET => INET_FIELDS,
    AF_INET6 => INET6_FIELDS,
    AF_NETLINK => NETLINK_FIELDS,
    _ => return None,
  };
  Some(
    fields
      .iter()
      .filter(|f| socklen >= f.offset + f.size)
      .copied()
      .collect(),
  )
}

/// Reports the parts of a socket address the kernel reads or writes.
///
/// A written address is reported whole, bounded by the capacity passed in
/// before the call. A read address is reported field by field, never past
/// `socklen`.
pub(crate) fn handle_sockaddr(
  walk: &mut Walk,
  start: u64,
  socklen: u64,
  ordinal: usize,
  flags: BitFlags<ArgFlags>,
  id: Cow<'static, str>,
) {
  let write = flags.contains(ArgFlags::Write);
  let mut socklen = socklen;
  // when the buffer is too small the kernel stores the length it needed
  if walk.pre && walk.frame.first_iter && write {
    walk.frame.set_extra(ExtraSlot::Sockaddr, socklen);
  } else if !walk.pre && write {
    match walk.frame.extra(ExtraSlot::Sockaddr) {
      Some(capacity) => socklen = socklen.min(capacity),
      None => warn!("socket address of syscall {} decoded after the call only", walk.frame.number),
    }
  }
  if write {
    walk.report_flags(ordinal, flags, start, socklen, ParamType::Sockaddr, id);
    return;
  }
  if walk.pre
    && !walk.report_field(
      ordinal,
      flags,
      start,
      FAMILY_SIZE,
      ParamType::Int,
      ParamType::Sockaddr,
      Cow::Borrowed("sa_family"),
    )
  {
    return;
  }
  let Some(family) = read_u16(walk.host, start) else {
    return;
  };
  if family as i32 == AF_UNIX {
    let max = socklen.saturating_sub(FAMILY_SIZE).min(UNIX_PATH_MAX);
    let (len, _) = strnlen(walk.host, start.wrapping_add(FAMILY_SIZE), max);
    if len > 0 {
      walk.report_field(
        ordinal,
        flags,
        start.wrapping_add(FAMILY_SIZE),
        len,
        ParamType::CArray,
        ParamType::Sockaddr,
        Cow::Borrowed("sun_path"),
      );
    }
    return;
  }
  let Some(fields) = sockaddr_fields(family, socklen) else {
    warn!("unknown sockaddr family {family} in {id}");
    return;
  };
  for f in fields {
    if !walk.report_field(
      ordinal,
      flags,
      start.wrapping_add(f.offset),
      f.size,
      f.ty,
      ParamType::Sockaddr,
      Cow::Borrowed(f.name),
    ) {
      return;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn inet_fields_are_port_and_address() {
    let fields = sockaddr_fields(AF_INET as u16, 16).unwrap();
    let layout: Vec<_> = fields.iter().map(|f| (f.offset, f.size)).collect();
    assert_eq!(layout, [(2, 2), (4, 4)]);
  }

  #[test]
  fn fields_are_gated_by_socklen() {
    let fields = sockaddr_fields(AF_INET6 as u16, 24).unwrap();
    let names: Vec<_> = fields.iter().map(|f| f.name).collect();
    assert_eq!(names, ["sin6_port", "sin6_flowinfo", "sin6_addr"]);
    assert!(sockaddr_fields(AF_INET as u16, 3).unwrap().is_empty());
  }

  #[test]
  fn netlink_and_unknown_families() {
    assert_eq!(sockaddr_fields(AF_NETLINK as u16, 12).unwrap().len(), 3);
    assert!(sockaddr_fields(AF_UNIX as u16, 110).is_none());
    assert!(sockaddr_fields(0xffff, 128).is_none());
  }
}
