use std::borrow::Cow;

use enumflags2::BitFlags;
use log::trace;

use super::sockaddr::handle_sockaddr;
use crate::{
  context::ExtraSlot,
  descriptor::ArgFlags,
  host::{read_u32, read_word, Host},
  types::ParamType,
  walk::Walk,
};

/// Kernel layout of `struct msghdr` on 64-bit targets.
mod layout {
  pub const NAME: u64 = 0;
  pub const NAMELEN: u64 = 8;
  pub const IOV: u64 = 16;
  pub const IOVLEN: u64 = 24;
  pub const CONTROL: u64 = 32;
  pub const CONTROLLEN: u64 = 40;
  pub const FLAGS: u64 = 48;
  pub const SIZE: u64 = 56;

  pub const IOVEC_SIZE: u64 = 16;
  pub const IOV_LEN: u64 = 8;

  pub const POLLFD_SIZE: u64 = 8;
  pub const POLLFD_REVENTS: u64 = 6;
}

/// No bound on the bytes covered by the buffers of an iovec.
const NO_LIMIT: u64 = u64::MAX;
/// The kernel rejects longer vectors.
const UIO_MAXIOV: u64 = 1024;
/// Sanity bound on the entries of a pollfd array.
const MAX_POLLFDS: u64 = 1 << 20;

/// Reports the iovec array, then each buffer until `byte_limit` bytes are covered.
#[allow(clippy::too_many_arguments)]
fn check_iov(
  walk: &mut Walk,
  iov: u64,
  count: u64,
  byte_limit: u64,
  ordinal: usize,
  array_flags: BitFlags<ArgFlags>,
  buffer_flags: BitFlags<ArgFlags>,
  id: &'static str,
) {
  if iov == 0 || count == 0 {
    return;
  }
  if !walk.report_flags(
    ordinal,
    array_flags,
    iov,
    count.saturating_mul(layout::IOVEC_SIZE),
    ParamType::Iovec,
    Cow::Borrowed(id),
  ) {
    return;
  }
  let mut so_far = 0u64;
  for i in 0..count.min(UIO_MAXIOV) {
    let entry = iov.wrapping_add(i * layout::IOVEC_SIZE);
    let (Some(base), Some(mut len)) = (
      read_word(walk.host, entry),
      read_word(walk.host, entry.wrapping_add(layout::IOV_LEN)),
    ) else {
      continue;
    };
    let done = so_far.saturating_add(len) > byte_limit;
    if done {
      len = byte_limit - so_far;
    }
    so_far += len;
    trace!("iov entry {i}: buf={base:#x} len={len:#x}");
    if len > 0
      && !walk.report_flags(ordinal, buffer_flags, base, len, ParamType::Struct, Cow::Borrowed(id))
    {
      return;
    }
    if done {
      break;
    }
  }
}

fn read_fields(host: &dyn Host, msg: u64, ptr_at: u64, len_at: u64) -> Option<(u64, u64)> {
  let ptr = read_word(host, msg.wrapping_add(ptr_at))?;
  let len = if len_at == layout::NAMELEN {
    read_u32(host, msg.wrapping_add(len_at))? as u64
  } else {
    read_word(host, msg.wrapping_add(len_at))?
  };
  Some((ptr, len))
}

/// `sendmsg` when the entry is read, `recvmsg` when it is written.
pub(crate) fn handle_msghdr(walk: &mut Walk, msg: u64, ordinal: usize, flags: BitFlags<ArgFlags>) {
  let send = flags.contains(ArgFlags::Read);
  if walk.pre {
    msghdr_pre(walk, msg, ordinal, flags, send);
  } else if !send {
    recvmsg_post(walk, msg, ordinal, flags);
  }
}

fn msghdr_pre(walk: &mut Walk, msg: u64, ordinal: usize, flags: BitFlags<ArgFlags>, send: bool) {
  // msg_flags is an output of recvmsg
  let len = if send { layout::SIZE } else { layout::FLAGS };
  let id = if send { "sendmsg msg" } else { "recvmsg msg" };
  if !walk.report_flags(ordinal, flags, msg, len, ParamType::Msghdr, Cow::Borrowed(id)) {
    return;
  }
  if !send
    && !walk.report_field(
      ordinal,
      flags,
      msg.wrapping_add(layout::FLAGS),
      4,
      ParamType::Int,
      ParamType::Msghdr,
      Cow::Borrowed("recvmsg msg_flags"),
    )
  {
    return;
  }
  if let Some((name, namelen)) = read_fields(walk.host, msg, layout::NAME, layout::NAMELEN) {
    if name != 0 {
      if send {
        handle_sockaddr(walk, name, namelen, ordinal, ArgFlags::Read.into(), Cow::Borrowed("sendmsg addr"));
        if !walk.should_continue() {
          return;
        }
      } else if !walk.report_flags(ordinal, flags, name, namelen, ParamType::Sockaddr, Cow::Borrowed("recvmsg addr")) {
        return;
      }
    }
  }
  if let Some((iov, iovlen)) = read_fields(walk.host, msg, layout::IOV, layout::IOVLEN) {
    let id = if send { "sendmsg iov" } else { "recvmsg iov" };
    check_iov(walk, iov, iovlen, NO_LIMIT, ordinal, flags, flags, id);
    if !walk.should_continue() {
      return;
    }
  }
  match read_fields(walk.host, msg, layout::CONTROL, layout::CONTROLLEN) {
    Some((control, controllen)) => {
      if walk.frame.first_iter {
        walk.frame.set_extra(ExtraSlot::MsgControl, control);
        walk.frame.set_extra(ExtraSlot::MsgControlLen, controllen);
      }
      if control != 0 {
        let id = if send { "sendmsg msg_control" } else { "recvmsg msg_control" };
        walk.report_flags(ordinal, flags, control, controllen, ParamType::Struct, Cow::Borrowed(id));
      }
    }
    None if walk.frame.first_iter => {
      walk.frame.set_extra(ExtraSlot::MsgControl, 0);
      walk.frame.set_extra(ExtraSlot::MsgControlLen, 0);
    }
    None => {}
  }
}

fn recvmsg_post(walk: &mut Walk, msg: u64, ordinal: usize, flags: BitFlags<ArgFlags>) {
  let received = walk.frame.result.unwrap_or(0);
  let pre_control = walk.frame.extra(ExtraSlot::MsgControl).unwrap_or(0);
  let pre_controllen = walk.frame.extra(ExtraSlot::MsgControlLen).unwrap_or(0);
  if !walk.report_field(
    ordinal,
    flags,
    msg.wrapping_add(layout::FLAGS),
    4,
    ParamType::Int,
    ParamType::Msghdr,
    Cow::Borrowed("recvmsg msg_flags"),
  ) {
    return;
  }
  if let Some((iov, iovlen)) = read_fields(walk.host, msg, layout::IOV, layout::IOVLEN) {
    check_iov(walk, iov, iovlen, received, ordinal, flags, flags, "recvmsg iov");
    if !walk.should_continue() {
      return;
    }
  }
  if let Some((name, namelen)) = read_fields(walk.host, msg, layout::NAME, layout::NAMELEN) {
    if name != 0 {
      handle_sockaddr(walk, name, namelen, ordinal, flags, Cow::Borrowed("recvmsg addr"));
      if !walk.should_continue() {
        return;
      }
    }
  }
  // the kernel stores the control length it used
  let Some(controllen) = read_word(walk.host, msg.wrapping_add(layout::CONTROLLEN)) else {
    return;
  };
  let len = controllen.min(pre_controllen);
  if !walk.report_field(
    ordinal,
    flags,
    msg.wrapping_add(layout::CONTROLLEN),
    8,
    ParamType::Int,
    ParamType::Msghdr,
    Cow::Borrowed("recvmsg msg_controllen"),
  ) {
    return;
  }
  if pre_control != 0 && len > 0 {
    walk.report_flags(ordinal, flags, pre_control, len, ParamType::Struct, Cow::Borrowed("recvmsg msg_control"));
  }
}

/// readv/writev style vectors: `size` is the byte length of the array.
///
/// The kernel always reads the array. Buffers follow the direction of the
/// entry and, after the call, only the returned byte count of them counts.
pub(crate) fn handle_iovec(walk: &mut Walk, iov: u64, size: u64, ordinal: usize, flags: BitFlags<ArgFlags>) {
  let count = size / layout::IOVEC_SIZE;
  let limit = if walk.pre {
    NO_LIMIT
  } else {
    walk.frame.result.unwrap_or(0)
  };
  check_iov(walk, iov, count, limit, ordinal, ArgFlags::Read.into(), flags, "iov");
}

/// A pollfd array of `size` bytes: the kernel reads `fd` and `events` of every
/// entry before the call and writes `revents` after it.
pub(crate) fn handle_pollfds(walk: &mut Walk, fds: u64, size: u64, ordinal: usize) {
  let nfds = (size / layout::POLLFD_SIZE).min(MAX_POLLFDS);
  for i in 0..nfds {
    let entry = fds.wrapping_add(i * layout::POLLFD_SIZE);
    let delivered = if walk.pre {
      walk.report_flags(
        ordinal,
        ArgFlags::Read.into(),
        entry,
        layout::POLLFD_REVENTS,
        ParamType::Struct,
        Cow::Borrowed("pollfd"),
      )
    } else {
      walk.report_field(
        ordinal,
        ArgFlags::Write.into(),
        entry.wrapping_add(layout::POLLFD_REVENTS),
        layout::POLLFD_SIZE - layout::POLLFD_REVENTS,
        ParamType::Int,
        ParamType::Struct,
        Cow::Borrowed("revents"),
      )
    };
    if !delivered {
      return;
    }
  }
}
