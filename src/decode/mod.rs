//! Decoders for parameters whose memory effects depend on their content.

mod cstring;
mod msghdr;
mod sockaddr;

pub use sockaddr::{sockaddr_fields, SockaddrField};

use crate::{
  descriptor::{ArgumentDescriptor, Decoder},
  report::param_id,
  walk::Walk,
};

pub(crate) use cstring::{handle_cstring, handle_cstring_array};
pub(crate) use msghdr::{handle_iovec, handle_msghdr, handle_pollfds};
pub(crate) use sockaddr::handle_sockaddr;

/// Runs the decoder of `arg`, if any. Returns whether it took care of the
/// whole parameter, in which case the walker reports nothing for it.
pub(crate) fn handle_access(walk: &mut Walk, arg: &ArgumentDescriptor, start: u64, size: u64) -> bool {
  let Some(decoder) = arg.decoder else {
    return false;
  };
  match decoder {
    Decoder::CString => handle_cstring(walk, arg.ordinal, arg.flags, param_id(arg.ordinal), start, size),
    Decoder::CStringArray => {
      handle_cstring_array(walk, arg.ordinal, start);
      true
    }
    Decoder::Sockaddr => {
      handle_sockaddr(walk, start, size, arg.ordinal, arg.flags, param_id(arg.ordinal));
      true
    }
    Decoder::Msghdr => {
      handle_msghdr(walk, start, arg.ordinal, arg.flags);
      true
    }
    Decoder::Iovec => {
      handle_iovec(walk, start, size, arg.ordinal, arg.flags);
      true
    }
    Decoder::Pollfd => {
      handle_pollfds(walk, start, size, arg.ordinal);
      true
    }
  }
}
