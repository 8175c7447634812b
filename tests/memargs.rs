mod common;

use std::ops::ControlFlow;

use common::{init_logging, FakeHost};
use syscall_memargs::{
  ioctls::IOCTL_TCGETS,
  syscalls::{
    SYS_connect, SYS_execve, SYS_getgroups, SYS_getsockopt, SYS_ioctl, SYS_ppoll, SYS_read, SYS_recvfrom,
    SYS_recvmsg, SYS_sendmsg, SYS_write,
  },
  Engine, Error, MemArg, Options, ParamMode, ParamType, Policy, SyscallNumber, ThreadState,
};

fn ranges(args: &[MemArg]) -> Vec<(u64, u64)> {
  args.iter().map(|arg| (arg.start, arg.size)).collect()
}

fn post(engine: &Engine, thread: &mut ThreadState, host: &FakeHost, raw: u32, result: u64) -> Vec<MemArg> {
  host.set_result(result);
  engine.on_post_syscall(thread, host, raw);
  let args = engine.memory_arguments(thread, host).unwrap();
  engine.on_post_syscall_last(thread, host, raw);
  args
}

#[test]
fn read_reports_the_bytes_actually_read() {
  init_logging();
  let engine = Engine::new();
  let mut thread = ThreadState::new();
  let host = FakeHost::new(&[3, 0x1000, 100]).map_zeroed(0x1000, 100);
  assert!(engine.on_pre_syscall(&mut thread, &host, SYS_read));
  let pre = engine.memory_arguments(&mut thread, &host).unwrap();
  assert_eq!(ranges(&pre), [(0x1000, 100)]);
  assert!(pre[0].pre);
  assert_eq!(pre[0].mode, ParamMode::Out);
  assert_eq!(pre[0].id, "parameter #1");

  let written = post(&engine, &mut thread, &host, SYS_read, 42);
  assert_eq!(ranges(&written), [(0x1000, 42)]);
  assert!(written[0].is_write());
  assert!(!written[0].pre);
  assert_eq!(thread.depth(), 0);
}

#[test]
fn failed_read_reports_nothing_after_the_call() {
  init_logging();
  let engine = Engine::new();
  let mut thread = ThreadState::new();
  let host = FakeHost::new(&[3, 0x1000, 100]).map_zeroed(0x1000, 100);
  engine.on_pre_syscall(&mut thread, &host, SYS_read);
  engine.memory_arguments(&mut thread, &host).unwrap();
  let written = post(&engine, &mut thread, &host, SYS_read, (-14i64) as u64);
  assert!(written.is_empty());
}

#[test]
fn written_length_is_clamped_to_the_buffer() {
  init_logging();
  let engine = Engine::new();
  let mut thread = ThreadState::new();
  let host = FakeHost::new(&[3, 1, 7, 0x2000, 0x2100])
    .map_zeroed(0x2000, 64)
    .map_u32(0x2100, 64);
  engine.on_pre_syscall(&mut thread, &host, SYS_getsockopt);
  let pre = engine.memory_arguments(&mut thread, &host).unwrap();
  assert_eq!(ranges(&pre), [(0x2000, 64), (0x2100, 4)]);
  assert_eq!(pre[1].ty, ParamType::UnsignedInt);

  // the option did not fit: the kernel reports the length it needed
  host.poke(0x2100, &200u32.to_ne_bytes());
  let written = post(&engine, &mut thread, &host, SYS_getsockopt, 0);
  assert_eq!(ranges(&written), [(0x2000, 64), (0x2100, 4)]);
}

#[test]
fn known_ioctl_request_is_resolved() {
  init_logging();
  let engine = Engine::new();
  let mut thread = ThreadState::new();
  let host = FakeHost::new(&[0, IOCTL_TCGETS as u64, 0x4000]).map_zeroed(0x4000, 36);
  engine.on_pre_syscall(&mut thread, &host, SYS_ioctl);
  let descriptor = engine.current_syscall(&thread).unwrap();
  assert_eq!(descriptor.name, "ioctl.TCGETS");
  assert_eq!(thread.current().unwrap().number(), SyscallNumber::new(SYS_ioctl, IOCTL_TCGETS));
  let pre = engine.memory_arguments(&mut thread, &host).unwrap();
  assert_eq!(ranges(&pre), [(0x4000, 36)]);
  let written = post(&engine, &mut thread, &host, SYS_ioctl, 0);
  assert_eq!(ranges(&written), [(0x4000, 36)]);
}

#[test]
fn unknown_ioctl_request_uses_the_catch_all_entry() {
  init_logging();
  let engine = Engine::new();
  let mut thread = ThreadState::new();
  let host = FakeHost::new(&[3, 0xdead, 0x3000]);
  engine.on_pre_syscall(&mut thread, &host, SYS_ioctl);
  let descriptor = engine.current_syscall(&thread).unwrap();
  assert!(descriptor.number.is_catch_all());
  assert_eq!(descriptor.name, "ioctl");
  let frame = thread.current().unwrap();
  assert_eq!(frame.number(), SyscallNumber::catch_all(SYS_ioctl));
  assert!(!frame.is_known());
  // only the descriptor and the request are described
  assert!(engine.memory_arguments(&mut thread, &host).unwrap().is_empty());
}

#[test]
fn ipv4_address_reports_family_port_and_address() {
  init_logging();
  let engine = Engine::new();
  let mut thread = ThreadState::new();
  let mut sockaddr = Vec::new();
  sockaddr.extend((nix::libc::AF_INET as u16).to_ne_bytes());
  sockaddr.extend(8080u16.to_be_bytes());
  sockaddr.extend([127, 0, 0, 1]);
  sockaddr.extend([0; 8]);
  let host = FakeHost::new(&[3, 0x6000, 16]).map(0x6000, &sockaddr);
  engine.on_pre_syscall(&mut thread, &host, SYS_connect);
  let pre = engine.memory_arguments(&mut thread, &host).unwrap();
  assert_eq!(ranges(&pre), [(0x6000, 2), (0x6002, 2), (0x6004, 4)]);
  let ids: Vec<_> = pre.iter().map(|arg| arg.id.as_ref()).collect();
  assert_eq!(ids, ["sa_family", "sin_port", "sin_addr"]);
  assert!(pre
    .iter()
    .all(|arg| arg.mode == ParamMode::In && arg.containing_type == Some(ParamType::Sockaddr)));
  assert!(post(&engine, &mut thread, &host, SYS_connect, 0).is_empty());
}

#[test]
fn execve_reports_path_and_argument_strings() {
  init_logging();
  let engine = Engine::new();
  let mut thread = ThreadState::new();
  let host = FakeHost::new(&[0x7000, 0x7100, 0])
    .map(0x7000, b"/bin/ls\0")
    .map_u64(0x7100, 0x7200)
    .map_u64(0x7108, 0x7300)
    .map_u64(0x7110, 0)
    .map(0x7200, b"ls\0")
    .map(0x7300, b"-l\0");
  engine.on_pre_syscall(&mut thread, &host, SYS_execve);
  let pre = engine.memory_arguments(&mut thread, &host).unwrap();
  assert_eq!(ranges(&pre), [(0x7000, 8), (0x7200, 3), (0x7300, 3), (0x7100, 24)]);
  let types: Vec<_> = pre.iter().map(|arg| arg.ty).collect();
  assert_eq!(
    types,
    [
      ParamType::CString,
      ParamType::CString,
      ParamType::CString,
      ParamType::CStringArray
    ]
  );
}

#[test]
fn recvmsg_buffers_are_limited_to_the_bytes_received() {
  init_logging();
  let engine = Engine::new();
  let mut thread = ThreadState::new();
  let mut msghdr = Vec::new();
  msghdr.extend(0u64.to_ne_bytes()); // msg_name
  msghdr.extend(0u64.to_ne_bytes()); // msg_namelen + padding
  msghdr.extend(0x8100u64.to_ne_bytes()); // msg_iov
  msghdr.extend(2u64.to_ne_bytes()); // msg_iovlen
  msghdr.extend(0u64.to_ne_bytes()); // msg_control
  msghdr.extend(0u64.to_ne_bytes()); // msg_controllen
  msghdr.extend(0u64.to_ne_bytes()); // msg_flags + padding
  let host = FakeHost::new(&[3, 0x8000, 0])
    .map(0x8000, &msghdr)
    .map_u64(0x8100, 0x9000)
    .map_u64(0x8108, 16)
    .map_u64(0x8110, 0x9100)
    .map_u64(0x8118, 16)
    .map_zeroed(0x9000, 16)
    .map_zeroed(0x9100, 16);
  engine.on_pre_syscall(&mut thread, &host, SYS_recvmsg);
  let pre = engine.memory_arguments(&mut thread, &host).unwrap();
  assert_eq!(
    ranges(&pre),
    [(0x8000, 48), (0x8030, 4), (0x8100, 32), (0x9000, 16), (0x9100, 16)]
  );

  let written = post(&engine, &mut thread, &host, SYS_recvmsg, 20);
  let buffers: Vec<_> = written
    .iter()
    .filter(|arg| arg.start >= 0x9000)
    .map(|arg| (arg.start, arg.size))
    .collect();
  assert_eq!(buffers, [(0x9000, 16), (0x9100, 4)]);
  assert!(written.iter().all(|arg| arg.is_write()));
}

#[test]
fn consumer_stop_ends_delivery() {
  init_logging();
  let engine = Engine::new();
  let mut thread = ThreadState::new();
  let host = FakeHost::new(&[0xa000, 3, 0, 0, 8]).map_zeroed(0xa000, 24);
  engine.on_pre_syscall(&mut thread, &host, SYS_ppoll);
  for _ in 0..2 {
    let mut delivered = 0;
    engine
      .iterate_memory_arguments(&mut thread, &host, |_| {
        delivered += 1;
        ControlFlow::Break(())
      })
      .unwrap();
    assert_eq!(delivered, 1);
  }
  let written = post(&engine, &mut thread, &host, SYS_ppoll, 1);
  assert_eq!(ranges(&written), [(0xa006, 2), (0xa00e, 2), (0xa016, 2)]);
}

#[test]
fn post_call_iteration_needs_a_pre_call_one() {
  init_logging();
  let engine = Engine::new();
  let mut thread = ThreadState::new();
  let host = FakeHost::new(&[3, 0x1000, 100]).map_zeroed(0x1000, 100);
  assert_eq!(
    engine.memory_arguments(&mut thread, &host),
    Err(Error::InvalidParameter("no syscall in progress"))
  );
  engine.on_pre_syscall(&mut thread, &host, SYS_read);
  host.set_result(100);
  engine.on_post_syscall(&mut thread, &host, SYS_read);
  assert_eq!(engine.memory_arguments(&mut thread, &host), Err(Error::InvalidCall));
}

#[test]
fn sentinels_reveal_writes_of_unknown_syscalls() {
  init_logging();
  let engine = Engine::with_options(
    Options::default()
      .syscall_sentinels(true)
      .syscall_dword_granularity(false),
  );
  let mut thread = ThreadState::new();
  let host = FakeHost::new(&[0x5000])
    .map_zeroed(0x5000, 16)
    .undefined(0x5000, 16)
    .with_shadow();
  let raw = 4000;
  engine.on_pre_syscall(&mut thread, &host, raw);
  assert!(engine.current_syscall(&thread).is_err());
  assert!(engine.memory_arguments(&mut thread, &host).unwrap().is_empty());
  assert_eq!(host.peek(0x5000, 16), [0xab; 16]);

  // the syscall writes one byte
  host.poke(0x5004, &[0x11]);
  let written = post(&engine, &mut thread, &host, raw, 0);
  assert_eq!(ranges(&written), [(0x5004, 1)]);
  assert_eq!(written[0].ty, ParamType::Unknown);
  assert_eq!(written[0].ordinal, 0);
  let mut expected = [0u8; 16];
  expected[4] = 0x11;
  assert_eq!(host.peek(0x5000, 16), expected);
}

#[test]
fn unknown_syscall_writes_are_widened_to_dwords() {
  init_logging();
  let engine = Engine::new();
  let mut thread = ThreadState::new();
  let host = FakeHost::new(&[0x5000])
    .map(0x5000, &[7; 16])
    .undefined(0x5000, 16)
    .with_shadow();
  engine.on_pre_syscall(&mut thread, &host, 4000);
  engine.memory_arguments(&mut thread, &host).unwrap();
  host.poke(0x5005, &[1, 2]);
  let written = post(&engine, &mut thread, &host, 4000, 0);
  assert_eq!(ranges(&written), [(0x5004, 4)]);
}

#[test]
fn sentinels_stop_at_read_only_memory() {
  init_logging();
  let engine = Engine::with_options(Options::default().syscall_sentinels(true));
  let mut thread = ThreadState::new();
  let host = FakeHost::new(&[0x5000])
    .map_zeroed(0x5000, 8)
    .undefined(0x5000, 8)
    .read_only(0x5004, 4)
    .with_shadow();
  engine.on_pre_syscall(&mut thread, &host, 4000);
  engine.memory_arguments(&mut thread, &host).unwrap();
  assert_eq!(host.peek(0x5000, 8), [0xab, 0xab, 0xab, 0xab, 0, 0, 0, 0]);
  let written = post(&engine, &mut thread, &host, 4000, 0);
  assert!(written.is_empty());
  assert_eq!(host.peek(0x5000, 8), [0; 8]);
}

#[test]
fn argument_iteration_first_keeps_unknown_ioctl_analysis() {
  init_logging();
  let engine = Engine::with_options(Options::default().syscall_dword_granularity(false));
  let mut thread = ThreadState::new();
  let host = FakeHost::new(&[3, 0xdead, 0x5000])
    .map_zeroed(0x5000, 16)
    .undefined(0x5000, 16)
    .with_shadow();
  engine.on_pre_syscall(&mut thread, &host, SYS_ioctl);
  let mut described = 0;
  engine
    .iterate_arguments(&mut thread, &host, |_| {
      described += 1;
      ControlFlow::Continue(())
    })
    .unwrap();
  assert_eq!(described, 4);
  assert!(engine.memory_arguments(&mut thread, &host).unwrap().is_empty());

  host.poke(0x5004, &[0x11]);
  let written = post(&engine, &mut thread, &host, SYS_ioctl, 0);
  assert_eq!(ranges(&written), [(0x5004, 1)]);
  assert_eq!(written[0].ordinal, 2);
}

#[test]
fn capacity_rule_reports_the_whole_buffer_of_a_failed_call() {
  init_logging();
  const ERANGE: u64 = 34;
  let policy = Policy::default().with_capacity_rule(SyscallNumber::primary(SYS_read), ERANGE);
  let engine = Engine::with_policy(Options::default(), policy);
  let mut thread = ThreadState::new();
  let host = FakeHost::new(&[3, 0x1000, 100]).map_zeroed(0x1000, 100);
  engine.on_pre_syscall(&mut thread, &host, SYS_read);
  engine.memory_arguments(&mut thread, &host).unwrap();
  let written = post(&engine, &mut thread, &host, SYS_read, ERANGE.wrapping_neg());
  assert_eq!(ranges(&written), [(0x1000, 100)]);

  // any other error still writes nothing
  engine.on_pre_syscall(&mut thread, &host, SYS_read);
  engine.memory_arguments(&mut thread, &host).unwrap();
  assert!(post(&engine, &mut thread, &host, SYS_read, (-22i64) as u64).is_empty());
}

#[test]
fn address_length_is_ignored_without_an_address() {
  init_logging();
  let engine = Engine::new();
  let mut thread = ThreadState::new();
  let host = FakeHost::new(&[3, 0x1000, 64, 0, 0, 0x1100])
    .map_zeroed(0x1000, 64)
    .map_u32(0x1100, 16);
  engine.on_pre_syscall(&mut thread, &host, SYS_recvfrom);
  let pre = engine.memory_arguments(&mut thread, &host).unwrap();
  assert_eq!(ranges(&pre), [(0x1000, 64)]);
  let written = post(&engine, &mut thread, &host, SYS_recvfrom, 10);
  assert_eq!(ranges(&written), [(0x1000, 10)]);
}

#[test]
fn group_count_query_writes_nothing() {
  init_logging();
  let engine = Engine::new();
  let mut thread = ThreadState::new();
  let host = FakeHost::new(&[0, 0x1000]).map_zeroed(0x1000, 64);
  engine.on_pre_syscall(&mut thread, &host, SYS_getgroups);
  assert!(engine.memory_arguments(&mut thread, &host).unwrap().is_empty());
  assert!(post(&engine, &mut thread, &host, SYS_getgroups, 3).is_empty());

  let host = FakeHost::new(&[16, 0x1000]).map_zeroed(0x1000, 64);
  engine.on_pre_syscall(&mut thread, &host, SYS_getgroups);
  let pre = engine.memory_arguments(&mut thread, &host).unwrap();
  assert_eq!(ranges(&pre), [(0x1000, 64)]);
  let written = post(&engine, &mut thread, &host, SYS_getgroups, 3);
  assert_eq!(ranges(&written), [(0x1000, 12)]);
}

#[test]
fn nested_syscall_keeps_the_outer_invocation() {
  init_logging();
  let engine = Engine::new();
  let mut thread = ThreadState::new();
  let outer = FakeHost::new(&[3, 0x1000, 100]).map_zeroed(0x1000, 100);
  engine.on_pre_syscall(&mut thread, &outer, SYS_read);
  engine.memory_arguments(&mut thread, &outer).unwrap();

  // e.g. a signal handler running while the read is in progress
  let inner = FakeHost::new(&[1, 0x2000, 8]).map_zeroed(0x2000, 8);
  engine.on_pre_syscall(&mut thread, &inner, SYS_write);
  assert_eq!(thread.depth(), 2);
  assert_eq!(engine.current_syscall(&thread).unwrap().name, "write");
  let pre = engine.memory_arguments(&mut thread, &inner).unwrap();
  assert_eq!(ranges(&pre), [(0x2000, 8)]);
  assert!(post(&engine, &mut thread, &inner, SYS_write, 8).is_empty());
  assert_eq!(thread.depth(), 1);

  assert_eq!(engine.current_syscall(&thread).unwrap().name, "read");
  assert_eq!(engine.pre_syscall_arg(&thread, 2), Ok(100));
  let written = post(&engine, &mut thread, &outer, SYS_read, 42);
  assert_eq!(ranges(&written), [(0x1000, 42)]);
  assert_eq!(thread.depth(), 0);
}

#[test]
fn message_header_at_the_top_of_memory_is_tolerated() {
  init_logging();
  let engine = Engine::new();
  let mut thread = ThreadState::new();
  let msg = u64::MAX - 15;
  for raw in [SYS_sendmsg, SYS_recvmsg] {
    let host = FakeHost::new(&[3, msg, 0]);
    engine.on_pre_syscall(&mut thread, &host, raw);
    let pre = engine.memory_arguments(&mut thread, &host).unwrap();
    assert_eq!(pre[0].start, msg);
    let written = post(&engine, &mut thread, &host, raw, (-14i64) as u64);
    assert!(written.is_empty());
    assert_eq!(thread.depth(), 0);
  }
}
