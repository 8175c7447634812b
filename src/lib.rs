//! Classifies the memory a Linux syscall reads and writes.
//!
//! An [`Engine`] holds descriptor tables of the syscalls it knows. A host
//! that intercepts syscalls calls [`Engine::on_pre_syscall`] and
//! [`Engine::on_post_syscall`] around each one and, from inside those hooks,
//! asks for the [`MemArg`] ranges of the current invocation. Syscalls
//! without a complete description are analyzed by diffing the memory their
//! arguments point to.

pub use nix::unistd::Pid;

mod arch;
mod context;
mod decode;
mod descriptor;
mod engine;
mod error;
mod filter;
mod host;
mod inspect;
pub mod ioctls;
mod number;
mod options;
mod policy;
mod registry;
mod report;
mod size;
pub mod syscalls;
mod types;
mod unknown;
mod walk;

pub use arch::PtraceRegisters;
pub use context::{InvocationContext, Phase, ThreadState, WalkState, MAX_ARGS};
pub use decode::{sockaddr_fields, SockaddrField};
pub use descriptor::*;
pub use engine::Engine;
pub use error::{Error, Result};
pub use filter::SyscallFilter;
pub use host::{ArgLocation, Host, ShadowOracle};
pub use inspect::{ptrace_getregs, PtraceHost};
pub use number::{SyscallNumber, CATCH_ALL_SECONDARY};
pub use options::Options;
pub use policy::{page_size, CapacityRule, Policy};
pub use registry::Registry;
pub use report::{MemArg, SyscallArg};
pub use types::{ParamMode, ParamType, ReturnType, WORD_SIZE};
