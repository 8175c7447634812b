use std::{collections::HashMap, error::Error, ffi::CString, ops::ControlFlow};

use nix::{
  errno::Errno,
  sys::{
    ptrace::{self, traceme},
    signal::{raise, Signal},
    wait::{waitpid, WaitPidFlag, WaitStatus},
  },
  unistd::{execvp, fork, getpid, setpgid, ForkResult, Pid},
};
use owo_colors::OwoColorize;

use syscall_memargs::{Engine, MemArg, PtraceHost, ThreadState};

#[derive(Default)]
struct Tracee {
  thread: ThreadState,
  /// The syscall the tracee is stopped inside and whether the engine saw it enter.
  in_syscall: Option<(u32, bool)>,
}

#[derive(Debug, PartialEq, Eq)]
enum Stop {
  Enter,
  Exit(u32),
  Ignored,
}

impl Tracee {
  /// Alternates between enter and exit stops, whether or not the engine
  /// handles the syscall.
  fn on_stop(&mut self, raw: u32, dispatched: bool) -> Stop {
    match self.in_syscall.take() {
      None => {
        self.in_syscall = Some((raw, dispatched));
        if dispatched {
          Stop::Enter
        } else {
          Stop::Ignored
        }
      }
      Some((raw, true)) => Stop::Exit(raw),
      Some((_, false)) => Stop::Ignored,
    }
  }
}

fn ptrace_syscall(child: Pid, sig: Option<Signal>) -> Result<(), Errno> {
  match ptrace::syscall(child, sig) {
    Err(Errno::ESRCH) => {
      eprintln!("memtrace: warning: child process {child} gone");
      return Ok(());
    }
    r => r?,
  }
  Ok(())
}

fn print_memarg(counter: usize, arg: &MemArg) -> ControlFlow<()> {
  if arg.is_write() {
    eprintln!("{}   {}", counter.bold().red(), arg.bright_magenta());
  } else {
    eprintln!("{}   {}", counter.bold().red(), arg.bright_cyan());
  }
  ControlFlow::Continue(())
}

fn main() -> Result<(), Box<dyn Error>> {
  env_logger::init();
  let args = std::env::args_os()
    .skip(1)
    .map(|os| CString::new(os.into_encoded_bytes()))
    .collect::<Result<Vec<CString>, _>>()?;
  if args.is_empty() {
    eprintln!("memtrace: usage: memtrace <program> [args...]");
    return Ok(());
  }
  let program = args[0].clone();
  let child = match unsafe { fork()? } {
    ForkResult::Parent { child } => child,
    ForkResult::Child => {
      let me = getpid();
      setpgid(me, me)?;
      traceme()?;
      raise(Signal::SIGSTOP)?;
      execvp(&program, &args)?;
      return Ok(());
    }
  };
  // wait for child to be stopped by SIGSTOP
  loop {
    let status = waitpid(child, Some(WaitPidFlag::WSTOPPED))?;
    match status {
      WaitStatus::Stopped(_, Signal::SIGSTOP) => {
        break;
      }
      _ => {
        // tracee stopped by other signal, restarting it...
        ptrace::cont(child, None)?;
      }
    }
  }
  let ptrace_opts = {
    use nix::sys::ptrace::Options;
    Options::PTRACE_O_TRACEEXIT | Options::PTRACE_O_EXITKILL | Options::PTRACE_O_TRACESYSGOOD
  };
  ptrace::setoptions(child, ptrace_opts)?;
  ptrace::syscall(child, None)?;

  let engine = Engine::new();
  engine.filter_all();
  let mut tracees: HashMap<Pid, Tracee> = HashMap::new();
  let mut counter: usize = 0;
  loop {
    let status = waitpid(None, Some(WaitPidFlag::__WALL))?;
    match status {
      WaitStatus::Stopped(pid, sig) => {
        // Deliver the signal to the child
        ptrace_syscall(pid, Some(sig))?;
      }
      WaitStatus::Exited(pid, code) => {
        eprintln!("memtrace: child {pid} exited with code {code}");
        break;
      }
      WaitStatus::Signaled(pid, sig, _) => {
        eprintln!("memtrace: child {pid} signaled with {sig:?}");
        break;
      }
      WaitStatus::PtraceSyscall(pid) => {
        let host = PtraceHost::new(pid)?;
        let tracee = tracees.entry(pid).or_default();
        let raw = host.syscall_number();
        match tracee.on_stop(raw, engine.is_filtered(raw)) {
          Stop::Enter => {
            let thread = &mut tracee.thread;
            engine.on_pre_syscall(thread, &host, raw);
            let name = engine
              .current_syscall(thread)
              .map(|d| d.name.clone())
              .unwrap_or_else(|_| format!("syscall_{raw}"));
            eprintln!("{} syscall-enter: {}", counter.bold().red(), name.bright_green());
            engine.iterate_memory_arguments(thread, &host, |arg| print_memarg(counter, arg))?;
          }
          Stop::Exit(raw) => {
            let thread = &mut tracee.thread;
            engine.on_post_syscall(thread, &host, raw);
            let (succeeded, value, _) = engine.current_result(thread)?;
            eprintln!(
              "{} syscall-exit : {:#x} {}",
              counter.bold().red(),
              value.bright_yellow(),
              if succeeded { "ok" } else { "failed" }
            );
            engine.iterate_memory_arguments(thread, &host, |arg| print_memarg(counter, arg))?;
            engine.on_post_syscall_last(thread, &host, raw);
            counter += 1;
          }
          Stop::Ignored => {}
        }
        ptrace_syscall(pid, None)?;
      }
      _ => ptrace_syscall(child, None)?,
    }
  }
  Ok(())
}
