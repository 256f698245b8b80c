//! Filter modes and the built-in syscall allow-list
//!
//! The allow-list is a fixed declarative table supplied by the program, not
//! runtime configuration; only the filter mode is selected at startup. The
//! table names every syscall the daemon's steady state needs, with a
//! per-argument restriction on the socket families it may open.

use crate::program::{RET_DATA_MASK, RET_ERRNO, RET_KILL_PROCESS, RET_LOG};
use crate::values::{ArgFilter, ValueSet};

/// What the compiled filter does when a syscall matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// No filtering at all; nothing is compiled or installed.
    No,
    /// Permit everything but have the kernel record unmatched syscalls.
    Log,
    /// Refuse unmatched syscalls with EPERM, recoverable by the caller.
    Fail,
    /// Kill the process on the first unmatched syscall.
    Kill,
}

impl FilterMode {
    /// Parse the runtime mode string.
    ///
    /// An unrecognized value is logged and treated as the weakest supported
    /// mode rather than rejected, so a typo in the setting never stops the
    /// service from starting.
    pub fn parse(name: &str) -> Self {
        if name.eq_ignore_ascii_case("no") {
            Self::No
        } else if name.eq_ignore_ascii_case("log") {
            Self::Log
        } else if name.eq_ignore_ascii_case("fail") {
            Self::Fail
        } else if name.eq_ignore_ascii_case("kill") {
            Self::Kill
        } else {
            tracing::warn!("unrecognized filter mode: {name}: filtering disabled");
            Self::No
        }
    }

    /// The return action for the "no match" path, or `None` when disabled.
    pub fn deny_action(self) -> Option<u32> {
        match self {
            Self::No => None,
            Self::Log => Some(RET_LOG),
            Self::Fail => Some(RET_ERRNO | (libc::EPERM as u32 & RET_DATA_MASK)),
            Self::Kill => Some(RET_KILL_PROCESS),
        }
    }
}

fn sys(number: libc::c_long) -> u32 {
    number as u32
}

/// The address families the daemon opens sockets for: local control
/// connections, TCP clients, and braille displays reached over bluetooth.
fn permitted_socket_domains() -> ValueSet {
    let mut domains = ValueSet::new("socket domain");
    domains.permit(libc::AF_UNIX as u32);
    domains.permit(libc::AF_INET as u32);
    domains.permit(libc::AF_INET6 as u32);
    domains.permit(libc::AF_BLUETOOTH as u32);
    domains
}

/// The built-in allow-list of permitted syscalls.
pub fn default_policy() -> ValueSet {
    let mut set = ValueSet::new("syscall");

    // Time and scheduling.
    set.permit(sys(libc::SYS_clock_gettime));
    set.permit(sys(libc::SYS_nanosleep));
    set.permit(sys(libc::SYS_futex));
    set.permit(sys(libc::SYS_get_robust_list));
    set.permit(sys(libc::SYS_set_robust_list));

    // File descriptor I/O.
    set.permit(sys(libc::SYS_read));
    set.permit(sys(libc::SYS_write));
    set.permit(sys(libc::SYS_readv));
    set.permit(sys(libc::SYS_writev));
    set.permit(sys(libc::SYS_pread64));
    set.permit(sys(libc::SYS_getrandom));
    set.permit(sys(libc::SYS_close));
    set.permit(sys(libc::SYS_openat));
    set.permit(sys(libc::SYS_fstat));
    set.permit(sys(libc::SYS_lseek));
    set.permit(sys(libc::SYS_ftruncate));
    set.permit(sys(libc::SYS_fcntl));
    set.permit(sys(libc::SYS_ioctl));
    set.permit(sys(libc::SYS_getcwd));
    set.permit(sys(libc::SYS_memfd_create));
    set.permit(sys(libc::SYS_eventfd2));
    set.permit(sys(libc::SYS_pipe2));

    // Networking.
    set.permit(sys(libc::SYS_recvfrom));
    set.permit(sys(libc::SYS_sendto));
    set.permit(sys(libc::SYS_recvmsg));
    set.permit(sys(libc::SYS_sendmsg));
    set.permit(sys(libc::SYS_sendmmsg));
    set.permit(sys(libc::SYS_socketpair));
    set.permit_when(
        sys(libc::SYS_socket),
        ArgFilter::new(0, permitted_socket_domains()),
    );
    set.permit(sys(libc::SYS_getsockopt));
    set.permit(sys(libc::SYS_setsockopt));
    set.permit(sys(libc::SYS_getsockname));
    set.permit(sys(libc::SYS_getpeername));
    set.permit(sys(libc::SYS_bind));
    set.permit(sys(libc::SYS_listen));
    set.permit(sys(libc::SYS_accept));
    set.permit(sys(libc::SYS_connect));

    // Memory management.
    set.permit(sys(libc::SYS_brk));
    set.permit(sys(libc::SYS_madvise));
    set.permit(sys(libc::SYS_mprotect));
    set.permit(sys(libc::SYS_mmap));
    set.permit(sys(libc::SYS_munmap));

    // Identity and signals.
    set.permit(sys(libc::SYS_getuid));
    set.permit(sys(libc::SYS_getgid));
    set.permit(sys(libc::SYS_geteuid));
    set.permit(sys(libc::SYS_getegid));
    set.permit(sys(libc::SYS_getpid));
    set.permit(sys(libc::SYS_prctl));
    set.permit(sys(libc::SYS_rt_sigaction));
    set.permit(sys(libc::SYS_rt_sigprocmask));
    set.permit(sys(libc::SYS_rt_sigreturn));
    set.permit(sys(libc::SYS_tgkill));

    // Process lifecycle.
    set.permit(sys(libc::SYS_clone));
    set.permit(sys(libc::SYS_execve));
    set.permit(sys(libc::SYS_sysinfo));
    set.permit(sys(libc::SYS_uname));
    set.permit(sys(libc::SYS_exit_group));
    set.permit(sys(libc::SYS_exit));

    // Legacy calls that newer architectures replaced with *at/extended
    // variants and that only exist on x86.
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        set.permit(sys(libc::SYS_poll));
        set.permit(sys(libc::SYS_select));
        set.permit(sys(libc::SYS_open));
        set.permit(sys(libc::SYS_stat));
        set.permit(sys(libc::SYS_access));
        set.permit(sys(libc::SYS_chmod));
        set.permit(sys(libc::SYS_link));
        set.permit(sys(libc::SYS_unlink));
        set.permit(sys(libc::SYS_symlink));
        set.permit(sys(libc::SYS_readlink));
        set.permit(sys(libc::SYS_mkdir));
        set.permit(sys(libc::SYS_getdents));
        set.permit(sys(libc::SYS_pipe));
        set.permit(sys(libc::SYS_fork));
    }

    set
}
