//! Installs a compiled filter program via the kernel seccomp facility
//!
//! Installation failure is never fatal to the caller: the service can run
//! unprotected, so every error here is meant to be logged and skipped.

use thiserror::Error;

use crate::program::FilterProgram;

#[derive(Debug, Error)]
pub enum InstallError {
    /// The kernel (or this build's target) lacks seccomp filtering.
    #[error("seccomp filtering is not supported on this platform")]
    Unsupported,

    /// Locking out privilege escalation failed, so the kernel would refuse
    /// the filter anyway.
    #[error("PR_SET_NO_NEW_PRIVS failed: {0}")]
    NoNewPrivs(nix::errno::Errno),

    /// The kernel rejected the finished program.
    #[error("kernel rejected the filter program: {0}")]
    Rejected(nix::errno::Errno),
}

#[cfg(target_os = "linux")]
mod imp {
    use nix::errno::Errno;

    use super::InstallError;
    use crate::program::FilterProgram;

    const SECCOMP_SET_MODE_FILTER: libc::c_long = 1;

    /// Whether this kernel supports seccomp at all.
    pub fn supported() -> bool {
        let rc = unsafe { libc::prctl(libc::PR_GET_SECCOMP) };
        rc != -1 || Errno::last() != Errno::EINVAL
    }

    pub fn install(prog: &FilterProgram) -> Result<(), InstallError> {
        if !supported() {
            return Err(InstallError::Unsupported);
        }

        // Required before an unprivileged process may install a filter, and
        // wanted regardless: the filter outlives execve.
        if unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) } == -1 {
            return Err(InstallError::NoNewPrivs(Errno::last()));
        }

        let raw = prog.to_raw();
        let fprog = libc::sock_fprog {
            len: raw.len() as libc::c_ushort,
            filter: raw.as_ptr().cast::<libc::sock_filter>().cast_mut(),
        };
        let rc = unsafe {
            libc::syscall(
                libc::SYS_seccomp,
                SECCOMP_SET_MODE_FILTER,
                0,
                &fprog as *const libc::sock_fprog,
            )
        };
        if rc == -1 {
            return Err(InstallError::Rejected(Errno::last()));
        }
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::InstallError;
    use crate::program::FilterProgram;

    pub fn supported() -> bool {
        false
    }

    pub fn install(_prog: &FilterProgram) -> Result<(), InstallError> {
        Err(InstallError::Unsupported)
    }
}

/// Whether a filter could be installed on this platform.
pub fn supported() -> bool {
    imp::supported()
}

/// Hand the finished program to the kernel. The installed filter is
/// immutable for the life of the process.
pub fn install(prog: &FilterProgram) -> Result<(), InstallError> {
    imp::install(prog)
}
