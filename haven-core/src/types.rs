//! Core type definitions with strong typing

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ProcessId(i32);

impl ProcessId {
    /// Create from raw PID
    #[must_use]
    pub const fn from_raw(pid: i32) -> Self {
        Self(pid)
    }

    /// Get the current process ID
    #[must_use]
    pub fn current() -> Self {
        #[allow(clippy::cast_possible_wrap)]
        Self(std::process::id() as i32)
    }

    /// Convert to `nix::unistd::Pid`
    #[must_use]
    pub const fn as_nix_pid(self) -> nix::unistd::Pid {
        nix::unistd::Pid::from_raw(self.0)
    }

    /// Get raw PID value
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<nix::unistd::Pid> for ProcessId {
    fn from(pid: nix::unistd::Pid) -> Self {
        Self(pid.as_raw())
    }
}

impl From<ProcessId> for nix::unistd::Pid {
    fn from(pid: ProcessId) -> Self {
        nix::unistd::Pid::from_raw(pid.0)
    }
}

/// Launcher-assigned identity of a tracked process.
///
/// Unlike a [`ProcessId`], a handle id is never reused by the same launcher,
/// so it stays unambiguous after the kernel recycles the process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct HandleId(u64);

impl HandleId {
    /// Create from a raw value
    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reference to exactly one launched process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaunchHandle {
    id: HandleId,
    pid: ProcessId,
}

impl LaunchHandle {
    /// Create a handle. Only meaningful for the launcher that tracks `id`.
    #[must_use]
    pub const fn new(id: HandleId, pid: ProcessId) -> Self {
        Self { id, pid }
    }

    /// Launcher-assigned identity
    #[must_use]
    pub const fn id(&self) -> HandleId {
        self.id
    }

    /// Process id as seen from the launcher's PID namespace
    #[must_use]
    pub const fn pid(&self) -> ProcessId {
        self.pid
    }
}

impl fmt::Display for LaunchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (pid {})", self.id, self.pid)
    }
}

/// How a process terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with a status code
    Exited {
        /// Exit code passed to `exit(2)`
        code: i32,
    },
    /// Terminated by a signal
    Signaled {
        /// Terminating signal
        signal: Signal,
        /// Whether a core dump was produced
        core_dumped: bool,
    },
}

impl ExitStatus {
    /// Convert a terminal wait status. Returns `None` for non-terminal
    /// states (stopped, continued, still alive).
    #[must_use]
    pub const fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(Self::Exited { code }),
            WaitStatus::Signaled(_, signal, core_dumped) => Some(Self::Signaled {
                signal,
                core_dumped,
            }),
            _ => None,
        }
    }

    /// Whether the process exited normally with code 0
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self, Self::Exited { code: 0 })
    }

    /// Exit code, if the process exited normally
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        match self {
            Self::Exited { code } => Some(*code),
            Self::Signaled { .. } => None,
        }
    }

    /// Terminating signal, if the process was killed by one
    #[must_use]
    pub const fn signal(&self) -> Option<Signal> {
        match self {
            Self::Exited { .. } => None,
            Self::Signaled { signal, .. } => Some(*signal),
        }
    }

    /// Shell-style exit code: the exit code, or 128 + signal number
    #[must_use]
    pub const fn as_shell_code(&self) -> i32 {
        match self {
            Self::Exited { code } => *code,
            Self::Signaled { signal, .. } => 128 + *signal as i32,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code } => write!(f, "exited with code {code}"),
            Self::Signaled {
                signal,
                core_dumped: true,
            } => write!(f, "killed by {signal} (core dumped)"),
            Self::Signaled { signal, .. } => write!(f, "killed by {signal}"),
        }
    }
}

/// Observed lifecycle state of a tracked process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// The process has not terminated yet
    Running,
    /// The process terminated; the status has not been reaped yet
    Exited(ExitStatus),
}

impl LifecycleState {
    /// Whether the process has terminated
    #[must_use]
    pub const fn is_exited(&self) -> bool {
        matches!(self, Self::Exited(_))
    }
}

/// Step of a launch, used to report where it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum LaunchStage {
    /// Option validation and host capability checks
    Validate = 0,
    /// Combined process and namespace creation
    Clone = 1,
    /// Setting the hostname in the new UTS namespace
    Hostname = 2,
    /// Setting the NIS domain name in the new UTS namespace
    Domainname = 3,
    /// Making the new mount namespace recursively private
    MountPropagation = 4,
    /// Mounting a fresh `/proc` for the new PID namespace
    MountProc = 5,
    /// Changing to the requested working directory
    WorkingDir = 6,
    /// Replacing the program image
    Exec = 7,
}

impl LaunchStage {
    /// Wire code used by the child's failure report
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Decode a wire code
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Validate,
            1 => Self::Clone,
            2 => Self::Hostname,
            3 => Self::Domainname,
            4 => Self::MountPropagation,
            5 => Self::MountProc,
            6 => Self::WorkingDir,
            7 => Self::Exec,
            _ => return None,
        })
    }

    /// Stage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Clone => "clone",
            Self::Hostname => "hostname",
            Self::Domainname => "domainname",
            Self::MountPropagation => "mount propagation",
            Self::MountProc => "mount proc",
            Self::WorkingDir => "working directory",
            Self::Exec => "exec",
        }
    }
}

impl fmt::Display for LaunchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_id() {
        let pid = ProcessId::from_raw(123);
        assert_eq!(pid.as_raw(), 123);

        let nix_pid = pid.as_nix_pid();
        assert_eq!(nix_pid.as_raw(), 123);
    }

    #[test]
    fn test_handle_display() {
        let handle = LaunchHandle::new(HandleId::from_raw(3), ProcessId::from_raw(4242));
        assert_eq!(handle.to_string(), "#3 (pid 4242)");
    }

    #[test]
    fn test_exit_status_from_wait_status() {
        let pid = nix::unistd::Pid::from_raw(10);

        let status = ExitStatus::from_wait_status(WaitStatus::Exited(pid, 3)).unwrap();
        assert_eq!(status.code(), Some(3));
        assert!(!status.success());

        let status =
            ExitStatus::from_wait_status(WaitStatus::Signaled(pid, Signal::SIGKILL, false))
                .unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGKILL));
        assert_eq!(status.as_shell_code(), 137);

        assert!(ExitStatus::from_wait_status(WaitStatus::StillAlive).is_none());
        assert!(ExitStatus::from_wait_status(WaitStatus::Stopped(pid, Signal::SIGSTOP)).is_none());
    }

    #[test]
    fn test_launch_stage_codes() {
        for code in 0..8 {
            let stage = LaunchStage::from_code(code).unwrap();
            assert_eq!(stage.code(), code);
        }
        assert!(LaunchStage::from_code(99).is_none());
    }

    #[test]
    fn test_lifecycle_state() {
        assert!(!LifecycleState::Running.is_exited());
        assert!(LifecycleState::Exited(ExitStatus::Exited { code: 0 }).is_exited());
    }
}
