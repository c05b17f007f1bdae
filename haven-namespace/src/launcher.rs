//! Process launching in new namespaces, and lifecycle of launched processes
//!
//! This module uses `unsafe` for clone(2), which is inherently unsafe
//! but is the only way to create a process and its namespaces in one step.

#![allow(unsafe_code)]

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use haven_core::{
    Error, ExitStatus, HandleId, LaunchHandle, LaunchStage, LifecycleState, ProcessId, Result,
};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sched::{CloneCb, clone};
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{Id, WaitPidFlag, waitid, waitpid};
use nix::unistd::{AccessFlags, Pid, access, pipe2};
use tracing::{debug, info, warn};

use crate::child::{ChildSetup, Failure};
use crate::config::{IsolationOptions, NamespaceSet};

/// Stack handed to the child for the short stretch before `execve`
const STACK_SIZE: usize = 1024 * 1024;

/// Search path used when neither the options nor the launcher set `PATH`
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

#[derive(Debug)]
struct Entry {
    pid: Pid,
    exited: Option<ExitStatus>,
    /// A `wait` call is blocked on this process
    claimed: bool,
}

/// Launches processes into new namespaces and tracks them until reaped
///
/// Every launched process stays in the tracking table until [`wait`] has
/// consumed its exit status, so no process is left as an unreaped zombie
/// behind the caller's back.
///
/// With a PID namespace, the launched command is PID 1 of that namespace:
/// when it exits, every other process in the namespace is killed, and the
/// kernel ignores signals it has no handler for (only `SIGKILL` and
/// `SIGSTOP` sent from outside the namespace are always delivered).
///
/// [`wait`]: Self::wait
#[derive(Debug, Default)]
pub struct NamespaceLauncher {
    processes: Mutex<HashMap<HandleId, Entry>>,
    /// Signalled whenever a `wait` gives up its claim on an entry
    released: Condvar,
    next_id: AtomicU64,
}

impl NamespaceLauncher {
    /// Create a launcher with an empty tracking table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a process inside the requested new namespaces
    ///
    /// Returns once the program image has been replaced; it does not wait
    /// for the program to finish. Namespace setup in the child is complete
    /// before the program starts.
    ///
    /// # Errors
    /// - `InvalidConfig` / `UnsupportedNamespaceKind`: rejected before any
    ///   process was created
    /// - `CommandNotExecutable`: the program could not be executed
    /// - `PermissionDenied`: missing capability to create a namespace or
    ///   configure it
    /// - `ProcessCreationFailed`: `clone(2)` or a setup step failed
    pub fn launch(&self, options: IsolationOptions) -> Result<LaunchHandle> {
        options.validate()?;
        check_supported(options.namespaces)?;

        if options.has_stale_proc() {
            warn!(
                namespaces = %options.namespaces,
                "PID namespace without mount namespace: /proc still shows the parent's processes"
            );
        }

        let program = resolve_program(&options)?;
        let setup = ChildSetup::prepare(&options, &program)?;

        let (report_rx, report_tx) = pipe2(OFlag::O_CLOEXEC)?;
        let report_fd = report_tx.as_raw_fd();
        let mut stack = vec![0u8; STACK_SIZE];
        let flags = options.namespaces.to_clone_flags();

        debug!(
            program = %program.display(),
            args = ?options.args,
            namespaces = %options.namespaces,
            "Cloning process"
        );

        let cb: CloneCb<'_> = Box::new(|| setup.run(report_fd));

        // SAFETY: the child runs `setup.run` on its own copy of the address
        // space and stack, and only issues syscalls before execve or exit.
        let child = unsafe { clone(cb, &mut stack, flags, Some(Signal::SIGCHLD as i32)) }
            .map_err(|errno| clone_error(errno, options.namespaces))?;

        // Our copy of the write end must be gone for EOF to mean "exec'd"
        drop(report_tx);

        match read_report(report_rx) {
            Ok(None) => {}
            Ok(Some(failure)) => {
                reap_blocking(child);
                warn!(
                    pid = %child,
                    stage = %failure.stage,
                    error = %failure.errno,
                    "Launch failed inside new process"
                );
                return Err(failure.into_error(&program));
            }
            Err(e) => {
                // Unknown state: don't hand out a process we can't vouch for
                let _ = kill(child, Signal::SIGKILL);
                reap_blocking(child);
                return Err(e);
            }
        }

        let id = HandleId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.table().insert(
            id,
            Entry {
                pid: child,
                exited: None,
                claimed: false,
            },
        );

        let handle = LaunchHandle::new(id, ProcessId::from(child));
        info!(
            handle = %id,
            pid = %child,
            program = %program.display(),
            namespaces = %options.namespaces,
            "Launched process"
        );

        Ok(handle)
    }

    /// Block until the process terminates, then reap it
    ///
    /// Only the calling thread blocks. After a successful call the handle is
    /// no longer tracked. Concurrent calls on one handle queue up behind the
    /// first; only that one ever waits on the pid itself, so the others can't
    /// end up waiting on a recycled pid.
    ///
    /// # Errors
    /// Returns `NotFound` if the process was already reaped, including by a
    /// concurrent `wait` on the same handle.
    pub fn wait(&self, handle: &LaunchHandle) -> Result<ExitStatus> {
        let pid = self.claim(handle)?;
        let result = self.reap(handle, pid);

        if let Some(entry) = self.table().get_mut(&handle.id()) {
            entry.claimed = false;
        }
        self.released.notify_all();

        result
    }

    /// Deliver a signal to the process if it has not been reaped
    ///
    /// A process that exited but was not waited for yet accepts the signal
    /// and ignores it.
    ///
    /// # Errors
    /// - `NotFound` if the process was already reaped
    /// - `PermissionDenied` if the signal cannot be delivered
    pub fn signal(&self, handle: &LaunchHandle, signal: Signal) -> Result<()> {
        let table = self.table();
        let entry = find(&table, handle)?;

        debug!(handle = %handle.id(), pid = %entry.pid, signal = %signal, "Sending signal");

        // Under the lock: the pid can't be reaped and recycled meanwhile
        kill(entry.pid, signal).map_err(|errno| kill_error(errno, handle, signal))
    }

    /// Non-blocking lifecycle check that leaves the exit status for `wait`
    ///
    /// # Errors
    /// Returns `NotFound` if the process was already reaped
    pub fn poll(&self, handle: &LaunchHandle) -> Result<LifecycleState> {
        let mut table = self.table();
        let entry = table
            .get_mut(&handle.id())
            .filter(|entry| entry.pid.as_raw() == handle.pid().as_raw())
            .ok_or(Error::NotFound {
                handle: handle.id(),
            })?;

        if let Some(status) = entry.exited {
            return Ok(LifecycleState::Exited(status));
        }

        let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
        match waitid(Id::Pid(entry.pid), flags) {
            Ok(status) => Ok(ExitStatus::from_wait_status(status).map_or(
                LifecycleState::Running,
                |exit| {
                    debug!(handle = %handle.id(), status = %exit, "Process exited");
                    entry.exited = Some(exit);
                    LifecycleState::Exited(exit)
                },
            )),
            Err(Errno::ECHILD) => {
                table.remove(&handle.id());
                Err(Error::NotFound {
                    handle: handle.id(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Handles whose exit status has not been reaped yet, oldest first
    #[must_use]
    pub fn tracked(&self) -> Vec<LaunchHandle> {
        let table = self.table();
        let mut handles: Vec<_> = table
            .iter()
            .map(|(id, entry)| LaunchHandle::new(*id, ProcessId::from(entry.pid)))
            .collect();
        handles.sort_by_key(LaunchHandle::id);
        handles
    }

    fn table(&self) -> MutexGuard<'_, HashMap<HandleId, Entry>> {
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Become the only waiter of a handle, queueing behind any current one
    fn claim(&self, handle: &LaunchHandle) -> Result<Pid> {
        let mut table = self.table();
        loop {
            let entry = table
                .get_mut(&handle.id())
                .filter(|entry| entry.pid.as_raw() == handle.pid().as_raw())
                .ok_or(Error::NotFound {
                    handle: handle.id(),
                })?;

            if !entry.claimed {
                entry.claimed = true;
                return Ok(entry.pid);
            }

            table = self
                .released
                .wait(table)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wait for a claimed process to exit and reap it
    fn reap(&self, handle: &LaunchHandle, pid: Pid) -> Result<ExitStatus> {
        loop {
            // Wait without reaping, so the pid can't be recycled before we
            // hold the lock again
            match waitid(Id::Pid(pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => return Err(self.forget(handle)),
                Err(e) => return Err(e.into()),
            }

            let mut table = self.table();
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(status) => {
                    if let Some(exit) = ExitStatus::from_wait_status(status) {
                        table.remove(&handle.id());
                        info!(handle = %handle.id(), pid = %pid, status = %exit, "Process reaped");
                        return Ok(exit);
                    }
                }
                Err(Errno::ECHILD) => {
                    table.remove(&handle.id());
                    return Err(Error::NotFound {
                        handle: handle.id(),
                    });
                }
                Err(Errno::EINTR) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Drop an entry whose process is no longer our child
    fn forget(&self, handle: &LaunchHandle) -> Error {
        if self.table().remove(&handle.id()).is_some() {
            warn!(handle = %handle.id(), "Tracked process was reaped elsewhere");
        }
        Error::NotFound {
            handle: handle.id(),
        }
    }
}

impl Drop for NamespaceLauncher {
    fn drop(&mut self) {
        let table = self.table();
        if !table.is_empty() {
            warn!(
                count = table.len(),
                "Launcher dropped with unreaped processes"
            );
        }
    }
}

fn find<'a>(table: &'a HashMap<HandleId, Entry>, handle: &LaunchHandle) -> Result<&'a Entry> {
    table
        .get(&handle.id())
        .filter(|entry| entry.pid.as_raw() == handle.pid().as_raw())
        .ok_or(Error::NotFound {
            handle: handle.id(),
        })
}

/// Fail fast on kinds the kernel doesn't offer, before any process exists
fn check_supported(namespaces: NamespaceSet) -> Result<()> {
    match namespaces.iter().find(|kind| !kind.is_supported()) {
        Some(kind) => Err(Error::UnsupportedNamespaceKind {
            kind: kind.to_string(),
        }),
        None => Ok(()),
    }
}

/// Find the program to execute, checking it up front where possible
fn resolve_program(options: &IsolationOptions) -> Result<PathBuf> {
    let program = options.program.as_path();

    if program.as_os_str().as_bytes().contains(&b'/') {
        // A relative path is resolved against the child's working directory,
        // which the parent can't check reliably
        if program.is_absolute() || options.working_dir.is_none() {
            check_executable(program)?;
        }
        return Ok(program.to_path_buf());
    }

    let search_path = options
        .env
        .get("PATH")
        .map(OsString::from)
        .or_else(|| std::env::var_os("PATH"))
        .unwrap_or_else(|| OsString::from(DEFAULT_PATH));

    std::env::split_paths(&search_path)
        .map(|dir| dir.join(program))
        .find(|candidate| check_executable(candidate).is_ok())
        .ok_or_else(|| Error::CommandNotExecutable {
            path: program.to_path_buf(),
            errno: Errno::ENOENT,
        })
}

fn check_executable(path: &Path) -> Result<()> {
    access(path, AccessFlags::X_OK).map_err(|errno| Error::CommandNotExecutable {
        path: path.to_path_buf(),
        errno,
    })?;

    if path.is_dir() {
        return Err(Error::CommandNotExecutable {
            path: path.to_path_buf(),
            errno: Errno::EACCES,
        });
    }

    Ok(())
}

fn clone_error(errno: Errno, namespaces: NamespaceSet) -> Error {
    warn!(error = %errno, namespaces = %namespaces, "clone failed");

    match errno {
        Errno::EPERM => Error::PermissionDenied {
            operation: format!("create namespaces ({namespaces})"),
            stage: Some(LaunchStage::Clone),
            errno,
        },
        Errno::EINVAL if !namespaces.is_empty() => Error::UnsupportedNamespaceKind {
            kind: namespaces.to_string(),
        },
        errno => Error::ProcessCreationFailed {
            stage: LaunchStage::Clone,
            errno,
        },
    }
}

fn kill_error(errno: Errno, handle: &LaunchHandle, signal: Signal) -> Error {
    match errno {
        Errno::EPERM => Error::PermissionDenied {
            operation: format!("send {signal} to pid {}", handle.pid()),
            stage: None,
            errno,
        },
        Errno::ESRCH => Error::NotFound {
            handle: handle.id(),
        },
        errno => Error::System(errno),
    }
}

/// Read the child's failure record; `None` means the exec succeeded
fn read_report(report_rx: OwnedFd) -> Result<Option<Failure>> {
    let mut buf = Vec::with_capacity(Failure::SIZE);
    File::from(report_rx).read_to_end(&mut buf)?;

    if buf.is_empty() {
        return Ok(None);
    }

    Failure::decode(&buf).map(Some).ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("malformed launch report ({} bytes)", buf.len()),
        ))
    })
}

/// Reap a child that is known to be exiting
fn reap_blocking(pid: Pid) {
    loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => {}
            Ok(_) | Err(_) => return,
        }
    }
}
