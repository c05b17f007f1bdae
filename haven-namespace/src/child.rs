//! Work done inside the new process, between `clone(2)` and `execve(2)`
//!
//! The launcher may be multi-threaded, so the child must not allocate, take
//! locks or log: another thread could have held the allocator or a logging
//! lock at the moment of the split. Everything the child touches is built by
//! the parent in [`ChildSetup::prepare`], and the child only issues syscalls.
//!
//! Failures are reported to the parent through a close-on-exec pipe as a
//! fixed [`Failure`] record. A successful `execve` closes the pipe, which the
//! parent observes as end-of-file.

#![allow(unsafe_code)]

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::ffi::{CStr, CString, OsString};
use std::os::fd::RawFd;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::Path;

use haven_core::{Error, LaunchStage, Result};
use libc::c_char;
use nix::errno::Errno;
use nix::mount::{MsFlags, mount};
use nix::unistd::{chdir, sethostname};

use crate::config::{IsolationOptions, NamespaceKind};

/// Exit status of a child that failed before `execve`
pub const SETUP_FAILED_EXIT_CODE: i32 = 126;

/// Exit status of a child whose `execve` failed
pub const EXEC_FAILED_EXIT_CODE: i32 = 127;

/// Everything the child needs, prepared before the split
pub(crate) struct ChildSetup {
    program: CString,
    // Owners of the memory `argv_ptrs` and `envp_ptrs` point into
    _argv: Vec<CString>,
    _envp: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
    envp_ptrs: Vec<*const c_char>,
    working_dir: Option<CString>,
    hostname: Option<String>,
    domainname: Option<CString>,
    private_mounts: bool,
    mount_proc: bool,
}

impl ChildSetup {
    /// Build the child's arguments, environment and setup plan
    ///
    /// # Errors
    /// Returns `InvalidConfig` if any string contains an interior NUL byte
    pub(crate) fn prepare(options: &IsolationOptions, program: &Path) -> Result<Self> {
        let program = path_to_cstring(program, "program path")?;

        // argv[0] is the program as the caller wrote it
        let argv = std::iter::once(options.program.as_os_str().as_bytes().to_vec())
            .chain(options.args.iter().map(|arg| arg.as_bytes().to_vec()))
            .map(|arg| {
                CString::new(arg).map_err(|_| Error::invalid_config("argument contains a NUL byte"))
            })
            .collect::<Result<Vec<_>>>()?;

        let envp = build_environment(&options.env)?;

        let working_dir = options
            .working_dir
            .as_deref()
            .map(|dir| path_to_cstring(dir, "working directory"))
            .transpose()?;

        let uts = options.namespaces.contains(NamespaceKind::Uts);
        let hostname = options.hostname.clone().filter(|_| uts);
        if hostname.as_deref().is_some_and(|h| h.contains('\0')) {
            return Err(Error::invalid_config("hostname contains a NUL byte"));
        }
        let domainname = options
            .domainname
            .as_deref()
            .filter(|_| uts)
            .map(|d| {
                CString::new(d).map_err(|_| Error::invalid_config("domain name contains a NUL byte"))
            })
            .transpose()?;

        let argv_ptrs = null_terminated(&argv);
        let envp_ptrs = null_terminated(&envp);
        let private_mounts = options.namespaces.contains(NamespaceKind::Mount);

        Ok(Self {
            program,
            _argv: argv,
            _envp: envp,
            argv_ptrs,
            envp_ptrs,
            working_dir,
            hostname,
            domainname,
            private_mounts,
            mount_proc: options.mount_proc,
        })
    }

    /// Child entry point. Never returns on success.
    pub(crate) fn run(&self, report_fd: RawFd) -> isize {
        let Err(failure) = self.enter();
        failure.send(report_fd);
        failure.exit_code() as isize
    }

    fn enter(&self) -> std::result::Result<Infallible, Failure> {
        if let Some(ref hostname) = self.hostname {
            sethostname(hostname).map_err(|e| Failure::new(LaunchStage::Hostname, e))?;
        }

        if let Some(ref domainname) = self.domainname {
            // nix doesn't expose setdomainname
            let rc = unsafe {
                libc::setdomainname(domainname.as_ptr(), domainname.as_bytes().len())
            };
            if rc != 0 {
                return Err(Failure::new(LaunchStage::Domainname, Errno::last()));
            }
        }

        if self.private_mounts {
            // Equivalent to `mount --make-rprivate /`: nothing mounted from
            // here on propagates back to the parent's namespace
            mount(
                None::<&CStr>,
                c"/",
                None::<&CStr>,
                MsFlags::MS_REC | MsFlags::MS_PRIVATE,
                None::<&CStr>,
            )
            .map_err(|e| Failure::new(LaunchStage::MountPropagation, e))?;
        }

        if self.mount_proc {
            mount(
                Some(c"proc"),
                c"/proc",
                Some(c"proc"),
                MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
                None::<&CStr>,
            )
            .map_err(|e| Failure::new(LaunchStage::MountProc, e))?;
        }

        if let Some(ref dir) = self.working_dir {
            chdir(dir.as_c_str()).map_err(|e| Failure::new(LaunchStage::WorkingDir, e))?;
        }

        unsafe {
            libc::execve(
                self.program.as_ptr(),
                self.argv_ptrs.as_ptr(),
                self.envp_ptrs.as_ptr(),
            );
        }

        Err(Failure::new(LaunchStage::Exec, Errno::last()))
    }
}

/// Failure record sent from the child to the parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Failure {
    pub(crate) stage: LaunchStage,
    pub(crate) errno: Errno,
}

impl Failure {
    pub(crate) const SIZE: usize = 8;

    pub(crate) const fn new(stage: LaunchStage, errno: Errno) -> Self {
        Self { stage, errno }
    }

    pub(crate) fn encode(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..4].copy_from_slice(&self.stage.code().to_ne_bytes());
        buf[4..].copy_from_slice(&(self.errno as i32).to_ne_bytes());
        buf
    }

    pub(crate) fn decode(buf: &[u8]) -> Option<Self> {
        let buf: &[u8; Self::SIZE] = buf.try_into().ok()?;
        let stage = u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let errno = i32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Some(Self::new(
            LaunchStage::from_code(stage)?,
            Errno::from_raw(errno),
        ))
    }

    const fn exit_code(self) -> i32 {
        match self.stage {
            LaunchStage::Exec => EXEC_FAILED_EXIT_CODE,
            _ => SETUP_FAILED_EXIT_CODE,
        }
    }

    fn send(self, fd: RawFd) {
        let buf = self.encode();
        // A record this small is written atomically; if the parent is gone
        // there is nobody left to tell.
        unsafe {
            libc::write(fd, buf.as_ptr().cast(), buf.len());
        }
    }

    /// Translate into the error returned by `launch`
    pub(crate) fn into_error(self, program: &Path) -> Error {
        match (self.stage, self.errno) {
            (LaunchStage::Exec, errno) => Error::CommandNotExecutable {
                path: program.to_path_buf(),
                errno,
            },
            (stage, errno @ (Errno::EPERM | Errno::EACCES)) => Error::PermissionDenied {
                operation: stage.to_string(),
                stage: Some(stage),
                errno,
            },
            (stage, errno) => Error::ProcessCreationFailed { stage, errno },
        }
    }
}

fn path_to_cstring(path: &Path, what: &str) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::invalid_config(format!("{what} contains a NUL byte")))
}

/// The launcher's environment with `overrides` applied, as `KEY=VALUE`
fn build_environment(overrides: &BTreeMap<String, String>) -> Result<Vec<CString>> {
    let mut vars: BTreeMap<OsString, OsString> = std::env::vars_os().collect();
    for (key, value) in overrides {
        vars.insert(key.into(), value.into());
    }

    vars.into_iter()
        .map(|(key, value)| {
            let mut entry = key.into_vec();
            entry.push(b'=');
            entry.extend(value.into_vec());
            CString::new(entry)
                .map_err(|_| Error::invalid_config("environment contains a NUL byte"))
        })
        .collect()
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}
