//! Isolation options

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use haven_core::{Error, Result};
use nix::sched::CloneFlags;
use serde::{Deserialize, Serialize};

/// Maximum hostname length accepted by `sethostname(2)`
pub const HOST_NAME_MAX: usize = 64;

/// Kind of Linux namespace a launch can create
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    /// Hostname and NIS domain name
    Uts,
    /// Process ID numbering space
    Pid,
    /// Mount table
    Mount,
    /// System V IPC and POSIX message queues
    Ipc,
    /// Network stack (created empty, not configured)
    Net,
    /// Cgroup root directory view
    Cgroup,
}

impl NamespaceKind {
    /// Every kind, in bit order
    pub const ALL: [Self; 6] = [
        Self::Uts,
        Self::Pid,
        Self::Mount,
        Self::Ipc,
        Self::Net,
        Self::Cgroup,
    ];

    /// Entry name under `/proc/<pid>/ns`
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Uts => "uts",
            Self::Pid => "pid",
            Self::Mount => "mnt",
            Self::Ipc => "ipc",
            Self::Net => "net",
            Self::Cgroup => "cgroup",
        }
    }

    /// Whether the running kernel supports this kind
    #[must_use]
    pub fn is_supported(self) -> bool {
        Path::new("/proc/self/ns").join(self.proc_name()).exists()
    }

    pub(crate) const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::Uts => CloneFlags::CLONE_NEWUTS,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Mount => CloneFlags::CLONE_NEWNS,
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::Net => CloneFlags::CLONE_NEWNET,
            Self::Cgroup => CloneFlags::CLONE_NEWCGROUP,
        }
    }

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proc_name())
    }
}

/// Set of namespace kinds to create
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<NamespaceKind>", into = "Vec<NamespaceKind>")]
pub struct NamespaceSet(u8);

impl NamespaceSet {
    /// No namespaces: the launch degrades to plain process creation
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every supported kind
    #[must_use]
    pub const fn all() -> Self {
        Self(0b0011_1111)
    }

    /// UTS + PID + mount
    #[must_use]
    pub const fn isolated() -> Self {
        Self(NamespaceKind::Uts.bit() | NamespaceKind::Pid.bit() | NamespaceKind::Mount.bit())
    }

    /// Add a kind
    pub fn insert(&mut self, kind: NamespaceKind) {
        self.0 |= kind.bit();
    }

    /// Remove a kind
    pub fn remove(&mut self, kind: NamespaceKind) {
        self.0 &= !kind.bit();
    }

    /// Add a kind, builder style
    #[must_use]
    pub const fn with(self, kind: NamespaceKind) -> Self {
        Self(self.0 | kind.bit())
    }

    /// Check if a kind is present
    #[must_use]
    pub const fn contains(self, kind: NamespaceKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Check if no kind is present
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of kinds present
    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate over the kinds present
    pub fn iter(self) -> impl Iterator<Item = NamespaceKind> {
        NamespaceKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }

    /// Translate to the `clone(2)` flag bits
    pub(crate) fn to_clone_flags(self) -> CloneFlags {
        self.iter()
            .fold(CloneFlags::empty(), |flags, kind| flags | kind.clone_flag())
    }
}

impl From<NamespaceKind> for NamespaceSet {
    fn from(kind: NamespaceKind) -> Self {
        Self(kind.bit())
    }
}

impl FromIterator<NamespaceKind> for NamespaceSet {
    fn from_iter<I: IntoIterator<Item = NamespaceKind>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl From<Vec<NamespaceKind>> for NamespaceSet {
    fn from(kinds: Vec<NamespaceKind>) -> Self {
        kinds.into_iter().collect()
    }
}

impl From<NamespaceSet> for Vec<NamespaceKind> {
    fn from(set: NamespaceSet) -> Self {
        set.iter().collect()
    }
}

impl std::ops::BitOr for NamespaceSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOr<NamespaceKind> for NamespaceSet {
    type Output = Self;

    fn bitor(self, rhs: NamespaceKind) -> Self {
        self.with(rhs)
    }
}

impl std::ops::BitOr for NamespaceKind {
    type Output = NamespaceSet;

    fn bitor(self, rhs: Self) -> NamespaceSet {
        NamespaceSet::from(self).with(rhs)
    }
}

impl std::ops::BitAnd for NamespaceSet {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for NamespaceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        for (i, kind) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{kind}")?;
        }
        Ok(())
    }
}

/// What to launch and how to isolate it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationOptions {
    /// Namespaces to create for the new process
    pub namespaces: NamespaceSet,

    /// Program to execute. A bare name is looked up in `PATH`.
    pub program: PathBuf,

    /// Arguments, not including the program name
    pub args: Vec<String>,

    /// Working directory inside the new process
    pub working_dir: Option<PathBuf>,

    /// Hostname for the new UTS namespace
    pub hostname: Option<String>,

    /// Domain name for the new UTS namespace
    pub domainname: Option<String>,

    /// Mount a fresh `/proc` so process listings match the new PID namespace
    pub mount_proc: bool,

    /// Environment overrides on top of the launcher's environment
    pub env: BTreeMap<String, String>,
}

impl Default for IsolationOptions {
    fn default() -> Self {
        Self {
            namespaces: NamespaceSet::empty(),
            program: PathBuf::new(),
            args: Vec::new(),
            working_dir: None,
            hostname: None,
            domainname: None,
            mount_proc: false,
            env: BTreeMap::new(),
        }
    }
}

impl IsolationOptions {
    /// Options for running `program` without any isolation
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Options for running `program` in new UTS, PID and mount namespaces
    #[must_use]
    pub fn isolated(program: impl Into<PathBuf>) -> Self {
        Self::new(program).with_namespaces(NamespaceSet::isolated())
    }

    /// Replace the namespace set
    #[must_use]
    pub fn with_namespaces(mut self, namespaces: NamespaceSet) -> Self {
        self.namespaces = namespaces;
        self
    }

    /// Request one more namespace kind
    #[must_use]
    pub fn with_namespace(mut self, kind: NamespaceKind) -> Self {
        self.namespaces.insert(kind);
        self
    }

    /// Append one argument
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set hostname for UTS namespace
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Set domain name for UTS namespace
    #[must_use]
    pub fn with_domainname(mut self, domainname: impl Into<String>) -> Self {
        self.domainname = Some(domainname.into());
        self
    }

    /// Mount a fresh `/proc` (requires PID and mount namespaces)
    #[must_use]
    pub const fn with_mount_proc(mut self, enable: bool) -> Self {
        self.mount_proc = enable;
        self
    }

    /// Set an environment variable for the program
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Check the options before any process is created
    ///
    /// # Errors
    /// Returns `InvalidConfig` describing the first violated rule
    pub fn validate(&self) -> Result<()> {
        if self.program.as_os_str().is_empty() {
            return Err(Error::invalid_config("program path cannot be empty"));
        }

        let uts = self.namespaces.contains(NamespaceKind::Uts);

        if let Some(ref hostname) = self.hostname {
            if !uts {
                return Err(Error::invalid_config(
                    "hostname requires a UTS namespace",
                ));
            }
            if hostname.is_empty() || hostname.len() > HOST_NAME_MAX {
                return Err(Error::invalid_config(format!(
                    "hostname must be 1-{HOST_NAME_MAX} bytes"
                )));
            }
        }

        if let Some(ref domainname) = self.domainname {
            if !uts {
                return Err(Error::invalid_config(
                    "domain name requires a UTS namespace",
                ));
            }
            if domainname.len() > HOST_NAME_MAX {
                return Err(Error::invalid_config(format!(
                    "domain name must be at most {HOST_NAME_MAX} bytes"
                )));
            }
        }

        if self.mount_proc
            && !(self.namespaces.contains(NamespaceKind::Pid)
                && self.namespaces.contains(NamespaceKind::Mount))
        {
            return Err(Error::invalid_config(
                "mounting /proc requires both PID and mount namespaces",
            ));
        }

        if let Some(key) = self
            .env
            .keys()
            .find(|key| key.is_empty() || key.contains('='))
        {
            return Err(Error::invalid_config(format!(
                "invalid environment variable name: {key:?}"
            )));
        }

        Ok(())
    }

    /// Whether the options leave the parent's `/proc` visible to a new
    /// PID namespace, which makes process listings inside it wrong
    #[must_use]
    pub const fn has_stale_proc(&self) -> bool {
        self.namespaces.contains(NamespaceKind::Pid)
            && !self.namespaces.contains(NamespaceKind::Mount)
    }
}
