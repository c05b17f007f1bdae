//! Namespace identity of running processes, read from `/proc/<pid>/ns`

use std::fs;

use haven_core::{Error, ProcessId, Result};

use crate::config::NamespaceKind;

/// Namespace identifiers of one process, e.g. `uts:[4026531838]`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceInfo {
    /// UTS namespace ID
    pub uts: Option<String>,
    /// PID namespace ID
    pub pid: Option<String>,
    /// Mount namespace ID
    pub mnt: Option<String>,
    /// IPC namespace ID
    pub ipc: Option<String>,
    /// Network namespace ID
    pub net: Option<String>,
    /// CGroup namespace ID
    pub cgroup: Option<String>,
}

impl NamespaceInfo {
    /// Namespace IDs of the calling process
    ///
    /// # Errors
    /// Returns error if `/proc/self/ns` cannot be read
    pub fn current() -> Result<Self> {
        Self::for_pid(ProcessId::current())
    }

    /// Namespace IDs of a specific process
    ///
    /// Kinds the kernel does not expose are left as `None`.
    ///
    /// # Errors
    /// Returns an I/O error if the process does not exist
    pub fn for_pid(pid: ProcessId) -> Result<Self> {
        let base_path = format!("/proc/{pid}/ns");

        fs::metadata(&base_path).map_err(Error::Io)?;

        let read_ns = |kind: NamespaceKind| -> Option<String> {
            let path = format!("{base_path}/{}", kind.proc_name());
            fs::read_link(&path)
                .map(|p| p.to_string_lossy().into_owned())
                .ok()
        };

        Ok(Self {
            uts: read_ns(NamespaceKind::Uts),
            pid: read_ns(NamespaceKind::Pid),
            mnt: read_ns(NamespaceKind::Mount),
            ipc: read_ns(NamespaceKind::Ipc),
            net: read_ns(NamespaceKind::Net),
            cgroup: read_ns(NamespaceKind::Cgroup),
        })
    }

    /// Identifier for one kind
    #[must_use]
    pub fn get(&self, kind: NamespaceKind) -> Option<&str> {
        let id = match kind {
            NamespaceKind::Uts => &self.uts,
            NamespaceKind::Pid => &self.pid,
            NamespaceKind::Mount => &self.mnt,
            NamespaceKind::Ipc => &self.ipc,
            NamespaceKind::Net => &self.net,
            NamespaceKind::Cgroup => &self.cgroup,
        };
        id.as_deref()
    }

    /// Whether both processes are known to be in the same namespace of `kind`
    #[must_use]
    pub fn shares_with(&self, other: &Self, kind: NamespaceKind) -> bool {
        matches!((self.get(kind), other.get(kind)), (Some(a), Some(b)) if a == b)
    }

    /// Kinds in which the two processes are known to be in different
    /// namespaces. Kinds unreadable for either process are skipped.
    #[must_use]
    pub fn differing(&self, other: &Self) -> Vec<NamespaceKind> {
        NamespaceKind::ALL
            .into_iter()
            .filter(|kind| matches!((self.get(*kind), other.get(*kind)), (Some(a), Some(b)) if a != b))
            .collect()
    }
}

impl std::fmt::Display for NamespaceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Namespace Info:")?;
        for kind in NamespaceKind::ALL {
            if let Some(id) = self.get(kind) {
                writeln!(f, "  {:<7} {id}", format!("{}:", kind.proc_name().to_uppercase()))?;
            }
        }
        Ok(())
    }
}
