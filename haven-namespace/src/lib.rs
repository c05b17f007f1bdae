//! Process launching in new Linux namespaces
//!
//! This crate creates a process and its namespaces in a single `clone(2)`,
//! sets up the isolated environment and replaces the program image:
//! - UTS namespace - Hostname and domain name
//! - PID namespace - The program becomes PID 1
//! - Mount namespace - Mounts made recursively private
//! - IPC, network and cgroup namespaces - Created empty
//!
//! The launcher never prints. It emits `tracing` events from the parent side
//! only; installing a subscriber is up to the caller.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

mod child;
pub mod config;
pub mod inspect;
pub mod launcher;

pub use child::{EXEC_FAILED_EXIT_CODE, SETUP_FAILED_EXIT_CODE};
pub use config::{IsolationOptions, NamespaceKind, NamespaceSet};
pub use haven_core::{
    Error, ExitStatus, HandleId, LaunchHandle, LaunchStage, LifecycleState, ProcessId, Result,
};
pub use inspect::NamespaceInfo;
pub use launcher::NamespaceLauncher;
pub use nix::sys::signal::Signal;
