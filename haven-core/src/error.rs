//! Error types for Haven

use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

use crate::types::{HandleId, LaunchStage};

/// Haven error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System error from nix
    #[error("System error: {0}")]
    System(#[from] nix::Error),

    /// Invalid configuration, rejected before any process was created
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// Caller lacks the capability to create a namespace or signal a process
    #[error("Permission denied: {operation} ({errno})")]
    PermissionDenied {
        /// Operation that was denied
        operation: String,
        /// Stage of the launch, when the denial happened during a launch
        stage: Option<LaunchStage>,
        /// Underlying system error
        errno: Errno,
    },

    /// The host kernel does not support a requested namespace kind
    #[error("Unsupported namespace kind: {kind}")]
    UnsupportedNamespaceKind {
        /// Namespace kind name (as in `/proc/<pid>/ns`)
        kind: String,
    },

    /// The combined process + namespace creation, or the isolated
    /// environment setup in the new process, failed
    #[error("Process creation failed during {stage}: {errno}")]
    ProcessCreationFailed {
        /// Stage that failed
        stage: LaunchStage,
        /// Underlying system error
        errno: Errno,
    },

    /// The program could not replace the new process's image
    #[error("Command not executable: {}: {errno}", .path.display())]
    CommandNotExecutable {
        /// Program path as resolved by the launcher
        path: PathBuf,
        /// Underlying system error
        errno: Errno,
    },

    /// The handle's process has already been reaped, or was never tracked
    #[error("No such process: handle {handle}")]
    NotFound {
        /// Handle that was looked up
        handle: HandleId,
    },
}

impl Error {
    /// Build an `InvalidConfig` error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Launch stage the error belongs to, if any
    #[must_use]
    pub const fn stage(&self) -> Option<LaunchStage> {
        match self {
            Self::InvalidConfig { .. } | Self::UnsupportedNamespaceKind { .. } => {
                Some(LaunchStage::Validate)
            }
            Self::PermissionDenied { stage, .. } => *stage,
            Self::ProcessCreationFailed { stage, .. } => Some(*stage),
            Self::CommandNotExecutable { .. } => Some(LaunchStage::Exec),
            _ => None,
        }
    }

    /// Underlying system error code, if any
    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::System(errno)
            | Self::PermissionDenied { errno, .. }
            | Self::ProcessCreationFailed { errno, .. }
            | Self::CommandNotExecutable { errno, .. } => Some(*errno),
            Self::Io(err) => err.raw_os_error().map(Errno::from_raw),
            _ => None,
        }
    }

    /// Raw OS error number, for binding layers that surface native codes
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        self.errno().map(|errno| errno as i32)
    }

    /// Whether the error reports a reaped or unknown handle
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type alias for Haven operations
pub type Result<T> = std::result::Result<T, Error>;
