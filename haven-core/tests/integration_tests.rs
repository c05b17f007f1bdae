use haven_core::*;
use nix::errno::Errno;
use nix::sys::signal::Signal;

#[test]
fn test_process_id_conversions() {
    let pid = ProcessId::from_raw(4242);
    let nix_pid: nix::unistd::Pid = pid.into();
    assert_eq!(nix_pid.as_raw(), 4242);
    assert_eq!(ProcessId::from(nix_pid), pid);
    assert_eq!(format!("{}", pid), "4242");
}

#[test]
fn test_current_process_id() {
    let pid = ProcessId::current();
    assert!(pid.as_raw() > 0);
    assert_eq!(pid.as_nix_pid(), nix::unistd::getpid());
}

#[test]
fn test_handle_id_serialization() {
    let id = HandleId::from_raw(12);

    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "12");

    let deserialized: HandleId = serde_json::from_str(&json).unwrap();
    assert_eq!(id, deserialized);
}

#[test]
fn test_launch_handle_accessors() {
    let handle = LaunchHandle::new(HandleId::from_raw(1), ProcessId::from_raw(99));
    assert_eq!(handle.id().as_raw(), 1);
    assert_eq!(handle.pid().as_raw(), 99);

    // Handles are plain values: copies refer to the same tracked process
    let copy = handle;
    assert_eq!(copy, handle);
}

#[test]
fn test_exit_status_display() {
    assert_eq!(
        ExitStatus::Exited { code: 0 }.to_string(),
        "exited with code 0"
    );
    assert_eq!(
        ExitStatus::Signaled {
            signal: Signal::SIGTERM,
            core_dumped: false
        }
        .to_string(),
        "killed by SIGTERM"
    );
    assert!(
        ExitStatus::Signaled {
            signal: Signal::SIGSEGV,
            core_dumped: true
        }
        .to_string()
        .contains("core dumped")
    );
}

#[test]
fn test_exit_status_shell_code() {
    assert_eq!(ExitStatus::Exited { code: 3 }.as_shell_code(), 3);
    assert_eq!(
        ExitStatus::Signaled {
            signal: Signal::SIGTERM,
            core_dumped: false
        }
        .as_shell_code(),
        143
    );
    assert!(ExitStatus::Exited { code: 0 }.success());
}

#[test]
fn test_launch_stage_serialization() {
    let json = serde_json::to_string(&LaunchStage::MountPropagation).unwrap();
    assert_eq!(json, "\"mount_propagation\"");
    assert_eq!(LaunchStage::WorkingDir.to_string(), "working directory");
}

#[test]
fn test_error_display() {
    let err = Error::invalid_config("program path cannot be empty");
    assert!(err.to_string().contains("Invalid configuration"));
    assert_eq!(err.stage(), Some(LaunchStage::Validate));

    let err = Error::PermissionDenied {
        operation: "create namespaces".to_string(),
        stage: Some(LaunchStage::Clone),
        errno: Errno::EPERM,
    };
    assert!(err.to_string().contains("Permission denied"));
    assert_eq!(err.stage(), Some(LaunchStage::Clone));
    assert_eq!(err.raw_os_error(), Some(Errno::EPERM as i32));

    let err = Error::UnsupportedNamespaceKind {
        kind: "cgroup".to_string(),
    };
    assert!(err.to_string().contains("cgroup"));
}

#[test]
fn test_error_from_nix() {
    let err: Error = Errno::ESRCH.into();
    assert!(matches!(err, Error::System(Errno::ESRCH)));
    assert_eq!(err.errno(), Some(Errno::ESRCH));
}
