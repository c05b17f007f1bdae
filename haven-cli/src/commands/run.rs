//! Run command implementation

use std::sync::Arc;

use anyhow::{Context, Result};
use haven_namespace::{
    IsolationOptions, NamespaceKind, NamespaceLauncher, NamespaceSet, Signal,
};
use tracing::{debug, info, warn};

use crate::cli::RunArgs;

pub async fn execute(args: RunArgs) -> Result<i32> {
    let options = build_options(args)?;

    info!(
        program = %options.program.display(),
        namespaces = %options.namespaces,
        "🚀 Launching command"
    );

    let launcher = Arc::new(NamespaceLauncher::new());
    let handle = launcher
        .launch(options)
        .context("Failed to launch command")?;

    info!("👶 Launched {}", handle);

    let mut waiter = {
        let launcher = Arc::clone(&launcher);
        tokio::task::spawn_blocking(move || launcher.wait(&handle))
    };

    // First Ctrl+C asks politely; PID 1 of a namespace may ignore SIGTERM
    let mut interrupts = 0;
    let status = loop {
        tokio::select! {
            result = &mut waiter => {
                break result.context("Wait task failed")?.context("Failed to wait for command")?;
            }
            _ = tokio::signal::ctrl_c() => {
                interrupts += 1;
                let signal = if interrupts == 1 { Signal::SIGTERM } else { Signal::SIGKILL };
                warn!("🛑 Received Ctrl+C, sending {} to {}", signal, handle);
                if let Err(e) = launcher.signal(&handle, signal) {
                    warn!("Could not signal command: {}", e);
                }
            }
        }
    };

    if status.success() {
        info!("✅ Command {}", status);
    } else {
        warn!("⚠️  Command {}", status);
    }

    Ok(status.as_shell_code())
}

/// Merge the optional JSON config file with command-line flags
fn build_options(args: RunArgs) -> Result<IsolationOptions> {
    let mut options = match args.config {
        Some(ref path) => {
            debug!(path = %path.display(), "Loading isolation options");
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => IsolationOptions::default(),
    };

    let mut namespaces = NamespaceSet::empty();
    if args.isolate {
        namespaces = namespaces | NamespaceSet::isolated();
    }
    for (enabled, kind) in [
        (args.uts, NamespaceKind::Uts),
        (args.pid, NamespaceKind::Pid),
        (args.mount, NamespaceKind::Mount),
        (args.ipc, NamespaceKind::Ipc),
        (args.net, NamespaceKind::Net),
        (args.cgroup, NamespaceKind::Cgroup),
    ] {
        if enabled {
            namespaces.insert(kind);
        }
    }
    options.namespaces = options.namespaces | namespaces;

    if let Some((program, rest)) = args.command.split_first() {
        options.program = program.into();
        options.args = rest.to_vec();
    }
    if let Some(hostname) = args.hostname {
        options.hostname = Some(hostname);
    }
    if let Some(domainname) = args.domainname {
        options.domainname = Some(domainname);
    }
    if let Some(workdir) = args.workdir {
        options.working_dir = Some(workdir);
    }
    options.mount_proc |= args.mount_proc;
    options.env.extend(args.env);

    options.validate().context("Invalid isolation options")?;

    Ok(options)
}
