//! Namespaces command implementation

use anyhow::{Context, Result};
use haven_namespace::{NamespaceInfo, ProcessId};

pub fn execute(pid: Option<i32>) -> Result<()> {
    let target_pid = pid.map_or_else(ProcessId::current, ProcessId::from_raw);

    println!("\n🔒 Namespace Information for PID {}", target_pid);
    println!("{:-<60}", "");

    let ns_info =
        NamespaceInfo::for_pid(target_pid).context("Failed to get namespace information")?;

    print!("{}", ns_info);

    // Compare against init, which lives in the host namespaces
    match NamespaceInfo::for_pid(ProcessId::from_raw(1)) {
        Ok(init) => {
            let isolated = ns_info.differing(&init);
            if isolated.is_empty() {
                println!("\n⚠️  Process is in host namespaces");
            } else {
                let names: Vec<String> = isolated.iter().map(ToString::to_string).collect();
                println!("\n✅ Process is isolated in: {}", names.join(", "));
            }
        }
        Err(e) => println!("\n❌ Failed to check isolation: {}", e),
    }

    if target_pid == ProcessId::current() {
        if let Ok(hostname) = nix::unistd::gethostname() {
            println!("Hostname: {}", hostname.to_string_lossy());
        }
    }

    Ok(())
}
