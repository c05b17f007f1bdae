//! Launch a few processes and watch their lifecycle
//!
//! Run with: cargo run --example launch_demo
//! Run as root: sudo cargo run --example launch_demo

use haven_namespace::{
    IsolationOptions, LifecycleState, NamespaceInfo, NamespaceLauncher, Signal,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("debug").init();

    println!("🦀 Haven Launch Demo\n");

    let launcher = NamespaceLauncher::new();

    demo_plain_process(&launcher)?;
    demo_signal(&launcher)?;

    if nix::unistd::geteuid().is_root() {
        println!("\n🔐 Running with root privileges - demonstrating isolation\n");
        demo_isolated_process(&launcher)?;
    } else {
        println!("\n⚠️  Run with sudo to see namespace isolation demos");
    }

    Ok(())
}

fn demo_plain_process(launcher: &NamespaceLauncher) -> haven_namespace::Result<()> {
    println!("📦 Plain process (no namespaces):");

    let handle = launcher.launch(IsolationOptions::new("/bin/sh").with_args(["-c", "exit 3"]))?;
    println!("  Launched {handle}");

    let status = launcher.wait(&handle)?;
    println!("  Status: {status}");

    match launcher.wait(&handle) {
        Err(e) => println!("  Second wait: {e}"),
        Ok(status) => println!("  Second wait unexpectedly returned {status}"),
    }

    Ok(())
}

fn demo_signal(launcher: &NamespaceLauncher) -> haven_namespace::Result<()> {
    println!("\n📡 Signals:");

    let handle = launcher.launch(IsolationOptions::new("sleep").with_arg("30"))?;
    println!("  Launched {handle}: {:?}", launcher.poll(&handle)?);

    launcher.signal(&handle, Signal::SIGTERM)?;
    while launcher.poll(&handle)? == LifecycleState::Running {
        std::thread::sleep(std::time::Duration::from_millis(10));
    }

    println!("  After SIGTERM: {:?}", launcher.poll(&handle)?);
    println!("  Status: {}", launcher.wait(&handle)?);

    Ok(())
}

fn demo_isolated_process(launcher: &NamespaceLauncher) -> haven_namespace::Result<()> {
    let options = IsolationOptions::isolated("/bin/sh")
        .with_args(["-c", "echo \"  hostname=$(hostname) pid=$$\"; ps -e | head -5"])
        .with_hostname("haven-demo")
        .with_mount_proc(true);

    let handle = launcher.launch(options)?;

    let parent = NamespaceInfo::current()?;
    if let Ok(child) = NamespaceInfo::for_pid(handle.pid()) {
        println!("  Isolated kinds: {:?}", child.differing(&parent));
    }

    println!("  Status: {}", launcher.wait(&handle)?);
    println!(
        "  Parent hostname still: {}",
        nix::unistd::gethostname()?.to_string_lossy()
    );

    Ok(())
}
