//! CLI argument definitions

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "haven")]
#[command(about = "Launch processes in new Linux namespaces", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command in new namespaces and wait for it
    Run(RunArgs),

    /// Show namespace information
    Namespaces {
        /// Process ID (default: current process)
        #[arg(short, long)]
        pid: Option<i32>,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// New UTS namespace (hostname)
    #[arg(long)]
    pub uts: bool,

    /// New PID namespace (command becomes PID 1)
    #[arg(long)]
    pub pid: bool,

    /// New mount namespace (made recursively private)
    #[arg(long)]
    pub mount: bool,

    /// New IPC namespace
    #[arg(long)]
    pub ipc: bool,

    /// New, unconfigured network namespace
    #[arg(long)]
    pub net: bool,

    /// New cgroup namespace
    #[arg(long)]
    pub cgroup: bool,

    /// Shorthand for --uts --pid --mount
    #[arg(long)]
    pub isolate: bool,

    /// Custom hostname (requires a UTS namespace)
    #[arg(long)]
    pub hostname: Option<String>,

    /// Custom domain name (requires a UTS namespace)
    #[arg(long)]
    pub domainname: Option<String>,

    /// Mount a fresh /proc (requires PID and mount namespaces)
    #[arg(long)]
    pub mount_proc: bool,

    /// Working directory for the command
    #[arg(short = 'w', long)]
    pub workdir: Option<PathBuf>,

    /// Environment variable for the command (KEY=VALUE, repeatable)
    #[arg(short, long = "env", value_parser = parse_env_var)]
    pub env: Vec<(String, String)>,

    /// JSON file with isolation options; flags are applied on top
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Command to run
    #[arg(last = true, required_unless_present = "config")]
    pub command: Vec<String>,
}

fn parse_env_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{s}`")),
    }
}
