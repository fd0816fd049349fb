pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// capsulerun — a low-level Linux container lifecycle engine.
#[derive(Parser, Debug)]
#[command(name = "capsulerun", version, about)]
pub struct Cli {
    /// Runtime root directory (default: /var/run/capsule as root, else
    /// $HOME/.capsule).
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print an example container spec to stdout.
    Spec,

    /// Create a container from a spec file, leaving it Stopped.
    Create {
        /// Path to the container's spec JSON (capsule-spec.json).
        spec_path: PathBuf,
    },

    /// Start a previously-created container: Stopped -> Created -> Running.
    Start {
        /// Container ID (or unique prefix).
        id: String,
    },

    /// Create and start a container from a spec file in one step.
    Run {
        /// Path to the container's spec JSON (capsule-spec.json).
        spec_path: PathBuf,
    },

    /// List known containers and their status.
    Ps,

    /// Destroy a container: kill its processes, tear down cgroup and
    /// network, remove its on-disk state.
    Rm {
        /// Container ID (or unique prefix).
        id: String,
    },

    /// Print the status and metadata of a single container.
    Logs {
        /// Container ID (or unique prefix).
        id: String,
    },

    /// Send a signal to a container's init process (or every process in
    /// its cgroup, with --all).
    Kill {
        /// Container ID (or unique prefix).
        id: String,

        /// Signal name (e.g. TERM, KILL, HUP) or number. Default: TERM.
        #[arg(default_value = "TERM")]
        signal: String,

        /// Signal every process in the container's cgroup, not just init.
        #[arg(long)]
        all: bool,
    },

    /// Freeze a running container's processes.
    Pause {
        /// Container ID (or unique prefix).
        id: String,
    },

    /// Resume a paused container's processes.
    Resume {
        /// Container ID (or unique prefix).
        id: String,
    },

    /// Run a command inside a running container's namespaces.
    Exec {
        /// Container ID (or unique prefix).
        id: String,

        /// The command (and arguments) to execute. Everything after `--`.
        #[arg(last = true, required = true)]
        cmd: Vec<String>,
    },

    /// Internal: re-executed by the parent process driver as the
    /// container's pid-1 initializer. Not intended to be run by hand.
    #[command(hide = true)]
    Init,
}

/// Parse CLI arguments. Called from `main`.
pub fn parse() -> Cli {
    Cli::parse()
}
