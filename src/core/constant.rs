//! Filenames, environment variable names, and default paths shared between
//! the parent and the re-executed `init` subcommand. Kept in one place
//! because the two sides of the fork/exec boundary must agree on them
//! without sharing any Rust types.

/// Default runtime root when running as root.
pub const DEFAULT_RUNTIME_ROOT: &str = "/var/run/capsule";

/// Subdirectory of the runtime root holding one directory per container.
pub const CONTAINERS_DIR: &str = "containers";

/// Subdirectory of the runtime root holding network driver persistence.
pub const NETWORK_DIR: &str = "network";

/// Name of the per-container persisted state file.
pub const STATE_FILE: &str = "state.json";

/// Name of the per-container exec-fifo rendezvous file.
pub const EXEC_FIFO: &str = "exec.fifo";

/// Name of the per-container spec file consumed by `create`/`run`.
pub const SPEC_FILE: &str = "capsule-spec.json";

/// Env var carrying the fd number of the child's end of the config pipe.
pub const ENV_CONFIG_PIPE: &str = "_CAPSULE_CONFIG_PIPE";

/// Env var marking a re-executed process as the container initializer.
/// `exec` (joining an already-running container) needs no re-exec step —
/// `setns` works from the CLI process directly — so this only ever carries
/// the one value `init`.
pub const ENV_INITIALIZER_TYPE: &str = "_CAPSULE_INITIALIZER_TYPE";

/// Env var carrying the fd number of the exec-fifo, opened write-only by
/// the parent on the child's behalf before re-exec.
pub const ENV_EXEC_FIFO_FD: &str = "_CAPSULE_EXEC_FIFO_FD";

/// Default timeout, in seconds, before a SIGTERM escalates to SIGKILL.
pub const DEFAULT_SIGTERM_TIMEOUT_SECS: u64 = 10;
