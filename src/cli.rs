//! CLI surface: argument parsing and exit-code mapping for the `core`
//! binary (§6, §4a). Kept separate from `bin/core.rs` so the parsing and
//! mapping logic can be unit tested without a process boundary.

use crate::error::CoreError;
use clap::Parser;
use std::path::PathBuf;

/// `core --trace-dir <path> [--socket <path>] [--dap-socket <path>]` (§6).
#[derive(Debug, Parser)]
#[command(name = "core", about = "Replay core for a time-travel debugger")]
pub struct Cli {
    /// Directory containing the recorded artifact (`program.json`,
    /// `steps.bin`, `calls.bin`, `symbols.bin`, `events.bin`, `types.bin`,
    /// `source/…`).
    #[arg(long, value_name = "PATH")]
    pub trace_dir: PathBuf,

    /// Overrides the UI client channel socket path (`ct_client_socket`).
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Overrides the debug-adapter protocol bridge socket path
    /// (`ct_dap_socket`).
    #[arg(long, value_name = "PATH")]
    pub dap_socket: Option<PathBuf>,

    /// Seconds of inactivity before the core exits with code `4`.
    #[arg(long, value_name = "SECONDS", env = "CODETRACER_IDLE_TIMEOUT")]
    pub idle_timeout: Option<u64>,
}

/// The well-known local socket paths of §6, relative to a process-scoped
/// tmp directory.
#[derive(Debug, Clone)]
pub struct SocketPaths {
    pub ct_socket: PathBuf,
    pub ct_client_socket: PathBuf,
    pub ct_dap_socket: PathBuf,
    pub ct_ipc: PathBuf,
    pub codetracer_plugin_socket: PathBuf,
}

impl SocketPaths {
    /// Resolves the default paths under `scope_dir`, applying the CLI's
    /// `--socket`/`--dap-socket` overrides where given.
    pub fn resolve(scope_dir: &std::path::Path, cli: &Cli) -> Self {
        Self {
            ct_socket: scope_dir.join("ct_socket"),
            ct_client_socket: cli.socket.clone().unwrap_or_else(|| scope_dir.join("ct_client_socket")),
            ct_dap_socket: cli.dap_socket.clone().unwrap_or_else(|| scope_dir.join("ct_dap_socket")),
            ct_ipc: scope_dir.join("ct_ipc"),
            codetracer_plugin_socket: scope_dir.join("codetracer_plugin_socket"),
        }
    }
}

/// Process exit codes of §6: `0` success, `2` artifact corrupt, `3` bind
/// failure, `4` idle-timeout exit, `1` unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Unspecified = 1,
    ArtifactCorrupt = 2,
    BindFailure = 3,
    IdleTimeout = 4,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

/// Maps a terminal [`CoreError`] to the exit code the binary should return.
/// `Cancelled` never reaches here: it is handled internally by the
/// Dispatcher and never propagates out of the command loop.
pub fn exit_code_for_error(err: &CoreError) -> ExitCode {
    match err {
        CoreError::ArtifactCorrupt { .. } => ExitCode::ArtifactCorrupt,
        _ => ExitCode::Unspecified,
    }
}

/// Installs the binary's `tracing-subscriber` `EnvFilter` layer. The
/// library crate never calls this; only `bin/core.rs` does, per §4a.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_trace_dir() {
        let cli = Cli::parse_from(["core", "--trace-dir", "/tmp/rec"]);
        assert_eq!(cli.trace_dir, PathBuf::from("/tmp/rec"));
        assert!(cli.socket.is_none());
    }

    #[test]
    fn socket_override_wins_over_default() {
        let cli = Cli::parse_from(["core", "--trace-dir", "/tmp/rec", "--socket", "/tmp/custom"]);
        let paths = SocketPaths::resolve(std::path::Path::new("/tmp/scope"), &cli);
        assert_eq!(paths.ct_client_socket, PathBuf::from("/tmp/custom"));
        assert_eq!(paths.ct_dap_socket, PathBuf::from("/tmp/scope/ct_dap_socket"));
    }

    #[test]
    fn artifact_corrupt_maps_to_exit_code_two() {
        let err = CoreError::ArtifactCorrupt { path: PathBuf::from("x"), reason: "bad magic".into() };
        assert_eq!(exit_code_for_error(&err), ExitCode::ArtifactCorrupt);
    }

    #[test]
    fn not_in_recording_is_unspecified() {
        let err = CoreError::NotInRecording("no step".into());
        assert_eq!(exit_code_for_error(&err), ExitCode::Unspecified);
    }
}
