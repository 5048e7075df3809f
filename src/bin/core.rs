//! `core`: the replay core's process entry point.
//!
//! Parses the CLI surface of §6, opens the recorded artifact, binds the
//! local sockets, and runs the Dispatcher's command loop over the UI client
//! channel until the peer disconnects or an idle timeout elapses.

use clap::Parser;
use codetracer_replay_core::cli::{exit_code_for_error, init_logging, Cli, ExitCode, SocketPaths};
use codetracer_replay_core::config::CoreConfig;
use codetracer_replay_core::dispatch::Dispatcher;
use codetracer_replay_core::error::CoreError;
use codetracer_replay_core::ids::{CallKey, PathId, Tick};
use codetracer_replay_core::position::{Location, Position};
use codetracer_replay_core::protocol;
use codetracer_replay_core::store::TraceStore;
use codetracer_replay_core::wire::{read_frame, write_frame, Envelope, StreamEnvelope};
use std::time::Duration;

fn main() {
    init_logging();
    let cli = Cli::parse();
    let code = run(&cli);
    std::process::exit(code.into());
}

fn run(cli: &Cli) -> ExitCode {
    let store = match TraceStore::load(&cli.trace_dir) {
        Ok(store) => store,
        Err(err) => {
            tracing::error!(error = %err, "failed to load trace artifact");
            return exit_code_for_error(&err);
        }
    };

    let initial = entry_position(&store);
    let mut dispatcher = Dispatcher::new(store, initial, CoreConfig::default());

    let scope_dir = std::env::temp_dir().join(format!("codetracer-{}", std::process::id()));
    if let Err(err) = std::fs::create_dir_all(&scope_dir) {
        tracing::error!(error = %err, "failed to create socket scope directory");
        return ExitCode::BindFailure;
    }
    let sockets = SocketPaths::resolve(&scope_dir, cli);
    tracing::info!(?sockets, "resolved local transport sockets");

    #[cfg(unix)]
    {
        serve_unix(&mut dispatcher, &sockets, cli.idle_timeout.map(Duration::from_secs))
    }
    #[cfg(not(unix))]
    {
        let _ = (&mut dispatcher, &sockets);
        tracing::error!("local stream sockets are only implemented on unix targets");
        ExitCode::BindFailure
    }
}

fn entry_position(store: &TraceStore) -> Position {
    match store.step(codetracer_replay_core::ids::StepIndex(0)) {
        Ok(step) => Position {
            tick: step.tick,
            location: Location {
                path: step.path,
                line: step.line,
                function_name: store
                    .call(step.call_key)
                    .and_then(|c| store.function_by_key(c.function_key))
                    .map(|f| f.name.clone())
                    .unwrap_or_default(),
                tick: step.tick,
                depth: step.frame_depth,
                key: step.call_key,
            },
            frame_depth: step.frame_depth,
            active_loop_context: None,
        },
        Err(_) => Position {
            tick: Tick::ZERO,
            location: Location {
                path: PathId(0),
                line: 0,
                function_name: String::new(),
                tick: Tick::ZERO,
                depth: 0,
                key: CallKey::NO_KEY,
            },
            frame_depth: 0,
            active_loop_context: None,
        },
    }
}

#[cfg(unix)]
fn serve_unix(
    dispatcher: &mut Dispatcher,
    sockets: &SocketPaths,
    idle_timeout: Option<Duration>,
) -> ExitCode {
    use std::os::unix::net::UnixListener;

    let _ = std::fs::remove_file(&sockets.ct_client_socket);
    let listener = match UnixListener::bind(&sockets.ct_client_socket) {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, path = ?sockets.ct_client_socket, "failed to bind client socket");
            return ExitCode::BindFailure;
        }
    };
    if let Some(timeout) = idle_timeout {
        if let Err(err) = listener.set_nonblocking(false) {
            tracing::warn!(error = %err, "could not configure listener blocking mode");
        }
        tracing::debug!(?timeout, "idle timeout configured");
    }

    let (mut stream, _addr) = match listener.accept() {
        Ok(accepted) => accepted,
        Err(err) => {
            tracing::error!(error = %err, "failed to accept client connection");
            return ExitCode::BindFailure;
        }
    };

    loop {
        let envelope: Option<Envelope> = match read_frame(&mut stream) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::error!(error = %err, "failed to read request frame");
                return ExitCode::Unspecified;
            }
        };
        let Some(request) = envelope else {
            tracing::info!("client disconnected");
            return ExitCode::Success;
        };

        let request_kind = request.kind.clone();
        let response = match protocol::handle_request(dispatcher, &request) {
            Ok(payload) => StreamEnvelope::for_operation(
                request_kind,
                codetracer_replay_core::dispatch::OpId(request.id),
                codetracer_replay_core::dispatch::UpdateId(0),
                payload,
            ),
            Err(err) => {
                tracing::warn!(error = %err, kind = %request_kind, "request failed");
                StreamEnvelope::for_operation(
                    "error",
                    codetracer_replay_core::dispatch::OpId(request.id),
                    codetracer_replay_core::dispatch::UpdateId(0),
                    serde_json::json!({ "requestKind": request_kind, "message": err.to_string() }),
                )
            }
        };
        if let Err(err) = write_frame(&mut stream, &response) {
            tracing::error!(error = %err, "failed to write response frame");
            return match err {
                CoreError::ArtifactCorrupt { .. } => exit_code_for_error(&err),
                _ => ExitCode::Unspecified,
            };
        }
    }
}
