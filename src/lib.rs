//! Replay core for a time-travel debugger.
//!
//! Owns a recorded program trace and answers the queries a debugger
//! front-end needs to move through it: stepping, flow reconstruction, call
//! tree rendering, value inspection, the event log, and user-defined
//! tracepoints. Every component is read-only over a single
//! [`store::TraceStore`] and [`position::PositionModel`]; the
//! [`dispatch::Dispatcher`] is the only component that mutates session
//! state, serialising every request through a single-threaded cooperative
//! command loop.
//!
//! ## Feature flags
//!
//! - `cli`: builds the `core` binary (`bin/core.rs`) and its `clap`/
//!   `tracing-subscriber` dependencies. The library itself never installs a
//!   global subscriber or parses process arguments.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

/// Newtype identifiers shared across every component.
pub mod ids;

/// The error taxonomy returned by every fallible operation.
pub mod error;

/// The enumerated configuration surface the core honours.
pub mod config;

/// Cancellation token shared by every long-running operation.
pub mod cancel;

/// Typed value graph, type descriptors, and history reconstruction.
pub mod value;

/// The canonical "where we are in the recording" position.
pub mod position;

/// Random-access, read-only access to the recorded artifact.
pub mod store;

/// Ordered, filterable, paginated view of program events.
pub mod eventlog;

/// Builds and incrementally expands the rendered call tree.
pub mod calltree;

/// Resolves abstract step/jump requests into new positions.
pub mod stepping;

/// Builds the per-line, per-iteration flow view of a function instance.
pub mod flow;

/// Applies user-defined synthetic log expressions across a recording.
pub mod tracepoint;

/// Single-threaded cooperative command loop composing every component.
pub mod dispatch;

/// Length-prefixed JSON framing for the request/response/update transport.
pub mod wire;

/// Routes wire requests to the matching `Dispatcher` method.
pub mod protocol;

/// CLI argument parsing and exit-code mapping for the `core` binary.
#[cfg(feature = "cli")]
pub mod cli;
