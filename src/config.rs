//! The enumerated configuration surface the core honours (§6).

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Advisory hint for how the UI lays out the flow view.
///
/// The core stores and echoes this value but its own behaviour does not
/// depend on it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowUiHint {
    /// Flow panes rendered side-by-side with the editor.
    #[default]
    Parallel,
    /// Flow rendered inline with the source.
    Inline,
    /// Flow rendered across multiple lines per source line.
    Multiline,
}

/// The full set of options the core honours, with their defaults.
///
/// Mirrors the table in §6: every field gates exactly one component or
/// behaviour, nothing more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Disables the Call-Tree Engine entirely when `false`.
    pub calltrace_enabled: bool,
    /// Downgrades the Call-Tree Engine to `CallKeyOnly` mode when `false`.
    pub calltrace_call_args: bool,
    /// Disables the Flow Reconstructor when `false`.
    pub flow_enabled: bool,
    /// Advisory layout hint, ignored by the core's own logic.
    pub flow_ui: FlowUiHint,
    /// Gates the Event Log.
    pub events_enabled: bool,
    /// Gates the Tracepoint Runtime.
    pub trace_enabled: bool,
    /// Gates Value Service history queries.
    pub history_enabled: bool,
    /// Gates REPL expression evaluation.
    pub repl_enabled: bool,
    /// Suppresses outgoing diagnostic envelopes; no other effect.
    pub telemetry: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            calltrace_enabled: true,
            calltrace_call_args: true,
            flow_enabled: true,
            flow_ui: FlowUiHint::Parallel,
            events_enabled: true,
            trace_enabled: true,
            history_enabled: true,
            repl_enabled: true,
            telemetry: true,
        }
    }
}

/// A sparse set of option overrides, as received from the UI.
///
/// Keys not recognised by [`CoreConfig::merge_overrides`] produce
/// `ErrorConfig` rather than being silently dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPatch {
    /// Raw `option -> JSON value` pairs as received on the wire.
    pub options: Vec<(String, serde_json::Value)>,
}

impl CoreConfig {
    /// Applies a patch in place, rejecting unknown keys or mistyped values.
    pub fn merge_overrides(&mut self, patch: &ConfigPatch) -> CoreResult<()> {
        for (key, value) in &patch.options {
            self.apply_one(key, value)?;
        }
        Ok(())
    }

    fn apply_one(&mut self, key: &str, value: &serde_json::Value) -> CoreResult<()> {
        let as_bool = || {
            value
                .as_bool()
                .ok_or_else(|| CoreError::ErrorConfig(format!("{key} expects a bool")))
        };
        match key {
            "calltrace.enabled" => self.calltrace_enabled = as_bool()?,
            "calltrace.callArgs" => self.calltrace_call_args = as_bool()?,
            "flow.enabled" => self.flow_enabled = as_bool()?,
            "flow.ui" => {
                self.flow_ui = match value.as_str() {
                    Some("parallel") => FlowUiHint::Parallel,
                    Some("inline") => FlowUiHint::Inline,
                    Some("multiline") => FlowUiHint::Multiline,
                    _ => {
                        return Err(CoreError::ErrorConfig(format!(
                            "flow.ui expects one of parallel|inline|multiline, got {value}"
                        )))
                    }
                }
            }
            "events.enabled" => self.events_enabled = as_bool()?,
            "trace.enabled" => self.trace_enabled = as_bool()?,
            "history.enabled" => self.history_enabled = as_bool()?,
            "repl.enabled" => self.repl_enabled = as_bool()?,
            "telemetry" => self.telemetry = as_bool()?,
            other => return Err(CoreError::ErrorConfig(format!("unknown option '{other}'"))),
        }
        Ok(())
    }
}
