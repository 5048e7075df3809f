//! Call-Tree Engine: builds and incrementally expands a tree of calls,
//! with deterministic collapse/non-expanded placeholders (§4.4).
//!
//! The tree itself lives flattened in [`crate::store::TraceStore`] as
//! `CallRecord`s with `children` already in `callerTick` order (§4.4:
//! ties are impossible by §3 invariant 1). This module is the rendering
//! layer on top of it: it decides which children are materialised as
//! `Call` lines and which collapse into a `NonExpanded` placeholder.

use crate::error::{CoreError, CoreResult};
use crate::ids::CallKey;
use crate::position::Location;
use crate::store::TraceStore;
use crate::value::Value;
use globset::Glob;
use serde::Serialize;

/// Bounds how much the engine materialises per call (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
    /// The Call-Tree Engine is disabled entirely.
    NoInstrumentation,
    /// Only key and source location are available.
    CallKeyOnly,
    /// Key, location, and raw call shape, but no argument/return values.
    RawRecordNoValues,
    /// Everything, including argument and return value trees.
    FullRecord,
}

/// A materialised call in the rendered tree (§4.4).
#[derive(Debug, Clone, Serialize)]
pub struct Call {
    pub key: CallKey,
    pub location: Location,
    pub depth: usize,
    pub raw_name: String,
    pub args: Option<Value>,
    pub return_value: Option<Value>,
    pub children: Vec<CallKey>,
    pub hidden_children: usize,
    pub parent: Option<CallKey>,
}

/// Why a run of children was collapsed into a single placeholder (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NonExpandedKind {
    Callstack,
    Children,
    Siblings,
    Calls,
    CallstackInternal,
    CallstackInternalChild,
}

/// One line of the flattened, depth-first rendering of the tree (§4.4).
#[derive(Debug, Clone, Serialize)]
pub enum CallLine {
    Call(Call),
    NonExpanded { kind: NonExpandedKind, count: usize, hidden_children: usize, is_error: bool },
    StartCallstackCount(usize),
    CallstackInternalCount(usize),
    EndOfProgramCall,
}

/// `loadCallTrace` response (§4.4).
#[derive(Debug, Clone, Serialize)]
pub struct CallArgsUpdateResults {
    pub finished: bool,
    pub call_lines: Vec<CallLine>,
    pub total_calls_count: usize,
}

/// Shell-glob-over-path and regex-over-name ignore rules, joined by
/// newline in the wire request (§4.4).
#[derive(Debug)]
pub struct IgnorePatterns {
    path_globs: Vec<globset::GlobMatcher>,
    name_regexes: Vec<regex::Regex>,
}

impl IgnorePatterns {
    /// Parses `path_patterns`/`name_patterns`, each one pattern per line.
    /// Malformed patterns produce `ErrorConfig` (§4.4 failure semantics).
    pub fn parse(path_patterns: &str, name_patterns: &str) -> CoreResult<Self> {
        let path_globs = path_patterns
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| {
                Glob::new(line.trim())
                    .map(|g| g.compile_matcher())
                    .map_err(|err| CoreError::ErrorConfig(format!("bad ignore glob '{line}': {err}")))
            })
            .collect::<CoreResult<Vec<_>>>()?;
        let name_regexes = name_patterns
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| {
                regex::Regex::new(line.trim())
                    .map_err(|err| CoreError::ErrorConfig(format!("bad ignore regex '{line}': {err}")))
            })
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self { path_globs, name_regexes })
    }

    fn matches(&self, path: &str, name: &str) -> bool {
        self.path_globs.iter().any(|g| g.is_match(path)) || self.name_regexes.iter().any(|r| r.is_match(name))
    }

    /// No rules at all.
    pub fn none() -> Self {
        Self { path_globs: vec![], name_regexes: vec![] }
    }
}

/// Builds rendered call-tree views on top of a [`TraceStore`].
///
/// Mirrors the shape of a trace builder that turns a flat, recorded
/// structure into a structured view on demand: children are walked
/// depth-first, accumulating into a flat line buffer, exactly the way a
/// recursive call-frame builder reconstructs a tree from parent/child
/// index arrays.
#[derive(Debug)]
pub struct CallTreeEngine<'a> {
    store: &'a TraceStore,
    mode: Mode,
}

impl<'a> CallTreeEngine<'a> {
    pub fn new(store: &'a TraceStore, mode: Mode) -> Self {
        Self { store, mode }
    }

    /// `loadCallTrace(location, startCallLineIndex, depth, height,
    /// ignorePatterns, autoCollapsing, optimizeCollapse)`. `auto_collapsing`
    /// gates whether depth-limit placeholders and ignore-pattern collapsing
    /// apply at all; `optimize_collapse` additionally folds runs of
    /// consecutive same-function siblings once `auto_collapsing` already let
    /// them through.
    #[allow(clippy::too_many_arguments)]
    pub fn load_call_trace(
        &self,
        root: CallKey,
        start_call_line_index: usize,
        depth: usize,
        height: usize,
        ignore: &IgnorePatterns,
        auto_collapsing: bool,
        optimize_collapse: bool,
    ) -> CoreResult<CallArgsUpdateResults> {
        if matches!(self.mode, Mode::NoInstrumentation) {
            return Ok(CallArgsUpdateResults { finished: true, call_lines: vec![], total_calls_count: 0 });
        }

        let mut lines = Vec::new();
        self.render(root, 0, depth, ignore, auto_collapsing, optimize_collapse, &mut lines)?;

        let total_calls_count = lines
            .iter()
            .filter(|line| matches!(line, CallLine::Call(_)))
            .count();

        // Requests beyond the recording's call set return an empty,
        // finished result (§4.4 failure semantics).
        let page: Vec<CallLine> = lines.into_iter().skip(start_call_line_index).take(height.max(1)).collect();
        let finished = start_call_line_index + page.len() >= total_calls_count;

        Ok(CallArgsUpdateResults { finished, call_lines: page, total_calls_count })
    }

    #[allow(clippy::too_many_arguments)]
    fn render(
        &self,
        key: CallKey,
        current_depth: usize,
        depth_limit: usize,
        ignore: &IgnorePatterns,
        auto_collapsing: bool,
        optimize_collapse: bool,
        out: &mut Vec<CallLine>,
    ) -> CoreResult<()> {
        let call = self.materialise(key, current_depth)?;
        let path_text = self
            .store
            .function_by_key(self.store.call(key)?.function_key)
            .ok()
            .and_then(|f| self.store.path_text(f.path))
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        out.push(CallLine::Call(call.clone()));

        if auto_collapsing && current_depth >= depth_limit {
            if !call.children.is_empty() {
                out.push(CallLine::NonExpanded {
                    kind: NonExpandedKind::Children,
                    count: call.children.len(),
                    hidden_children: call.children.len(),
                    is_error: false,
                });
            }
            return Ok(());
        }

        self.render_children(
            &call,
            path_text.as_str(),
            current_depth,
            depth_limit,
            ignore,
            auto_collapsing,
            optimize_collapse,
            out,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn render_children(
        &self,
        call: &Call,
        parent_path: &str,
        current_depth: usize,
        depth_limit: usize,
        ignore: &IgnorePatterns,
        auto_collapsing: bool,
        optimize_collapse: bool,
        out: &mut Vec<CallLine>,
    ) -> CoreResult<()> {
        let mut run_start: Option<usize> = None;
        let mut run_len = 0usize;
        let mut last_function_key = None;

        let mut idx = 0;
        while idx < call.children.len() {
            let child_key = call.children[idx];
            let child_call = self.store.call(child_key)?;
            let function = self.store.function_by_key(child_call.function_key)?;

            if auto_collapsing && ignore.matches(parent_path, &function.name) {
                let mut run_count = 0;
                let start = idx;
                while idx < call.children.len() {
                    let k = call.children[idx];
                    let c = self.store.call(k)?;
                    let f = self.store.function_by_key(c.function_key)?;
                    if !ignore.matches(parent_path, &f.name) {
                        break;
                    }
                    run_count += 1;
                    idx += 1;
                }
                out.push(CallLine::NonExpanded {
                    kind: NonExpandedKind::Calls,
                    count: run_count,
                    hidden_children: run_count,
                    is_error: false,
                });
                let _ = start;
                continue;
            }

            if optimize_collapse && last_function_key == Some(child_call.function_key) {
                run_len += 1;
                run_start.get_or_insert(idx);
                idx += 1;
                continue;
            }

            if run_len > 1 {
                out.push(CallLine::NonExpanded {
                    kind: NonExpandedKind::Siblings,
                    count: run_len,
                    hidden_children: 0,
                    is_error: false,
                });
            }
            run_len = 0;
            run_start = None;
            last_function_key = Some(child_call.function_key);

            self.render(
                child_key,
                current_depth + 1,
                depth_limit,
                ignore,
                auto_collapsing,
                optimize_collapse,
                out,
            )?;
            idx += 1;
        }

        if run_len > 1 {
            out.push(CallLine::NonExpanded {
                kind: NonExpandedKind::Siblings,
                count: run_len,
                hidden_children: 0,
                is_error: false,
            });
        }

        Ok(())
    }

    fn materialise(&self, key: CallKey, depth: usize) -> CoreResult<Call> {
        let record = self.store.call(key)?;
        let function = self.store.function_by_key(record.function_key)?;

        let (args, return_value) = match self.mode {
            Mode::FullRecord => (record.args_snapshot.clone(), record.return_value_snapshot.clone()),
            _ => (None, None),
        };

        Ok(Call {
            key,
            location: Location {
                path: function.path,
                line: function.line_first,
                function_name: function.name.clone(),
                tick: record.caller_tick,
                depth,
                key,
            },
            depth,
            raw_name: function.name.clone(),
            args,
            return_value,
            children: record.children.clone(),
            hidden_children: 0,
            parent: if record.parent_call_key.is_present() { Some(record.parent_call_key) } else { None },
        })
    }

    /// `expandChildren(callKey)`: materialises every child of `key` as
    /// individual `Call` lines with no collapsing.
    pub fn expand_children(&self, key: CallKey) -> CoreResult<Vec<CallLine>> {
        let record = self.store.call(key)?;
        record
            .children
            .iter()
            .map(|&child| self.materialise(child, record_depth(self.store, key)? + 1).map(CallLine::Call))
            .collect()
    }

    /// `collapseChildren(callKey, nonExpandedKind, count)`: the inverse of
    /// `expand_children` — folds `count` children back into one
    /// placeholder line.
    pub fn collapse_children(
        &self,
        key: CallKey,
        kind: NonExpandedKind,
        count: usize,
    ) -> CoreResult<CallLine> {
        let record = self.store.call(key)?;
        if count > record.children.len() {
            return Err(CoreError::ErrorConfig(format!(
                "cannot collapse {count} children of call {key:?} with only {} children",
                record.children.len()
            )));
        }
        Ok(CallLine::NonExpanded { kind, count, hidden_children: count, is_error: false })
    }

    /// `findCall(searchArg)`: first call whose raw name contains the
    /// search text, depth-first from `root`.
    pub fn find_call(&self, root: CallKey, search: &str) -> CoreResult<Option<CallKey>> {
        let record = self.store.call(root)?;
        let function = self.store.function_by_key(record.function_key)?;
        if function.name.contains(search) {
            return Ok(Some(root));
        }
        for &child in &record.children {
            if let Some(found) = self.find_call(child, search)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}

fn record_depth(store: &TraceStore, mut key: CallKey) -> CoreResult<usize> {
    let mut depth = 0;
    loop {
        let record = store.call(key)?;
        if !record.parent_call_key.is_present() {
            return Ok(depth);
        }
        key = record.parent_call_key;
        depth += 1;
    }
}
