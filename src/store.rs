//! Trace Store: random-access, read-only access to the recorded artifact
//! (§4.1).
//!
//! The store is the sole owner of the artifact's in-memory buffers; every
//! other component only holds `&TraceStore` back-references (§3).

use crate::error::{CoreError, CoreResult};
use crate::eventlog::{EventKind, EventRecord};
use crate::ids::{CallKey, EventId, FunctionKey, PathId, StepIndex, Tick, TypeId};
use crate::value::{TypeRecord, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// `{tick, sourceLoc, functionKey, frameDepth, kind, before/after value
/// snapshot, branch decisions}` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub tick: Tick,
    pub path: PathId,
    pub line: i64,
    pub call_key: CallKey,
    pub frame_depth: usize,
    pub kind: StepKind,
    pub before_values: Vec<(String, Value)>,
    pub after_values: Vec<(String, Value)>,
    pub branch_decisions: Vec<(String, BranchOutcome)>,
}

/// The three shapes a recorded observation can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    Line,
    Call,
    Return,
}

/// Whether a branch slot was exercised (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchOutcome {
    Taken,
    NotTaken,
    Unknown,
}

/// A uniquely keyed invocation of a function (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub function_key: FunctionKey,
    pub parent_call_key: CallKey,
    pub caller_tick: Tick,
    pub return_tick: Option<Tick>,
    pub args_snapshot: Option<Value>,
    pub return_value_snapshot: Option<Value>,
    /// Step indices belonging to this function instance, in tick order.
    pub step_indices: Vec<StepIndex>,
    /// Children in `callerTick` order (§4.4: deterministic ordering, ties
    /// impossible by §3 invariant 1).
    pub children: Vec<CallKey>,
}

/// `{path, name, line range, instrumentation flags}` (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub path: PathId,
    pub name: String,
    pub line_first: i64,
    pub line_last: i64,
}

/// In-memory source text plus a line-start offset index, built once per
/// path on first access.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub text: String,
    pub line_starts: Vec<usize>,
}

impl SourceFile {
    fn new(text: String) -> Self {
        let mut line_starts = vec![0];
        for (idx, byte) in text.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(idx + 1);
            }
        }
        Self { text, line_starts }
    }

    /// Returns the text of a single 1-based source line, if present.
    pub fn line(&self, line: i64) -> Option<&str> {
        if line < 1 {
            return None;
        }
        let idx = (line - 1) as usize;
        let start = *self.line_starts.get(idx)?;
        let end = self
            .line_starts
            .get(idx + 1)
            .map(|&e| e.saturating_sub(1))
            .unwrap_or(self.text.len());
        self.text.get(start..end)
    }
}

/// Owns every mapped buffer read from the recorded artifact (§3 ownership
/// rule, §4.1 contract).
#[derive(Debug)]
pub struct TraceStore {
    steps: Vec<StepRecord>,
    calls: Vec<CallRecord>,
    functions: Vec<FunctionRecord>,
    events: Vec<EventRecord>,
    types: Vec<TypeRecord>,
    paths: Vec<PathBuf>,
    sources: HashMap<PathId, SourceFile>,
    source_root: PathBuf,
}

impl TraceStore {
    /// Loads an artifact directory laid out per §6: `program.json`,
    /// `events.bin`, `steps.bin`, `calls.bin`, `symbols.bin`, `types.bin`,
    /// `source/…`.
    pub fn load(dir: &Path) -> CoreResult<TraceStore> {
        let paths: Vec<PathBuf> = read_records(&dir.join("symbols.bin"))
            .map(|functions: Vec<FunctionRecord>| functions.iter().map(|f| f.path).collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter()
            .map(|id| dir.join("source").join(id.0.to_string()))
            .collect();

        let functions: Vec<FunctionRecord> = read_records(&dir.join("symbols.bin"))?;
        let steps: Vec<StepRecord> = read_records(&dir.join("steps.bin"))?;
        let calls: Vec<CallRecord> = read_records(&dir.join("calls.bin"))?;
        let events: Vec<EventRecord> = read_records(&dir.join("events.bin"))?;
        let types: Vec<TypeRecord> = read_records(&dir.join("types.bin"))?;

        tracing::debug!(
            steps = steps.len(),
            calls = calls.len(),
            events = events.len(),
            "loaded trace artifact"
        );

        Ok(TraceStore {
            steps,
            calls,
            functions,
            events,
            types,
            paths,
            sources: HashMap::new(),
            source_root: dir.join("source"),
        })
    }

    /// Builds a store directly from in-memory records; used by tests and by
    /// tools that construct a recording programmatically.
    pub fn from_parts(
        steps: Vec<StepRecord>,
        calls: Vec<CallRecord>,
        functions: Vec<FunctionRecord>,
        events: Vec<EventRecord>,
        types: Vec<TypeRecord>,
        paths: Vec<PathBuf>,
    ) -> Self {
        Self {
            steps,
            calls,
            functions,
            events,
            types,
            paths,
            sources: HashMap::new(),
            source_root: PathBuf::new(),
        }
    }

    /// `stepByTick(tick) → Step`.
    pub fn step_by_tick(&self, tick: Tick) -> CoreResult<&StepRecord> {
        self.steps
            .binary_search_by_key(&tick, |s| s.tick)
            .ok()
            .and_then(|idx| self.steps.get(idx))
            .ok_or_else(|| CoreError::NotInRecording(format!("no step at tick {}", tick.0)))
    }

    /// The step index for a given tick, if present.
    pub fn step_index_by_tick(&self, tick: Tick) -> Option<StepIndex> {
        self.steps.binary_search_by_key(&tick, |s| s.tick).ok().map(StepIndex)
    }

    /// Direct index access, used by components that already hold a
    /// `StepIndex` (e.g. from a previous query).
    pub fn step(&self, index: StepIndex) -> CoreResult<&StepRecord> {
        self.steps
            .get(index.0)
            .ok_or_else(|| CoreError::NotInRecording(format!("no step at index {}", index.0)))
    }

    /// All steps, tick-ordered. Used by components that scan the whole
    /// recording (e.g. the Tracepoint Runtime).
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// `stepsInFunction(callKey) → ordered sequence of Step`.
    pub fn steps_in_function(&self, call_key: CallKey) -> CoreResult<Vec<&StepRecord>> {
        let call = self.call(call_key)?;
        Ok(call.step_indices.iter().map(|&idx| &self.steps[idx.0]).collect())
    }

    /// `functionByKey` restricted to the call's function instance.
    pub fn call(&self, call_key: CallKey) -> CoreResult<&CallRecord> {
        self.calls
            .get(usize::from(call_key))
            .ok_or_else(|| CoreError::NotInRecording(format!("no call {}", call_key.0)))
    }

    /// `functionByKey(callKey)`.
    pub fn function_by_key(&self, key: FunctionKey) -> CoreResult<&FunctionRecord> {
        self.functions
            .get(key.0)
            .ok_or_else(|| CoreError::NotInRecording(format!("no function {}", key.0)))
    }

    /// `childrenOf(callKey)`.
    pub fn children_of(&self, call_key: CallKey) -> CoreResult<&[CallKey]> {
        Ok(&self.call(call_key)?.children)
    }

    /// `typeByKey(k)`.
    pub fn type_by_key(&self, id: TypeId) -> CoreResult<&TypeRecord> {
        self.types
            .get(id.0)
            .ok_or_else(|| CoreError::NotInRecording(format!("no type {}", id.0)))
    }

    /// `eventsInRange(tickLow, tickHigh, filterMask) → lazy sequence`.
    pub fn events_in_range(
        &self,
        tick_low: Tick,
        tick_high: Tick,
        filter_mask: &[EventKind],
    ) -> impl Iterator<Item = &EventRecord> {
        self.events.iter().filter(move |e| {
            e.tick >= tick_low
                && e.tick <= tick_high
                && (filter_mask.is_empty() || filter_mask.contains(&e.kind))
        })
    }

    /// Looks up an event by id.
    pub fn event(&self, id: EventId) -> CoreResult<&EventRecord> {
        self.events
            .get(id.0)
            .ok_or_else(|| CoreError::NotInRecording(format!("no event {}", id.0)))
    }

    /// All recorded events, tick-ordered.
    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    /// `valueAt(stepRef, expressionRef) → Value`. Parses `expression` against
    /// the grammar `value::parse_expression` accepts (plain identifiers,
    /// `.field`, `[index]`, `*deref`, `#tag`) and resolves it against the
    /// step's `afterValues`, falling back to `beforeValues` for names only
    /// bound before the step ran.
    pub fn value_at(&self, step: StepIndex, expression: &str) -> CoreResult<Value> {
        let step = self.step(step)?;
        let expr = crate::value::parse_expression(expression)?;
        let bindings: Vec<(String, Value)> =
            step.after_values.iter().chain(step.before_values.iter()).cloned().collect();
        crate::value::evaluate(&expr, &bindings)
    }

    /// Resolves a `PathId` to the real source path it was recorded against,
    /// not just its numeric index — needed anywhere a path is compared
    /// against a user-facing glob, as call-tree ignore rules do.
    pub fn path_text(&self, id: PathId) -> Option<&Path> {
        self.paths.get(id.0).map(PathBuf::as_path)
    }

    /// `sourceFor(path) → text + line index`.
    pub fn source_for(&mut self, path: PathId) -> CoreResult<&SourceFile> {
        if !self.sources.contains_key(&path) {
            let file_path = self
                .paths
                .get(path.0)
                .cloned()
                .unwrap_or_else(|| self.source_root.join(path.0.to_string()));
            let text = std::fs::read_to_string(&file_path).map_err(|err| {
                CoreError::ArtifactCorrupt {
                    path: file_path.clone(),
                    reason: err.to_string(),
                }
            })?;
            self.sources.insert(path, SourceFile::new(text));
        }
        Ok(self.sources.get(&path).expect("just inserted"))
    }

    /// Number of recorded steps, used by boundary checks (first/last tick).
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

const MAGIC: &[u8; 4] = b"CTRC";
const VERSION: u32 = 1;

/// Writes a stream file in the header + length-prefixed-JSON-records
/// layout described in §6. Kept deliberately simple: the header carries
/// exactly the fields §4.1 requires the store to validate (magic, version,
/// record stride is implicit in the length prefixes).
pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> CoreResult<()> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&(records.len() as u64).to_le_bytes());
    for record in records {
        let json = serde_json::to_vec(record)?;
        buf.extend_from_slice(&(json.len() as u64).to_le_bytes());
        buf.extend_from_slice(&json);
    }
    let mut file = std::fs::File::create(path)?;
    file.write_all(&buf)?;
    Ok(())
}

fn read_records<T: for<'de> Deserialize<'de>>(path: &Path) -> CoreResult<Vec<T>> {
    let mut file = std::fs::File::open(path).map_err(|err| CoreError::ArtifactCorrupt {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(|err| CoreError::ArtifactCorrupt {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    read_records_from_slice(&buf).map_err(|reason| CoreError::ArtifactCorrupt {
        path: path.to_path_buf(),
        reason,
    })
}

fn read_records_from_slice<T: for<'de> Deserialize<'de>>(buf: &[u8]) -> Result<Vec<T>, String> {
    if buf.len() < 16 {
        return Err("truncated header".to_string());
    }
    if &buf[0..4] != MAGIC {
        return Err(format!("bad magic {:?}", &buf[0..4]));
    }
    let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    if version < 1 {
        return Err(format!("unsupported version {version}"));
    }
    let count = u64::from_le_bytes(buf[8..16].try_into().unwrap()) as usize;
    let mut offset = 16;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        if offset + 8 > buf.len() {
            return Err("truncated record length".to_string());
        }
        let len = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap()) as usize;
        offset += 8;
        if offset + len > buf.len() {
            return Err("truncated record body".to_string());
        }
        let record: T = serde_json::from_slice(&buf[offset..offset + len])
            .map_err(|err| format!("malformed record: {err}"))?;
        out.push(record);
        offset += len;
    }
    Ok(out)
}
