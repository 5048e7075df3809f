//! Event Log: ordered, filterable, paginated view of program events (§4.6).

use crate::error::{CoreError, CoreResult};
use crate::ids::{EventId, PathId, Tick};
use crate::position::Location;
use serde::{Deserialize, Serialize};

/// The closed set of event kinds the recorder may emit (§3). Ordered by
/// declaration so `order_column` sorts on kind can use derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Read,
    Write,
    ReadFile,
    WriteFile,
    ReadDir,
    OpenDir,
    CloseDir,
    Open,
    Socket,
    Error,
    TraceLogEvent,
    EvmEvent,
}

/// `{eventId, tick, kind, content, associatedStep?, highLevelLoc?,
/// metadata}` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub tick: Tick,
    pub kind: EventKind,
    pub content: String,
    /// Set when `content` is base64-encoded binary rather than plain text.
    pub content_is_base64: bool,
    pub associated_step: Option<crate::ids::StepIndex>,
    pub high_level_loc: Option<Location>,
    pub metadata: Vec<(String, String)>,
}

/// One column descriptor, as sent by the UI's data table (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub data: String,
    pub name: String,
    pub orderable: bool,
    pub searchable: bool,
    pub search: SearchSpec,
}

/// A single search predicate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchSpec {
    pub value: String,
    pub regex: bool,
}

/// `updateTable` request payload (§4.6).
#[derive(Debug, Clone)]
pub struct TableQuery {
    pub columns: Vec<ColumnSpec>,
    pub order_column: Option<usize>,
    pub order_ascending: bool,
    pub draw: u64,
    pub start: usize,
    pub length: usize,
    pub search: SearchSpec,
}

/// `TableData{draw, recordsTotal, recordsFiltered, data}` (§4.6).
#[derive(Debug, Clone, Serialize)]
pub struct TableData {
    pub draw: u64,
    pub records_total: usize,
    pub records_filtered: usize,
    pub data: Vec<EventRecord>,
}

/// `updateTable({columns, order, draw, start, length, search},
/// selectedKinds, isTrace, traceId) → TableData` (§4.6).
pub fn update_table(
    events: &[EventRecord],
    query: &TableQuery,
    selected_kinds: &[EventKind],
) -> CoreResult<TableData> {
    let matches_kind = |e: &&EventRecord| selected_kinds.is_empty() || selected_kinds.contains(&e.kind);
    let records_total = events.iter().filter(matches_kind).count();

    let predicate = build_search_predicate(&query.search)?;

    let mut filtered: Vec<&EventRecord> =
        events.iter().filter(matches_kind).filter(|e| predicate(e)).collect();

    // `order_column` selects which column to sort by; ties (and an
    // unrecognised or absent column) fall back to ascending tick (§4.6).
    let order_field = query
        .order_column
        .and_then(|idx| query.columns.get(idx))
        .map(|column| column.data.as_str());
    filtered.sort_by(|a, b| {
        let primary = match order_field {
            Some("content") => a.content.cmp(&b.content),
            Some("kind") => a.kind.cmp(&b.kind),
            _ => a.tick.cmp(&b.tick),
        };
        if query.order_ascending {
            primary
        } else {
            primary.reverse()
        }
        .then_with(|| a.tick.cmp(&b.tick))
    });

    let records_filtered = filtered.len();
    let page: Vec<EventRecord> = filtered
        .into_iter()
        .skip(query.start)
        .take(query.length.max(1))
        .cloned()
        .collect();

    Ok(TableData { draw: query.draw, records_total, records_filtered, data: page })
}

fn build_search_predicate(
    search: &SearchSpec,
) -> CoreResult<Box<dyn Fn(&&EventRecord) -> bool + '_>> {
    if search.value.is_empty() {
        return Ok(Box::new(|_| true));
    }
    if search.regex {
        let re = regex::Regex::new(&search.value)
            .map_err(|err| CoreError::ErrorConfig(format!("invalid regex '{}': {err}", search.value)))?;
        Ok(Box::new(move |e: &&EventRecord| re.is_match(&e.content)))
    } else {
        let needle = search.value.clone();
        Ok(Box::new(move |e: &&EventRecord| e.content.contains(&needle)))
    }
}
