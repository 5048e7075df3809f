//! Value Service: resolves expressions at a tick into a typed, lazily
//! expandable value graph, and reconstructs value history over time (§4.5).

use crate::error::{CoreError, CoreResult};
use crate::ids::TypeId;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A tagged tree over the closed variant set described in §3.
///
/// The set is closed deliberately: extending it requires bumping the
/// artifact version (§9), so the core can reject unknown `kind` tags with
/// `ArtifactCorrupt` instead of misinterpreting them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Value {
    /// Signed integer.
    Int { i: i64, type_id: TypeId },
    /// Floating point.
    Float { f: f64, type_id: TypeId },
    /// Boolean.
    Bool { b: bool, type_id: TypeId },
    /// Single character.
    Char { c: char, type_id: TypeId },
    /// UTF-8 string.
    String { text: String, type_id: TypeId },
    /// C-style string (NUL-terminated in the source language).
    CString { text: String, type_id: TypeId },
    /// Sequence, array, set, or varargs list, depending on `type_id`'s kind.
    Seq {
        elements: Vec<Value>,
        /// Whether more elements exist past `elements` (pagination, §4.5).
        partially_expanded: bool,
        type_id: TypeId,
    },
    /// A named-field instance (struct/object).
    Instance { field_values: Vec<(String, Value)>, type_id: TypeId },
    /// A positional tuple.
    Tuple { elements: Vec<Value>, type_id: TypeId },
    /// A tagged union with one active arm.
    Variant { discriminator: String, contents: Box<Value>, type_id: TypeId },
    /// A reference or raw pointer. `address` is `None` when the raw text
    /// could not be decoded as an integer address (§9 Open Question).
    Pointer {
        raw_address: String,
        address: Option<u64>,
        ref_value: Option<Box<Value>>,
        type_id: TypeId,
    },
    /// A key/value table.
    Table { entries: Vec<(Value, Value)>, type_id: TypeId },
    /// An enumerator value: the underlying integer plus its name, when the
    /// Type descriptor has one for it.
    Enum { i: i64, enumerator: Option<String>, type_id: TypeId },
    /// A reference to a function (for function pointers / closures).
    FunctionRef { name: String, type_id: TypeId },
    /// Opaque text the core cannot further structure.
    Raw { text: String, type_id: TypeId },
    /// A cycle marker: the recorder emits these instead of looping forever
    /// over a cyclic object graph (§9).
    Recursion { type_id: TypeId },
    /// A value the recorder chose not to materialise; must be fetched via
    /// `expand_value`.
    NonExpanded { type_id: TypeId },
    /// The absence of a value (e.g. a null pointer, an unset `Option`).
    None { type_id: TypeId },
    /// An error encountered while evaluating or recording the value.
    Error { msg: String, type_id: TypeId },
}

impl Value {
    /// The `TypeId` every variant carries.
    pub fn type_id(&self) -> TypeId {
        match self {
            Value::Int { type_id, .. }
            | Value::Float { type_id, .. }
            | Value::Bool { type_id, .. }
            | Value::Char { type_id, .. }
            | Value::String { type_id, .. }
            | Value::CString { type_id, .. }
            | Value::Seq { type_id, .. }
            | Value::Instance { type_id, .. }
            | Value::Tuple { type_id, .. }
            | Value::Variant { type_id, .. }
            | Value::Pointer { type_id, .. }
            | Value::Table { type_id, .. }
            | Value::Enum { type_id, .. }
            | Value::FunctionRef { type_id, .. }
            | Value::Raw { type_id, .. }
            | Value::Recursion { type_id }
            | Value::NonExpanded { type_id }
            | Value::None { type_id }
            | Value::Error { type_id, .. } => *type_id,
        }
    }
}

/// Descriptor used for rendering and expansion (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRecord {
    /// The closed kind tag.
    pub kind: TypeKind,
    /// The language-native spelling, e.g. `"Vec<i32>"`.
    pub lang_type: String,
    /// Element type, for sequences/pointers.
    pub element_type: Option<TypeId>,
    /// Key type, for tables.
    pub key_type: Option<TypeId>,
    /// Value type, for tables.
    pub value_type: Option<TypeId>,
    /// Return type, for function references.
    pub return_type: Option<TypeId>,
    /// Field labels, in declaration order, for instances/tuples.
    pub field_labels: Vec<String>,
    /// Variant arm labels, for tagged unions.
    pub variant_labels: Vec<String>,
    /// Enumerator names, indexed by the underlying integer value.
    pub enumerator_names: Vec<String>,
}

impl TypeRecord {
    /// Structural key used for type equality (§3): two types recorded
    /// identically compare equal regardless of where in the artifact they
    /// were interned.
    pub fn structural_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.kind.hash(&mut hasher);
        self.lang_type.hash(&mut hasher);
        self.element_type.hash(&mut hasher);
        self.key_type.hash(&mut hasher);
        self.value_type.hash(&mut hasher);
        self.return_type.hash(&mut hasher);
        self.field_labels.hash(&mut hasher);
        self.variant_labels.hash(&mut hasher);
        self.enumerator_names.hash(&mut hasher);
        hasher.finish()
    }
}

/// The closed set of type kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TypeKind {
    Int,
    Float,
    Bool,
    Char,
    String,
    CString,
    Seq,
    Set,
    Array,
    Varargs,
    Struct,
    Tuple,
    Variant,
    Pointer,
    Table,
    Enum,
    FunctionKind,
    Raw,
    Recursion,
    NonExpanded,
    None,
    Error,
}

/// A single `{tick, location, value, description}` entry of a value's
/// history (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueHistoryEntry {
    pub tick: crate::ids::Tick,
    pub location: crate::position::Location,
    pub value: Value,
    pub description: String,
}

/// Pagination request used by `expandValue` (§4.5).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpansionWindow {
    pub start_index: usize,
    pub count: usize,
    pub is_load_more: bool,
}

/// Parsed form of the narrow expression surface §4.5 allows: identifiers,
/// dotted field access, literal-integer indexing, dereference, and variant
/// tag selection. Arbitrary language expressions are never evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ident(String),
    Field(Box<Expr>, String),
    Index(Box<Expr>, i64),
    Deref(Box<Expr>),
    /// `expr#tag` — the active-arm contents of a recorded `Variant`.
    VariantTag(Box<Expr>),
}

/// Parses the narrow expression surface. A hand-rolled recursive-descent
/// parser is enough: the grammar never needs operator precedence or
/// arbitrary literals.
pub fn parse_expression(src: &str) -> CoreResult<Expr> {
    let bad = |msg: &str| CoreError::ErrorConfig(format!("bad expression '{src}': {msg}"));

    // Dereference is a prefix operator, checked before the identifier guard
    // below: `*p` starts with a character that isn't itself an identifier.
    if let Some(rest) = src.trim().strip_prefix('*') {
        return Ok(Expr::Deref(Box::new(parse_expression(rest)?)));
    }

    let mut chars = src.trim().char_indices().peekable();
    let Some(&(_, first)) = chars.peek() else {
        return Err(bad("empty expression"));
    };
    if !(first.is_alphabetic() || first == '_') {
        return Err(bad("expected identifier"));
    }
    let mut ident = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if c.is_alphanumeric() || c == '_' {
            ident.push(c);
            chars.next();
        } else {
            break;
        }
    }
    let mut expr = Expr::Ident(ident);

    while let Some(&(_, c)) = chars.peek() {
        match c {
            '.' => {
                chars.next();
                let mut field = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        field.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if field.is_empty() {
                    return Err(bad("expected field name after '.'"));
                }
                expr = Expr::Field(Box::new(expr), field);
            }
            '[' => {
                chars.next();
                let mut digits = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() {
                        digits.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match chars.next() {
                    Some((_, ']')) => {}
                    _ => return Err(bad("expected closing ']'")),
                }
                let idx: i64 =
                    digits.parse().map_err(|_| bad("expected integer literal inside '[]'"))?;
                expr = Expr::Index(Box::new(expr), idx);
            }
            '#' => {
                chars.next();
                expr = Expr::VariantTag(Box::new(expr));
            }
            _ => return Err(bad("unexpected trailing characters")),
        }
    }

    Ok(expr)
}

/// Resolves a parsed [`Expr`] against a step's named bindings (its
/// `afterValues`/`beforeValues`), walking field access, indexing,
/// dereference, and variant-tag selection into the bound `Value` tree.
/// This is the evaluator `valueAt` and tracepoint expressions both run
/// through (§4.5, §4.6).
pub fn evaluate(expr: &Expr, bindings: &[(String, Value)]) -> CoreResult<Value> {
    match expr {
        Expr::Ident(name) => bindings
            .iter()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| CoreError::ErrorLocation(format!("'{name}' has no recorded value here"))),
        Expr::Field(inner, field) => match evaluate(inner, bindings)? {
            Value::Instance { field_values, .. } => field_values
                .into_iter()
                .find(|(name, _)| name == field)
                .map(|(_, value)| value)
                .ok_or_else(|| CoreError::ErrorLocation(format!("no field '{field}'"))),
            other => Err(CoreError::ErrorLocation(format!("'{field}' is not a field of {other:?}"))),
        },
        Expr::Index(inner, index) => match evaluate(inner, bindings)? {
            Value::Seq { elements, .. } | Value::Tuple { elements, .. } => {
                let index = usize::try_from(*index)
                    .map_err(|_| CoreError::ErrorLocation("negative index".into()))?;
                elements
                    .into_iter()
                    .nth(index)
                    .ok_or_else(|| CoreError::ErrorLocation(format!("index {index} out of bounds")))
            }
            other => Err(CoreError::ErrorLocation(format!("cannot index into {other:?}"))),
        },
        Expr::Deref(inner) => match evaluate(inner, bindings)? {
            Value::Pointer { ref_value: Some(value), .. } => Ok(*value),
            Value::Pointer { ref_value: None, .. } => {
                Err(CoreError::ErrorLocation("pointer has no referenced value recorded".into()))
            }
            other => Err(CoreError::ErrorLocation(format!("cannot dereference {other:?}"))),
        },
        Expr::VariantTag(inner) => match evaluate(inner, bindings)? {
            Value::Variant { contents, .. } => Ok(*contents),
            other => Err(CoreError::ErrorLocation(format!("{other:?} is not a variant"))),
        },
    }
}

/// `expandValue(value, window)`: pages a `Seq`/`Table` the recorder already
/// materialised in full; a `NonExpanded` placeholder has nothing further
/// the core can fetch on its own and is rejected rather than silently
/// returned as-is (§4.5).
pub fn expand_value(value: &Value, window: ExpansionWindow) -> CoreResult<Value> {
    match value {
        Value::Seq { elements, type_id, .. } => {
            let start = window.start_index.min(elements.len());
            let take = if window.count == 0 { elements.len() - start } else { window.count };
            let end = start.saturating_add(take).min(elements.len());
            Ok(Value::Seq {
                elements: elements[start..end].to_vec(),
                partially_expanded: end < elements.len(),
                type_id: *type_id,
            })
        }
        Value::Table { entries, type_id } => {
            let start = window.start_index.min(entries.len());
            let take = if window.count == 0 { entries.len() - start } else { window.count };
            let end = start.saturating_add(take).min(entries.len());
            Ok(Value::Table { entries: entries[start..end].to_vec(), type_id: *type_id })
        }
        Value::NonExpanded { .. } => Err(CoreError::ErrorLocation(
            "value was not materialised by the recorder and cannot be expanded further".into(),
        )),
        other => Ok(other.clone()),
    }
}

/// `valueHistory(callKey, expression)`: the expression's resolved value at
/// every step of one function instance, in tick order. Steps where the
/// expression does not resolve (not yet bound, wrong shape) are skipped
/// rather than surfaced as errors, since a history is expected to span
/// points where the variable isn't live yet (§4.5).
pub fn value_history(
    store: &crate::store::TraceStore,
    call_key: crate::ids::CallKey,
    expression: &str,
) -> CoreResult<Vec<ValueHistoryEntry>> {
    let expr = parse_expression(expression)?;
    let steps = store.steps_in_function(call_key)?;
    let mut history = Vec::with_capacity(steps.len());
    for step in steps {
        let bindings: Vec<(String, Value)> =
            step.after_values.iter().chain(step.before_values.iter()).cloned().collect();
        let Ok(value) = evaluate(&expr, &bindings) else { continue };
        let function_name = store
            .call(step.call_key)
            .and_then(|call| store.function_by_key(call.function_key))
            .map(|function| function.name.clone())
            .unwrap_or_default();
        history.push(ValueHistoryEntry {
            tick: step.tick,
            location: crate::position::Location {
                path: step.path,
                line: step.line,
                function_name,
                tick: step.tick,
                depth: step.frame_depth,
                key: step.call_key,
            },
            description: expression.to_string(),
            value,
        });
    }
    Ok(history)
}

/// Value equality used throughout §8's `testEq` properties: reflexive,
/// symmetric, and Recursion short-circuits rather than looping.
pub fn test_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Recursion { .. }, Value::Recursion { .. }) => true,
        (Value::Int { i: a, .. }, Value::Int { i: b, .. }) => a == b,
        (Value::Float { f: a, .. }, Value::Float { f: b, .. }) => a == b,
        (Value::Bool { b: a, .. }, Value::Bool { b: b2, .. }) => a == b2,
        (Value::Char { c: a, .. }, Value::Char { c: b, .. }) => a == b,
        (Value::String { text: a, .. }, Value::String { text: b, .. }) => a == b,
        (Value::CString { text: a, .. }, Value::CString { text: b, .. }) => a == b,
        (Value::Seq { elements: a, .. }, Value::Seq { elements: b, .. }) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| test_eq(x, y))
        }
        (Value::Tuple { elements: a, .. }, Value::Tuple { elements: b, .. }) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| test_eq(x, y))
        }
        (Value::Instance { field_values: a, .. }, Value::Instance { field_values: b, .. }) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .all(|((an, av), (bn, bv))| an == bn && test_eq(av, bv))
        }
        (
            Value::Variant { discriminator: ad, contents: ac, .. },
            Value::Variant { discriminator: bd, contents: bc, .. },
        ) => ad == bd && test_eq(ac, bc),
        (
            Value::Pointer { address: aa, .. },
            Value::Pointer { address: ba, .. },
        ) => aa == ba,
        (Value::Table { entries: a, .. }, Value::Table { entries: b, .. }) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .all(|((ak, av), (bk, bv))| test_eq(ak, bk) && test_eq(av, bv))
        }
        (Value::Enum { i: a, .. }, Value::Enum { i: b, .. }) => a == b,
        (Value::FunctionRef { name: a, .. }, Value::FunctionRef { name: b, .. }) => a == b,
        (Value::Raw { text: a, .. }, Value::Raw { text: b, .. }) => a == b,
        (Value::NonExpanded { .. }, Value::NonExpanded { .. }) => true,
        (Value::None { .. }, Value::None { .. }) => true,
        (Value::Error { msg: a, .. }, Value::Error { msg: b, .. }) => a == b,
        _ => false,
    }
}

/// Canonical hash consistent with [`test_eq`]: `testEq(a,b) => hash(a) ==
/// hash(b)` (§8).
pub fn canonical_hash(value: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    hash_value(value, &mut hasher);
    hasher.finish()
}

fn hash_value(value: &Value, hasher: &mut DefaultHasher) {
    match value {
        Value::Recursion { .. } => "recursion".hash(hasher),
        Value::Int { i, .. } => i.hash(hasher),
        Value::Float { f, .. } => f.to_bits().hash(hasher),
        Value::Bool { b, .. } => b.hash(hasher),
        Value::Char { c, .. } => c.hash(hasher),
        Value::String { text, .. } | Value::CString { text, .. } | Value::Raw { text, .. } => {
            text.hash(hasher)
        }
        Value::Seq { elements, .. } | Value::Tuple { elements, .. } => {
            for e in elements {
                hash_value(e, hasher);
            }
        }
        Value::Instance { field_values, .. } => {
            for (name, v) in field_values {
                name.hash(hasher);
                hash_value(v, hasher);
            }
        }
        Value::Variant { discriminator, contents, .. } => {
            discriminator.hash(hasher);
            hash_value(contents, hasher);
        }
        Value::Pointer { address, .. } => address.hash(hasher),
        Value::Table { entries, .. } => {
            for (k, v) in entries {
                hash_value(k, hasher);
                hash_value(v, hasher);
            }
        }
        Value::Enum { i, .. } => i.hash(hasher),
        Value::FunctionRef { name, .. } => name.hash(hasher),
        Value::NonExpanded { .. } => "nonexpanded".hash(hasher),
        Value::None { .. } => "none".hash(hasher),
        Value::Error { msg, .. } => msg.hash(hasher),
    }
}

/// Formats a pointer's raw address text, deciding whether it decodes as an
/// unsigned integer. Decoded addresses render as lowercase `0x`-prefixed
/// hex; this is a retraction (`format(format(x)) == format(x)`, §8).
pub fn format_pointer(raw_address: &str) -> (String, bool) {
    let trimmed = raw_address.trim();
    let parsed = if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        trimmed.parse::<u64>().ok().or_else(|| u64::from_str_radix(trimmed, 16).ok())
    };
    match parsed {
        Some(addr) => (format!("0x{addr:x}"), true),
        None => (raw_address.to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Value {
        Value::Int { i, type_id: TypeId(0) }
    }

    #[test]
    fn parses_field_index_and_tag() {
        let expr = parse_expression("a.b[3]#tag").unwrap();
        assert_eq!(
            expr,
            Expr::VariantTag(Box::new(Expr::Index(
                Box::new(Expr::Field(Box::new(Expr::Ident("a".into())), "b".into())),
                3
            )))
        );
    }

    #[test]
    fn parses_deref() {
        let expr = parse_expression("*p").unwrap();
        assert_eq!(expr, Expr::Deref(Box::new(Expr::Ident("p".into()))));
    }

    #[test]
    fn empty_expression_is_error_config() {
        let err = parse_expression("   ").unwrap_err();
        assert!(matches!(err, CoreError::ErrorConfig(_)));
    }

    #[test]
    fn test_eq_is_reflexive_and_symmetric() {
        let a = int(1);
        let b = int(1);
        assert!(test_eq(&a, &b));
        assert!(test_eq(&b, &a));
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn tables_compare_by_entries_not_identity() {
        let a = Value::Table { entries: vec![(int(1), int(2))], type_id: TypeId(0) };
        let b = Value::Table { entries: vec![(int(1), int(2))], type_id: TypeId(1) };
        assert!(test_eq(&a, &b));
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn pointer_formatting_is_a_retraction() {
        let (once, decodable) = format_pointer("0x2A");
        assert_eq!(once, "0x2a");
        assert!(decodable);
        let (twice, decodable_again) = format_pointer(&once);
        assert_eq!(once, twice);
        assert!(decodable_again);
    }

    #[test]
    fn undecodable_pointer_is_preserved_verbatim() {
        let (text, decodable) = format_pointer("<optimized out>");
        assert_eq!(text, "<optimized out>");
        assert!(!decodable);
    }

    #[test]
    fn evaluates_field_then_index() {
        let bindings = vec![(
            "p".to_string(),
            Value::Instance {
                field_values: vec![(
                    "items".to_string(),
                    Value::Seq { elements: vec![int(7), int(8)], partially_expanded: false, type_id: TypeId(0) },
                )],
                type_id: TypeId(0),
            },
        )];
        let expr = parse_expression("p.items[1]").unwrap();
        let value = evaluate(&expr, &bindings).unwrap();
        assert_eq!(value, int(8));
    }

    #[test]
    fn evaluates_dereference() {
        let bindings = vec![(
            "p".to_string(),
            Value::Pointer {
                raw_address: "0x10".into(),
                address: Some(0x10),
                ref_value: Some(Box::new(int(42))),
                type_id: TypeId(0),
            },
        )];
        let expr = parse_expression("*p").unwrap();
        let value = evaluate(&expr, &bindings).unwrap();
        assert_eq!(value, int(42));
    }

    #[test]
    fn evaluate_reports_unbound_identifiers() {
        let expr = parse_expression("missing").unwrap();
        let err = evaluate(&expr, &[]).unwrap_err();
        assert!(matches!(err, CoreError::ErrorLocation(_)));
    }

    #[test]
    fn expand_value_pages_a_sequence_and_clears_the_flag_at_the_end() {
        let seq = Value::Seq {
            elements: vec![int(1), int(2), int(3)],
            partially_expanded: true,
            type_id: TypeId(0),
        };
        let page = expand_value(&seq, ExpansionWindow { start_index: 1, count: 1, is_load_more: true }).unwrap();
        assert_eq!(page, Value::Seq { elements: vec![int(2)], partially_expanded: true, type_id: TypeId(0) });

        let rest = expand_value(&seq, ExpansionWindow { start_index: 1, count: 0, is_load_more: false }).unwrap();
        assert_eq!(
            rest,
            Value::Seq { elements: vec![int(2), int(3)], partially_expanded: false, type_id: TypeId(0) }
        );
    }

    #[test]
    fn expand_value_rejects_unmaterialised_placeholders() {
        let placeholder = Value::NonExpanded { type_id: TypeId(0) };
        let err = expand_value(&placeholder, ExpansionWindow::default()).unwrap_err();
        assert!(matches!(err, CoreError::ErrorLocation(_)));
    }
}
