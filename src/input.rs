//! Tenant input: an immutable JSON tree addressed by dotted path.
//!
//! Paths use `.` between segments; a segment is an object key or, on
//! arrays, a zero-based index. Bracket indexing is accepted too, so
//! `incidents.0.title` and `incidents[0].title` resolve to the same node.
//!
//! A missing path is an expected outcome (tenants omit whole sections), so
//! lookups return [`Lookup::Missing`] instead of an error.

use serde_json::Value;

/// Raw telemetry record driving extraction and AI grounding.
#[derive(Debug, Clone)]
pub struct TenantInput {
    input_id: String,
    raw: Value,
}

impl TenantInput {
    pub fn new(input_id: impl Into<String>, raw: Value) -> Self {
        Self {
            input_id: input_id.into(),
            raw,
        }
    }

    pub fn id(&self) -> &str {
        &self.input_id
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Resolve a dotted path against the input tree.
    pub fn lookup(&self, path: &str) -> Lookup<'_> {
        lookup_path(&self.raw, path)
    }
}

/// Result of a path lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<'a> {
    Found(&'a Value),
    /// `resolved` is the longest prefix of the path that did exist.
    Missing { resolved: String },
}

impl<'a> Lookup<'a> {
    pub fn found(self) -> Option<&'a Value> {
        match self {
            Lookup::Found(v) => Some(v),
            Lookup::Missing { .. } => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

/// Split `a.b[2].c` into `["a", "b", "2", "c"]`.
fn segments(path: &str) -> Vec<&str> {
    path.split('.')
        .flat_map(|part| part.split(['[', ']']))
        .filter(|s| !s.is_empty())
        .collect()
}

/// Walk `root` along `path`. An empty path resolves to the root itself.
///
/// JSON `null` at the end of a path counts as missing; tenants use it for
/// "not collected" rather than as a meaningful value.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Lookup<'a> {
    let mut current = root;
    let mut resolved: Vec<&str> = Vec::new();

    for seg in segments(path) {
        let next = match current {
            Value::Object(map) => map.get(seg),
            Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(v) => {
                resolved.push(seg);
                current = v;
            }
            None => {
                return Lookup::Missing {
                    resolved: resolved.join("."),
                }
            }
        }
    }

    if current.is_null() {
        return Lookup::Missing {
            resolved: resolved.join("."),
        };
    }
    Lookup::Found(current)
}
