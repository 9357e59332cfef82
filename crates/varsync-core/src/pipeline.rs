//! The Content Pipeline: Parse (bytes → tree) → Project (select a subtree)
//! → Flatten (tree → ordered, env-resolved key/value pairs).
//!
//! All three stages are pure and iterative (stack/queue based, never
//! recursive) so a deeply-nested configuration file cannot exhaust the
//! call stack. Parse never raises: an unparseable or absent input yields
//! an empty tree.

use std::collections::VecDeque;

use serde_json::{Map, Value};

/// Bound on walk depth for [`project`] and [`flatten`], guarding against
/// pathological inputs. Exceeding it is treated the same as a parse
/// failure: the affected subtree is dropped rather than panicking.
pub const DEFAULT_MAX_DEPTH: usize = 64;

fn empty_tree() -> Value {
    Value::Object(Map::new())
}

/// Parse `content` into a tree value. Detection order: JSON, then XML (if
/// the trimmed text starts with `<`), then YAML. The first format that
/// parses successfully wins; if none do (or content is absent/not valid
/// UTF-8), returns an empty object rather than failing.
pub fn parse(content: Option<&[u8]>) -> Value {
    let Some(bytes) = content else {
        return empty_tree();
    };
    let Ok(text) = std::str::from_utf8(bytes) else {
        return empty_tree();
    };
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return value;
    }
    if text.trim_start().starts_with('<') {
        if let Ok(value) = quick_xml::de::from_str::<Value>(text) {
            return value;
        }
    }
    if let Ok(value) = serde_yaml::from_str::<Value>(text) {
        return value;
    }
    empty_tree()
}

/// Iterative breadth-first search for the first node whose key equals
/// `root_key`, at any depth. Returns `None` if no such key exists, or if
/// the search exceeds `max_depth`.
pub fn project(tree: &Value, root_key: &str, max_depth: usize) -> Option<Value> {
    let mut queue: VecDeque<(usize, &Value)> = VecDeque::new();
    queue.push_back((0, tree));

    while let Some((depth, node)) = queue.pop_front() {
        if depth > max_depth {
            continue;
        }
        match node {
            Value::Object(map) => {
                if let Some(found) = map.get(root_key) {
                    return Some(found.clone());
                }
                for child in map.values() {
                    queue.push_back((depth + 1, child));
                }
            }
            Value::Array(items) => {
                for child in items {
                    queue.push_back((depth + 1, child));
                }
            }
            _ => {}
        }
    }
    None
}

/// Options controlling [`flatten`].
#[derive(Debug, Clone)]
pub struct FlattenOptions {
    /// Mapping key that, when present on an object node, replaces the node
    /// with that key's value before recursing into children.
    pub env_key: Option<String>,
    /// Fallback key consulted when `env_key` is absent and
    /// `use_default_fallback` is set.
    pub default_key: Option<String>,
    pub use_default_fallback: bool,
    pub separator: String,
    /// `true` flattens to path → scalar pairs; `false` keeps the nested
    /// shape (with env overlay still applied).
    pub as_kv: bool,
    pub max_depth: usize,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            env_key: None,
            default_key: None,
            use_default_fallback: false,
            separator: "/".to_string(),
            as_kv: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Result of [`flatten`].
#[derive(Debug, Clone, PartialEq)]
pub enum FlattenOutput {
    Tree(Value),
    Flat(Vec<(String, Value)>),
}

impl FlattenOutput {
    pub fn into_flat_map(self) -> Vec<(String, Value)> {
        match self {
            FlattenOutput::Flat(pairs) => pairs,
            FlattenOutput::Tree(_) => Vec::new(),
        }
    }
}

fn apply_env_overlay(value: Value, opts: &FlattenOptions) -> Value {
    let Value::Object(map) = &value else {
        return value;
    };
    if let Some(env_key) = &opts.env_key {
        if let Some(resolved) = map.get(env_key) {
            return resolved.clone();
        }
        if opts.use_default_fallback {
            if let Some(default_key) = &opts.default_key {
                if let Some(resolved) = map.get(default_key) {
                    return resolved.clone();
                }
            }
        }
    }
    value
}

/// Escape a single path segment: `~` → `~0`, then the separator → `~1`.
fn escape_segment(segment: &str, separator: &str) -> String {
    segment.replace('~', "~0").replace(separator, "~1")
}

/// Reverse of [`escape_segment`]: separator-escape decoded first, then `~0`.
fn unescape_segment(segment: &str, separator: &str) -> String {
    segment.replace("~1", separator).replace("~0", "~")
}

enum Frame {
    Visit(usize, Vec<String>, Value),
    BuildObject(Vec<String>),
    BuildArray(usize),
}

/// Iterative, stack-based Flatten. Applies env resolution at every node
/// before descending into its children; emits either a structurally
/// equivalent nested tree or a flat path → value mapping, per
/// `opts.as_kv`.
pub fn flatten(tree: &Value, opts: &FlattenOptions) -> FlattenOutput {
    if opts.as_kv {
        FlattenOutput::Flat(flatten_to_kv(tree, opts))
    } else {
        FlattenOutput::Tree(flatten_to_tree(tree, opts))
    }
}

fn flatten_to_tree(tree: &Value, opts: &FlattenOptions) -> Value {
    let mut stack = vec![Frame::Visit(0, Vec::new(), tree.clone())];
    let mut output: Vec<Value> = Vec::new();

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Visit(depth, _path, raw) => {
                if depth > opts.max_depth {
                    output.push(Value::Null);
                    continue;
                }
                let value = apply_env_overlay(raw, opts);
                match value {
                    Value::Object(map) => {
                        let keys: Vec<String> = map.keys().cloned().collect();
                        stack.push(Frame::BuildObject(keys.clone()));
                        for key in keys.iter().rev() {
                            let child = map.get(key).cloned().unwrap_or(Value::Null);
                            stack.push(Frame::Visit(depth + 1, Vec::new(), child));
                        }
                    }
                    Value::Array(items) => {
                        stack.push(Frame::BuildArray(items.len()));
                        for item in items.into_iter().rev() {
                            stack.push(Frame::Visit(depth + 1, Vec::new(), item));
                        }
                    }
                    scalar => output.push(scalar),
                }
            }
            Frame::BuildObject(keys) => {
                let n = keys.len();
                let start = output.len() - n;
                let children: Vec<Value> = output.split_off(start);
                let mut map = Map::new();
                for (key, value) in keys.into_iter().zip(children) {
                    map.insert(key, value);
                }
                output.push(Value::Object(map));
            }
            Frame::BuildArray(n) => {
                let start = output.len() - n;
                let children: Vec<Value> = output.split_off(start);
                output.push(Value::Array(children));
            }
        }
    }

    output.pop().unwrap_or_else(empty_tree)
}

fn flatten_to_kv(tree: &Value, opts: &FlattenOptions) -> Vec<(String, Value)> {
    let mut stack = vec![Frame::Visit(0, Vec::new(), tree.clone())];
    let mut results: Vec<(String, Value)> = Vec::new();

    while let Some(frame) = stack.pop() {
        if let Frame::Visit(depth, path, raw) = frame {
            if depth > opts.max_depth {
                continue;
            }
            let value = apply_env_overlay(raw, opts);
            match value {
                Value::Object(map) => {
                    let keys: Vec<String> = map.keys().cloned().collect();
                    for key in keys.iter().rev() {
                        let mut child_path = path.clone();
                        child_path.push(escape_segment(key, &opts.separator));
                        let child = map.get(key).cloned().unwrap_or(Value::Null);
                        stack.push(Frame::Visit(depth + 1, child_path, child));
                    }
                }
                Value::Array(items) => {
                    for (index, item) in items.into_iter().enumerate().rev() {
                        let mut child_path = path.clone();
                        child_path.push(escape_segment(&index.to_string(), &opts.separator));
                        stack.push(Frame::Visit(depth + 1, child_path, item));
                    }
                }
                scalar => {
                    results.push((path.join(&opts.separator), scalar));
                }
            }
        }
    }

    // `results` was built LIFO per sibling group but each Visit pushes its
    // children in forward order (via `.rev()` on push), so popping yields
    // forward order overall; no further re-sort is needed.
    results
}

/// Reconstruct a nested tree from a flat path → value mapping, reversing
/// [`flatten`]'s `as_kv=true` output. An object level whose keys are
/// exactly `"0".."n-1"` is rebuilt as an array.
pub fn unflatten(flat: &[(String, Value)], separator: &str) -> Value {
    let mut root = Value::Object(Map::new());
    for (path, value) in flat {
        let segments: Vec<String> = path
            .split(separator)
            .map(|segment| unescape_segment(segment, separator))
            .collect();
        insert_path(&mut root, &segments, value.clone());
    }
    normalize_arrays(root)
}

fn insert_path(node: &mut Value, segments: &[String], value: Value) {
    if segments.is_empty() {
        *node = value;
        return;
    }
    if !matches!(node, Value::Object(_)) {
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else { unreachable!() };
    let (head, rest) = (&segments[0], &segments[1..]);
    if rest.is_empty() {
        map.insert(head.clone(), value);
    } else {
        let entry = map.entry(head.clone()).or_insert_with(|| Value::Object(Map::new()));
        insert_path(entry, rest, value);
    }
}

fn normalize_arrays(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let normalized: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, normalize_arrays(v)))
                .collect();
            let mut keys: Vec<&String> = normalized.keys().collect();
            keys.sort();
            let is_array = !keys.is_empty()
                && keys
                    .iter()
                    .enumerate()
                    .all(|(i, k)| k.parse::<usize>() == Ok(i));
            if is_array {
                let mut items = vec![Value::Null; normalized.len()];
                for (k, v) in normalized {
                    if let Ok(index) = k.parse::<usize>() {
                        items[index] = v;
                    }
                }
                Value::Array(items)
            } else {
                Value::Object(normalized)
            }
        }
        other => other,
    }
}
