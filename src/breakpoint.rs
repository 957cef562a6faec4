//! Rebuild a runnable script fragment for the path into one node.
//!
//! Plan producers attach `properties.location = { line, macro }` to each
//! node.  Known lines mark where statements start, so the statement for line
//! `L` runs until just before the next known line.  Macro-expanded nodes and
//! nodes with a negative line never contribute.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use regex::{Captures, RegexBuilder};
use serde_json::Value;
use tracing::{trace, warn};

use crate::graph::{Node, WorkflowGraph};

/// Default number of rows the trailer `LIMIT`s the inspected relation to.
pub const DEFAULT_BREAKPOINT_LIMIT: u32 = 100;

/// Statements that set up the script environment and are always carried
/// into a fragment.
const PREAMBLE_KEYWORDS: [&str; 4] = ["SET", "REGISTER", "IMPORT", "DEFINE"];

/// Node id -> 1-based source line, plus the sorted list of every known line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LineIndex {
    lines: HashMap<String, usize>,
    known: Vec<usize>,
}

impl LineIndex {
    pub fn new() -> Self {
        Default::default()
    }

    /// Record where `node_id` was declared.  Negative lines and
    /// macro-expanded nodes are ignored.
    pub fn insert(&mut self, node_id: &str, line: i64, macro_expanded: bool) {
        if macro_expanded || line <= 0 {
            trace!(node = node_id, line, macro_expanded, "node has no usable line");
            return;
        }
        let line = line as usize;
        self.lines.insert(node_id.to_string(), line);
        if let Err(pos) = self.known.binary_search(&line) {
            self.known.insert(pos, line);
        }
    }

    /// Build the index from each node's `properties.location`.
    pub fn from_plan(graph: &WorkflowGraph) -> Self {
        let mut index = LineIndex::new();
        for node in graph.nodes() {
            let location = match node.properties.get("location") {
                Some(location) => location,
                None => continue,
            };
            let line = match location.get("line").and_then(Value::as_i64) {
                Some(line) => line,
                None => continue,
            };
            let macro_expanded = location
                .get("macro")
                .and_then(Value::as_array)
                .map_or(false, |m| !m.is_empty());
            index.insert(&node.id, line, macro_expanded);
        }
        index
    }

    pub fn line_for(&self, node_id: &str) -> Option<usize> {
        self.lines.get(node_id).copied()
    }

    pub fn known_lines(&self) -> &[usize] {
        &self.known
    }

    fn next_known_after(&self, line: usize) -> Option<usize> {
        self.known.iter().copied().find(|&known| known > line)
    }

    /// Inclusive 1-based block extracted for `line`: up to two lines before
    /// the next statement, or to the end of the script.
    pub fn block_range(&self, line: usize, script_len: usize) -> Option<(usize, usize)> {
        if line == 0 || line > script_len {
            return None;
        }
        let end = match self.next_known_after(line) {
            Some(next) => next.saturating_sub(2).max(line),
            None => script_len,
        };
        Some((line, end.min(script_len)))
    }

    /// Inclusive 1-based lines to highlight for the statement starting at
    /// `line`.  Trailing blank and `--` comment lines are not part of it.
    pub fn statement_range<S: AsRef<str>>(
        &self,
        line: usize,
        script_lines: &[S],
    ) -> Option<(usize, usize)> {
        if line == 0 || line > script_lines.len() {
            return None;
        }
        let mut end = match self.next_known_after(line) {
            Some(next) => (next - 1).min(script_lines.len()),
            None => script_lines.len(),
        };
        while end >= line {
            let text = script_lines[end - 1].as_ref().trim();
            if !text.is_empty() && !text.starts_with("--") {
                return Some((line, end));
            }
            end -= 1;
        }
        None
    }
}

/// What to dump and how to fill in script parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakpointRequest {
    pub alias: String,
    pub limit: u32,
    /// `$name` -> value.  Names may be given with or without the `$`.
    pub parameters: BTreeMap<String, String>,
}

impl BreakpointRequest {
    pub fn new(alias: impl Into<String>) -> Self {
        BreakpointRequest {
            alias: alias.into(),
            limit: DEFAULT_BREAKPOINT_LIMIT,
            parameters: BTreeMap::new(),
        }
    }

    /// Use the node's `alias` property, falling back to its id.
    pub fn for_node(node: &Node) -> Self {
        BreakpointRequest::new(node.property_str("alias").unwrap_or(&node.id))
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }
}

fn is_preamble(line: &str) -> bool {
    let upper = line.trim().to_uppercase();
    PREAMBLE_KEYWORDS.iter().any(|kw| upper.starts_with(kw))
}

/// Replace `$name` placeholders in a single pass, so a value that itself
/// holds `$name` text stays as given.  Longer names are tried first so `$YEAR`
/// never eats the front of `$YEARMONTH`; matching ignores case.
pub fn substitute_parameters(script: &str, parameters: &BTreeMap<String, String>) -> String {
    let mut ordered: Vec<(&str, &str)> = parameters
        .iter()
        .map(|(name, value)| (name.trim_start_matches('$'), value.as_str()))
        .filter(|(name, _)| !name.is_empty())
        .collect();
    if ordered.is_empty() {
        return script.to_string();
    }
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

    let mut values: HashMap<String, &str> = HashMap::new();
    for (name, value) in &ordered {
        values.entry(name.to_lowercase()).or_insert(*value);
    }
    let alternatives: Vec<String> = ordered.iter().map(|(name, _)| regex::escape(name)).collect();
    let pattern = format!(r"\$(?:{})", alternatives.join("|"));
    let re = match RegexBuilder::new(&pattern).case_insensitive(true).build() {
        Ok(re) => re,
        Err(err) => {
            warn!(%err, "unusable parameter names, leaving script as is");
            return script.to_string();
        }
    };
    re.replace_all(script, |caps: &Captures| {
        let matched = &caps[0];
        match values.get(&matched[1..].to_lowercase()) {
            Some(value) => value.to_string(),
            None => matched.to_string(),
        }
    })
    .into_owned()
}

/// Build the fragment that re-runs everything `highlighted` depends on and
/// dumps `request.alias`.  Nodes without a usable line are skipped.
pub fn extract_fragment<S: AsRef<str>>(
    highlighted: &BTreeSet<String>,
    script_lines: &[S],
    line_index: &LineIndex,
    request: &BreakpointRequest,
) -> String {
    let selected: BTreeSet<usize> = highlighted
        .iter()
        .filter_map(|id| line_index.line_for(id))
        .collect();

    let mut fragment = String::new();
    for line in script_lines {
        let line = line.as_ref();
        if is_preamble(line) {
            fragment.push_str(line);
            fragment.push('\n');
        }
    }

    for line in selected {
        let (start, end) = match line_index.block_range(line, script_lines.len()) {
            Some(range) => range,
            None => continue,
        };
        trace!(start, end, "extracting block");
        fragment.push('\n');
        for text in &script_lines[start - 1..end] {
            fragment.push_str(text.as_ref());
            fragment.push('\n');
        }
    }

    fragment.push('\n');
    fragment.push_str(&format!(
        "breakpoint_{alias} = LIMIT {alias} {limit};\nDUMP breakpoint_{alias};\n",
        alias = request.alias,
        limit = request.limit
    ));

    if request.parameters.is_empty() {
        fragment
    } else {
        substitute_parameters(&fragment, &request.parameters)
    }
}
