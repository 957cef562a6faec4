use std::borrow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use include_dir::{include_dir, Dir};
use liquid::{Parser, Template};
use serde_json::{json, Value};
use tracing::{trace, warn};

use super::liquid_exts::{JsonFilterParser, StepColorFilterParser};
use crate::graph::{Edge, Node, Properties};

static TEMPLATE_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/templates");

/// Used for any type without a registered template.
pub const FALLBACK_TEMPLATE: &str = "<h1>{{id}}</h1>";

/// Node property keys the bundled templates look up. liquid rejects a lookup
/// of a missing key, so absent ones are passed as nil.
const NODE_TEMPLATE_KEYS: &[&str] = &[
    "alias",
    "operation",
    "step_type",
    "limit",
    "macro",
    "expression",
    "storage_function",
    "storage_location",
];

/// Field separator inside one sampled output record.
pub const SAMPLE_FIELD_SEPARATOR: char = '\u{1}';

fn with_template_keys(properties: &Properties, keys: &[&str]) -> Properties {
    let mut filled = properties.clone();
    for key in keys {
        filled.entry(key.to_string()).or_insert(Value::Null);
    }
    filled
}

/// Turn an edge's `sampleOutput` (one string per sampled file, records
/// separated by newlines and fields by `\u{1}`) into row/field tables.
pub fn sample_output_tables(properties: &Properties) -> Vec<Value> {
    let samples = match properties.get("sampleOutput").and_then(Value::as_array) {
        Some(samples) => samples,
        None => return vec![],
    };
    samples
        .iter()
        .filter_map(Value::as_str)
        .map(|sample| {
            let rows: Vec<Vec<&str>> = sample
                .lines()
                .filter(|record| !record.is_empty())
                .map(|record| record.split(SAMPLE_FIELD_SEPARATOR).collect())
                .collect();
            json!({ "rows": rows })
        })
        .collect()
}

fn schema_aliases(properties: &Properties) -> Vec<String> {
    properties
        .get("schema")
        .and_then(Value::as_array)
        .map(|columns| {
            columns
                .iter()
                .map(|column| match column.get("alias").and_then(Value::as_str) {
                    Some(alias) => alias.to_string(),
                    None => String::new(),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Default, Debug, Clone, Copy)]
struct StaticTemplateSource;

impl liquid::partials::PartialSource for StaticTemplateSource {
    fn contains(&self, name: &str) -> bool {
        TEMPLATE_DIR.get_file(name).is_some()
    }

    fn names(&self) -> Vec<&str> {
        TEMPLATE_DIR
            .files()
            .chain(TEMPLATE_DIR.dirs().flat_map(|d| d.files()))
            .filter_map(|f| f.path().to_str())
            .collect()
    }

    fn try_get<'a>(&'a self, name: &str) -> Option<borrow::Cow<'a, str>> {
        match TEMPLATE_DIR.get_file(name) {
            Some(file) => file.contents_utf8().map(borrow::Cow::from),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum TemplateError {
    /// The parser itself could not be set up.
    Setup(String),
    Parse { type_name: String, message: String },
    Render { type_name: String, message: String },
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::Setup(message) => write!(f, "template setup failed: {}", message),
            TemplateError::Parse { type_name, message } => {
                write!(f, "template for {} does not parse: {}", type_name, message)
            }
            TemplateError::Render { type_name, message } => {
                write!(f, "template for {} failed to render: {}", type_name, message)
            }
        }
    }
}

impl std::error::Error for TemplateError {}

pub type Result<T> = std::result::Result<T, TemplateError>;

fn build_parser() -> Result<Parser> {
    liquid::ParserBuilder::with_stdlib()
        .filter(JsonFilterParser)
        .filter(StepColorFilterParser)
        .partials(liquid::partials::LazyCompiler::<StaticTemplateSource>::empty())
        .build()
        .map_err(|err| TemplateError::Setup(err.to_string()))
}

/// Maps an entity `type` to the template that draws it.
pub struct TemplateRegistry {
    parser: Parser,
    templates: HashMap<String, Template>,
    fallback: Template,
}

impl TemplateRegistry {
    /// Registry with no type templates, only the fallback.
    pub fn empty() -> Result<Self> {
        let parser = build_parser()?;
        let fallback = parser
            .parse(FALLBACK_TEMPLATE)
            .map_err(|err| TemplateError::Parse {
                type_name: "fallback".to_string(),
                message: err.to_string(),
            })?;
        Ok(TemplateRegistry {
            parser,
            templates: HashMap::new(),
            fallback,
        })
    }

    /// Registry holding every bundled `templates/<Type>.liquid`. Files under
    /// `templates/partials/` are only reachable through `{% include %}`.
    pub fn with_builtin() -> Result<Self> {
        let mut registry = TemplateRegistry::empty()?;
        for file in TEMPLATE_DIR.files() {
            let path: &Path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some("liquid") {
                continue;
            }
            let (type_name, source) = match (
                path.file_stem().and_then(|s| s.to_str()),
                file.contents_utf8(),
            ) {
                (Some(type_name), Some(source)) => (type_name, source),
                _ => continue,
            };
            registry.register(type_name, source)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, type_name: &str, source: &str) -> Result<()> {
        let template = self
            .parser
            .parse(source)
            .map_err(|err| TemplateError::Parse {
                type_name: type_name.to_string(),
                message: err.to_string(),
            })?;
        trace!(type_name, "registered template");
        self.templates.insert(type_name.to_string(), template);
        Ok(())
    }

    /// Register every `type -> source` pair, replacing built-ins.
    pub fn apply_overrides(&mut self, overrides: &BTreeMap<String, String>) -> Result<()> {
        for (type_name, source) in overrides {
            self.register(type_name, source)?;
        }
        Ok(())
    }

    pub fn has(&self, type_name: &str) -> bool {
        self.templates.contains_key(type_name)
    }

    fn render(&self, type_name: &str, globals: Value) -> Result<String> {
        let template = match self.templates.get(type_name) {
            Some(template) => template,
            None => {
                warn!(type_name, "no template registered, using fallback");
                &self.fallback
            }
        };
        let render_err = |message: String| TemplateError::Render {
            type_name: type_name.to_string(),
            message,
        };
        let globals = liquid::to_object(&globals).map_err(|e| render_err(e.to_string()))?;
        template.render(&globals).map_err(|e| render_err(e.to_string()))
    }

    pub fn render_node(&self, node: &Node) -> Result<String> {
        self.render(
            &node.node_type,
            json!({
                "id": node.id,
                "type": node.node_type,
                "properties": with_template_keys(&node.properties, NODE_TEMPLATE_KEYS),
                "status": node.status,
                "progress_text": node.status.progress_text(),
                "progress_style": node.status.progress_style(),
                "url": node.url,
            }),
        )
    }

    pub fn render_edge(&self, edge: &Edge) -> Result<String> {
        self.render(
            &edge.edge_type,
            json!({
                "id": edge.id(),
                "u": edge.u,
                "v": edge.v,
                "label": edge.label,
                "properties": edge.properties,
                "has_properties": !edge.properties.is_empty(),
                "columns": schema_aliases(&edge.properties),
                "sample_output": sample_output_tables(&edge.properties),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgePatch, NodePatch};
    use serde_json::from_value;

    #[test]
    fn builtin_node_template() {
        let registry = TemplateRegistry::with_builtin().unwrap();
        assert!(registry.has("PigNode"));
        assert!(registry.has("PigEdge"));

        let node = Node::from_patch(
            &from_value::<NodePatch>(json!({
                "id": "7",
                "properties": { "alias": "events", "operation": "LOFilter", "step_type": "reducer" },
                "status": { "progress": 40, "statusText": "running" }
            }))
            .unwrap(),
        )
        .unwrap();
        let html = registry.render_node(&node).unwrap();
        assert!(html.contains("events"));
        assert!(html.contains("LOFilter"));
        assert!(html.contains("#FF9900"));
        assert!(html.contains("40%"));
    }

    #[test]
    fn builtin_edge_template() {
        let registry = TemplateRegistry::with_builtin().unwrap();
        let edge = Edge::from_patch(
            &from_value::<EdgePatch>(json!({ "u": "a", "v": "b", "label": "10 rows", "properties": { "schema": [] } }))
                .unwrap(),
        )
        .unwrap();
        let html = registry.render_edge(&edge).unwrap();
        assert!(html.contains("edgeLabel_a->b"));
        assert!(html.contains("edge-info-label"));
        assert!(html.contains("<h6>10 rows</h6>"));
    }

    #[test]
    fn unknown_types_fall_back() {
        let mut registry = TemplateRegistry::empty().unwrap();
        let mut node = Node::new("n1");
        node.node_type = "Mystery".to_string();
        assert_eq!(registry.render_node(&node).unwrap(), "<h1>n1</h1>");

        let mut overrides = BTreeMap::new();
        overrides.insert("Mystery".to_string(), "<p>{{ id }} is {{ type }}</p>".to_string());
        registry.apply_overrides(&overrides).unwrap();
        assert_eq!(registry.render_node(&node).unwrap(), "<p>n1 is Mystery</p>");

        assert!(registry.register("Broken", "{% if %}").is_err());
    }

    #[test]
    fn bare_entities_render_through_builtins() {
        let registry = TemplateRegistry::with_builtin().unwrap();
        let html = registry.render_node(&Node::new("a")).unwrap();
        assert!(html.contains("id=\"a\""));
        assert!(html.contains("#BF0A0D"));
        assert!(html.contains(">a</th>"));

        let edge = Edge::from_patch(&from_value::<EdgePatch>(json!({ "u": "a", "v": "b" })).unwrap()).unwrap();
        let html = registry.render_edge(&edge).unwrap();
        assert!(html.contains("edgeLabel_a->b"));
        assert!(!html.contains("edge-info-label"));
        assert!(!html.contains("<pre"));
    }

    #[test]
    fn edge_properties_and_sample_output() {
        let registry = TemplateRegistry::with_builtin().unwrap();
        let edge = Edge::from_patch(
            &from_value::<EdgePatch>(json!({
                "u": "a",
                "v": "b",
                "properties": {
                    "schema": [{ "alias": "user", "type": "chararray" }, { "alias": "n", "type": "long" }],
                    "sampleOutput": ["amy\u{1}3\nbob\u{1}5"]
                }
            }))
            .unwrap(),
        )
        .unwrap();

        let tables = sample_output_tables(&edge.properties);
        assert_eq!(tables, vec![json!({ "rows": [["amy", "3"], ["bob", "5"]] })]);

        let html = registry.render_edge(&edge).unwrap();
        assert!(html.contains("class=\"edge-properties\""));
        assert!(html.contains("&quot;chararray&quot;") || html.contains("\"chararray\""));
        assert!(html.contains("<th>user</th><th>n</th>"));
        assert!(html.contains("<td>amy</td><td>3</td>"));
        assert!(html.contains("<td>bob</td><td>5</td>"));
    }
}
