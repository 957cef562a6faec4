use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use itertools::Itertools;
use serde_json::{json, to_string_pretty, Value};
use tokio::fs;
use tracing::info;

use plangraph::breakpoint::{extract_fragment, BreakpointRequest, LineIndex};
use plangraph::config::{self, ViewerConfig};
use plangraph::graph::WorkflowGraph;
use plangraph::graph_service::GraphService;
use plangraph::graph_store::{make_local_store, GraphQuery, SortOrder};
use plangraph::logging::init_logging;
use plangraph::p2j::{PlanPackage, SampleOutputList};
use plangraph::templating::TemplateRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Pretty-printed JSON.
    Pretty,
    /// Un-pretty-printed JSON.
    Concise,
}

/// Poke at workflow plan graphs from the command line.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct ToolOpts {
    /// JSON config file; defaults apply when omitted.
    #[arg(long, env = "PLANGRAPH_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, short, value_enum, ignore_case = true, default_value = "concise")]
    output_format: OutputFormat,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show depths, nesting and the group pre-order of a graph file.
    Layers { graph: PathBuf },
    /// Show what gets drawn for one subgraph level.
    Project {
        graph: PathBuf,
        #[arg(default_value = "_root")]
        subgraph: String,
        /// Emit graphviz DOT instead of JSON.
        #[arg(long)]
        dot: bool,
    },
    /// Show the nodes and edges upstream of a node.
    Highlight { graph: PathBuf, node: String },
    /// Print a script fragment that dumps the relation a node produces.
    Breakpoint {
        graph: PathBuf,
        node: String,
        #[arg(long)]
        script: PathBuf,
        /// Script parameter as `name=value`; may be repeated.
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Render a node (or a `u->v` edge) through its type's template.
    Render { graph: PathBuf, id: String },
    /// List stored graphs.
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value = "updated_at")]
        sort: String,
        #[arg(long)]
        asc: bool,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        max: Option<usize>,
    },
    /// Validate a graph file and put it in the store.
    Import { graph: PathBuf },
    /// Turn a legacy plan package into a graph document.
    Translate {
        plan: PathBuf,
        /// Store the graph instead of printing it.
        #[arg(long)]
        import: bool,
    },
    /// Attach a job's sampled output to a stored graph.
    SampleOutput {
        graph_id: String,
        job_id: String,
        samples: PathBuf,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got {:?}", raw)),
    }
}

async fn read_json(path: &Path) -> Result<Value, Box<dyn Error>> {
    let raw = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

async fn read_graph(path: &Path) -> Result<WorkflowGraph, Box<dyn Error>> {
    let doc = read_json(path).await?;
    Ok(WorkflowGraph::from_document(&doc)?)
}

fn describe_layers(graph: &WorkflowGraph) -> Value {
    let levels: Vec<Value> = (1..=graph.max_depth())
        .map(|depth| {
            json!({
                "depth": depth,
                "nodes": graph.nodes_at(depth).iter().map(|n| n.id.as_str()).collect::<Vec<_>>(),
                "subgraphs": graph.subgraphs_at(depth),
            })
        })
        .collect();
    let parents: BTreeMap<&str, &str> = graph
        .nodes()
        .iter()
        .filter_map(|n| graph.node_parent(&n.id).map(|p| (n.id.as_str(), p)))
        .collect();
    json!({
        "max_depth": graph.max_depth(),
        "sorted_groups": graph.layout().sorted_groups(),
        "levels": levels,
        "node_parents": parents,
        "warnings": graph.validate().iter().map(|w| w.to_string()).collect::<Vec<_>>(),
    })
}

fn emit(value: &Value, output_format: OutputFormat) -> Result<(), Box<dyn Error>> {
    match output_format {
        OutputFormat::Concise => println!("{}", value),
        OutputFormat::Pretty => println!("{}", to_string_pretty(value)?),
    }
    Ok(())
}

async fn run(opts: ToolOpts) -> Result<(), Box<dyn Error>> {
    let config = match &opts.config {
        Some(path) => config::load(path)?,
        None => ViewerConfig::default(),
    };
    let service = || {
        GraphService::new(make_local_store(&config.store_path)).with_listing_cap(config.listing_cap)
    };

    match opts.cmd {
        Command::Layers { graph } => {
            let graph = read_graph(&graph).await?;
            emit(&describe_layers(&graph), opts.output_format)?;
        }
        Command::Project {
            graph,
            subgraph,
            dot,
        } => {
            let graph = read_graph(&graph).await?;
            let subset = graph.project_subgraph(&subgraph);
            if dot {
                println!("{}", subset.to_dot());
            } else {
                emit(&subset.to_json(), opts.output_format)?;
            }
        }
        Command::Highlight { graph, node } => {
            let graph = read_graph(&graph).await?;
            let highlight = graph.highlighted_set_for(&node);
            match opts.output_format {
                OutputFormat::Concise => {
                    println!("nodes: {}", highlight.node_ids.iter().join(", "));
                    println!("edges: {}", highlight.edge_ids.iter().join(", "));
                }
                OutputFormat::Pretty => emit(&serde_json::to_value(&highlight)?, opts.output_format)?,
            }
        }
        Command::Breakpoint {
            graph,
            node,
            script,
            params,
            limit,
        } => {
            let graph = read_graph(&graph).await?;
            let target = graph
                .node(&node)
                .ok_or_else(|| format!("no node {} in graph {}", node, graph.id))?;
            let script = fs::read_to_string(&script).await?;
            let script_lines: Vec<&str> = script.lines().collect();

            let mut request = BreakpointRequest::for_node(target)
                .with_limit(limit.unwrap_or(config.breakpoint_limit));
            for (name, value) in params {
                request = request.with_parameter(name, value);
            }
            let highlight = graph.highlighted_set_for(&node);
            let line_index = LineIndex::from_plan(&graph);
            print!(
                "{}",
                extract_fragment(&highlight.node_ids, &script_lines, &line_index, &request)
            );
        }
        Command::Render { graph, id } => {
            let graph = read_graph(&graph).await?;
            let mut registry = TemplateRegistry::with_builtin()?;
            registry.apply_overrides(&config.template_overrides)?;
            let html = if let Some(node) = graph.node(&id) {
                registry.render_node(node)?
            } else if let Some(edge) = graph.edge_by_id(&id) {
                registry.render_edge(edge)?
            } else {
                return Err(format!("no node or edge {} in graph {}", id, graph.id).into());
            };
            println!("{}", html);
        }
        Command::List {
            search,
            status,
            sort,
            asc,
            offset,
            max,
        } => {
            let query = GraphQuery {
                search,
                status,
                sort,
                order: if asc { SortOrder::Asc } else { SortOrder::Desc },
                offset,
                max: max.unwrap_or(config.listing_default_max),
            };
            let listing = service().list_graphs(&query).await?;
            emit(&serde_json::to_value(&listing)?, opts.output_format)?;
        }
        Command::Import { graph } => {
            let doc = read_json(&graph).await?;
            let created = service().create_graph(&doc).await?;
            info!(graph = created.id.as_str(), "imported");
            println!("{}", created.id);
        }
        Command::Translate { plan, import } => {
            let package = PlanPackage::from_json(&fs::read_to_string(&plan).await?)?;
            if import {
                let created = service().import_plan(&package).await?;
                info!(graph = created.id.as_str(), "imported plan package");
                println!("{}", created.id);
            } else {
                emit(&package.to_document(), opts.output_format)?;
            }
        }
        Command::SampleOutput {
            graph_id,
            job_id,
            samples,
        } => {
            let samples: SampleOutputList = serde_json::from_value(read_json(&samples).await?)?;
            let updated = service()
                .add_sample_output(&graph_id, &job_id, &samples)
                .await?;
            println!("{}", updated.id);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_logging();
    let opts = ToolOpts::parse();
    if let Err(err) = run(opts).await {
        eprintln!("plangraph-tool: {}", err);
        std::process::exit(1);
    }
}
