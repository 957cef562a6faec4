extern crate serde;
extern crate serde_json;

extern crate async_trait;
extern crate chrono;
extern crate dot_structures;
extern crate graphviz_rust;
extern crate include_dir;
extern crate itertools;
#[macro_use]
extern crate lazy_static;
extern crate liquid;
extern crate liquid_core;
extern crate petgraph;
extern crate regex;
extern crate tracing;
extern crate tracing_subscriber;

pub mod breakpoint;
pub mod config;
pub mod graph;
pub mod graph_service;
pub mod graph_store;
pub mod logging;
pub mod p2j;
pub mod templating;
pub mod utils;
