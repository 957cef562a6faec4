use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::breakpoint::DEFAULT_BREAKPOINT_LIMIT;
use crate::graph_store::{DEFAULT_LISTING_MAX, LISTING_CAP};

/// Settings for the viewer tooling.  Every key is optional.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Directory holding one `<id>.json` document per graph.
    pub store_path: PathBuf,
    pub listing_default_max: usize,
    pub listing_cap: usize,
    pub breakpoint_limit: u32,
    /// Node/edge type -> liquid template source, replacing the bundled ones.
    pub template_overrides: BTreeMap<String, String>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        ViewerConfig {
            store_path: PathBuf::from("graphs"),
            listing_default_max: DEFAULT_LISTING_MAX,
            listing_cap: LISTING_CAP,
            breakpoint_limit: DEFAULT_BREAKPOINT_LIMIT,
            template_overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(serde_json::Error),
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> ConfigError {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> ConfigError {
        ConfigError::Parse(err)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "unable to read config: {}", err),
            ConfigError::Parse(err) => write!(f, "bad config: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Read a JSON config file.  Relative `store_path`s are resolved against the
/// directory the config file lives in.
pub fn load<P: AsRef<Path>>(path: P) -> Result<ViewerConfig, ConfigError> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut config: ViewerConfig = serde_json::from_reader(reader)?;
    if config.store_path.is_relative() {
        if let Some(dir) = path.parent() {
            config.store_path = dir.join(&config.store_path);
        }
    }
    Ok(config)
}
