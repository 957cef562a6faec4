pub mod liquid_exts;
pub mod registry;

pub use registry::{TemplateError, TemplateRegistry, FALLBACK_TEMPLATE};
