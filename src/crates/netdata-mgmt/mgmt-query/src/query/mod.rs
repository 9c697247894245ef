//! Composable queries against a management endpoint.

mod config;
mod factory;
mod method;
mod node;

pub use config::{QueryConfig, TransformArg, TransformConfig};
pub use factory::QueryFactory;
pub use node::{Arity, QueryNode};
