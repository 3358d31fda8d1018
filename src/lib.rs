//! Connector model compiler.
//!
//! Turns connector definitions (flat `key = value` text or structured
//! JSON/YAML) into a typed [`Connector`] graph, checks the cross-entity
//! references, and orders the sources of every task into an
//! [`ExecutionPlan`] for the execution engine.

pub mod compiler;
pub mod config;
pub mod dependency;
pub mod error;
pub mod executor;
pub mod input;
pub mod key;
pub mod model;
pub mod plan;
pub mod references;
pub mod resolver;
pub mod rules;
pub mod sequence;

pub use compiler::{
    CompiledConnector, ConnectorCompiler, ConnectorInput, compile, compile_batch,
};
pub use config::CompilerConfig;
pub use dependency::{DependencyGraph, dependency_layers};
pub use error::{CompileError, ConnectorError, ErrorKind, Problem};
pub use input::{InputError, InputFormat};
pub use model::{Connector, Phase, SourceScope};
pub use plan::{ExecutionPlan, TaskPlan};
pub use references::{extract_references, extract_source_keys};
pub use sequence::sequence;
