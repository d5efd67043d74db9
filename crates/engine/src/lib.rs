//! `dagflow-engine`: flow model, validation and the execution engine.

pub mod config;
pub mod dag;
pub mod error;
pub mod executor;
pub mod models;

pub use config::EngineConfig;
pub use dag::{topological_order, validate_flow, ValidationReport};
pub use error::EngineError;
pub use executor::Engine;
pub use models::{Edge, Flow, FlowDefinition};
