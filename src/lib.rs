//! edaflow - Parameter-tree driven hardware compilation flows
//!
//! A design is described by a typed parameter tree ([`schema::Schema`]).
//! Its `flowgraph` branch defines stages and their inputs; the
//! [`scheduler::Scheduler`] runs every stage instance concurrently,
//! ordering them by liveness of their upstream instances.

pub mod cli;
pub mod collect;
pub mod error;
pub mod executors;
pub mod flowgraph;
pub mod logging;
pub mod models;
pub mod scheduler;
pub mod schema;
pub mod score;
pub mod settings;
pub mod target;
pub mod telemetry;
pub mod tools;

pub use error::{EdaFlowError, Result};
pub use flowgraph::FlowGraph;
pub use scheduler::{RunHandle, Scheduler};
pub use schema::{KeyPath, Schema, Value};
