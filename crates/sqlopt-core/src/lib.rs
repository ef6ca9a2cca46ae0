#![forbid(unsafe_code)]
//! sqlopt-core: shared kernel for the sqlopt query optimizer.
//!
//! This crate contains only *pure* types, small helpers, and interfaces
//! (traits) that other crates implement. There is **no I/O** and **no
//! optimization logic** here.
//!
//! Crates that use this:
//! - sqlopt-planner: rewrites `LogicalPlan`s and searches for `PhysicalPlan`s.
//! - sqlopt-cli: drives the planner from YAML query files.
//!
//! Collaborators the optimizer calls into (statistics, privileges, the
//! catalog) are declared here as traits so embedders can supply their own.

pub mod catalog;
pub mod config;
pub mod error;
pub mod expr;
pub mod hash;
pub mod id;
pub mod logical;
pub mod physical;
pub mod plan;
pub mod prelude;
pub mod privilege;
pub mod schema;
pub mod stats;
pub mod types;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
