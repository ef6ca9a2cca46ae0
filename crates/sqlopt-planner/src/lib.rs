#![forbid(unsafe_code)]
//! sqlopt-planner: turns logical plans into physical plans.
//!
//! Phases, in the order the [`Optimizer`] drives them:
//! - `rules`: bitmask-selected logical rewrites, applied in catalog order.
//! - `cartesian`: rejects unconstrained joins when configured to.
//! - `stats` + `search`: statistics derivation and property-directed cost
//!   search over physical implementations.
//! - `resolve`: plan-id assignment and column position resolution.
//! - `projection`: physical identity-projection elimination.
//!
//! `dsl` provides a YAML query format and a [`PlanBuilder`] for it.

pub mod builder;
pub mod cartesian;
pub mod context;
pub mod cost;
pub mod dsl;
pub mod optimizer;
pub mod projection;
pub mod property;
pub mod resolve;
pub mod rules;
pub mod search;
pub mod stats;
pub mod task;

pub use builder::{BuildOutput, PlanBuilder};
pub use context::SessionContext;
pub use cost::CostFactors;
pub use optimizer::Optimizer;
