//! Convenience re-exports for downstream crates and tests.

pub use crate::catalog::{Catalog, ColumnInfo, IndexInfo, MemoryCatalog, StatsProvider, TableInfo};
pub use crate::config::{OptimizerConfig, RuleFlags};
pub use crate::error::{Error, Result};
pub use crate::expr::{AggCall, AggFunc, AggMode, BinOp, ColumnRef, Expr, SortItem, UnaryOp};
pub use crate::hash::plan_fingerprint;
pub use crate::id::{ColumnId, ColumnIdGen, PlanId};
pub use crate::logical::{Aggregation, Apply, IndexHint, Join, JoinType, LogicalPlan, Scan};
pub use crate::physical::{PhysicalOp, PhysicalPlan, TaskType};
pub use crate::plan::{Ddl, Execute, Insert, Plan};
pub use crate::privilege::{Privilege, PrivilegeManager, VisitInfo};
pub use crate::schema::{DataType, Field, Schema};
pub use crate::stats::{ColumnStats, TableStats};
pub use crate::types::Scalar;
