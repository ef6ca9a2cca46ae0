//! Partial physical plans with their cost.

use sqlopt_core::error::{Error, Result};
use sqlopt_core::physical::{PhysicalOp, PhysicalPlan, TaskType};
use sqlopt_core::schema::Schema;

use crate::cost::{row_width, CostFactors};

#[derive(Debug, Clone)]
pub enum Task {
    /// Runs in the SQL layer.
    Root { plan: PhysicalPlan, cost: f64 },
    /// Runs in the storage co-processor; must be finished before a root
    /// operator can consume it.
    Cop {
        plan: PhysicalPlan,
        cost: f64,
        keep_order: bool,
    },
    /// No plan satisfies the requested property.
    Invalid,
}

impl Task {
    pub fn cost(&self) -> f64 {
        match self {
            Task::Root { cost, .. } | Task::Cop { cost, .. } => *cost,
            Task::Invalid => f64::INFINITY,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Task::Invalid)
    }

    pub fn task_type(&self) -> Option<TaskType> {
        match self {
            Task::Root { .. } => Some(TaskType::Root),
            Task::Cop { .. } => Some(TaskType::Cop),
            Task::Invalid => None,
        }
    }

    pub fn plan(&self) -> Option<&PhysicalPlan> {
        match self {
            Task::Root { plan, .. } | Task::Cop { plan, .. } => Some(plan),
            Task::Invalid => None,
        }
    }

    /// Estimated rows of the task's top operator.
    pub fn rows(&self) -> f64 {
        self.plan().map(|p| p.est_rows).unwrap_or(0.0)
    }

    /// Turn a co-processor task into a root task: a Reader ships the rows,
    /// paying network cost per byte. Other tasks are returned unchanged.
    pub fn finish(self, factors: &CostFactors) -> Task {
        match self {
            Task::Cop { plan, cost, .. } => {
                let rows = plan.est_rows;
                let net = rows * row_width(&plan.schema) * factors.network;
                let schema = plan.schema.clone();
                Task::Root {
                    plan: PhysicalPlan::new(PhysicalOp::Reader, vec![plan], schema, rows, TaskType::Root),
                    cost: cost + net,
                }
            }
            other => other,
        }
    }

    /// Put `op` on top of this task, in the same location.
    pub fn attach(self, op: PhysicalOp, schema: Schema, rows: f64, extra_cost: f64) -> Task {
        match self {
            Task::Root { plan, cost } => Task::Root {
                plan: PhysicalPlan::new(op, vec![plan], schema, rows, TaskType::Root),
                cost: cost + extra_cost,
            },
            Task::Cop {
                plan,
                cost,
                keep_order,
            } => Task::Cop {
                plan: PhysicalPlan::new(op, vec![plan], schema, rows, TaskType::Cop),
                cost: cost + extra_cost,
                keep_order,
            },
            Task::Invalid => Task::Invalid,
        }
    }

    pub fn into_plan(self) -> Result<PhysicalPlan> {
        match self {
            Task::Root { plan, .. } | Task::Cop { plan, .. } => Ok(plan),
            Task::Invalid => Err(Error::Invariant("plan requested from an invalid task".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlopt_core::id::ColumnId;
    use sqlopt_core::schema::{DataType, Field};

    fn scan_task() -> Task {
        let schema = Schema::new(vec![Field::new(ColumnId::new(1), "a", DataType::Int64, false)]);
        let plan = PhysicalPlan::new(
            PhysicalOp::TableScan {
                table: "test.t".into(),
                access_conditions: vec![],
                keep_order: false,
                desc: false,
            },
            vec![],
            schema,
            100.0,
            TaskType::Cop,
        );
        Task::Cop {
            plan,
            cost: 10.0,
            keep_order: false,
        }
    }

    #[test]
    fn finishing_adds_reader_and_network_cost() {
        let f = CostFactors::default();
        let root = scan_task().finish(&f);
        assert_eq!(root.task_type(), Some(TaskType::Root));
        assert_eq!(root.plan().unwrap().op_names(), vec!["Reader", "TableScan"]);
        assert!((root.cost() - (10.0 + 100.0 * 8.0 * f.network)).abs() < 1e-9);
    }

    #[test]
    fn invalid_task_has_no_plan() {
        assert_eq!(Task::Invalid.cost(), f64::INFINITY);
        assert!(Task::Invalid.into_plan().is_err());
    }
}
