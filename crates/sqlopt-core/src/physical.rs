//! Physical plan tree produced by the cost search.
//!
//! Column references inside operators carry resolved positions once the
//! finalization pass has run: single-input operators index their child's
//! schema, joins index the left/right child for side conditions and the
//! concatenated inputs for the rest.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::expr::{AggCall, ColumnRef, Expr, SortItem};
use crate::id::PlanId;
use crate::logical::{join_exprs, join_items, JoinType};
use crate::schema::Schema;

/// Where an operator executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    /// In the SQL layer.
    Root,
    /// Pushed down into the storage co-processor.
    Cop,
}

impl TaskType {
    pub fn name(self) -> &'static str {
        match self {
            TaskType::Root => "root",
            TaskType::Cop => "cop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PhysicalOp {
    TableScan {
        table: String,
        /// Range conditions on the integer primary key.
        access_conditions: Vec<Expr>,
        keep_order: bool,
        desc: bool,
    },
    IndexScan {
        table: String,
        index: String,
        /// Range conditions on the leading index column.
        access_conditions: Vec<Expr>,
        keep_order: bool,
        desc: bool,
        /// Rows are looked up in the table after the index read.
        double_read: bool,
    },
    /// Boundary that ships co-processor results to the root.
    Reader,
    Selection {
        conditions: Vec<Expr>,
    },
    Projection {
        exprs: Vec<Expr>,
    },
    HashJoin {
        join_type: JoinType,
        equal_conditions: Vec<(ColumnRef, ColumnRef)>,
        left_conditions: Vec<Expr>,
        right_conditions: Vec<Expr>,
        other_conditions: Vec<Expr>,
    },
    MergeJoin {
        join_type: JoinType,
        equal_conditions: Vec<(ColumnRef, ColumnRef)>,
        left_conditions: Vec<Expr>,
        right_conditions: Vec<Expr>,
        other_conditions: Vec<Expr>,
        desc: bool,
    },
    NestedLoopApply {
        join_type: JoinType,
        conditions: Vec<Expr>,
    },
    HashAgg {
        group_by: Vec<Expr>,
        aggs: Vec<AggCall>,
    },
    StreamAgg {
        group_by: Vec<Expr>,
        aggs: Vec<AggCall>,
    },
    Sort {
        by: Vec<SortItem>,
    },
    TopN {
        by: Vec<SortItem>,
        offset: u64,
        count: u64,
    },
    Limit {
        offset: u64,
        count: u64,
    },
}

impl PhysicalOp {
    pub fn name(&self) -> &'static str {
        match self {
            PhysicalOp::TableScan { .. } => "TableScan",
            PhysicalOp::IndexScan { double_read: false, .. } => "IndexScan",
            PhysicalOp::IndexScan { double_read: true, .. } => "IndexLookUp",
            PhysicalOp::Reader => "Reader",
            PhysicalOp::Selection { .. } => "Selection",
            PhysicalOp::Projection { .. } => "Projection",
            PhysicalOp::HashJoin { .. } => "HashJoin",
            PhysicalOp::MergeJoin { .. } => "MergeJoin",
            PhysicalOp::NestedLoopApply { .. } => "NestedLoopApply",
            PhysicalOp::HashAgg { .. } => "HashAgg",
            PhysicalOp::StreamAgg { .. } => "StreamAgg",
            PhysicalOp::Sort { .. } => "Sort",
            PhysicalOp::TopN { .. } => "TopN",
            PhysicalOp::Limit { .. } => "Limit",
        }
    }

    fn detail(&self) -> String {
        match self {
            PhysicalOp::TableScan {
                table,
                access_conditions,
                keep_order,
                desc,
            } => {
                let mut s = format!("table:{}", table);
                if !access_conditions.is_empty() {
                    let _ = write!(s, " range:[{}]", join_exprs(access_conditions));
                }
                let _ = write!(s, " keep_order:{}", keep_order);
                if *desc {
                    s.push_str(" desc");
                }
                s
            }
            PhysicalOp::IndexScan {
                table,
                index,
                access_conditions,
                keep_order,
                desc,
                ..
            } => {
                let mut s = format!("table:{} index:{}", table, index);
                if !access_conditions.is_empty() {
                    let _ = write!(s, " range:[{}]", join_exprs(access_conditions));
                }
                let _ = write!(s, " keep_order:{}", keep_order);
                if *desc {
                    s.push_str(" desc");
                }
                s
            }
            PhysicalOp::Reader => String::new(),
            PhysicalOp::Selection { conditions } => join_exprs(conditions),
            PhysicalOp::Projection { exprs } => join_exprs(exprs),
            PhysicalOp::HashJoin {
                join_type,
                equal_conditions,
                left_conditions,
                right_conditions,
                other_conditions,
            }
            | PhysicalOp::MergeJoin {
                join_type,
                equal_conditions,
                left_conditions,
                right_conditions,
                other_conditions,
                ..
            } => {
                let mut s = join_type.name().to_string();
                if !equal_conditions.is_empty() {
                    let eqs: Vec<String> = equal_conditions
                        .iter()
                        .map(|(l, r)| format!("eq({}, {})", l, r))
                        .collect();
                    let _ = write!(s, " equal:[{}]", eqs.join(", "));
                }
                if !left_conditions.is_empty() {
                    let _ = write!(s, " left cond:[{}]", join_exprs(left_conditions));
                }
                if !right_conditions.is_empty() {
                    let _ = write!(s, " right cond:[{}]", join_exprs(right_conditions));
                }
                if !other_conditions.is_empty() {
                    let _ = write!(s, " other cond:[{}]", join_exprs(other_conditions));
                }
                s
            }
            PhysicalOp::NestedLoopApply {
                join_type,
                conditions,
            } => {
                if conditions.is_empty() {
                    join_type.name().to_string()
                } else {
                    format!("{} [{}]", join_type.name(), join_exprs(conditions))
                }
            }
            PhysicalOp::HashAgg { group_by, aggs } | PhysicalOp::StreamAgg { group_by, aggs } => {
                let aggs: Vec<String> = aggs.iter().map(|a| a.to_string()).collect();
                if group_by.is_empty() {
                    format!("funcs:{}", aggs.join(", "))
                } else {
                    format!("group by:{}, funcs:{}", join_exprs(group_by), aggs.join(", "))
                }
            }
            PhysicalOp::Sort { by } => join_items(by),
            PhysicalOp::TopN { by, offset, count } => {
                format!("{}, offset:{}, count:{}", join_items(by), offset, count)
            }
            PhysicalOp::Limit { offset, count } => format!("offset:{}, count:{}", offset, count),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalPlan {
    /// Zero until finalization assigns ids.
    pub id: PlanId,
    pub op: PhysicalOp,
    pub children: Vec<PhysicalPlan>,
    pub schema: Schema,
    pub est_rows: f64,
    pub task: TaskType,
}

impl PhysicalPlan {
    pub fn new(op: PhysicalOp, children: Vec<PhysicalPlan>, schema: Schema, est_rows: f64, task: TaskType) -> Self {
        Self {
            id: PlanId::new(0),
            op,
            children,
            schema,
            est_rows,
            task,
        }
    }

    /// `Name_id` label used by explain output.
    pub fn label(&self) -> String {
        format!("{}_{}", self.op.name(), self.id.get())
    }

    /// Pre-order walk.
    pub fn visit(&self, f: &mut dyn FnMut(&PhysicalPlan)) {
        f(self);
        for c in &self.children {
            c.visit(f);
        }
    }

    /// Operator names in pre-order, handy for assertions.
    pub fn op_names(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        self.visit(&mut |p| out.push(p.op.name()));
        out
    }

    pub fn contains_op(&self, name: &str) -> bool {
        self.op_names().iter().any(|n| *n == name)
    }

    /// Indented text rendering with estimated rows and task location.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_into(&mut out, 0);
        out
    }

    fn explain_into(&self, out: &mut String, depth: usize) {
        let _ = write!(
            out,
            "{}{} rows:{:.2} task:{}",
            "  ".repeat(depth),
            self.label(),
            self.est_rows,
            self.task.name()
        );
        let detail = self.op.detail();
        if !detail.is_empty() {
            let _ = write!(out, " {}", detail);
        }
        out.push('\n');
        for c in &self.children {
            c.explain_into(out, depth + 1);
        }
    }
}
