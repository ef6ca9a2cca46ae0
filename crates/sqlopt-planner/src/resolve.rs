//! Plan-id assignment and column position resolution.
//!
//! After the search every column reference still carries only its id.
//! [`finalize`] numbers the operators bottom-up and records, for each
//! reference, its position in the schema it is evaluated against.
//! [`validate`] re-walks a finished plan and checks those positions.

use std::collections::HashSet;

use sqlopt_core::error::{Error, Result};
use sqlopt_core::expr::{ColumnRef, Expr};
use sqlopt_core::id::PlanId;
use sqlopt_core::physical::{PhysicalOp, PhysicalPlan};
use sqlopt_core::schema::Schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Assign,
    Check,
}

/// Assign plan ids (post-order, from 1) and resolve column positions.
pub fn finalize(plan: &mut PhysicalPlan) -> Result<()> {
    Resolver::new(Mode::Assign).walk(plan)
}

/// Check that every reference of a finalized plan points at the position
/// its column holds in the input schema, and that plan ids are unique.
pub fn validate(plan: &PhysicalPlan) -> Result<()> {
    let mut copy = plan.clone();
    Resolver::new(Mode::Check).walk(&mut copy)
}

struct Resolver {
    mode: Mode,
    next_id: u64,
    seen: HashSet<PlanId>,
    /// Outer schemas visible to correlated references, innermost last.
    outer: Vec<Schema>,
}

impl Resolver {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            next_id: 1,
            seen: HashSet::new(),
            outer: Vec::new(),
        }
    }

    fn walk(&mut self, plan: &mut PhysicalPlan) -> Result<()> {
        if matches!(plan.op, PhysicalOp::NestedLoopApply { .. }) {
            let [outer, inner] = plan.children.as_mut_slice() else {
                return Err(Error::Invariant(format!("{} needs two children", plan.op.name())));
            };
            self.walk(outer)?;
            self.outer.push(outer.schema.clone());
            let res = self.walk(inner);
            self.outer.pop();
            res?;
        } else {
            for child in &mut plan.children {
                self.walk(child)?;
            }
        }

        let inputs: Vec<Schema> = plan.children.iter().map(|c| c.schema.clone()).collect();
        self.resolve_op(&mut plan.op, &plan.schema, &inputs)?;

        match self.mode {
            Mode::Assign => {
                plan.id = PlanId::new(self.next_id);
                self.next_id += 1;
            }
            Mode::Check => {
                if plan.id.get() == 0 || !self.seen.insert(plan.id) {
                    return Err(Error::Invariant(format!("plan id {} is unassigned or repeated", plan.label())));
                }
            }
        }
        Ok(())
    }

    fn resolve_op(&self, op: &mut PhysicalOp, own: &Schema, inputs: &[Schema]) -> Result<()> {
        let name = op.name();
        let input = |i: usize| input_schema(inputs, name, i);
        match op {
            PhysicalOp::TableScan {
                access_conditions, ..
            }
            | PhysicalOp::IndexScan {
                access_conditions, ..
            } => self.exprs(access_conditions.iter_mut(), own),
            PhysicalOp::Reader | PhysicalOp::Limit { .. } => Ok(()),
            PhysicalOp::Selection { conditions } => self.exprs(conditions.iter_mut(), input(0)?),
            PhysicalOp::Projection { exprs } => self.exprs(exprs.iter_mut(), input(0)?),
            PhysicalOp::HashAgg { group_by, aggs } | PhysicalOp::StreamAgg { group_by, aggs } => {
                let schema = input(0)?;
                self.exprs(group_by.iter_mut(), schema)?;
                self.exprs(aggs.iter_mut().flat_map(|a| a.args.iter_mut()), schema)
            }
            PhysicalOp::Sort { by } | PhysicalOp::TopN { by, .. } => {
                self.exprs(by.iter_mut().map(|s| &mut s.expr), input(0)?)
            }
            PhysicalOp::HashJoin {
                equal_conditions,
                left_conditions,
                right_conditions,
                other_conditions,
                ..
            }
            | PhysicalOp::MergeJoin {
                equal_conditions,
                left_conditions,
                right_conditions,
                other_conditions,
                ..
            } => {
                let (left, right) = (input(0)?, input(1)?);
                for (l, r) in equal_conditions.iter_mut() {
                    self.column(l, left)?;
                    self.column(r, right)?;
                }
                self.exprs(left_conditions.iter_mut(), left)?;
                self.exprs(right_conditions.iter_mut(), right)?;
                self.exprs(other_conditions.iter_mut(), &Schema::merge(left, right))
            }
            PhysicalOp::NestedLoopApply { conditions, .. } => {
                let merged = Schema::merge(input(0)?, input(1)?);
                self.exprs(conditions.iter_mut(), &merged)
            }
        }
    }

    fn exprs<'e>(&self, exprs: impl Iterator<Item = &'e mut Expr>, schema: &Schema) -> Result<()> {
        for expr in exprs {
            expr.visit_refs_mut(&mut |c, correlated| {
                if !correlated {
                    return self.column(c, schema);
                }
                let outer = self
                    .outer
                    .iter()
                    .rev()
                    .find(|s| s.contains(c.id))
                    .ok_or_else(|| Error::Invariant(format!("correlated column {} has no outer schema", c)))?;
                self.column(c, outer)
            })?;
        }
        Ok(())
    }

    fn column(&self, c: &mut ColumnRef, schema: &Schema) -> Result<()> {
        let pos = schema
            .index_of(c.id)
            .ok_or_else(|| Error::Invariant(format!("column {} ({}) not found in {}", c.id, c.name, schema)))?;
        match self.mode {
            Mode::Assign => {
                c.index = Some(pos);
                Ok(())
            }
            Mode::Check if c.index == Some(pos) => Ok(()),
            Mode::Check => Err(Error::Invariant(format!(
                "column {} resolved to {:?}, schema has it at {}",
                c, c.index, pos
            ))),
        }
    }
}

fn input_schema<'s>(inputs: &'s [Schema], op: &str, i: usize) -> Result<&'s Schema> {
    inputs
        .get(i)
        .ok_or_else(|| Error::Invariant(format!("{} is missing input {}", op, i)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlopt_core::expr::BinOp;
    use sqlopt_core::id::ColumnId;
    use sqlopt_core::logical::JoinType;
    use sqlopt_core::physical::TaskType;
    use sqlopt_core::schema::{DataType, Field};
    use sqlopt_core::types::Scalar;

    fn table(name: &str, ids: &[u64]) -> PhysicalPlan {
        let fields = ids
            .iter()
            .map(|i| Field::new(ColumnId::new(*i), format!("c{}", i), DataType::Int64, true))
            .collect();
        PhysicalPlan::new(
            PhysicalOp::TableScan {
                table: name.into(),
                access_conditions: vec![],
                keep_order: false,
                desc: false,
            },
            vec![],
            Schema::new(fields),
            10.0,
            TaskType::Root,
        )
    }

    fn cref(id: u64) -> ColumnRef {
        ColumnRef::new(ColumnId::new(id), format!("c{}", id))
    }

    fn join() -> PhysicalPlan {
        let (l, r) = (table("l", &[1, 2]), table("r", &[3, 4]));
        let schema = Schema::merge(&l.schema, &r.schema);
        PhysicalPlan::new(
            PhysicalOp::HashJoin {
                join_type: JoinType::Inner,
                equal_conditions: vec![(cref(2), cref(3))],
                left_conditions: vec![],
                right_conditions: vec![],
                other_conditions: vec![Expr::binary(
                    BinOp::Lt,
                    Expr::Column(cref(1)),
                    Expr::Column(cref(4)),
                )],
            },
            vec![l, r],
            schema,
            10.0,
            TaskType::Root,
        )
    }

    #[test]
    fn join_references_resolve_per_side() {
        let mut plan = join();
        finalize(&mut plan).unwrap();
        assert_eq!(plan.id.get(), 3);
        let PhysicalOp::HashJoin {
            equal_conditions,
            other_conditions,
            ..
        } = &plan.op
        else {
            unreachable!()
        };
        assert_eq!(equal_conditions[0].0.index, Some(1));
        assert_eq!(equal_conditions[0].1.index, Some(0));
        let mut seen = Vec::new();
        other_conditions[0]
            .visit_refs(&mut |c, _| {
                seen.push(c.index);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![Some(0), Some(3)]);
        validate(&plan).unwrap();
    }

    #[test]
    fn stale_index_is_rejected() {
        let mut plan = join();
        finalize(&mut plan).unwrap();
        if let PhysicalOp::HashJoin { equal_conditions, .. } = &mut plan.op {
            equal_conditions[0].0.index = Some(0);
        }
        assert!(matches!(validate(&plan), Err(Error::Invariant(_))));
    }

    #[test]
    fn correlated_reference_resolves_against_outer() {
        let outer = table("o", &[1, 2]);
        let inner_scan = table("i", &[3]);
        let filter = Expr::eq(Expr::Column(cref(3)), Expr::Correlated(cref(2)));
        let inner = PhysicalPlan::new(
            PhysicalOp::Selection {
                conditions: vec![filter, Expr::eq(Expr::Column(cref(3)), Expr::Literal(Scalar::I64(1)))],
            },
            vec![inner_scan.clone()],
            inner_scan.schema.clone(),
            1.0,
            TaskType::Root,
        );
        let schema = outer.schema.clone();
        let mut plan = PhysicalPlan::new(
            PhysicalOp::NestedLoopApply {
                join_type: JoinType::Semi,
                conditions: vec![],
            },
            vec![outer, inner],
            schema,
            5.0,
            TaskType::Root,
        );
        finalize(&mut plan).unwrap();
        let PhysicalOp::Selection { conditions } = &plan.children[1].op else {
            unreachable!()
        };
        let mut seen = Vec::new();
        conditions[0]
            .visit_refs(&mut |c, correlated| {
                seen.push((c.index, correlated));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![(Some(0), false), (Some(1), true)]);
    }
}
