//! Unique-key derivation.
//!
//! Recomputes the keys attached to every schema-owning node, bottom-up.
//! The plan shape is never changed.

use std::collections::HashSet;
use std::sync::Arc;

use sqlopt_core::error::Result;
use sqlopt_core::id::ColumnId;
use sqlopt_core::logical::{Aggregation, Apply, Join, JoinType, LogicalPlan, Scan};
use sqlopt_core::schema::Schema;

use super::LogicalRule;

pub struct KeyInfoBuilder;

impl LogicalRule for KeyInfoBuilder {
    fn name(&self) -> &'static str {
        "build_keys"
    }

    fn optimize(&self, plan: Arc<LogicalPlan>) -> Result<Arc<LogicalPlan>> {
        Ok(build(&plan))
    }
}

fn build(plan: &Arc<LogicalPlan>) -> Arc<LogicalPlan> {
    let children: Vec<Arc<LogicalPlan>> = plan.children().into_iter().map(build).collect();
    let rebuilt = super::replace_children(plan, children);

    let updated = match rebuilt.as_ref() {
        LogicalPlan::Scan(scan) => {
            let keys = scan_keys(scan);
            (keys != scan.schema.keys).then(|| {
                let mut scan = scan.clone();
                scan.schema.keys = keys;
                LogicalPlan::Scan(scan)
            })
        }
        LogicalPlan::Projection {
            input,
            exprs,
            schema,
        } => {
            let keys = projection_keys(input.schema(), exprs, schema);
            (keys != schema.keys).then(|| {
                let mut schema = schema.clone();
                schema.keys = keys;
                LogicalPlan::Projection {
                    input: input.clone(),
                    exprs: exprs.clone(),
                    schema,
                }
            })
        }
        LogicalPlan::Aggregation(agg) => {
            let keys = aggregation_keys(agg);
            (keys != agg.schema.keys).then(|| {
                let mut agg = agg.clone();
                agg.schema.keys = keys;
                LogicalPlan::Aggregation(agg)
            })
        }
        LogicalPlan::Join(join) => {
            let keys = join_keys(join);
            (keys != join.schema.keys).then(|| {
                let mut join = join.clone();
                join.schema.keys = keys;
                LogicalPlan::Join(join)
            })
        }
        LogicalPlan::Apply(apply) => {
            let keys = apply_keys(apply);
            (keys != apply.schema.keys).then(|| {
                let mut apply = apply.clone();
                apply.schema.keys = keys;
                LogicalPlan::Apply(apply)
            })
        }
        // Pass-through nodes expose their child's schema and keys.
        LogicalPlan::Selection { .. }
        | LogicalPlan::Sort { .. }
        | LogicalPlan::Limit { .. }
        | LogicalPlan::TopN { .. } => None,
    };
    match updated {
        Some(node) => Arc::new(node),
        None => rebuilt,
    }
}

fn push_key(keys: &mut Vec<Vec<ColumnId>>, mut key: Vec<ColumnId>) {
    key.sort();
    key.dedup();
    if !keys.contains(&key) {
        keys.push(key);
    }
}

fn scan_keys(scan: &Scan) -> Vec<Vec<ColumnId>> {
    let mut keys = Vec::new();
    let id_of = |name: &str| scan.schema.fields.iter().find(|f| f.name == name).map(|f| f.id);

    if let Some(pk) = &scan.table.pk_is_handle {
        if let Some(id) = id_of(pk) {
            push_key(&mut keys, vec![id]);
        }
    }
    for index in scan.table.indexes.iter().filter(|i| i.unique) {
        let mut key = Vec::with_capacity(index.columns.len());
        let mut usable = true;
        for c in &index.columns {
            // NULLs are not unique, so only non-null columns form keys.
            match (id_of(c), scan.table.column(c)) {
                (Some(id), Some(info)) if !info.nullable => key.push(id),
                _ => {
                    usable = false;
                    break;
                }
            }
        }
        if usable && !key.is_empty() {
            push_key(&mut keys, key);
        }
    }
    keys
}

fn projection_keys(
    child: &Schema,
    exprs: &[sqlopt_core::expr::Expr],
    schema: &Schema,
) -> Vec<Vec<ColumnId>> {
    let mut keys = Vec::new();
    for key in &child.keys {
        let mut mapped = Vec::with_capacity(key.len());
        for c in key {
            let out = exprs
                .iter()
                .position(|e| e.as_column().map(|col| col.id) == Some(*c))
                .map(|pos| schema.fields[pos].id);
            match out {
                Some(id) => mapped.push(id),
                None => break,
            }
        }
        if mapped.len() == key.len() {
            push_key(&mut keys, mapped);
        }
    }
    keys
}

fn aggregation_keys(agg: &Aggregation) -> Vec<Vec<ColumnId>> {
    let mut keys = Vec::new();
    if let Some(group_ids) = agg.group_output_ids() {
        // No group-by: exactly one row, recorded as the empty key.
        push_key(&mut keys, group_ids);
    }
    keys
}

/// True when each row of `side` matches at most one row through `key_cols`.
fn unique_on(side: &Schema, key_cols: &HashSet<ColumnId>) -> bool {
    !key_cols.is_empty() && side.has_key_within(key_cols)
}

fn join_keys(join: &Join) -> Vec<Vec<ColumnId>> {
    let left = join.left.schema();
    let right = join.right.schema();
    let left_eq: HashSet<ColumnId> = join.equal_conditions.iter().map(|(l, _)| l.id).collect();
    let right_eq: HashSet<ColumnId> = join.equal_conditions.iter().map(|(_, r)| r.id).collect();

    let mut keys = Vec::new();
    match join.join_type {
        JoinType::Semi | JoinType::AntiSemi => {
            for k in &left.keys {
                push_key(&mut keys, k.clone());
            }
        }
        JoinType::Inner | JoinType::LeftOuter | JoinType::RightOuter => {
            // The null-supplying side of an outer join loses its keys.
            let keep_left = join.join_type != JoinType::RightOuter;
            let keep_right = join.join_type != JoinType::LeftOuter;
            if keep_left && (unique_on(right, &right_eq) || right.max_one_row()) {
                for k in &left.keys {
                    push_key(&mut keys, k.clone());
                }
            }
            if keep_right && (unique_on(left, &left_eq) || left.max_one_row()) {
                for k in &right.keys {
                    push_key(&mut keys, k.clone());
                }
            }
        }
    }
    keys
}

fn apply_keys(apply: &Apply) -> Vec<Vec<ColumnId>> {
    let outer = apply.outer.schema();
    let mut keys = Vec::new();
    let keep = match apply.join_type {
        JoinType::Semi | JoinType::AntiSemi => true,
        _ => apply.inner.schema().max_one_row(),
    };
    if keep {
        for k in &outer.keys {
            push_key(&mut keys, k.clone());
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_util::{col, scan};
    use sqlopt_core::expr::{AggCall, AggFunc};

    #[test]
    fn scan_key_from_handle() {
        let s = scan("t", &["a", "b"], 1);
        let out = KeyInfoBuilder.optimize(s.clone()).unwrap();
        assert_eq!(out.schema().keys, vec![vec![col(&s, "a").id]]);
    }

    #[test]
    fn scalar_aggregation_has_empty_key() {
        let s = scan("t", &["a", "b"], 1);
        let b = col(&s, "b");
        let out_field = sqlopt_core::schema::Field::new(
            ColumnId::new(9),
            "m",
            sqlopt_core::schema::DataType::Int64,
            true,
        );
        let agg = Arc::new(LogicalPlan::Aggregation(Aggregation {
            input: s,
            group_by: vec![],
            aggs: vec![AggCall::new(AggFunc::Max, vec![sqlopt_core::expr::Expr::Column(b)])],
            schema: Schema::new(vec![out_field]),
        }));
        let out = KeyInfoBuilder.optimize(agg).unwrap();
        assert!(out.schema().max_one_row());
    }

    #[test]
    fn second_run_is_a_no_op() {
        let s = scan("t", &["a", "b"], 1);
        let once = KeyInfoBuilder.optimize(s).unwrap();
        let twice = KeyInfoBuilder.optimize(once.clone()).unwrap();
        assert!(Arc::ptr_eq(&once, &twice));
    }
}
