//! Limit and TopN push-down.
//!
//! `Limit(Sort(X))` is fused into `TopN(X)`. Limits then move below
//! projections and a copy limited to `offset + count` rows is placed on the
//! preserved side of an outer join.

use std::collections::HashMap;
use std::sync::Arc;

use sqlopt_core::error::Result;
use sqlopt_core::expr::{Expr, SortItem};
use sqlopt_core::id::ColumnId;
use sqlopt_core::logical::{JoinType, LogicalPlan};
use tracing::debug;

use super::{replace_children, LogicalRule};

pub struct TopNPushDown;

impl LogicalRule for TopNPushDown {
    fn name(&self) -> &'static str {
        "topn_push_down"
    }

    fn optimize(&self, plan: Arc<LogicalPlan>) -> Result<Arc<LogicalPlan>> {
        Ok(rewrite(&plan))
    }
}

fn rewrite(plan: &Arc<LogicalPlan>) -> Arc<LogicalPlan> {
    match plan.as_ref() {
        LogicalPlan::Limit {
            input,
            offset,
            count,
        } => match input.as_ref() {
            LogicalPlan::Sort { input: sorted, by } => {
                debug!(count, "limit over sort fused into topn");
                apply_limit(sorted, by, *offset, *count)
            }
            _ => apply_limit(input, &[], *offset, *count),
        },
        LogicalPlan::TopN {
            input,
            by,
            offset,
            count,
        } => apply_limit(input, by, *offset, *count),
        _ => {
            let children = plan.children().into_iter().map(rewrite).collect();
            replace_children(plan, children)
        }
    }
}

/// Limit node over `input`: a TopN when `by` is non-empty.
fn make_limit(input: Arc<LogicalPlan>, by: &[SortItem], offset: u64, count: u64) -> Arc<LogicalPlan> {
    if by.is_empty() {
        Arc::new(LogicalPlan::Limit {
            input,
            offset,
            count,
        })
    } else {
        Arc::new(LogicalPlan::TopN {
            input,
            by: by.to_vec(),
            offset,
            count,
        })
    }
}

/// Place a limit of `count` rows after `offset` over `input`, as deep as
/// it can go.
fn apply_limit(input: &Arc<LogicalPlan>, by: &[SortItem], offset: u64, count: u64) -> Arc<LogicalPlan> {
    match input.as_ref() {
        LogicalPlan::Projection {
            input: child,
            exprs,
            schema,
        } => {
            let map: HashMap<ColumnId, Expr> = schema
                .fields
                .iter()
                .zip(exprs.iter())
                .map(|(f, e)| (f.id, e.clone()))
                .collect();
            let lowered: Vec<SortItem> = by
                .iter()
                .map(|s| SortItem::new(s.expr.substitute(&map), s.desc))
                .collect();
            let below = apply_limit(child, &lowered, offset, count);
            replace_children(input, vec![below])
        }
        LogicalPlan::Join(join) if join.join_type.is_outer() => {
            let preserved_left = join.join_type == JoinType::LeftOuter;
            let preserved = if preserved_left { &join.left } else { &join.right };
            let preserved_ids = preserved.schema().id_set();
            let orderable = by
                .iter()
                .all(|s| s.expr.column_ids().is_subset(&preserved_ids));
            let limit = offset.saturating_add(count);
            let pushed = if orderable && !already_limited(preserved, by, limit) {
                debug!(limit, join_type = join.join_type.name(), "limit copied into preserved join side");
                apply_limit(preserved, by, 0, limit)
            } else {
                rewrite(preserved)
            };
            let new_join = if preserved_left {
                vec![pushed, rewrite(&join.right)]
            } else {
                vec![rewrite(&join.left), pushed]
            };
            make_limit(replace_children(input, new_join), by, offset, count)
        }
        _ => make_limit(rewrite(input), by, offset, count),
    }
}

fn already_limited(plan: &LogicalPlan, by: &[SortItem], limit: u64) -> bool {
    match plan {
        LogicalPlan::Limit { offset: 0, count, .. } => by.is_empty() && *count <= limit,
        LogicalPlan::TopN {
            by: existing,
            offset: 0,
            count,
            ..
        } => existing.as_slice() == by && *count <= limit,
        LogicalPlan::Projection { input, .. } => already_limited(input, by, limit),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_util::{col, scan};
    use sqlopt_core::logical::Join;

    #[test]
    fn limit_over_sort_becomes_topn() {
        let s = scan("t", &["a", "b"], 1);
        let sort = Arc::new(LogicalPlan::Sort {
            input: s.clone(),
            by: vec![SortItem::new(Expr::Column(col(&s, "b")), false)],
        });
        let limit = Arc::new(LogicalPlan::Limit {
            input: sort,
            offset: 2,
            count: 5,
        });
        let out = TopNPushDown.optimize(limit).unwrap();
        let LogicalPlan::TopN { offset, count, by, .. } = out.as_ref() else {
            panic!("expected topn, got {}", out.explain());
        };
        assert_eq!((*offset, *count), (2, 5));
        assert_eq!(by.len(), 1);
    }

    #[test]
    fn limit_copied_into_left_outer_join_once() {
        let (l, r) = (scan("t1", &["a", "b"], 1), scan("t2", &["a", "b"], 3));
        let join = Arc::new(LogicalPlan::Join(
            Join::new(l.clone(), r.clone(), JoinType::LeftOuter).with_equal(col(&l, "a"), col(&r, "a")),
        ));
        let limit = Arc::new(LogicalPlan::Limit {
            input: join,
            offset: 1,
            count: 3,
        });
        let out = TopNPushDown.optimize(limit).unwrap();
        let LogicalPlan::Limit { input, .. } = out.as_ref() else {
            panic!("expected limit on top, got {}", out.explain());
        };
        let LogicalPlan::Join(j) = input.as_ref() else {
            panic!("expected join");
        };
        assert!(matches!(j.left.as_ref(), LogicalPlan::Limit { offset: 0, count: 4, .. }));
        assert_eq!(j.right.name(), "Scan");

        let again = TopNPushDown.optimize(out.clone()).unwrap();
        assert_eq!(again.node_count(), out.node_count());
    }

    #[test]
    fn topn_moves_below_projection() {
        let s = scan("t", &["a", "b"], 1);
        let b = col(&s, "b");
        let proj_schema = sqlopt_core::schema::Schema::new(vec![s.schema().fields[1].clone()]);
        let proj = Arc::new(LogicalPlan::Projection {
            input: s,
            exprs: vec![Expr::Column(b.clone())],
            schema: proj_schema,
        });
        let topn = Arc::new(LogicalPlan::TopN {
            input: proj,
            by: vec![SortItem::new(Expr::Column(b), true)],
            offset: 0,
            count: 1,
        });
        let out = TopNPushDown.optimize(topn).unwrap();
        assert_eq!(out.name(), "Projection");
        assert_eq!(out.children()[0].name(), "TopN");
    }
}
