//! Statistics derivation and native orderings.
//!
//! Both are computed once, bottom-up, before the physical search and kept
//! in side tables keyed by node identity (the address of the node inside
//! its `Arc`). The tree must stay alive and unmodified while the tables
//! are in use.

use std::collections::HashMap;
use std::sync::Arc;

use sqlopt_core::catalog::StatsProvider;
use sqlopt_core::error::{Error, Result};
use sqlopt_core::expr::Expr;
use sqlopt_core::id::ColumnId;
use sqlopt_core::logical::{Aggregation, Join, JoinType, LogicalPlan, Scan};
use sqlopt_core::stats::ColumnStats;
use tracing::{debug, trace};

use crate::cost::{selectivity, CostFactors};

/// Identity of a node for side tables and the search memo.
pub fn node_key(plan: &LogicalPlan) -> usize {
    plan as *const LogicalPlan as usize
}

/// Estimated output of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsInfo {
    pub rows: f64,
    /// Distinct values per output column.
    pub ndv: HashMap<ColumnId, f64>,
    /// Column statistics carried up from the scans, where still exact
    /// enough to estimate comparisons.
    pub columns: HashMap<ColumnId, ColumnStats>,
}

impl StatsInfo {
    /// No column knowledge, `rows` rows.
    pub fn pseudo(rows: f64) -> Self {
        Self {
            rows,
            ndv: HashMap::new(),
            columns: HashMap::new(),
        }
    }

    pub fn ndv_of(&self, id: ColumnId) -> f64 {
        self.ndv.get(&id).copied().unwrap_or(self.rows).max(1.0)
    }

    /// Keep `factor` of the rows; distinct counts are capped accordingly.
    pub fn scale(&self, factor: f64) -> StatsInfo {
        let rows = (self.rows * factor).max(0.0);
        StatsInfo {
            rows,
            ndv: self.ndv.iter().map(|(k, v)| (*k, v.min(rows))).collect(),
            columns: self.columns.clone(),
        }
    }

    fn cap(&self, rows: f64) -> StatsInfo {
        if rows >= self.rows {
            return self.clone();
        }
        self.scale(if self.rows > 0.0 { rows / self.rows } else { 0.0 })
    }
}

/// Side tables for one optimization call.
#[derive(Debug, Default)]
pub struct PlanStats {
    stats: HashMap<usize, StatsInfo>,
    /// Scan statistics before pushed filters.
    base: HashMap<usize, StatsInfo>,
    orderings: HashMap<usize, Vec<Vec<ColumnId>>>,
}

impl PlanStats {
    pub fn derive(
        plan: &Arc<LogicalPlan>,
        provider: Option<&dyn StatsProvider>,
        factors: &CostFactors,
    ) -> Result<Self> {
        let mut out = PlanStats::default();
        out.derive_node(plan, provider, factors)?;
        debug!(nodes = out.stats.len(), "statistics derived");
        Ok(out)
    }

    pub fn stats(&self, plan: &LogicalPlan) -> Result<&StatsInfo> {
        self.stats
            .get(&node_key(plan))
            .ok_or_else(|| Error::Invariant(format!("no statistics for {} node", plan.name())))
    }

    /// Unfiltered statistics of a scan.
    pub fn base(&self, plan: &LogicalPlan) -> Result<&StatsInfo> {
        self.base
            .get(&node_key(plan))
            .ok_or_else(|| Error::Invariant(format!("no base statistics for {} node", plan.name())))
    }

    /// Column orders the node can produce without sorting.
    pub fn orderings(&self, plan: &LogicalPlan) -> &[Vec<ColumnId>] {
        self.orderings
            .get(&node_key(plan))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// True when some native ordering starts with `cols`.
    pub fn can_provide(&self, plan: &LogicalPlan, cols: &[ColumnId]) -> bool {
        !cols.is_empty()
            && self
                .orderings(plan)
                .iter()
                .any(|o| o.len() >= cols.len() && &o[..cols.len()] == cols)
    }

    fn derive_node(
        &mut self,
        plan: &Arc<LogicalPlan>,
        provider: Option<&dyn StatsProvider>,
        factors: &CostFactors,
    ) -> Result<()> {
        let key = node_key(plan);
        if self.stats.contains_key(&key) {
            return Ok(());
        }
        for child in plan.children() {
            self.derive_node(child, provider, factors)?;
        }

        let (info, orderings) = match plan.as_ref() {
            LogicalPlan::Scan(scan) => {
                let base = scan_stats(scan, provider, factors)?;
                let info = base.scale(selectivity(&scan.filters, &base, factors));
                self.base.insert(key, base);
                (info, scan_orderings(scan))
            }
            LogicalPlan::Selection { input, conditions } => {
                let child = self.stats(input)?;
                let info = child.scale(selectivity(conditions, child, factors));
                (info, self.orderings(input).to_vec())
            }
            LogicalPlan::Projection {
                input,
                exprs,
                schema,
            } => {
                let child = self.stats(input)?;
                let mut info = StatsInfo::pseudo(child.rows);
                let mut rename = HashMap::new();
                for (e, f) in exprs.iter().zip(schema.fields.iter()) {
                    match e.as_column() {
                        Some(c) => {
                            info.ndv.insert(f.id, child.ndv_of(c.id));
                            if let Some(cs) = child.columns.get(&c.id) {
                                info.columns.insert(f.id, cs.clone());
                            }
                            rename.insert(c.id, f.id);
                        }
                        None => {
                            info.ndv.insert(f.id, child.rows);
                        }
                    }
                }
                let orderings = self
                    .orderings(input)
                    .iter()
                    .map(|o| o.iter().map_while(|c| rename.get(c).copied()).collect::<Vec<_>>())
                    .filter(|o| !o.is_empty())
                    .collect();
                (info, orderings)
            }
            LogicalPlan::Join(join) => self.join_stats(join, factors)?,
            LogicalPlan::Aggregation(agg) => self.aggregation_stats(agg)?,
            LogicalPlan::Sort { input, by } => {
                let ordering: Vec<ColumnId> = by
                    .iter()
                    .map_while(|s| s.expr.as_column().map(|c| c.id))
                    .collect();
                let orderings = if ordering.is_empty() { vec![] } else { vec![ordering] };
                (self.stats(input)?.clone(), orderings)
            }
            LogicalPlan::Limit { input, count, .. } => {
                let info = self.stats(input)?.cap(*count as f64);
                (info, self.orderings(input).to_vec())
            }
            LogicalPlan::TopN { input, by, count, .. } => {
                let info = self.stats(input)?.cap(*count as f64);
                let ordering: Vec<ColumnId> = by
                    .iter()
                    .map_while(|s| s.expr.as_column().map(|c| c.id))
                    .collect();
                (info, if ordering.is_empty() { vec![] } else { vec![ordering] })
            }
            LogicalPlan::Apply(apply) => {
                let outer = self.stats(&apply.outer)?;
                let inner = self.stats(&apply.inner)?;
                let rows = match apply.join_type {
                    JoinType::Semi | JoinType::AntiSemi => outer.rows * factors.selection_factor,
                    _ if apply.inner.schema().max_one_row() => outer.rows,
                    JoinType::LeftOuter => (outer.rows * inner.rows).max(outer.rows),
                    _ => outer.rows * inner.rows.max(1.0),
                };
                let mut info = StatsInfo::pseudo(rows);
                for f in &apply.schema.fields {
                    let ndv = outer.ndv.get(&f.id).or_else(|| inner.ndv.get(&f.id)).copied();
                    info.ndv.insert(f.id, ndv.unwrap_or(rows).min(rows));
                }
                (info, vec![])
            }
        };
        trace!(node = plan.name(), rows = info.rows, "derived statistics");
        self.stats.insert(key, info);
        self.orderings.insert(key, orderings);
        Ok(())
    }

    fn join_stats(&self, join: &Join, factors: &CostFactors) -> Result<(StatsInfo, Vec<Vec<ColumnId>>)> {
        let l = self.stats(&join.left)?;
        let r = self.stats(&join.right)?;
        let rows = match join.join_type {
            JoinType::Semi | JoinType::AntiSemi => l.rows * factors.selection_factor,
            _ => {
                let mut rows = l.rows * r.rows;
                let max_ndv = join
                    .equal_conditions
                    .iter()
                    .map(|(lc, rc)| l.ndv_of(lc.id).max(r.ndv_of(rc.id)))
                    .fold(0.0_f64, f64::max);
                if max_ndv > 0.0 {
                    rows /= max_ndv;
                }
                let extra = join.other_conditions.len() + join.left_conditions.len() + join.right_conditions.len();
                rows *= factors.selection_factor.powi(extra as i32);
                match join.join_type {
                    JoinType::LeftOuter => rows.max(l.rows),
                    JoinType::RightOuter => rows.max(r.rows),
                    _ => rows,
                }
            }
        };
        let mut info = StatsInfo::pseudo(rows);
        for f in &join.schema.fields {
            let ndv = l.ndv.get(&f.id).or_else(|| r.ndv.get(&f.id)).copied();
            info.ndv.insert(f.id, ndv.unwrap_or(rows).min(rows));
            if let Some(cs) = l.columns.get(&f.id).or_else(|| r.columns.get(&f.id)) {
                info.columns.insert(f.id, cs.clone());
            }
        }

        // A merge join emits rows in the order of its join keys.
        let left_keys: Vec<ColumnId> = join.equal_conditions.iter().map(|(l, _)| l.id).collect();
        let right_keys: Vec<ColumnId> = join.equal_conditions.iter().map(|(_, r)| r.id).collect();
        let orderings = match join.join_type {
            _ if left_keys.is_empty() => vec![],
            JoinType::Inner => vec![left_keys, right_keys],
            JoinType::RightOuter => vec![right_keys],
            JoinType::LeftOuter | JoinType::Semi | JoinType::AntiSemi => vec![left_keys],
        };
        Ok((info, orderings))
    }

    fn aggregation_stats(&self, agg: &Aggregation) -> Result<(StatsInfo, Vec<Vec<ColumnId>>)> {
        let child = self.stats(&agg.input)?;
        let rows = if agg.group_by.is_empty() {
            1.0
        } else {
            let mut groups = 1.0_f64;
            for g in &agg.group_by {
                groups *= match g.as_column() {
                    Some(c) => child.ndv_of(c.id),
                    None => child.rows,
                };
            }
            groups.min(child.rows).max(1.0)
        };
        let mut info = StatsInfo::pseudo(rows);
        for (call, f) in agg.aggs.iter().zip(agg.schema.fields.iter()) {
            let ndv = match call.args.first().and_then(Expr::as_column) {
                Some(c) => child.ndv_of(c.id).min(rows),
                None => rows,
            };
            info.ndv.insert(f.id, ndv);
        }
        let orderings = match agg.group_output_ids() {
            Some(ids) if !ids.is_empty() => vec![ids],
            _ => vec![],
        };
        Ok((info, orderings))
    }
}

fn scan_stats(scan: &Scan, provider: Option<&dyn StatsProvider>, factors: &CostFactors) -> Result<StatsInfo> {
    let table_stats = match provider {
        Some(p) => p
            .table_stats(&scan.table)
            .map_err(|e| e.with_context(format!("statistics of {}", scan.table.qualified_name())))?,
        None => None,
    };
    let Some(ts) = table_stats else {
        trace!(table = %scan.table.qualified_name(), "using pseudo statistics");
        let rows = factors.pseudo_rows;
        let mut info = StatsInfo::pseudo(rows);
        for f in &scan.schema.fields {
            let unique = scan.table.pk_is_handle.as_deref() == Some(f.name.as_str());
            info.ndv.insert(f.id, if unique { rows } else { rows * factors.distinct_factor });
        }
        return Ok(info);
    };
    let mut info = StatsInfo::pseudo(ts.row_count.max(0.0));
    for f in &scan.schema.fields {
        info.ndv.insert(f.id, ts.distinct(&f.name).min(info.rows.max(1.0)));
        if let Some(cs) = ts.column(&f.name) {
            info.columns.insert(f.id, cs.clone());
        }
    }
    Ok(info)
}

/// Orders a scan reads in natively: the integer primary key and each
/// index's column prefix that the scan outputs.
pub(crate) fn scan_orderings(scan: &Scan) -> Vec<Vec<ColumnId>> {
    let id_of = |name: &str| scan.schema.fields.iter().find(|f| f.name == name).map(|f| f.id);
    let mut out = Vec::new();
    if let Some(pk) = scan.table.pk_is_handle.as_deref().and_then(id_of) {
        out.push(vec![pk]);
    }
    for index in &scan.table.indexes {
        let prefix: Vec<ColumnId> = index.columns.iter().map_while(|c| id_of(c)).collect();
        if !prefix.is_empty() {
            out.push(prefix);
        }
    }
    out
}
