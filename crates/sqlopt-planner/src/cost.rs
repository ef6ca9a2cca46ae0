//! Cost model constants and selectivity estimation.
//!
//! Costs are unitless. Reading rows is charged per byte (scan factor),
//! shipping rows out of the co-processor per byte (network factor) and
//! operator work per row (cpu factors). Selectivities use column
//! statistics when they exist and fixed fractions otherwise.

use serde::{Deserialize, Serialize};

use sqlopt_core::expr::{BinOp, Expr, UnaryOp};
use sqlopt_core::schema::Schema;

use crate::stats::StatsInfo;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostFactors {
    /// Per-row work in the SQL layer.
    pub cpu: f64,
    /// Per-row work in the co-processor.
    pub cop_cpu: f64,
    /// Per byte shipped from co-processor to root.
    pub network: f64,
    /// Per byte read in storage order.
    pub scan: f64,
    /// Per byte read in reverse storage order.
    pub desc_scan: f64,
    /// Per row kept in memory (hash tables, sort buffers).
    pub memory: f64,
    /// Per row looked up in the table after an index read.
    pub lookup: f64,
    /// Fallback selectivity of a condition without usable statistics.
    pub selection_factor: f64,
    /// Fallback distinct fraction of a column without statistics.
    pub distinct_factor: f64,
    /// Row count assumed for tables without statistics.
    pub pseudo_rows: f64,
}

impl Default for CostFactors {
    fn default() -> Self {
        Self {
            cpu: 3.0,
            cop_cpu: 3.0,
            network: 1.0,
            scan: 1.5,
            desc_scan: 3.0,
            memory: 0.001,
            lookup: 10.0,
            selection_factor: 0.8,
            distinct_factor: 0.8,
            pseudo_rows: 10_000.0,
        }
    }
}

impl CostFactors {
    pub fn scan_factor(&self, desc: bool) -> f64 {
        if desc {
            self.desc_scan
        } else {
            self.scan
        }
    }

    /// Comparison-based sort of `rows` rows.
    pub fn sort_cost(&self, rows: f64) -> f64 {
        let rows = rows.max(1.0);
        rows * rows.log2().max(1.0) * self.cpu + rows * self.memory
    }

    /// Bounded heap over `rows` input rows keeping `keep` of them.
    pub fn topn_cost(&self, rows: f64, keep: f64) -> f64 {
        let keep = keep.max(2.0);
        rows.max(1.0) * keep.log2() * self.cpu + keep * self.memory
    }
}

/// Bytes per row of `schema`.
pub fn row_width(schema: &Schema) -> f64 {
    schema.fields.iter().map(|f| f.data_type.width()).sum::<f64>().max(1.0)
}

/// Combined selectivity of a conjunction of `conds` over an input
/// described by `stats`. Conjuncts are treated as independent.
pub fn selectivity(conds: &[Expr], stats: &StatsInfo, factors: &CostFactors) -> f64 {
    let mut sel = 1.0;
    for cond in conds {
        for conjunct in cond.clone().split_conjunction() {
            sel *= conjunct_selectivity(&conjunct, stats, factors);
        }
    }
    sel.clamp(0.0, 1.0)
}

fn conjunct_selectivity(cond: &Expr, stats: &StatsInfo, factors: &CostFactors) -> f64 {
    if let Some((col, op, value)) = cond.as_column_comparison() {
        if let Some(cs) = stats.columns.get(&col.id) {
            return cs.estimate_comparison_selectivity(op, value);
        }
        if op == BinOp::Eq {
            if let Some(ndv) = stats.ndv.get(&col.id) {
                return 1.0 / ndv.max(1.0);
            }
        }
        return factors.selection_factor;
    }
    if let Expr::UnaryOp { op, arg } = cond {
        if let Some(col) = arg.as_column() {
            let not_null = stats
                .columns
                .get(&col.id)
                .map(|cs| cs.not_null_fraction());
            match (op, not_null) {
                (UnaryOp::IsNull, Some(f)) => return 1.0 - f,
                (UnaryOp::IsNotNull, Some(f)) => return f,
                _ => {}
            }
        }
    }
    factors.selection_factor
}
