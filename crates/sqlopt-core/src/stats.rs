//! Table and column statistics for cost estimation.
//!
//! Tracks min, max, null_count, distinct_count and total_count per column.
//! Statistics are supplied by a `StatsProvider`; the planner falls back to
//! pseudo statistics when none are available.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::expr::BinOp;
use crate::types::{scalar_cmp, Scalar};

/// Statistics for a single column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    /// Minimum value observed (None if no non-null values)
    #[serde(default)]
    pub min: Option<Scalar>,
    /// Maximum value observed (None if no non-null values)
    #[serde(default)]
    pub max: Option<Scalar>,
    /// Number of null values
    #[serde(default)]
    pub null_count: u64,
    /// Estimated distinct count (None if not computed)
    #[serde(default)]
    pub distinct_count: Option<u64>,
    /// Total number of values (including nulls)
    #[serde(default)]
    pub total_count: u64,
}

impl ColumnStats {
    pub fn new() -> Self {
        Self {
            min: None,
            max: None,
            null_count: 0,
            distinct_count: None,
            total_count: 0,
        }
    }

    /// Update statistics with a new value.
    pub fn update(&mut self, value: &Scalar) {
        self.total_count += 1;
        match value {
            Scalar::Null => self.null_count += 1,
            val => {
                match &mut self.min {
                    Some(min) if scalar_cmp(val, min).is_lt() => *min = val.clone(),
                    Some(_) => {}
                    None => self.min = Some(val.clone()),
                }
                match &mut self.max {
                    Some(max) if scalar_cmp(val, max).is_gt() => *max = val.clone(),
                    Some(_) => {}
                    None => self.max = Some(val.clone()),
                }
            }
        }
    }

    /// Get the number of non-null values.
    pub fn non_null_count(&self) -> u64 {
        self.total_count.saturating_sub(self.null_count)
    }

    /// Fraction of rows that are not NULL; 1.0 when nothing is known.
    pub fn not_null_fraction(&self) -> f64 {
        if self.total_count == 0 {
            1.0
        } else {
            self.non_null_count() as f64 / self.total_count as f64
        }
    }

    /// Estimate selectivity for a range predicate (min <= value <= max).
    ///
    /// Numeric bounds interpolate linearly between the observed min and max;
    /// other types fall back to fixed fractions.
    pub fn estimate_range_selectivity(
        &self,
        min_val: Option<&Scalar>,
        max_val: Option<&Scalar>,
    ) -> f64 {
        if self.total_count > 0 && self.non_null_count() == 0 {
            return 0.0;
        }
        let (lo, hi) = match (&self.min, &self.max) {
            (Some(lo), Some(hi)) => (lo, hi),
            _ => {
                return match (min_val, max_val) {
                    (Some(_), Some(_)) => 0.25,
                    (None, None) => 1.0,
                    _ => 1.0 / 3.0,
                }
            }
        };

        if let Some(min) = min_val {
            if scalar_cmp(min, hi).is_gt() {
                return 0.0;
            }
        }
        if let Some(max) = max_val {
            if scalar_cmp(max, lo).is_lt() {
                return 0.0;
            }
        }

        match (lo.as_f64(), hi.as_f64()) {
            (Some(lo_f), Some(hi_f)) if hi_f > lo_f => {
                let from = min_val.and_then(Scalar::as_f64).unwrap_or(lo_f).max(lo_f);
                let to = max_val.and_then(Scalar::as_f64).unwrap_or(hi_f).min(hi_f);
                ((to - from) / (hi_f - lo_f)).clamp(0.0, 1.0) * self.not_null_fraction()
            }
            _ => match (min_val, max_val) {
                (Some(_), Some(_)) => 0.3,
                (None, None) => 1.0,
                _ => 0.5,
            },
        }
    }

    /// Estimate selectivity for an equality predicate.
    ///
    /// Uses distinct_count if available, otherwise returns a conservative estimate.
    pub fn estimate_equality_selectivity(&self) -> f64 {
        if self.total_count > 0 && self.non_null_count() == 0 {
            return 0.0;
        }
        match self.distinct_count {
            Some(distinct) if distinct > 0 => 1.0 / (distinct as f64),
            _ => 0.01,
        }
    }

    /// Selectivity of `col OP value`.
    pub fn estimate_comparison_selectivity(&self, op: BinOp, value: &Scalar) -> f64 {
        match op {
            BinOp::Eq => self.estimate_equality_selectivity(),
            BinOp::Ne => 1.0 - self.estimate_equality_selectivity(),
            BinOp::Lt | BinOp::Le => self.estimate_range_selectivity(None, Some(value)),
            BinOp::Gt | BinOp::Ge => self.estimate_range_selectivity(Some(value), None),
            _ => 0.8,
        }
    }
}

impl Default for ColumnStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics for one table, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableStats {
    pub row_count: f64,
    #[serde(default)]
    pub columns: HashMap<String, ColumnStats>,
}

impl TableStats {
    pub fn new(row_count: f64) -> Self {
        Self {
            row_count,
            columns: HashMap::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, stats: ColumnStats) -> Self {
        self.columns.insert(name.into(), stats);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnStats> {
        self.columns.get(name)
    }

    /// Distinct count of a column, defaulting to the row count.
    pub fn distinct(&self, name: &str) -> f64 {
        self.columns
            .get(name)
            .and_then(|c| c.distinct_count)
            .map(|d| d as f64)
            .unwrap_or(self.row_count)
            .max(1.0)
    }
}
