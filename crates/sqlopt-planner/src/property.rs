//! Required physical properties.
//!
//! A parent asks a child for a task satisfying a [`RequiredProperty`]:
//! where the task runs, how many rows the parent expects to consume, and
//! the order the rows must arrive in. Properties are values; every
//! refinement returns a new one.

use std::fmt;
use std::hash::{Hash, Hasher};

use sqlopt_core::expr::{ColumnRef, Expr, SortItem};
use sqlopt_core::id::ColumnId;
use sqlopt_core::physical::TaskType;

/// One ordering column. Compared by column id and direction.
#[derive(Debug, Clone)]
pub struct PropItem {
    pub col: ColumnRef,
    pub desc: bool,
}

impl PartialEq for PropItem {
    fn eq(&self, other: &Self) -> bool {
        self.col.id == other.col.id && self.desc == other.desc
    }
}

impl Eq for PropItem {}

impl Hash for PropItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.col.id.hash(state);
        self.desc.hash(state);
    }
}

/// Sort items as ordering columns; `None` if one of them is not a bare
/// column.
pub fn items_from_sort(by: &[SortItem]) -> Option<Vec<PropItem>> {
    by.iter()
        .map(|s| {
            s.expr.as_column().map(|c| PropItem {
                col: c.clone(),
                desc: s.desc,
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct RequiredProperty {
    pub task_type: TaskType,
    /// Rows the consumer will pull; `f64::MAX` when it reads everything.
    pub expected_count: f64,
    pub items: Vec<PropItem>,
}

impl PartialEq for RequiredProperty {
    fn eq(&self, other: &Self) -> bool {
        self.task_type == other.task_type
            && self.expected_count.to_bits() == other.expected_count.to_bits()
            && self.items == other.items
    }
}

impl Eq for RequiredProperty {}

impl Hash for RequiredProperty {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.task_type.hash(state);
        self.expected_count.to_bits().hash(state);
        self.items.hash(state);
    }
}

impl RequiredProperty {
    /// What the driver asks of the plan root.
    pub fn root() -> Self {
        Self {
            task_type: TaskType::Root,
            expected_count: f64::MAX,
            items: Vec::new(),
        }
    }

    pub fn with_task(&self, task_type: TaskType) -> Self {
        Self {
            task_type,
            ..self.clone()
        }
    }

    pub fn with_count(&self, expected_count: f64) -> Self {
        Self {
            expected_count,
            ..self.clone()
        }
    }

    pub fn with_items(&self, items: Vec<PropItem>) -> Self {
        Self {
            items,
            ..self.clone()
        }
    }

    /// Same task type, no order, all rows.
    pub fn unordered(&self) -> Self {
        Self {
            task_type: self.task_type,
            expected_count: f64::MAX,
            items: Vec::new(),
        }
    }

    pub fn is_ordered(&self) -> bool {
        !self.items.is_empty()
    }

    /// True when every item sorts in the same direction, which is all a
    /// single ordered read can deliver.
    pub fn single_direction(&self) -> bool {
        self.items.windows(2).all(|w| w[0].desc == w[1].desc)
    }

    /// Direction of the first item.
    pub fn desc(&self) -> bool {
        self.items.first().map(|i| i.desc).unwrap_or(false)
    }

    /// True when `cols` (a native ordering) starts with the required
    /// columns. Direction is checked separately.
    pub fn is_prefix_of(&self, cols: &[ColumnId]) -> bool {
        self.items.len() <= cols.len() && self.items.iter().zip(cols).all(|(i, c)| i.col.id == *c)
    }

    pub fn ids(&self) -> Vec<ColumnId> {
        self.items.iter().map(|i| i.col.id).collect()
    }

    pub fn sort_items(&self) -> Vec<SortItem> {
        self.items
            .iter()
            .map(|i| SortItem::new(Expr::Column(i.col.clone()), i.desc))
            .collect()
    }
}

impl fmt::Display for RequiredProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self
            .items
            .iter()
            .map(|i| format!("{}{}", i.col, if i.desc { " desc" } else { "" }))
            .collect();
        write!(f, "{{{} [{}]", self.task_type.name(), items.join(", "))?;
        if self.expected_count < f64::MAX {
            write!(f, " count:{}", self.expected_count)?;
        }
        write!(f, "}}")
    }
}
