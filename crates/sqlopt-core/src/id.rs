//! Strongly typed identifiers.
//!
//! `ColumnId`s are assigned by the plan builder and are unique within one
//! plan; expressions reference columns through them. `PlanId`s number the
//! nodes of a finalized physical plan and restart at 1 for every call.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

define_id!(
    /// Identity of an output column.
    ColumnId,
    "#"
);
define_id!(
    /// Identity of a physical plan node.
    PlanId,
    "op"
);

/// Monotonic generator for fresh column ids.
///
/// Rules seed it from the largest id already present in their input tree,
/// which keeps them free of shared state.
#[derive(Debug, Clone)]
pub struct ColumnIdGen {
    next: u64,
}

impl ColumnIdGen {
    /// Start allocating right after `max_used`.
    pub fn after(max_used: ColumnId) -> Self {
        Self {
            next: max_used.get() + 1,
        }
    }

    pub fn starting_at(first: u64) -> Self {
        Self { next: first.max(1) }
    }

    pub fn next_id(&mut self) -> ColumnId {
        let id = ColumnId::new(self.next);
        self.next += 1;
        id
    }
}
