//! Per-session state handed to the optimizer by its caller.

use std::collections::HashMap;
use std::sync::Arc;

use sqlopt_core::catalog::StatsProvider;
use sqlopt_core::privilege::PrivilegeManager;

/// Session context. `N` is the builder's input node type, used for
/// prepared statements.
pub struct SessionContext<N> {
    /// Database used for unqualified table names.
    pub current_db: String,
    prepared: HashMap<String, N>,
    privilege: Option<Arc<dyn PrivilegeManager>>,
    stats: Option<Arc<dyn StatsProvider>>,
}

impl<N> SessionContext<N> {
    pub fn new(current_db: impl Into<String>) -> Self {
        Self {
            current_db: current_db.into(),
            prepared: HashMap::new(),
            privilege: None,
            stats: None,
        }
    }

    pub fn with_privilege_manager(mut self, pm: Arc<dyn PrivilegeManager>) -> Self {
        self.privilege = Some(pm);
        self
    }

    pub fn with_stats_provider(mut self, stats: Arc<dyn StatsProvider>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn prepare(&mut self, name: impl Into<String>, node: N) {
        self.prepared.insert(name.into(), node);
    }

    pub fn prepared(&self, name: &str) -> Option<&N> {
        self.prepared.get(name)
    }

    pub fn privilege_manager(&self) -> Option<&dyn PrivilegeManager> {
        self.privilege.as_deref()
    }

    pub fn stats_provider(&self) -> Option<&dyn StatsProvider> {
        self.stats.as_deref()
    }
}
