//! Optimizer configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

bitflags::bitflags! {
    /// Selects the logical rules to run. Bit *i* enables the *i*-th rule of
    /// the catalog; rules always run in catalog order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct RuleFlags: u8 {
        const PRUNE_COLUMNS = 1 << 0;
        const ELIMINATE_PROJECTION = 1 << 1;
        const BUILD_KEY_INFO = 1 << 2;
        const DECORRELATE = 1 << 3;
        const MAX_MIN_ELIMINATE = 1 << 4;
        const PREDICATE_PUSH_DOWN = 1 << 5;
        const AGGREGATION_OPTIMIZE = 1 << 6;
        const PUSH_DOWN_TOP_N = 1 << 7;
    }
}

impl RuleFlags {
    /// Parse a mask written in decimal, `0x` hex or `0b` binary.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u8::from_str_radix(hex, 16)
        } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
            u8::from_str_radix(bin, 2)
        } else {
            s.parse::<u8>()
        };
        parsed
            .map(RuleFlags::from_bits_retain)
            .map_err(|e| Error::Config(format!("invalid rule flag mask {:?}: {}", s, e)))
    }
}

/// Read-only settings shared by concurrent optimizations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// When false, joins without equality conditions are rejected.
    #[serde(default = "default_allow_cartesian")]
    pub allow_cartesian_product: bool,
    /// Overrides the rule flags chosen by the plan builder.
    #[serde(default)]
    pub rule_flags: Option<RuleFlags>,
}

fn default_allow_cartesian() -> bool {
    true
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            allow_cartesian_product: true,
            rule_flags: None,
        }
    }
}

impl OptimizerConfig {
    pub fn with_allow_cartesian_product(mut self, allow: bool) -> Self {
        self.allow_cartesian_product = allow;
        self
    }

    pub fn with_rule_flags(mut self, flags: RuleFlags) -> Self {
        self.rule_flags = Some(flags);
        self
    }

    /// Defaults overridden by `SQLOPT_ALLOW_CARTESIAN` and
    /// `SQLOPT_RULE_FLAGS`.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("SQLOPT_ALLOW_CARTESIAN") {
            cfg.allow_cartesian_product = parse_bool(&v)?;
        }
        if let Ok(v) = std::env::var("SQLOPT_RULE_FLAGS") {
            cfg.rule_flags = Some(RuleFlags::parse(&v)?);
        }
        Ok(cfg)
    }
}

fn parse_bool(v: &str) -> Result<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!(
            "SQLOPT_ALLOW_CARTESIAN expects a boolean, got {:?}",
            other
        ))),
    }
}
