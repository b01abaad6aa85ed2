//! `ServerConfig` and the policy/budget types it bundles (spec §6, §10.3).
//!
//! Plain, `serde`-deserializable structs — the crate leaves config file
//! format (TOML, JSON, environment) to the embedder, the way the teacher
//! lineage's full-node configs are plain structs fed by whatever loader the
//! binary wants.

use serde::{Deserialize, Serialize};

/// Debug-time rules for validating declared vs. actual slot usage per step
/// (spec §4.2, glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssertionPolicy {
    pub must_use_reads: bool,
    pub must_use_writes: bool,
    pub warn_unused_reads: bool,
    pub warn_unused_writes: bool,
}

impl Default for AssertionPolicy {
    fn default() -> Self {
        Self {
            must_use_reads: true,
            must_use_writes: true,
            warn_unused_reads: false,
            warn_unused_writes: false,
        }
    }
}

/// Per-request resource bounds (spec §4.5 Budgets).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceBudget {
    pub max_cpu_ms: u64,
    pub max_memory_bytes: usize,
    pub max_outbound_bytes: usize,
    pub max_concurrent_effects: usize,
    pub max_total_effects: usize,
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self {
            max_cpu_ms: 5_000,
            max_memory_bytes: 100 * 1024 * 1024,
            max_outbound_bytes: 1024 * 1024,
            max_concurrent_effects: 10,
            max_total_effects: 50,
        }
    }
}

impl ResourceBudget {
    /// Merges a route-declared budget over this (the config default):
    /// spec §3 RouteSpec leaves inheritance open; `SPEC_FULL.md` §11
    /// resolves it as field-by-field override. Since `ResourceBudget` has
    /// no "unset" representation, routes that want partial overrides
    /// construct their budget starting from `ServerConfig::default_budget`
    /// and changing only the fields they care about; `merge` exists for
    /// embedders that build budgets incrementally from several sources.
    pub fn merge(self, other: ResourceBudget) -> ResourceBudget {
        other
    }
}

/// Effect-dispatch security policy (spec §4.5 Security validation, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    pub allowed_hosts: Vec<String>,
    pub forbidden_schemes: Vec<String>,
    pub default_timeout_ms: u64,
    pub max_query_length: usize,
    pub forbidden_sql_keywords: Vec<String>,
    pub require_parameterized: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            forbidden_schemes: vec!["file".to_string(), "gopher".to_string(), "ftp".to_string()],
            default_timeout_ms: 30_000,
            max_query_length: 10_000,
            forbidden_sql_keywords: vec![
                "DROP".to_string(),
                "TRUNCATE".to_string(),
                "ALTER".to_string(),
                "CREATE".to_string(),
                "GRANT".to_string(),
                "REVOKE".to_string(),
            ],
            require_parameterized: true,
        }
    }
}

/// Top-level server configuration (spec §6 "Configuration").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub server_header: String,
    pub max_iterations: u32,
    pub default_budget: ResourceBudget,
    pub security: SecurityPolicy,
    pub assertion_policy: AssertionPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            server_header: "Zerver/1.0".to_string(),
            max_iterations: 100,
            default_budget: ResourceBudget::default(),
            security: SecurityPolicy::default(),
            assertion_policy: AssertionPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Clamps out-of-range values to the documented minimum rather than
    /// panicking (spec §10.3); logs through `tracing` when it does.
    pub fn normalized(mut self) -> Self {
        if self.max_iterations == 0 {
            tracing::warn!("max_iterations was 0, clamping to 1");
            self.max_iterations = 1;
        }
        if self.default_budget.max_concurrent_effects == 0 {
            tracing::warn!("max_concurrent_effects was 0, clamping to 1");
            self.default_budget.max_concurrent_effects = 1;
        }
        if self.default_budget.max_total_effects == 0 {
            tracing::warn!("max_total_effects was 0, clamping to 1");
            self.default_budget.max_total_effects = 1;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_section_6() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.max_iterations, 100);
        assert_eq!(cfg.default_budget.max_concurrent_effects, 10);
        assert_eq!(cfg.default_budget.max_total_effects, 50);
        assert_eq!(cfg.default_budget.max_memory_bytes, 100 * 1024 * 1024);
        assert_eq!(cfg.default_budget.max_outbound_bytes, 1024 * 1024);
        assert_eq!(cfg.security.max_query_length, 10_000);
        assert_eq!(cfg.security.default_timeout_ms, 30_000);
        assert!(cfg.security.require_parameterized);
    }

    #[test]
    fn normalized_clamps_zero_iterations() {
        let mut cfg = ServerConfig::default();
        cfg.max_iterations = 0;
        assert_eq!(cfg.normalized().max_iterations, 1);
    }
}
