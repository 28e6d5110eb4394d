//! Process-wide engine configuration. Constructed once
//! per process alongside the store collaborators; not a file-watching
//! configuration service — the core has no RPC perimeter of its own to
//! configure.

use std::collections::HashMap;

use crate::engine::ConcurrencyMode;
use crate::ledger::DEFAULT_LIST_LIMIT;
use crate::ledger::MAX_LIST_LIMIT;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Concurrency mode used by `execute` when the caller does not pass one.
    pub default_mode: ConcurrencyMode,
    /// Overdraft limit applied to lazily-created real wallets.
    pub default_overdraft_limit: i64,
    /// `currency -> initial balance` seed table for demo account creation.
    pub demo_currency_seed: HashMap<String, i64>,
    pub ledger_page_size_default: usize,
    pub ledger_page_size_max: usize,
    /// System account number prefixes, keyed by purpose.
    pub system_account_prefixes: SystemAccountPrefixes,
}

#[derive(Debug, Clone)]
pub struct SystemAccountPrefixes {
    pub liquidity: &'static str,
    pub fees: &'static str,
    pub clearing: &'static str,
    pub settlement: &'static str,
}

impl Default for SystemAccountPrefixes {
    fn default() -> Self {
        Self {
            liquidity: "LIQ",
            fees: "FEE",
            clearing: "CLR",
            settlement: "SET",
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_mode: ConcurrencyMode::Pessimistic,
            default_overdraft_limit: 0,
            demo_currency_seed: HashMap::from([
                ("USD".to_string(), 10_000_00),
                ("EUR".to_string(), 9_000_00),
            ]),
            ledger_page_size_default: DEFAULT_LIST_LIMIT,
            ledger_page_size_max: MAX_LIST_LIMIT,
            system_account_prefixes: SystemAccountPrefixes::default(),
        }
    }
}
