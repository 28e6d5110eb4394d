#![deny(clippy::print_stdout, clippy::print_stderr)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! Persistence model for the transaction engine: accounts, cached balances,
//! the append-only journal/ledger, FX rates and fee rows. Each store is a
//! narrow async trait plus an in-memory implementation; a `postgres-store`
//! feature adds stub types that document the real schema (see each store's
//! module doc) without pulling in a database driver.

mod account;
mod balance;
mod config;
mod engine;
mod facade;
mod fee;
mod fx;
mod journal;
mod ledger;

#[cfg(feature = "postgres-store")]
mod postgres;

pub use account::Account;
pub use account::AccountError;
pub use account::AccountStore;
pub use account::InMemoryAccountStore;
pub use account::Purpose;

pub use balance::Balance;
pub use balance::BalanceError;
pub use balance::BalanceLockGuard;
pub use balance::BalanceStore;
pub use balance::BalanceUpdate;
pub use balance::InMemoryBalanceStore;

pub use config::EngineConfig;
pub use config::SystemAccountPrefixes;

pub use engine::ConcurrencyMode;
pub use engine::Engine;
pub use engine::EngineError;
pub use engine::EngineResult;
pub use engine::ExecutionResult;
pub use engine::FeeRuleEngine;
pub use engine::TransactionEntry;
pub use engine::TransactionRequest;
pub use engine::convert_amount;
pub use engine::round_half_up;

pub use facade::LedgerFacade;
pub use facade::RequestContext;

pub use fee::FeeError;
pub use fee::FeeRow;
pub use fee::FeeStore;
pub use fee::FeeType;
pub use fee::InMemoryFeeStore;

pub use fx::FxError;
pub use fx::FxRate;
pub use fx::FxStore;
pub use fx::InMemoryFxStore;

pub use journal::InMemoryJournalStore;
pub use journal::Journal;
pub use journal::JournalError;
pub use journal::JournalStore;
pub use journal::TransactionType;

pub use ledger::DrCr;
pub use ledger::InMemoryLedgerStore;
pub use ledger::LedgerError;
pub use ledger::LedgerPosting;
pub use ledger::LedgerStore;
pub use ledger::NewPosting;

#[cfg(feature = "postgres-store")]
pub use postgres::PostgresAccountStore;
#[cfg(feature = "postgres-store")]
pub use postgres::PostgresBalanceStore;
#[cfg(feature = "postgres-store")]
pub use postgres::PostgresFeeStore;
#[cfg(feature = "postgres-store")]
pub use postgres::PostgresFxStore;
#[cfg(feature = "postgres-store")]
pub use postgres::PostgresJournalStore;
#[cfg(feature = "postgres-store")]
pub use postgres::PostgresLedgerStore;

pub type AccountId = i64;
pub type JournalId = i64;
pub type LedgerId = i64;
pub type FxRateId = i64;
pub type FeeId = i64;

/// Who an account is held on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    User,
    Partner,
    Agent,
    System,
}

impl std::fmt::Display for OwnerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OwnerType::User => "user",
            OwnerType::Partner => "partner",
            OwnerType::Agent => "agent",
            OwnerType::System => "system",
        };
        f.write_str(s)
    }
}

/// Real money vs. a demo/paper-trading book. Uniform across every entry in
/// one journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Real,
    Demo,
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AccountType::Real => "real",
            AccountType::Demo => "demo",
        };
        f.write_str(s)
    }
}
