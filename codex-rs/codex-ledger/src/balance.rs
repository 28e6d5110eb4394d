//! Balance Store: cached running balance, available/pending split,
//! versioning, pessimistic and optimistic update paths.
//!
//! Real deployment schema (contract):
//! ```sql
//! CREATE TABLE balances (
//!     account_id BIGINT PRIMARY KEY REFERENCES accounts(id),
//!     balance BIGINT NOT NULL DEFAULT 0,
//!     available_balance BIGINT NOT NULL DEFAULT 0,
//!     pending_debit BIGINT NOT NULL DEFAULT 0,
//!     pending_credit BIGINT NOT NULL DEFAULT 0,
//!     last_ledger_id BIGINT,
//!     version BIGINT NOT NULL DEFAULT 0,
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! ```
//!
//! "The database" here is process memory: a single `tokio::sync::Mutex`
//! guarding the balance table, plus a separate per-account lock table of
//! `Arc<tokio::sync::Mutex<()>>` used only to model row locks for the
//! pessimistic concurrency mode (see [`BalanceStore::lock_account`]). The
//! two are independent mutexes on purpose — `update_balance` never takes
//! the row lock itself, so it is safe to call while the orchestrator is
//! already holding one from a prior `get_by_account_id_with_lock`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::AccountId;
use crate::LedgerId;

#[derive(Debug, Clone, PartialEq)]
pub struct Balance {
    pub account_id: AccountId,
    pub balance: i64,
    pub available_balance: i64,
    pub pending_debit: i64,
    pub pending_credit: i64,
    pub last_ledger_id: Option<LedgerId>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    fn zero(account_id: AccountId) -> Self {
        Self {
            account_id,
            balance: 0,
            available_balance: 0,
            pending_debit: 0,
            pending_credit: 0,
            last_ledger_id: None,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    fn recompute_available(&mut self) {
        self.available_balance = self.balance - self.pending_debit + self.pending_credit;
    }
}

/// A posted delta to apply to `balance` (and therefore `available_balance`).
#[derive(Debug, Clone, Copy)]
pub struct BalanceUpdate {
    pub account_id: AccountId,
    /// Signed minor-unit delta: positive for a credit, negative for a debit.
    pub delta: i64,
    pub overdraft_limit: i64,
    pub ledger_id: LedgerId,
}

#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    #[error("balance not found for account {0}")]
    NotFound(AccountId),
    #[error("insufficient balance for account {account_id}: need {needed}, have {available}")]
    InsufficientFunds {
        account_id: AccountId,
        needed: i64,
        available: i64,
    },
    #[error("version mismatch for account {account_id}: expected {expected}, found {found}")]
    VersionMismatch {
        account_id: AccountId,
        expected: u64,
        found: u64,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

pub type BalanceResult<T> = Result<T, BalanceError>;

/// RAII row lock used by pessimistic-mode callers. Dropping it releases the
/// per-account lock acquired via [`BalanceStore::lock_account`].
pub struct BalanceLockGuard(#[allow(dead_code)] OwnedMutexGuard<()>);

#[async_trait]
pub trait BalanceStore: Send + Sync {
    async fn get_by_account_id(&self, id: AccountId) -> BalanceResult<Balance>;
    async fn get_by_account_id_with_lock(
        &self,
        id: AccountId,
    ) -> BalanceResult<(Balance, BalanceLockGuard)>;
    async fn lock_account(&self, id: AccountId) -> BalanceLockGuard;
    async fn get_multiple_by_account_ids(
        &self,
        ids: &[AccountId],
    ) -> BalanceResult<HashMap<AccountId, Balance>>;
    async fn update_balance(&self, update: BalanceUpdate) -> BalanceResult<Balance>;
    async fn update_balance_batch(
        &self,
        updates: Vec<BalanceUpdate>,
    ) -> BalanceResult<Vec<Balance>>;
    async fn update_balance_optimistic(
        &self,
        update: BalanceUpdate,
        expected_version: u64,
    ) -> BalanceResult<Balance>;
    /// Verifies every `(update, expected_version)` pair against the *current*
    /// state and applies all of them, or applies none: the orchestrator's
    /// optimistic commit phase for a whole journal. Pairs are applied in
    /// order against a local working copy before anything is written back,
    /// so repeated entries against the same account chain correctly (the
    /// second entry's `expected_version` is the version produced by the
    /// first) without the first entry's write being observable if a later
    /// entry in the same batch fails its version check.
    async fn update_balance_optimistic_batch(
        &self,
        updates: Vec<(BalanceUpdate, u64)>,
    ) -> BalanceResult<Vec<Balance>>;
    async fn reserve_funds(&self, id: AccountId, amount: i64) -> BalanceResult<Balance>;
    async fn release_funds(
        &self,
        id: AccountId,
        amount: i64,
        complete: bool,
    ) -> BalanceResult<Balance>;
    async fn ensure_balance_exists(&self, id: AccountId) -> BalanceResult<()>;
    async fn seed_demo_balance(&self, id: AccountId, initial_balance: i64) -> BalanceResult<()>;
}

#[derive(Default)]
pub struct InMemoryBalanceStore {
    state: Mutex<HashMap<AccountId, Balance>>,
    row_locks: Mutex<HashMap<AccountId, Arc<Mutex<()>>>>,
}

impl InMemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_overdraft(account_id: AccountId, available: i64, overdraft_limit: i64) -> BalanceResult<()> {
        if available + overdraft_limit < 0 {
            return Err(BalanceError::InsufficientFunds {
                account_id,
                needed: -available,
                available: available + overdraft_limit,
            });
        }
        Ok(())
    }

    fn apply(balance: &mut Balance, update: &BalanceUpdate) -> BalanceResult<()> {
        balance.balance += update.delta;
        balance.recompute_available();
        Self::check_overdraft(balance.account_id, balance.available_balance, update.overdraft_limit)?;
        balance.last_ledger_id = Some(update.ledger_id);
        balance.version += 1;
        balance.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl BalanceStore for InMemoryBalanceStore {
    async fn get_by_account_id(&self, id: AccountId) -> BalanceResult<Balance> {
        let state = self.state.lock().await;
        state.get(&id).cloned().ok_or(BalanceError::NotFound(id))
    }

    async fn get_by_account_id_with_lock(
        &self,
        id: AccountId,
    ) -> BalanceResult<(Balance, BalanceLockGuard)> {
        let guard = self.lock_account(id).await;
        let balance = self.get_by_account_id(id).await?;
        Ok((balance, guard))
    }

    async fn lock_account(&self, id: AccountId) -> BalanceLockGuard {
        let mutex = {
            let mut locks = self.row_locks.lock().await;
            Arc::clone(locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        BalanceLockGuard(mutex.lock_owned().await)
    }

    async fn get_multiple_by_account_ids(
        &self,
        ids: &[AccountId],
    ) -> BalanceResult<HashMap<AccountId, Balance>> {
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.get(id).map(|b| (*id, b.clone())))
            .collect())
    }

    async fn update_balance(&self, update: BalanceUpdate) -> BalanceResult<Balance> {
        let mut state = self.state.lock().await;
        let balance = state
            .get_mut(&update.account_id)
            .ok_or(BalanceError::NotFound(update.account_id))?;
        Self::apply(balance, &update)?;
        Ok(balance.clone())
    }

    async fn update_balance_batch(
        &self,
        updates: Vec<BalanceUpdate>,
    ) -> BalanceResult<Vec<Balance>> {
        let mut state = self.state.lock().await;
        let mut results = Vec::with_capacity(updates.len());
        for update in updates {
            let balance = state
                .get_mut(&update.account_id)
                .ok_or(BalanceError::NotFound(update.account_id))?;
            Self::apply(balance, &update)?;
            results.push(balance.clone());
        }
        Ok(results)
    }

    async fn update_balance_optimistic(
        &self,
        update: BalanceUpdate,
        expected_version: u64,
    ) -> BalanceResult<Balance> {
        let mut state = self.state.lock().await;
        let balance = state
            .get_mut(&update.account_id)
            .ok_or(BalanceError::NotFound(update.account_id))?;
        if balance.version != expected_version {
            return Err(BalanceError::VersionMismatch {
                account_id: update.account_id,
                expected: expected_version,
                found: balance.version,
            });
        }
        Self::apply(balance, &update)?;
        Ok(balance.clone())
    }

    async fn update_balance_optimistic_batch(
        &self,
        updates: Vec<(BalanceUpdate, u64)>,
    ) -> BalanceResult<Vec<Balance>> {
        let mut state = self.state.lock().await;
        let mut working: HashMap<AccountId, Balance> = HashMap::new();
        let mut results = Vec::with_capacity(updates.len());
        for (update, expected_version) in &updates {
            let current = match working.get(&update.account_id) {
                Some(b) => b.clone(),
                None => state
                    .get(&update.account_id)
                    .cloned()
                    .ok_or(BalanceError::NotFound(update.account_id))?,
            };
            if current.version != *expected_version {
                return Err(BalanceError::VersionMismatch {
                    account_id: update.account_id,
                    expected: *expected_version,
                    found: current.version,
                });
            }
            let mut next = current;
            Self::apply(&mut next, update)?;
            working.insert(update.account_id, next.clone());
            results.push(next);
        }
        // Every pair validated against its chained expected version; commit.
        for (account_id, balance) in working {
            state.insert(account_id, balance);
        }
        Ok(results)
    }

    async fn reserve_funds(&self, id: AccountId, amount: i64) -> BalanceResult<Balance> {
        let _guard = self.lock_account(id).await;
        let mut state = self.state.lock().await;
        let balance = state.get_mut(&id).ok_or(BalanceError::NotFound(id))?;
        let new_available = balance.available_balance - amount;
        if new_available < 0 {
            return Err(BalanceError::InsufficientFunds {
                account_id: id,
                needed: amount,
                available: balance.available_balance,
            });
        }
        balance.available_balance = new_available;
        balance.pending_debit += amount;
        balance.version += 1;
        balance.updated_at = Utc::now();
        Ok(balance.clone())
    }

    async fn release_funds(
        &self,
        id: AccountId,
        amount: i64,
        complete: bool,
    ) -> BalanceResult<Balance> {
        let _guard = self.lock_account(id).await;
        let mut state = self.state.lock().await;
        let balance = state.get_mut(&id).ok_or(BalanceError::NotFound(id))?;
        if complete {
            balance.balance -= amount;
            balance.pending_debit -= amount;
            balance.recompute_available();
        } else {
            balance.pending_debit -= amount;
            balance.available_balance += amount;
        }
        balance.version += 1;
        balance.updated_at = Utc::now();
        Ok(balance.clone())
    }

    async fn ensure_balance_exists(&self, id: AccountId) -> BalanceResult<()> {
        let mut state = self.state.lock().await;
        state.entry(id).or_insert_with(|| Balance::zero(id));
        Ok(())
    }

    async fn seed_demo_balance(&self, id: AccountId, initial_balance: i64) -> BalanceResult<()> {
        let mut state = self.state.lock().await;
        let balance = state.entry(id).or_insert_with(|| Balance::zero(id));
        balance.balance = initial_balance;
        balance.available_balance = initial_balance;
        balance.version += 1;
        balance.updated_at = Utc::now();
        Ok(())
    }
}
