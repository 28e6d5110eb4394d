//! `postgres-store` feature: stub store types that document the real
//! deployment schema without pulling in a database driver. Every method
//! returns an error; wiring an actual `sqlx`/`tokio-postgres` pool behind
//! these traits is out of scope here.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;

use crate::AccountId;
use crate::AccountType;
use crate::FeeId;
use crate::FxRateId;
use crate::JournalId;
use crate::LedgerId;
use crate::account::Account;
use crate::account::AccountError;
use crate::account::AccountResult;
use crate::account::AccountStore;
use crate::account::Purpose;
use crate::balance::Balance;
use crate::balance::BalanceError;
use crate::balance::BalanceLockGuard;
use crate::balance::BalanceResult;
use crate::balance::BalanceStore;
use crate::balance::BalanceUpdate;
use crate::fee::FeeError;
use crate::fee::FeeResult;
use crate::fee::FeeRow;
use crate::fee::FeeStore;
use crate::fee::FeeType;
use crate::fx::FxError;
use crate::fx::FxRate;
use crate::fx::FxResult;
use crate::fx::FxStore;
use crate::journal::Journal;
use crate::journal::JournalError;
use crate::journal::JournalResult;
use crate::journal::JournalStore;
use crate::ledger::LedgerError;
use crate::ledger::LedgerPosting;
use crate::ledger::LedgerResult;
use crate::ledger::LedgerStore;
use crate::ledger::NewPosting;

fn unimplemented(store: &str) -> String {
    format!("postgres {store} not yet implemented")
}

/// Backs [`AccountStore`] by the `accounts` table documented on
/// [`crate::account`]'s module doc.
pub struct PostgresAccountStore {
    pub connection_string: String,
}

#[async_trait]
impl AccountStore for PostgresAccountStore {
    async fn get_by_number(&self, _account_number: &str) -> AccountResult<Account> {
        Err(AccountError::Internal(unimplemented("account store")))
    }

    async fn get_by_id(&self, _id: AccountId) -> AccountResult<Account> {
        Err(AccountError::Internal(unimplemented("account store")))
    }

    async fn get_by_owner(
        &self,
        _owner_type: crate::OwnerType,
        _owner_id: &str,
        _account_type: AccountType,
    ) -> AccountResult<Vec<Account>> {
        Err(AccountError::Internal(unimplemented("account store")))
    }

    async fn create(&self, _account: Account) -> AccountResult<Account> {
        Err(AccountError::Internal(unimplemented("account store")))
    }

    async fn create_many(
        &self,
        _accounts: Vec<Account>,
    ) -> AccountResult<(Vec<Account>, HashMap<usize, AccountError>)> {
        Err(AccountError::Internal(unimplemented("account store")))
    }

    async fn update(&self, _account: Account) -> AccountResult<Account> {
        Err(AccountError::Internal(unimplemented("account store")))
    }

    async fn lock(&self, _id: AccountId) -> AccountResult<Account> {
        Err(AccountError::Internal(unimplemented("account store")))
    }

    async fn unlock(&self, _id: AccountId) -> AccountResult<Account> {
        Err(AccountError::Internal(unimplemented("account store")))
    }

    async fn get_system_account(
        &self,
        _currency: &str,
        _account_type: AccountType,
        _purpose: Purpose,
    ) -> AccountResult<Account> {
        Err(AccountError::Internal(unimplemented("account store")))
    }

    async fn get_system_fee_account(&self, _currency: &str) -> AccountResult<Account> {
        Err(AccountError::Internal(unimplemented("account store")))
    }

    async fn get_or_create_user_accounts(
        &self,
        _owner_type: crate::OwnerType,
        _owner_id: &str,
        _account_type: AccountType,
        _demo_currencies: &[(String, i64)],
    ) -> AccountResult<Vec<Account>> {
        Err(AccountError::Internal(unimplemented("account store")))
    }

    async fn get_or_create_agent_account(
        &self,
        _agent_external_id: &str,
        _currency: &str,
        _commission_rate: Option<f64>,
    ) -> AccountResult<Account> {
        Err(AccountError::Internal(unimplemented("account store")))
    }
}

/// Backs [`BalanceStore`] by the `balances` table documented on
/// [`crate::balance`]'s module doc.
pub struct PostgresBalanceStore {
    pub connection_string: String,
}

#[async_trait]
impl BalanceStore for PostgresBalanceStore {
    async fn get_by_account_id(&self, id: AccountId) -> BalanceResult<Balance> {
        let _ = id;
        Err(BalanceError::Internal(unimplemented("balance store")))
    }

    async fn get_by_account_id_with_lock(
        &self,
        id: AccountId,
    ) -> BalanceResult<(Balance, BalanceLockGuard)> {
        let _ = id;
        Err(BalanceError::Internal(unimplemented("balance store")))
    }

    async fn lock_account(&self, _id: AccountId) -> BalanceLockGuard {
        // A real backend would take a `SELECT ... FOR UPDATE` row lock
        // instead of an in-process mutex; there is nothing to guard here.
        unimplemented!("{}", unimplemented("balance store"))
    }

    async fn get_multiple_by_account_ids(
        &self,
        _ids: &[AccountId],
    ) -> BalanceResult<HashMap<AccountId, Balance>> {
        Err(BalanceError::Internal(unimplemented("balance store")))
    }

    async fn update_balance(&self, _update: BalanceUpdate) -> BalanceResult<Balance> {
        Err(BalanceError::Internal(unimplemented("balance store")))
    }

    async fn update_balance_batch(&self, _updates: Vec<BalanceUpdate>) -> BalanceResult<Vec<Balance>> {
        Err(BalanceError::Internal(unimplemented("balance store")))
    }

    async fn update_balance_optimistic(
        &self,
        _update: BalanceUpdate,
        _expected_version: u64,
    ) -> BalanceResult<Balance> {
        Err(BalanceError::Internal(unimplemented("balance store")))
    }

    async fn update_balance_optimistic_batch(
        &self,
        _updates: Vec<(BalanceUpdate, u64)>,
    ) -> BalanceResult<Vec<Balance>> {
        Err(BalanceError::Internal(unimplemented("balance store")))
    }

    async fn reserve_funds(&self, _id: AccountId, _amount: i64) -> BalanceResult<Balance> {
        Err(BalanceError::Internal(unimplemented("balance store")))
    }

    async fn release_funds(
        &self,
        _id: AccountId,
        _amount: i64,
        _complete: bool,
    ) -> BalanceResult<Balance> {
        Err(BalanceError::Internal(unimplemented("balance store")))
    }

    async fn ensure_balance_exists(&self, _id: AccountId) -> BalanceResult<()> {
        Err(BalanceError::Internal(unimplemented("balance store")))
    }

    async fn seed_demo_balance(&self, _id: AccountId, _initial_balance: i64) -> BalanceResult<()> {
        Err(BalanceError::Internal(unimplemented("balance store")))
    }
}

/// Backs [`JournalStore`] by the `journals` table documented on
/// [`crate::journal`]'s module doc.
pub struct PostgresJournalStore {
    pub connection_string: String,
}

#[async_trait]
impl JournalStore for PostgresJournalStore {
    async fn create(&self, _header: Journal) -> JournalResult<Journal> {
        Err(JournalError::Internal(unimplemented("journal store")))
    }

    async fn get_by_id(&self, _id: JournalId) -> JournalResult<Journal> {
        Err(JournalError::Internal(unimplemented("journal store")))
    }

    async fn get_by_idempotency_key(&self, _key: &str) -> JournalResult<Journal> {
        Err(JournalError::Internal(unimplemented("journal store")))
    }
}

/// Backs [`LedgerStore`] by the `ledgers` table documented on
/// [`crate::ledger`]'s module doc.
pub struct PostgresLedgerStore {
    pub connection_string: String,
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn create(&self, _posting: NewPosting) -> LedgerResult<LedgerPosting> {
        Err(LedgerError::Internal(unimplemented("ledger store")))
    }

    async fn create_batch(
        &self,
        _postings: Vec<NewPosting>,
    ) -> (Vec<LedgerPosting>, HashMap<usize, LedgerError>) {
        (Vec::new(), HashMap::new())
    }

    async fn create_paired_entry(
        &self,
        _debit: NewPosting,
        _credit: NewPosting,
    ) -> LedgerResult<(LedgerPosting, LedgerPosting)> {
        Err(LedgerError::Internal(unimplemented("ledger store")))
    }

    async fn get_by_id(&self, _id: LedgerId) -> LedgerResult<LedgerPosting> {
        Err(LedgerError::Internal(unimplemented("ledger store")))
    }

    async fn list_by_journal(&self, _journal_id: JournalId) -> LedgerResult<Vec<LedgerPosting>> {
        Err(LedgerError::Internal(unimplemented("ledger store")))
    }

    async fn list_by_account(
        &self,
        _account_id: AccountId,
        _account_type: AccountType,
        _from: Option<DateTime<Utc>>,
        _to: Option<DateTime<Utc>>,
        _limit: Option<usize>,
        _offset: usize,
    ) -> LedgerResult<Vec<LedgerPosting>> {
        Err(LedgerError::Internal(unimplemented("ledger store")))
    }

    async fn list_by_receipt(&self, _receipt_code: &str) -> LedgerResult<Vec<LedgerPosting>> {
        Err(LedgerError::Internal(unimplemented("ledger store")))
    }

    async fn list_by_owner(
        &self,
        _account_ids: &[AccountId],
        _account_type: AccountType,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> LedgerResult<Vec<LedgerPosting>> {
        Err(LedgerError::Internal(unimplemented("ledger store")))
    }

    async fn calculate_balance(&self, _account_id: AccountId, _up_to: Option<DateTime<Utc>>) -> LedgerResult<i64> {
        Err(LedgerError::Internal(unimplemented("ledger store")))
    }

    async fn get_last_ledger_id(&self, _account_id: AccountId) -> LedgerResult<Option<LedgerId>> {
        Err(LedgerError::Internal(unimplemented("ledger store")))
    }

    async fn get_account_activity(
        &self,
        _account_id: AccountId,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> LedgerResult<usize> {
        Err(LedgerError::Internal(unimplemented("ledger store")))
    }

    async fn get_transaction_volume(
        &self,
        _currency: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> LedgerResult<i64> {
        Err(LedgerError::Internal(unimplemented("ledger store")))
    }
}

/// Backs [`FxStore`] by the `fx_rates` table documented on [`crate::fx`]'s
/// module doc.
pub struct PostgresFxStore {
    pub connection_string: String,
}

#[async_trait]
impl FxStore for PostgresFxStore {
    async fn get_fx_rate(&self, _base: &str, _quote: &str, _as_of: DateTime<Utc>) -> FxResult<FxRate> {
        Err(FxError::Internal(unimplemented("fx store")))
    }

    async fn list_fx_rates(&self, _base: &str) -> FxResult<Vec<FxRate>> {
        Err(FxError::Internal(unimplemented("fx store")))
    }

    async fn upsert_rate(
        &self,
        _base: &str,
        _quote: &str,
        _rate: String,
        _as_of: DateTime<Utc>,
        _bid_rate: Option<String>,
        _ask_rate: Option<String>,
    ) -> FxResult<FxRate> {
        Err(FxError::Internal(unimplemented("fx store")))
    }
}

/// Backs [`FeeStore`] by the `transaction_fees` table documented on
/// [`crate::fee`]'s module doc.
pub struct PostgresFeeStore {
    pub connection_string: String,
}

#[async_trait]
impl FeeStore for PostgresFeeStore {
    async fn create(&self, _fee: FeeRow) -> FeeResult<FeeRow> {
        Err(FeeError::Internal(unimplemented("fee store")))
    }

    async fn create_batch(&self, _fees: Vec<FeeRow>) -> (Vec<FeeRow>, HashMap<usize, FeeError>) {
        (Vec::new(), HashMap::new())
    }

    async fn list_by_receipt_code(&self, _receipt_code: &str) -> FeeResult<Vec<FeeRow>> {
        Err(FeeError::Internal(unimplemented("fee store")))
    }

    async fn get_total_fees_by_type(&self, _fee_type: FeeType) -> FeeResult<HashMap<String, i64>> {
        Err(FeeError::Internal(unimplemented("fee store")))
    }

    async fn get_agent_commission_summary(
        &self,
        _agent_external_id: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> FeeResult<HashMap<String, i64>> {
        Err(FeeError::Internal(unimplemented("fee store")))
    }
}
