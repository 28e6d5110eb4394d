//! Ledger Store: append-only postings (debit/credit rows), batch insertion,
//! per-account & per-receipt indexing, balance-from-postings recomputation.
//!
//! Real deployment schema (contract):
//! ```sql
//! CREATE TABLE ledgers (
//!     id BIGSERIAL PRIMARY KEY,
//!     journal_id BIGINT NOT NULL,
//!     account_id BIGINT NOT NULL,
//!     account_type TEXT NOT NULL,
//!     amount BIGINT NOT NULL,
//!     dr_cr TEXT NOT NULL,
//!     currency TEXT NOT NULL,
//!     receipt_code TEXT,
//!     balance_after BIGINT,
//!     description TEXT,
//!     metadata JSONB,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! -- indexed on (account_id, account_type, created_at), (journal_id), (receipt_code)
//! ```

use std::collections::HashMap;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::AccountId;
use crate::AccountType;
use crate::JournalId;
use crate::LedgerId;

/// Default and maximum page size for `list_by_account`, matching
/// `EngineConfig::ledger_page_size_default`/`_max`.
pub const DEFAULT_LIST_LIMIT: usize = 1000;
pub const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DrCr {
    Dr,
    Cr,
}

impl std::fmt::Display for DrCr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DrCr::Dr => "DR",
            DrCr::Cr => "CR",
        };
        f.write_str(s)
    }
}

/// A posting as submitted for creation; `id` and `created_at` are assigned
/// by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPosting {
    pub journal_id: JournalId,
    pub account_id: AccountId,
    pub account_type: AccountType,
    pub amount: i64,
    pub dr_cr: DrCr,
    pub currency: String,
    pub receipt_code: Option<String>,
    pub balance_after: Option<i64>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerPosting {
    pub id: LedgerId,
    pub journal_id: JournalId,
    pub account_id: AccountId,
    pub account_type: AccountType,
    pub amount: i64,
    pub dr_cr: DrCr,
    pub currency: String,
    pub receipt_code: Option<String>,
    pub balance_after: Option<i64>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl LedgerPosting {
    /// Signed minor-unit amount: positive for CR, negative for DR. Used by
    /// `calculate_balance` and by callers reconciling against `balance`.
    pub fn signed_amount(&self) -> i64 {
        match self.dr_cr {
            DrCr::Cr => self.amount,
            DrCr::Dr => -self.amount,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("posting not found: {0}")]
    NotFound(LedgerId),
    #[error("invalid posting: {0}")]
    Invalid(String),
    #[error("paired entry legs do not balance: {debit} DR vs {credit} CR")]
    Unbalanced { debit: i64, credit: i64 },
    #[error("internal error: {0}")]
    Internal(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

fn validate(posting: &NewPosting) -> LedgerResult<()> {
    if posting.amount <= 0 {
        return Err(LedgerError::Invalid(format!(
            "amount must be positive, got {}",
            posting.amount
        )));
    }
    if posting.currency.is_empty() || posting.currency.len() > 8 {
        return Err(LedgerError::Invalid(format!(
            "currency {:?} must be 1-8 chars",
            posting.currency
        )));
    }
    Ok(())
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn create(&self, posting: NewPosting) -> LedgerResult<LedgerPosting>;
    async fn create_batch(
        &self,
        postings: Vec<NewPosting>,
    ) -> (Vec<LedgerPosting>, HashMap<usize, LedgerError>);
    /// Validates that `debit` and `credit` share one journal and balance
    /// (same `amount`, opposite `dr_cr`, same currency) before inserting both.
    async fn create_paired_entry(
        &self,
        debit: NewPosting,
        credit: NewPosting,
    ) -> LedgerResult<(LedgerPosting, LedgerPosting)>;
    async fn get_by_id(&self, id: LedgerId) -> LedgerResult<LedgerPosting>;
    async fn list_by_journal(&self, journal_id: JournalId) -> LedgerResult<Vec<LedgerPosting>>;
    #[allow(clippy::too_many_arguments)]
    async fn list_by_account(
        &self,
        account_id: AccountId,
        account_type: AccountType,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: Option<usize>,
        offset: usize,
    ) -> LedgerResult<Vec<LedgerPosting>>;
    async fn list_by_receipt(&self, receipt_code: &str) -> LedgerResult<Vec<LedgerPosting>>;
    /// `account_ids` is the set of accounts belonging to one owner, resolved
    /// by the caller via `AccountStore::get_by_owner` — the ledger store has
    /// no notion of ownership of its own — it stays a leaf component with
    /// no dependency on the account store.
    async fn list_by_owner(
        &self,
        account_ids: &[AccountId],
        account_type: AccountType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> LedgerResult<Vec<LedgerPosting>>;
    async fn calculate_balance(
        &self,
        account_id: AccountId,
        up_to: Option<DateTime<Utc>>,
    ) -> LedgerResult<i64>;
    async fn get_last_ledger_id(&self, account_id: AccountId) -> LedgerResult<Option<LedgerId>>;
    async fn get_account_activity(
        &self,
        account_id: AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> LedgerResult<usize>;
    async fn get_transaction_volume(
        &self,
        currency: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> LedgerResult<i64>;
}

#[derive(Default)]
struct State {
    rows: Vec<LedgerPosting>,
    by_journal: HashMap<JournalId, Vec<LedgerId>>,
    by_account: HashMap<(AccountId, AccountType), Vec<LedgerId>>,
    by_receipt: HashMap<String, Vec<LedgerId>>,
}

#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<State>,
    ids: AtomicI64,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            ids: AtomicI64::new(1),
        }
    }

    async fn insert_validated(&self, posting: NewPosting) -> LedgerResult<LedgerPosting> {
        validate(&posting)?;
        let mut state = self.state.lock().await;
        let id = self.ids.fetch_add(1, Ordering::SeqCst);
        let row = LedgerPosting {
            id,
            journal_id: posting.journal_id,
            account_id: posting.account_id,
            account_type: posting.account_type,
            amount: posting.amount,
            dr_cr: posting.dr_cr,
            currency: posting.currency,
            receipt_code: posting.receipt_code.clone(),
            balance_after: posting.balance_after,
            description: posting.description,
            metadata: posting.metadata,
            created_at: Utc::now(),
        };
        state.by_journal.entry(row.journal_id).or_default().push(id);
        state
            .by_account
            .entry((row.account_id, row.account_type))
            .or_default()
            .push(id);
        if let Some(code) = &posting.receipt_code {
            state.by_receipt.entry(code.clone()).or_default().push(id);
        }
        state.rows.push(row.clone());
        Ok(row)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create(&self, posting: NewPosting) -> LedgerResult<LedgerPosting> {
        self.insert_validated(posting).await
    }

    async fn create_batch(
        &self,
        postings: Vec<NewPosting>,
    ) -> (Vec<LedgerPosting>, HashMap<usize, LedgerError>) {
        let mut created = Vec::with_capacity(postings.len());
        let mut failures = HashMap::new();
        for (idx, posting) in postings.into_iter().enumerate() {
            match self.insert_validated(posting).await {
                Ok(row) => created.push(row),
                Err(e) => {
                    failures.insert(idx, e);
                }
            }
        }
        (created, failures)
    }

    async fn create_paired_entry(
        &self,
        debit: NewPosting,
        credit: NewPosting,
    ) -> LedgerResult<(LedgerPosting, LedgerPosting)> {
        if debit.journal_id != credit.journal_id {
            return Err(LedgerError::Invalid(
                "paired entry legs must share one journal".into(),
            ));
        }
        if debit.currency == credit.currency && debit.amount != credit.amount {
            return Err(LedgerError::Unbalanced {
                debit: debit.amount,
                credit: credit.amount,
            });
        }
        if debit.dr_cr != DrCr::Dr || credit.dr_cr != DrCr::Cr {
            return Err(LedgerError::Invalid(
                "paired entry requires one DR leg and one CR leg".into(),
            ));
        }
        let debit_row = self.insert_validated(debit).await?;
        let credit_row = self.insert_validated(credit).await?;
        Ok((debit_row, credit_row))
    }

    async fn get_by_id(&self, id: LedgerId) -> LedgerResult<LedgerPosting> {
        let state = self.state.lock().await;
        state
            .rows
            .iter()
            .find(|row| row.id == id)
            .cloned()
            .ok_or(LedgerError::NotFound(id))
    }

    async fn list_by_journal(&self, journal_id: JournalId) -> LedgerResult<Vec<LedgerPosting>> {
        let state = self.state.lock().await;
        let mut rows: Vec<LedgerPosting> = state
            .by_journal
            .get(&journal_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.rows.iter().find(|r| r.id == *id).cloned())
            .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }

    async fn list_by_account(
        &self,
        account_id: AccountId,
        account_type: AccountType,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: Option<usize>,
        offset: usize,
    ) -> LedgerResult<Vec<LedgerPosting>> {
        let state = self.state.lock().await;
        let mut rows: Vec<LedgerPosting> = state
            .by_account
            .get(&(account_id, account_type))
            .into_iter()
            .flatten()
            .filter_map(|id| state.rows.iter().find(|r| r.id == *id).cloned())
            .filter(|r| from.is_none_or(|from| r.created_at >= from))
            .filter(|r| to.is_none_or(|to| r.created_at <= to))
            .collect();
        rows.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_by_receipt(&self, receipt_code: &str) -> LedgerResult<Vec<LedgerPosting>> {
        let state = self.state.lock().await;
        let mut rows: Vec<LedgerPosting> = state
            .by_receipt
            .get(receipt_code)
            .into_iter()
            .flatten()
            .filter_map(|id| state.rows.iter().find(|r| r.id == *id).cloned())
            .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }

    async fn list_by_owner(
        &self,
        account_ids: &[AccountId],
        account_type: AccountType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> LedgerResult<Vec<LedgerPosting>> {
        let state = self.state.lock().await;
        let mut rows: Vec<LedgerPosting> = account_ids
            .iter()
            .flat_map(|id| {
                state
                    .by_account
                    .get(&(*id, account_type))
                    .into_iter()
                    .flatten()
            })
            .filter_map(|id| state.rows.iter().find(|r| r.id == *id).cloned())
            .filter(|r| r.created_at >= from && r.created_at <= to)
            .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }

    async fn calculate_balance(
        &self,
        account_id: AccountId,
        up_to: Option<DateTime<Utc>>,
    ) -> LedgerResult<i64> {
        let state = self.state.lock().await;
        let total = [AccountType::Real, AccountType::Demo]
            .into_iter()
            .flat_map(|account_type| {
                state
                    .by_account
                    .get(&(account_id, account_type))
                    .into_iter()
                    .flatten()
            })
            .filter_map(|id| state.rows.iter().find(|r| r.id == *id))
            .filter(|r| up_to.is_none_or(|up_to| r.created_at <= up_to))
            .map(|r| r.signed_amount())
            .sum();
        Ok(total)
    }

    async fn get_last_ledger_id(&self, account_id: AccountId) -> LedgerResult<Option<LedgerId>> {
        let state = self.state.lock().await;
        let last = [AccountType::Real, AccountType::Demo]
            .into_iter()
            .flat_map(|account_type| {
                state
                    .by_account
                    .get(&(account_id, account_type))
                    .into_iter()
                    .flatten()
            })
            .filter_map(|id| state.rows.iter().find(|r| r.id == *id))
            .max_by_key(|r| r.created_at)
            .map(|r| r.id);
        Ok(last)
    }

    async fn get_account_activity(
        &self,
        account_id: AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> LedgerResult<usize> {
        let state = self.state.lock().await;
        let count = [AccountType::Real, AccountType::Demo]
            .into_iter()
            .flat_map(|account_type| {
                state
                    .by_account
                    .get(&(account_id, account_type))
                    .into_iter()
                    .flatten()
            })
            .filter_map(|id| state.rows.iter().find(|r| r.id == *id))
            .filter(|r| r.created_at >= from && r.created_at <= to)
            .count();
        Ok(count)
    }

    async fn get_transaction_volume(
        &self,
        currency: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> LedgerResult<i64> {
        let state = self.state.lock().await;
        let volume = state
            .rows
            .iter()
            .filter(|r| r.currency == currency && r.created_at >= from && r.created_at <= to)
            .map(|r| r.amount)
            .sum();
        Ok(volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posting(journal_id: JournalId, account_id: AccountId, amount: i64, dr_cr: DrCr) -> NewPosting {
        NewPosting {
            journal_id,
            account_id,
            account_type: AccountType::Real,
            amount,
            dr_cr,
            currency: "USD".to_string(),
            receipt_code: None,
            balance_after: None,
            description: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn zero_amount_is_rejected() {
        let store = InMemoryLedgerStore::new();
        let err = store.create(posting(1, 1, 0, DrCr::Dr)).await;
        assert!(matches!(err, Err(LedgerError::Invalid(_))));
    }

    #[tokio::test]
    async fn nine_char_currency_is_rejected_eight_is_not() {
        let store = InMemoryLedgerStore::new();
        let mut ok = posting(1, 1, 100, DrCr::Dr);
        ok.currency = "ABCDEFGH".to_string();
        assert!(store.create(ok).await.is_ok());

        let mut bad = posting(1, 1, 100, DrCr::Dr);
        bad.currency = "ABCDEFGHI".to_string();
        assert!(matches!(store.create(bad).await, Err(LedgerError::Invalid(_))));
    }

    #[tokio::test]
    async fn paired_entry_requires_balanced_legs() {
        let store = InMemoryLedgerStore::new();
        let debit = posting(1, 1, 100, DrCr::Dr);
        let credit = posting(1, 2, 90, DrCr::Cr);
        let err = store.create_paired_entry(debit, credit).await;
        assert!(matches!(err, Err(LedgerError::Unbalanced { .. })));
    }

    #[tokio::test]
    async fn calculate_balance_matches_signed_sum() {
        let store = InMemoryLedgerStore::new();
        store.create(posting(1, 1, 1_000, DrCr::Cr)).await.unwrap();
        store.create(posting(2, 1, 250, DrCr::Dr)).await.unwrap();
        let balance = store.calculate_balance(1, None).await.unwrap();
        assert_eq!(balance, 750);
    }

    #[tokio::test]
    async fn list_by_account_is_paginated_and_descending() {
        let store = InMemoryLedgerStore::new();
        for i in 0..5 {
            store
                .create(posting(i, 1, 10, DrCr::Cr))
                .await
                .unwrap();
        }
        let page = store
            .list_by_account(1, AccountType::Real, None, None, Some(2), 0)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert!(page[0].created_at >= page[1].created_at);
    }

    #[tokio::test]
    async fn list_by_receipt_is_ascending() {
        let store = InMemoryLedgerStore::new();
        let mut p1 = posting(1, 1, 10, DrCr::Cr);
        p1.receipt_code = Some("RCPT-1".to_string());
        let mut p2 = posting(2, 2, 10, DrCr::Dr);
        p2.receipt_code = Some("RCPT-1".to_string());
        store.create(p1).await.unwrap();
        store.create(p2).await.unwrap();
        let rows = store.list_by_receipt("RCPT-1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].created_at <= rows[1].created_at);
    }
}
