//! Transaction Orchestrator: the only place that writes to more than one
//! store for a single caller request. Validates a batch of postings as one
//! unit, then commits them under one of two concurrency regimes that must
//! be observationally identical to a caller — pessimistic row locking or
//! optimistic version compare-and-swap.
//!
//! Both regimes share the same shape: read/lock, simulate the whole journal
//! against local snapshots with no store writes, and only then commit. If
//! simulation rejects an entry, nothing has been written anywhere.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use tracing::instrument;

use crate::AccountId;
use crate::AccountType;
use crate::account::Account;
use crate::account::AccountError;
use crate::account::AccountStore;
use crate::balance::Balance;
use crate::balance::BalanceError;
use crate::balance::BalanceStore;
use crate::balance::BalanceUpdate;
use crate::config::EngineConfig;
use crate::fee::FeeError;
use crate::fee::FeeRow;
use crate::fee::FeeStore;
use crate::fee::FeeType;
use crate::fx::FxError;
use crate::fx::FxStore;
use crate::journal::Journal;
use crate::journal::JournalError;
use crate::journal::JournalStore;
use crate::journal::TransactionType;
use crate::ledger::DrCr;
use crate::ledger::LedgerError;
use crate::ledger::LedgerPosting;
use crate::ledger::LedgerStore;
use crate::ledger::NewPosting;

/// Which of the two concurrency regimes applies to one `execute` call.
/// Externally observable behavior (what succeeds, what fails, what the
/// final balances and postings look like) must be identical between them —
/// only how concurrent writers are serialized differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyMode {
    Pessimistic,
    Optimistic,
}

/// One leg of a [`TransactionRequest`].
#[derive(Debug, Clone)]
pub struct TransactionEntry {
    pub account_number: String,
    pub amount: i64,
    pub dr_cr: DrCr,
    pub currency: String,
    pub receipt_code: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Everything the orchestrator needs to post one journal. `entries` must be
/// non-empty and balance per currency (Σ CR == Σ DR).
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub idempotency_key: Option<String>,
    pub transaction_type: TransactionType,
    pub account_type: AccountType,
    /// Transaction-level receipt code; see [`resolve_receipt_code`] for how
    /// this interacts with `external_ref` when resolving where fees key to.
    pub receipt_code: Option<String>,
    pub external_ref: Option<String>,
    pub description: Option<String>,
    pub created_by_external_id: Option<String>,
    pub created_by_type: Option<String>,
    /// System-originated transactions (e.g. a deposit credited by the
    /// platform itself) skip external fee computation and instead get a
    /// single zero-valued platform fee row, keyed by the resolved receipt
    /// code, when one is configured.
    pub is_system_transaction: bool,
    pub agent_external_id: Option<String>,
    pub entries: Vec<TransactionEntry>,
}

/// Result of a successfully executed (or replayed) transaction.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub journal: Journal,
    pub postings: Vec<LedgerPosting>,
    pub fees: Vec<FeeRow>,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error(transparent)]
    Balance(#[from] BalanceError),
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Fx(#[from] FxError),
    #[error(transparent)]
    Fee(#[from] FeeError),
    #[error("insufficient balance for account {account_number}: needed {needed}, available {available}")]
    InsufficientBalance {
        account_number: String,
        needed: i64,
        available: i64,
    },
    #[error("concurrent modification on account {account_number}, retry the transaction")]
    ConcurrentModification { account_number: String },
    #[error("account {0} is locked")]
    AccountLocked(String),
    #[error("account {0} is inactive")]
    AccountInactive(String),
    #[error("account {account_number} is a {found} account, transaction is {expected}")]
    AccountTypeMismatch {
        account_number: String,
        expected: AccountType,
        found: AccountType,
    },
    #[error("currency mismatch on account {account_number}: entry is {entry}, account is {account}")]
    CurrencyMismatch {
        account_number: String,
        entry: String,
        account: String,
    },
    #[error("invalid transaction request: {0}")]
    InvalidRequest(String),
    #[error("no fx rate available for {base}/{quote}")]
    FxRateUnavailable { base: String, quote: String },
    #[error("account not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Computes the fee rows a non-system transaction should produce. The core
/// has no opinion on fee schedules; callers that need real fee computation
/// inject one of these. Without one, non-system transactions post no fees —
/// a deliberate placeholder until a concrete fee schedule is wired in.
pub trait FeeRuleEngine: Send + Sync {
    fn compute_fees(
        &self,
        request: &TransactionRequest,
        journal: &Journal,
        postings: &[LedgerPosting],
        receipt_code: &str,
    ) -> Vec<FeeRow>;
}

/// `request.receipt_code` → `journal.external_ref` → `request.external_ref`
/// → none.
fn resolve_receipt_code(request: &TransactionRequest, journal: &Journal) -> Option<String> {
    request
        .receipt_code
        .clone()
        .or_else(|| journal.external_ref.clone())
        .or_else(|| request.external_ref.clone())
}

fn zero_platform_fee(receipt_code: String, currency: &str) -> FeeRow {
    FeeRow {
        id: 0,
        receipt_code,
        fee_rule_id: None,
        fee_type: FeeType::Platform,
        amount: 0,
        currency: currency.to_string(),
        collected_by_account_id: None,
        ledger_id: None,
        agent_external_id: None,
        commission_rate: None,
        created_at: Utc::now(),
    }
}

/// One validated, locally-simulated leg: what the commit phase will write.
struct PlannedEntry {
    account: Account,
    posting: NewPosting,
}

/// Orchestrates postings across the account, balance, journal, ledger, fx
/// and fee stores. Holds them as trait objects so callers can swap in
/// Postgres-backed stores without the engine changing.
pub struct Engine {
    accounts: Arc<dyn AccountStore>,
    balances: Arc<dyn BalanceStore>,
    journals: Arc<dyn JournalStore>,
    ledgers: Arc<dyn LedgerStore>,
    fx: Arc<dyn FxStore>,
    fees: Option<Arc<dyn FeeStore>>,
    fee_rules: Option<Arc<dyn FeeRuleEngine>>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        balances: Arc<dyn BalanceStore>,
        journals: Arc<dyn JournalStore>,
        ledgers: Arc<dyn LedgerStore>,
        fx: Arc<dyn FxStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            accounts,
            balances,
            journals,
            ledgers,
            fx,
            fees: None,
            fee_rules: None,
            config,
        }
    }

    pub fn with_fee_store(mut self, fees: Arc<dyn FeeStore>) -> Self {
        self.fees = Some(fees);
        self
    }

    pub fn with_fee_rules(mut self, fee_rules: Arc<dyn FeeRuleEngine>) -> Self {
        self.fee_rules = Some(fee_rules);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn accounts(&self) -> &Arc<dyn AccountStore> {
        &self.accounts
    }

    pub fn balances(&self) -> &Arc<dyn BalanceStore> {
        &self.balances
    }

    pub fn ledgers(&self) -> &Arc<dyn LedgerStore> {
        &self.ledgers
    }

    pub fn fx(&self) -> &Arc<dyn FxStore> {
        &self.fx
    }

    /// Looks up a previously committed journal by idempotency key and
    /// replays its result, without re-validating or re-applying anything.
    pub async fn get_by_idempotency_key(&self, key: &str) -> EngineResult<ExecutionResult> {
        let journal = self.journals.get_by_idempotency_key(key).await?;
        self.load_result(journal).await
    }

    async fn load_result(&self, journal: Journal) -> EngineResult<ExecutionResult> {
        let postings = self.ledgers.list_by_journal(journal.id).await?;
        // The journals table has no receipt_code column of its own (matching
        // the real schema); recover it from a posting's own receipt_code,
        // falling back to external_ref, the same precedence `apply_fees`
        // would have resolved to when the journal was first committed.
        let receipt_code = postings
            .iter()
            .find_map(|p| p.receipt_code.clone())
            .or_else(|| journal.external_ref.clone());
        let fees = match (&self.fees, receipt_code) {
            (Some(store), Some(code)) => store.list_by_receipt_code(&code).await?,
            _ => Vec::new(),
        };
        Ok(ExecutionResult {
            journal,
            postings,
            fees,
        })
    }

    fn validate_request(request: &TransactionRequest) -> EngineResult<()> {
        if request.entries.is_empty() {
            return Err(EngineError::InvalidRequest(
                "a transaction requires at least one entry".into(),
            ));
        }
        let mut per_currency: HashMap<&str, (i64, i64)> = HashMap::new();
        for entry in &request.entries {
            if entry.amount <= 0 {
                return Err(EngineError::InvalidRequest(format!(
                    "entry amount must be positive, got {}",
                    entry.amount
                )));
            }
            if entry.currency.is_empty() || entry.currency.len() > 8 {
                return Err(EngineError::InvalidRequest(format!(
                    "currency {:?} must be 1-8 chars",
                    entry.currency
                )));
            }
            let (dr, cr) = per_currency.entry(entry.currency.as_str()).or_default();
            match entry.dr_cr {
                DrCr::Dr => *dr += entry.amount,
                DrCr::Cr => *cr += entry.amount,
            }
        }
        for (currency, (dr, cr)) in per_currency {
            if dr != cr {
                return Err(EngineError::InvalidRequest(format!(
                    "{currency} legs do not balance: {dr} DR vs {cr} CR"
                )));
            }
        }
        Ok(())
    }

    fn build_journal_header(request: &TransactionRequest) -> Journal {
        Journal {
            id: 0,
            idempotency_key: request.idempotency_key.clone(),
            transaction_type: request.transaction_type.clone(),
            account_type: request.account_type,
            external_ref: request.external_ref.clone(),
            description: request.description.clone(),
            created_by_external_id: request.created_by_external_id.clone(),
            created_by_type: request.created_by_type.clone(),
            ip_address: None,
            user_agent: None,
            created_at: Utc::now(),
        }
    }

    fn check_account(request: &TransactionRequest, entry: &TransactionEntry, account: &Account) -> EngineResult<()> {
        if account.is_locked {
            return Err(EngineError::AccountLocked(account.account_number.clone()));
        }
        if !account.is_active {
            return Err(EngineError::AccountInactive(account.account_number.clone()));
        }
        if account.account_type != request.account_type {
            return Err(EngineError::AccountTypeMismatch {
                account_number: account.account_number.clone(),
                expected: request.account_type,
                found: account.account_type,
            });
        }
        if account.currency != entry.currency {
            return Err(EngineError::CurrencyMismatch {
                account_number: account.account_number.clone(),
                entry: entry.currency.clone(),
                account: account.currency.clone(),
            });
        }
        Ok(())
    }

    fn new_posting(journal_id: i64, account: &Account, entry: &TransactionEntry, balance_after: i64) -> NewPosting {
        NewPosting {
            journal_id,
            account_id: account.id,
            account_type: account.account_type,
            amount: entry.amount,
            dr_cr: entry.dr_cr,
            currency: entry.currency.clone(),
            receipt_code: entry.receipt_code.clone(),
            balance_after: Some(balance_after),
            description: entry.description.clone(),
            metadata: entry.metadata.clone(),
        }
    }

    /// Entry point. `mode` overrides `EngineConfig::default_mode` for this
    /// one call; pass `None` to use the configured default.
    #[instrument(skip(self, request), fields(idempotency_key = request.idempotency_key.as_deref()))]
    pub async fn execute(
        &self,
        request: TransactionRequest,
        mode: Option<ConcurrencyMode>,
    ) -> EngineResult<ExecutionResult> {
        tracing::debug!(stage = "VALIDATING", "validating transaction request");
        Self::validate_request(&request)?;

        if let Some(key) = &request.idempotency_key {
            if let Ok(journal) = self.journals.get_by_idempotency_key(key).await {
                tracing::info!(stage = "REPLAYED", journal_id = journal.id, "idempotent replay");
                return self.load_result(journal).await;
            }
        }

        let mode = mode.unwrap_or(self.config.default_mode);
        match mode {
            ConcurrencyMode::Pessimistic => self.execute_pessimistic(request).await,
            ConcurrencyMode::Optimistic => self.execute_optimistic(request).await,
        }
    }

    async fn create_journal_or_replay(&self, request: &TransactionRequest) -> EngineResult<Result<Journal, ExecutionResult>> {
        match self.journals.create(Self::build_journal_header(request)).await {
            Ok(journal) => {
                tracing::debug!(stage = "JOURNAL_WRITTEN", journal_id = journal.id);
                Ok(Ok(journal))
            }
            Err(JournalError::DuplicateIdempotencyKey(key)) => {
                tracing::info!(stage = "REPLAYED", key, "concurrent writer won the idempotency race");
                let journal = self.journals.get_by_idempotency_key(&key).await?;
                Ok(Err(self.load_result(journal).await?))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn sorted_distinct_account_numbers(request: &TransactionRequest) -> Vec<String> {
        let mut numbers: Vec<String> = request
            .entries
            .iter()
            .map(|e| e.account_number.clone())
            .collect();
        numbers.sort_unstable();
        numbers.dedup();
        numbers
    }

    async fn execute_pessimistic(&self, request: TransactionRequest) -> EngineResult<ExecutionResult> {
        let journal = match self.create_journal_or_replay(&request).await? {
            Ok(journal) => journal,
            Err(replayed) => return Ok(replayed),
        };

        // Lock distinct accounts in lexicographic account-number order so
        // two concurrent transactions sharing accounts always acquire their
        // locks in the same relative order and cannot deadlock each other.
        let account_numbers = Self::sorted_distinct_account_numbers(&request);
        let mut accounts: HashMap<String, Account> = HashMap::with_capacity(account_numbers.len());
        let mut guards = Vec::with_capacity(account_numbers.len());
        let mut running: HashMap<AccountId, Balance> = HashMap::with_capacity(account_numbers.len());
        for number in &account_numbers {
            let account = self.accounts.get_by_number(number).await?;
            let (balance, guard) = self.balances.get_by_account_id_with_lock(account.id).await?;
            guards.push(guard);
            running.insert(account.id, balance);
            accounts.insert(number.clone(), account);
        }
        tracing::debug!(stage = "LOCKED", accounts = account_numbers.len());

        let planned = self.plan_entries(&request, journal.id, &accounts, &mut running)?;

        // Commit: nothing above touched journal/ledger/balance stores besides
        // the journal header and the row locks, so a failure in `plan_entries`
        // leaves no trace. From here on every store call is expected to
        // succeed because the simulation already proved it would.
        let mut postings = Vec::with_capacity(planned.len());
        for entry in planned {
            let posting = self.ledgers.create(entry.posting.clone()).await?;
            let signed = match entry.posting.dr_cr {
                DrCr::Cr => entry.posting.amount,
                DrCr::Dr => -entry.posting.amount,
            };
            self.balances
                .update_balance(BalanceUpdate {
                    account_id: entry.account.id,
                    delta: signed,
                    overdraft_limit: entry.account.overdraft_limit,
                    ledger_id: posting.id,
                })
                .await?;
            postings.push(posting);
        }
        tracing::debug!(stage = "POSTINGS_WRITTEN", count = postings.len());
        tracing::debug!(stage = "BALANCES_UPDATED");

        let fees = self.apply_fees(&request, &journal, &postings).await?;
        tracing::debug!(stage = "FEES_WRITTEN", count = fees.len());
        tracing::info!(stage = "COMMITTED", journal_id = journal.id);

        drop(guards);
        Ok(ExecutionResult {
            journal,
            postings,
            fees,
        })
    }

    async fn execute_optimistic(&self, request: TransactionRequest) -> EngineResult<ExecutionResult> {
        let journal = match self.create_journal_or_replay(&request).await? {
            Ok(journal) => journal,
            Err(replayed) => return Ok(replayed),
        };

        let account_numbers = Self::sorted_distinct_account_numbers(&request);
        let mut accounts: HashMap<String, Account> = HashMap::with_capacity(account_numbers.len());
        let mut running: HashMap<AccountId, Balance> = HashMap::with_capacity(account_numbers.len());
        for number in &account_numbers {
            let account = self.accounts.get_by_number(number).await?;
            let balance = self.balances.get_by_account_id(account.id).await?;
            running.insert(account.id, balance);
            accounts.insert(number.clone(), account);
        }
        tracing::debug!(stage = "VERSION_READ", accounts = account_numbers.len());

        let planned = self.plan_entries(&request, journal.id, &accounts, &mut running)?;

        // Each entry's expected version is the version its own predecessor
        // within this journal produced (Open Question 1): we track that via
        // `versions`, seeded from the initial read and advanced locally as
        // `plan_entries` walks the entries, so repeated accounts chain
        // correctly even though nothing has been written to the store yet.
        let mut versions: HashMap<AccountId, u64> = running.iter().map(|(id, b)| (*id, b.version)).collect();
        let mut cas_updates = Vec::with_capacity(planned.len());
        for entry in &planned {
            let expected_version = versions[&entry.account.id];
            let signed = match entry.posting.dr_cr {
                DrCr::Cr => entry.posting.amount,
                DrCr::Dr => -entry.posting.amount,
            };
            cas_updates.push((
                BalanceUpdate {
                    account_id: entry.account.id,
                    delta: signed,
                    overdraft_limit: entry.account.overdraft_limit,
                    ledger_id: 0,
                },
                expected_version,
            ));
            versions.insert(entry.account.id, expected_version + 1);
        }

        let updated = match self.balances.update_balance_optimistic_batch(cas_updates).await {
            Ok(updated) => updated,
            Err(BalanceError::VersionMismatch { account_id, .. }) => {
                let account_number = accounts
                    .values()
                    .find(|a| a.id == account_id)
                    .map(|a| a.account_number.clone())
                    .unwrap_or_else(|| account_id.to_string());
                return Err(EngineError::ConcurrentModification { account_number });
            }
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(stage = "BALANCES_UPDATED", count = updated.len());

        // Balances committed atomically; now the ledger rows, using the
        // actual `last_ledger_id` each balance row received.
        let mut postings = Vec::with_capacity(planned.len());
        for (entry, balance) in planned.into_iter().zip(updated.iter()) {
            let mut posting = entry.posting;
            posting.balance_after = Some(balance.balance);
            let row = self.ledgers.create(posting).await?;
            postings.push(row);
        }
        tracing::debug!(stage = "POSTINGS_WRITTEN", count = postings.len());

        let fees = self.apply_fees(&request, &journal, &postings).await?;
        tracing::debug!(stage = "FEES_WRITTEN", count = fees.len());
        tracing::info!(stage = "COMMITTED", journal_id = journal.id);

        Ok(ExecutionResult {
            journal,
            postings,
            fees,
        })
    }

    /// Simulates every entry in order against `running` snapshots (mutated
    /// in place), producing the postings the commit phase will write. No
    /// store is touched here; a rejected entry leaves `running` partially
    /// mutated but that map is local and discarded on error.
    fn plan_entries(
        &self,
        request: &TransactionRequest,
        journal_id: i64,
        accounts: &HashMap<String, Account>,
        running: &mut HashMap<AccountId, Balance>,
    ) -> EngineResult<Vec<PlannedEntry>> {
        let mut planned = Vec::with_capacity(request.entries.len());
        for entry in &request.entries {
            let account = accounts
                .get(&entry.account_number)
                .ok_or_else(|| EngineError::NotFound(entry.account_number.clone()))?;
            Self::check_account(request, entry, account)?;

            let balance = running.get(&account.id).ok_or_else(|| {
                EngineError::Internal(format!("balance for {} not preloaded", account.id))
            })?;
            let delta = match entry.dr_cr {
                DrCr::Cr => entry.amount,
                DrCr::Dr => -entry.amount,
            };
            let new_available = balance.available_balance + delta;
            if entry.dr_cr == DrCr::Dr && new_available + account.overdraft_limit < 0 {
                return Err(EngineError::InsufficientBalance {
                    account_number: account.account_number.clone(),
                    needed: entry.amount,
                    available: balance.available_balance + account.overdraft_limit,
                });
            }

            let new_balance_value = balance.balance + delta;
            let mut updated = balance.clone();
            updated.balance = new_balance_value;
            updated.available_balance = new_available;
            updated.version += 1;
            running.insert(account.id, updated);

            planned.push(PlannedEntry {
                account: account.clone(),
                posting: Self::new_posting(journal_id, account, entry, new_balance_value),
            });
        }
        Ok(planned)
    }

    async fn apply_fees(
        &self,
        request: &TransactionRequest,
        journal: &Journal,
        postings: &[LedgerPosting],
    ) -> EngineResult<Vec<FeeRow>> {
        let Some(fee_store) = &self.fees else {
            return Ok(Vec::new());
        };
        let Some(receipt_code) = resolve_receipt_code(request, journal) else {
            tracing::warn!(journal_id = journal.id, "no receipt code resolved, skipping fee creation");
            return Ok(Vec::new());
        };

        if request.is_system_transaction {
            let currency = postings
                .first()
                .map(|p| p.currency.as_str())
                .unwrap_or("USD");
            let row = fee_store.create(zero_platform_fee(receipt_code, currency)).await?;
            return Ok(vec![row]);
        }

        match &self.fee_rules {
            Some(rules) => {
                let computed = rules.compute_fees(request, journal, postings, &receipt_code);
                if computed.is_empty() {
                    return Ok(Vec::new());
                }
                let (created, failures) = fee_store.create_batch(computed).await;
                if let Some((idx, err)) = failures.into_iter().next() {
                    return Err(EngineError::Internal(format!(
                        "fee row {idx} rejected: {err}"
                    )));
                }
                Ok(created)
            }
            // No fee-rule collaborator configured: non-system transactions
            // post no fees. See DESIGN.md for why this stays a placeholder.
            None => Ok(Vec::new()),
        }
    }

    pub async fn reserve_funds(&self, account_number: &str, amount: i64) -> EngineResult<Balance> {
        let account = self.accounts.get_by_number(account_number).await?;
        Ok(self.balances.reserve_funds(account.id, amount).await?)
    }

    pub async fn release_funds(
        &self,
        account_number: &str,
        amount: i64,
        complete: bool,
    ) -> EngineResult<Balance> {
        let account = self.accounts.get_by_number(account_number).await?;
        Ok(self.balances.release_funds(account.id, amount, complete).await?)
    }
}

/// Rounds half away from zero at the minor-unit boundary, matching how
/// [`crate::facade`] converts between currencies.
pub fn round_half_up(value: f64) -> i64 {
    if value >= 0.0 {
        (value + 0.5).floor() as i64
    } else {
        (value - 0.5).ceil() as i64
    }
}

/// Resolves an fx rate and the converted minor-unit amount for `amount` of
/// `from_currency` expressed in `to_currency`, as of `as_of`.
pub async fn convert_amount(
    fx: &Arc<dyn FxStore>,
    from_currency: &str,
    to_currency: &str,
    amount: i64,
    as_of: DateTime<Utc>,
) -> EngineResult<(i64, String)> {
    if from_currency == to_currency {
        return Ok((amount, "1".to_string()));
    }
    let rate = fx
        .get_fx_rate(from_currency, to_currency, as_of)
        .await
        .map_err(|_| EngineError::FxRateUnavailable {
            base: from_currency.to_string(),
            quote: to_currency.to_string(),
        })?;
    let factor = rate.rate_as_f64()?;
    let converted = round_half_up(amount as f64 * factor);
    Ok((converted, rate.rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccountType;
    use crate::OwnerType;
    use crate::account::InMemoryAccountStore;
    use crate::account::Purpose;
    use crate::balance::InMemoryBalanceStore;
    use crate::fee::InMemoryFeeStore;
    use crate::fx::InMemoryFxStore;
    use crate::journal::InMemoryJournalStore;
    use crate::ledger::InMemoryLedgerStore;

    struct Fixture {
        engine: Engine,
        accounts: Arc<dyn AccountStore>,
        balances: Arc<dyn BalanceStore>,
    }

    fn fixture() -> Fixture {
        let balances: Arc<dyn BalanceStore> = Arc::new(InMemoryBalanceStore::new());
        let accounts: Arc<dyn AccountStore> = Arc::new(InMemoryAccountStore::new(balances.clone()));
        let journals: Arc<dyn JournalStore> = Arc::new(InMemoryJournalStore::new());
        let ledgers: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::new());
        let fx: Arc<dyn FxStore> = Arc::new(InMemoryFxStore::new());
        let engine = Engine::new(
            accounts.clone(),
            balances.clone(),
            journals,
            ledgers,
            fx,
            EngineConfig::default(),
        )
        .with_fee_store(Arc::new(InMemoryFeeStore::new()));
        Fixture {
            engine,
            accounts,
            balances,
        }
    }

    async fn wallet(accounts: &Arc<dyn AccountStore>, owner_id: &str, overdraft_limit: i64) -> Account {
        let mut account = accounts
            .get_or_create_user_accounts(OwnerType::User, owner_id, AccountType::Real, &[])
            .await
            .unwrap()
            .remove(0);
        account.overdraft_limit = overdraft_limit;
        accounts.update(account.clone()).await.unwrap()
    }

    fn transfer_request(from: &str, to: &str, amount: i64, idempotency_key: Option<&str>) -> TransactionRequest {
        TransactionRequest {
            idempotency_key: idempotency_key.map(str::to_string),
            transaction_type: TransactionType::Transfer,
            account_type: AccountType::Real,
            receipt_code: None,
            external_ref: None,
            description: Some("test transfer".to_string()),
            created_by_external_id: None,
            created_by_type: None,
            is_system_transaction: false,
            agent_external_id: None,
            entries: vec![
                TransactionEntry {
                    account_number: from.to_string(),
                    amount,
                    dr_cr: DrCr::Dr,
                    currency: "USD".to_string(),
                    receipt_code: None,
                    description: None,
                    metadata: None,
                },
                TransactionEntry {
                    account_number: to.to_string(),
                    amount,
                    dr_cr: DrCr::Cr,
                    currency: "USD".to_string(),
                    receipt_code: None,
                    description: None,
                    metadata: None,
                },
            ],
        }
    }

    #[tokio::test]
    async fn simple_transfer_moves_funds_both_directions() {
        let Fixture {
            engine,
            accounts,
            balances,
        } = fixture();
        let alice = wallet(&accounts, "alice", 0).await;
        let bob = wallet(&accounts, "bob", 0).await;
        balances
            .update_balance(BalanceUpdate {
                account_id: alice.id,
                delta: 10_000,
                overdraft_limit: 0,
                ledger_id: 0,
            })
            .await
            .unwrap();

        let result = engine
            .execute(
                transfer_request(&alice.account_number, &bob.account_number, 2_500, None),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.postings.len(), 2);

        let alice_balance = balances.get_by_account_id(alice.id).await.unwrap();
        let bob_balance = balances.get_by_account_id(bob.id).await.unwrap();
        assert_eq!(alice_balance.balance, 7_500);
        assert_eq!(bob_balance.balance, 2_500);
    }

    #[tokio::test]
    async fn idempotent_replay_does_not_double_post() {
        let Fixture {
            engine,
            accounts,
            balances,
        } = fixture();
        let alice = wallet(&accounts, "alice", 0).await;
        let bob = wallet(&accounts, "bob", 0).await;
        balances
            .update_balance(BalanceUpdate {
                account_id: alice.id,
                delta: 10_000,
                overdraft_limit: 0,
                ledger_id: 0,
            })
            .await
            .unwrap();

        let request = transfer_request(&alice.account_number, &bob.account_number, 1_000, Some("idem-1"));
        let first = engine.execute(request.clone(), None).await.unwrap();
        let second = engine.execute(request, None).await.unwrap();
        assert_eq!(first.journal.id, second.journal.id);

        let alice_balance = balances.get_by_account_id(alice.id).await.unwrap();
        assert_eq!(alice_balance.balance, 9_000);
    }

    #[tokio::test]
    async fn insufficient_funds_respects_overdraft_limit() {
        let Fixture {
            engine, accounts, ..
        } = fixture();
        let alice = wallet(&accounts, "alice", 500).await;
        let bob = wallet(&accounts, "bob", 0).await;

        let rejected = engine
            .execute(transfer_request(&alice.account_number, &bob.account_number, 600, None), None)
            .await;
        assert!(matches!(
            rejected,
            Err(EngineError::InsufficientBalance { .. })
        ));

        let accepted = engine
            .execute(transfer_request(&alice.account_number, &bob.account_number, 500, None), None)
            .await;
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn optimistic_mode_detects_concurrent_modification() {
        let Fixture {
            engine,
            accounts,
            balances,
        } = fixture();
        let alice = wallet(&accounts, "alice", 0).await;
        let bob = wallet(&accounts, "bob", 0).await;
        balances
            .update_balance(BalanceUpdate {
                account_id: alice.id,
                delta: 10_000,
                overdraft_limit: 0,
                ledger_id: 0,
            })
            .await
            .unwrap();

        // Simulate an interleaved writer bumping alice's version between
        // this test's (nonexistent) read and the engine's own read by
        // mutating the balance out from under a stale version the engine
        // would have captured — here we just prove the happy path commits
        // and bumps the version so a later stale CAS would be rejected.
        let result = engine
            .execute(
                transfer_request(&alice.account_number, &bob.account_number, 1_000, None),
                Some(ConcurrencyMode::Optimistic),
            )
            .await
            .unwrap();
        assert_eq!(result.postings.len(), 2);

        let stale_cas = balances
            .update_balance_optimistic(
                BalanceUpdate {
                    account_id: alice.id,
                    delta: -1,
                    overdraft_limit: 0,
                    ledger_id: 0,
                },
                0,
            )
            .await;
        assert!(matches!(stale_cas, Err(BalanceError::VersionMismatch { .. })));
    }

    #[tokio::test]
    async fn locked_account_rejects_transaction() {
        let Fixture {
            engine, accounts, ..
        } = fixture();
        let alice = wallet(&accounts, "alice", 0).await;
        let bob = wallet(&accounts, "bob", 0).await;
        accounts.lock(alice.id).await.unwrap();

        let result = engine
            .execute(transfer_request(&alice.account_number, &bob.account_number, 10, None), None)
            .await;
        assert!(matches!(result, Err(EngineError::AccountLocked(_))));
    }

    #[tokio::test]
    async fn system_transaction_writes_zero_value_platform_fee() {
        let Fixture {
            engine, accounts, ..
        } = fixture();
        let liquidity = accounts
            .create(Account {
                id: 0,
                account_number: "SYS-LIQ-USD".to_string(),
                owner_type: OwnerType::System,
                owner_id: String::new(),
                currency: "USD".to_string(),
                purpose: Purpose::Liquidity,
                account_type: AccountType::Real,
                is_active: true,
                is_locked: false,
                overdraft_limit: 1_000_000_000,
                parent_agent_external_id: None,
                commission_rate: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        let alice = wallet(&accounts, "alice", 0).await;

        let mut request = transfer_request(&liquidity.account_number, &alice.account_number, 5_000, None);
        request.transaction_type = TransactionType::Deposit;
        request.is_system_transaction = true;
        request.receipt_code = Some("RCPT-DEPOSIT-1".to_string());

        let result = engine.execute(request, None).await.unwrap();
        assert_eq!(result.fees.len(), 1);
        assert_eq!(result.fees[0].amount, 0);
        assert_eq!(result.fees[0].receipt_code, "RCPT-DEPOSIT-1");
    }

    #[tokio::test]
    async fn unbalanced_request_is_rejected_before_any_write() {
        let Fixture {
            engine, accounts, ..
        } = fixture();
        let alice = wallet(&accounts, "alice", 0).await;
        let bob = wallet(&accounts, "bob", 0).await;
        let mut request = transfer_request(&alice.account_number, &bob.account_number, 100, None);
        request.entries[1].amount = 90;

        let result = engine.execute(request, None).await;
        assert!(matches!(result, Err(EngineError::InvalidRequest(_))));
    }
}
