//! Account Store: CRUD for accounts, locking flags, owner/purpose indexing.
//!
//! Real deployment schema (contract):
//! ```sql
//! CREATE TABLE accounts (
//!     id BIGSERIAL PRIMARY KEY,
//!     account_number TEXT NOT NULL UNIQUE,
//!     owner_type TEXT NOT NULL,
//!     owner_id TEXT NOT NULL,
//!     currency TEXT NOT NULL,
//!     purpose TEXT NOT NULL,
//!     account_type TEXT NOT NULL,
//!     is_active BOOLEAN NOT NULL DEFAULT TRUE,
//!     is_locked BOOLEAN NOT NULL DEFAULT FALSE,
//!     overdraft_limit BIGINT NOT NULL DEFAULT 0,
//!     parent_agent_external_id TEXT,
//!     commission_rate DOUBLE PRECISION,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     UNIQUE (owner_type, owner_id, currency, purpose, account_type)
//! );
//! ```

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::AccountId;
use crate::AccountType;
use crate::OwnerType;
use crate::balance::BalanceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Wallet,
    Liquidity,
    Fees,
    Clearing,
    Settlement,
    Commission,
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Purpose::Wallet => "wallet",
            Purpose::Liquidity => "liquidity",
            Purpose::Fees => "fees",
            Purpose::Clearing => "clearing",
            Purpose::Settlement => "settlement",
            Purpose::Commission => "commission",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: AccountId,
    pub account_number: String,
    pub owner_type: OwnerType,
    pub owner_id: String,
    pub currency: String,
    pub purpose: Purpose,
    pub account_type: AccountType,
    pub is_active: bool,
    pub is_locked: bool,
    pub overdraft_limit: i64,
    pub parent_agent_external_id: Option<String>,
    pub commission_rate: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Mirrors the store's `IsValid()` predicate, checked before any create.
    pub fn is_valid(&self) -> bool {
        if self.account_number.trim().is_empty() {
            return false;
        }
        if self.currency.is_empty() || self.currency.len() > 8 {
            return false;
        }
        if self.overdraft_limit < 0 {
            return false;
        }
        if self.owner_type != OwnerType::System && self.owner_id.trim().is_empty() {
            return false;
        }
        true
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("account not found: {0}")]
    NotFound(String),
    #[error("account already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid account: {0}")]
    Invalid(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type AccountResult<T> = Result<T, AccountError>;

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_by_number(&self, account_number: &str) -> AccountResult<Account>;
    async fn get_by_id(&self, id: AccountId) -> AccountResult<Account>;
    async fn get_by_owner(
        &self,
        owner_type: OwnerType,
        owner_id: &str,
        account_type: AccountType,
    ) -> AccountResult<Vec<Account>>;
    async fn create(&self, account: Account) -> AccountResult<Account>;
    async fn create_many(
        &self,
        accounts: Vec<Account>,
    ) -> AccountResult<(Vec<Account>, HashMap<usize, AccountError>)>;
    async fn update(&self, account: Account) -> AccountResult<Account>;
    async fn lock(&self, id: AccountId) -> AccountResult<Account>;
    async fn unlock(&self, id: AccountId) -> AccountResult<Account>;
    async fn get_system_account(
        &self,
        currency: &str,
        account_type: AccountType,
        purpose: Purpose,
    ) -> AccountResult<Account>;
    async fn get_system_fee_account(&self, currency: &str) -> AccountResult<Account>;
    async fn get_or_create_user_accounts(
        &self,
        owner_type: OwnerType,
        owner_id: &str,
        account_type: AccountType,
        demo_currencies: &[(String, i64)],
    ) -> AccountResult<Vec<Account>>;
    async fn get_or_create_agent_account(
        &self,
        agent_external_id: &str,
        currency: &str,
        commission_rate: Option<f64>,
    ) -> AccountResult<Account>;
}

struct Sequence(AtomicI64);

impl Sequence {
    fn new() -> Self {
        Self(AtomicI64::new(1))
    }

    fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

#[derive(Default)]
struct State {
    by_id: HashMap<AccountId, Account>,
    by_number: HashMap<String, AccountId>,
    by_unique_tuple: HashMap<(OwnerType, String, String, Purpose, AccountType), AccountId>,
}

/// Reference in-memory implementation. Guards all state behind one mutex;
/// this is deliberately coarser than the balance store's per-account lock
/// table since account rows are touched far less often than balances.
pub struct InMemoryAccountStore {
    state: Mutex<State>,
    ids: Sequence,
    account_numbers: Sequence,
    balances: Arc<dyn BalanceStore>,
}

impl InMemoryAccountStore {
    pub fn new(balances: Arc<dyn BalanceStore>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            ids: Sequence::new(),
            account_numbers: Sequence::new(),
            balances,
        }
    }

    fn generate_account_number(&self, account: &Account) -> String {
        let seq = self.account_numbers.next();
        match account.account_type {
            AccountType::Demo => format!("DEMO-{}-{}-{}", account.owner_id, account.currency, seq),
            AccountType::Real if account.owner_type == OwnerType::System => {
                let prefix = match account.purpose {
                    Purpose::Liquidity => "LIQ",
                    Purpose::Fees => "FEE",
                    Purpose::Clearing => "CLR",
                    Purpose::Settlement => "SET",
                    _ => "SYS",
                };
                format!("SYS-{}-{}", prefix, account.currency)
            }
            AccountType::Real if account.owner_type == OwnerType::Agent => {
                format!(
                    "AGT-COM-{}-{}-{}",
                    account.owner_id, account.currency, seq
                )
            }
            AccountType::Real => format!("ACC-{}-{}-{}", account.owner_id, account.currency, seq),
        }
    }

    async fn insert_locked(
        &self,
        state: &mut State,
        mut account: Account,
    ) -> AccountResult<Account> {
        if account.account_number.trim().is_empty() {
            account.account_number = self.generate_account_number(&account);
        }
        if !account.is_valid() {
            return Err(AccountError::Invalid(format!(
                "account {} failed validation",
                account.account_number
            )));
        }

        let tuple_key = (
            account.owner_type,
            account.owner_id.clone(),
            account.currency.clone(),
            account.purpose,
            account.account_type,
        );

        if let Some(existing_id) = state.by_unique_tuple.get(&tuple_key).copied() {
            let existing = state.by_id.get_mut(&existing_id).ok_or_else(|| {
                AccountError::Internal("by_unique_tuple row missing by_id entry".into())
            })?;
            existing.updated_at = Utc::now();
            return Ok(existing.clone());
        }

        let id = self.ids.next();
        account.id = id;
        account.created_at = Utc::now();
        account.updated_at = account.created_at;

        state.by_number.insert(account.account_number.clone(), id);
        state.by_unique_tuple.insert(tuple_key, id);
        state.by_id.insert(id, account.clone());

        self.balances.ensure_balance_exists(id).await.map_err(|e| {
            AccountError::Internal(format!("failed to materialize balance for {id}: {e}"))
        })?;

        Ok(account)
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get_by_number(&self, account_number: &str) -> AccountResult<Account> {
        let state = self.state.lock().await;
        let id = state
            .by_number
            .get(account_number)
            .copied()
            .ok_or_else(|| AccountError::NotFound(account_number.to_string()))?;
        Ok(state.by_id[&id].clone())
    }

    async fn get_by_id(&self, id: AccountId) -> AccountResult<Account> {
        let state = self.state.lock().await;
        state
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| AccountError::NotFound(id.to_string()))
    }

    async fn get_by_owner(
        &self,
        owner_type: OwnerType,
        owner_id: &str,
        account_type: AccountType,
    ) -> AccountResult<Vec<Account>> {
        let state = self.state.lock().await;
        Ok(state
            .by_id
            .values()
            .filter(|a| {
                a.owner_type == owner_type && a.owner_id == owner_id && a.account_type == account_type
            })
            .cloned()
            .collect())
    }

    async fn create(&self, account: Account) -> AccountResult<Account> {
        let mut state = self.state.lock().await;
        self.insert_locked(&mut state, account).await
    }

    async fn create_many(
        &self,
        accounts: Vec<Account>,
    ) -> AccountResult<(Vec<Account>, HashMap<usize, AccountError>)> {
        let mut created = Vec::with_capacity(accounts.len());
        let mut failures = HashMap::new();
        let mut state = self.state.lock().await;
        for (idx, account) in accounts.into_iter().enumerate() {
            match self.insert_locked(&mut state, account).await {
                Ok(a) => created.push(a),
                Err(e) => {
                    failures.insert(idx, e);
                }
            }
        }
        Ok((created, failures))
    }

    async fn update(&self, account: Account) -> AccountResult<Account> {
        let mut state = self.state.lock().await;
        match state.by_id.entry(account.id) {
            Entry::Occupied(mut slot) => {
                let mut updated = account;
                updated.updated_at = Utc::now();
                updated.created_at = slot.get().created_at;
                *slot.get_mut() = updated.clone();
                Ok(updated)
            }
            Entry::Vacant(_) => Err(AccountError::NotFound(account.id.to_string())),
        }
    }

    async fn lock(&self, id: AccountId) -> AccountResult<Account> {
        let mut state = self.state.lock().await;
        let account = state
            .by_id
            .get_mut(&id)
            .ok_or_else(|| AccountError::NotFound(id.to_string()))?;
        account.is_locked = true;
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn unlock(&self, id: AccountId) -> AccountResult<Account> {
        let mut state = self.state.lock().await;
        let account = state
            .by_id
            .get_mut(&id)
            .ok_or_else(|| AccountError::NotFound(id.to_string()))?;
        account.is_locked = false;
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn get_system_account(
        &self,
        currency: &str,
        account_type: AccountType,
        purpose: Purpose,
    ) -> AccountResult<Account> {
        let prefix = match purpose {
            Purpose::Liquidity => "LIQ",
            Purpose::Fees => "FEE",
            Purpose::Clearing => "CLR",
            Purpose::Settlement => "SET",
            other => {
                return Err(AccountError::Invalid(format!(
                    "{other} is not a system account purpose"
                )));
            }
        };
        let account_number = format!("SYS-{prefix}-{currency}");
        let account = self.get_by_number(&account_number).await?;
        if account.owner_type != OwnerType::System || account.purpose != purpose {
            return Err(AccountError::Invalid(format!(
                "{account_number} is not a {purpose} system account"
            )));
        }
        if account.account_type != account_type {
            return Err(AccountError::Invalid(format!(
                "{account_number} is a {} account, expected {account_type}",
                account.account_type
            )));
        }
        Ok(account)
    }

    async fn get_system_fee_account(&self, currency: &str) -> AccountResult<Account> {
        self.get_system_account(currency, AccountType::Real, Purpose::Fees)
            .await
    }

    async fn get_or_create_user_accounts(
        &self,
        owner_type: OwnerType,
        owner_id: &str,
        account_type: AccountType,
        demo_currencies: &[(String, i64)],
    ) -> AccountResult<Vec<Account>> {
        match account_type {
            AccountType::Real => {
                let existing = self.get_by_owner(owner_type, owner_id, account_type).await?;
                if let Some(wallet) = existing
                    .iter()
                    .find(|a| a.purpose == Purpose::Wallet && a.currency == "USD")
                {
                    return Ok(vec![wallet.clone()]);
                }
                let wallet = self
                    .create(Account {
                        id: 0,
                        account_number: String::new(),
                        owner_type,
                        owner_id: owner_id.to_string(),
                        currency: "USD".to_string(),
                        purpose: Purpose::Wallet,
                        account_type,
                        is_active: true,
                        is_locked: false,
                        overdraft_limit: 0,
                        parent_agent_external_id: None,
                        commission_rate: None,
                        created_at: Utc::now(),
                        updated_at: Utc::now(),
                    })
                    .await?;
                Ok(vec![wallet])
            }
            AccountType::Demo => {
                let mut out = Vec::with_capacity(demo_currencies.len());
                for (currency, initial_balance) in demo_currencies {
                    let account = self
                        .create(Account {
                            id: 0,
                            account_number: String::new(),
                            owner_type,
                            owner_id: owner_id.to_string(),
                            currency: currency.clone(),
                            purpose: Purpose::Wallet,
                            account_type,
                            is_active: true,
                            is_locked: false,
                            overdraft_limit: 0,
                            parent_agent_external_id: None,
                            commission_rate: None,
                            created_at: Utc::now(),
                            updated_at: Utc::now(),
                        })
                        .await?;
                    self.balances
                        .seed_demo_balance(account.id, *initial_balance)
                        .await
                        .map_err(|e| {
                            AccountError::Internal(format!(
                                "failed to seed demo balance for {}: {e}",
                                account.account_number
                            ))
                        })?;
                    out.push(account);
                }
                Ok(out)
            }
        }
    }

    async fn get_or_create_agent_account(
        &self,
        agent_external_id: &str,
        currency: &str,
        commission_rate: Option<f64>,
    ) -> AccountResult<Account> {
        let existing = self
            .get_by_owner(OwnerType::Agent, agent_external_id, AccountType::Real)
            .await?;
        if let Some(account) = existing
            .into_iter()
            .find(|a| a.currency == currency && a.purpose == Purpose::Commission)
        {
            return Ok(account);
        }
        self.create(Account {
            id: 0,
            account_number: String::new(),
            owner_type: OwnerType::Agent,
            owner_id: agent_external_id.to_string(),
            currency: currency.to_string(),
            purpose: Purpose::Commission,
            account_type: AccountType::Real,
            is_active: true,
            is_locked: false,
            overdraft_limit: 0,
            parent_agent_external_id: Some(agent_external_id.to_string()),
            commission_rate,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
    }
}
