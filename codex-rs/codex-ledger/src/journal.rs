//! Journal Store: append-only transaction headers keyed by an optional
//! idempotency key.
//!
//! Real deployment schema (contract):
//! ```sql
//! CREATE TABLE journals (
//!     id BIGSERIAL PRIMARY KEY,
//!     idempotency_key TEXT UNIQUE,
//!     transaction_type TEXT NOT NULL,
//!     account_type TEXT NOT NULL,
//!     external_ref TEXT,
//!     description TEXT,
//!     created_by_external_id TEXT,
//!     created_by_type TEXT,
//!     ip_address TEXT,
//!     user_agent TEXT,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! ```

use std::collections::HashMap;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::AccountType;
use crate::JournalId;

/// `transaction_type` is an open set at the boundary — room is left for
/// types this core doesn't name; `Other` carries whatever the caller passed
/// through unrecognized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
    Conversion,
    TradeWin,
    TradeLoss,
    Commission,
    Other(String),
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Transfer => "transfer",
            TransactionType::Conversion => "conversion",
            TransactionType::TradeWin => "trade_win",
            TransactionType::TradeLoss => "trade_loss",
            TransactionType::Commission => "commission",
            TransactionType::Other(s) => s,
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Journal {
    pub id: JournalId,
    pub idempotency_key: Option<String>,
    pub transaction_type: TransactionType,
    pub account_type: AccountType,
    pub external_ref: Option<String>,
    pub description: Option<String>,
    pub created_by_external_id: Option<String>,
    pub created_by_type: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal not found: {0}")]
    NotFound(String),
    #[error("idempotency key already used: {0}")]
    DuplicateIdempotencyKey(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type JournalResult<T> = Result<T, JournalError>;

#[async_trait]
pub trait JournalStore: Send + Sync {
    /// Fails [`JournalError::DuplicateIdempotencyKey`] if `header.idempotency_key`
    /// is `Some` and already in use; the caller resolves that race by calling
    /// [`JournalStore::get_by_idempotency_key`] and replaying.
    async fn create(&self, header: Journal) -> JournalResult<Journal>;
    async fn get_by_id(&self, id: JournalId) -> JournalResult<Journal>;
    async fn get_by_idempotency_key(&self, key: &str) -> JournalResult<Journal>;
}

#[derive(Default)]
struct State {
    by_id: HashMap<JournalId, Journal>,
    by_key: HashMap<String, JournalId>,
}

#[derive(Default)]
pub struct InMemoryJournalStore {
    state: Mutex<State>,
    ids: AtomicI64,
}

impl InMemoryJournalStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            ids: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl JournalStore for InMemoryJournalStore {
    async fn create(&self, mut header: Journal) -> JournalResult<Journal> {
        let mut state = self.state.lock().await;
        if let Some(key) = &header.idempotency_key {
            if state.by_key.contains_key(key) {
                return Err(JournalError::DuplicateIdempotencyKey(key.clone()));
            }
        }
        let id = self.ids.fetch_add(1, Ordering::SeqCst);
        header.id = id;
        header.created_at = Utc::now();
        if let Some(key) = &header.idempotency_key {
            state.by_key.insert(key.clone(), id);
        }
        state.by_id.insert(id, header.clone());
        Ok(header)
    }

    async fn get_by_id(&self, id: JournalId) -> JournalResult<Journal> {
        let state = self.state.lock().await;
        state
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| JournalError::NotFound(id.to_string()))
    }

    async fn get_by_idempotency_key(&self, key: &str) -> JournalResult<Journal> {
        let state = self.state.lock().await;
        let id = state
            .by_key
            .get(key)
            .copied()
            .ok_or_else(|| JournalError::NotFound(key.to_string()))?;
        Ok(state.by_id[&id].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(idempotency_key: Option<&str>) -> Journal {
        Journal {
            id: 0,
            idempotency_key: idempotency_key.map(str::to_string),
            transaction_type: TransactionType::Transfer,
            account_type: AccountType::Real,
            external_ref: None,
            description: None,
            created_by_external_id: None,
            created_by_type: None,
            ip_address: None,
            user_agent: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_rejected() {
        let store = InMemoryJournalStore::new();
        let created = store.create(header(Some("k1"))).await.unwrap();
        let duplicate = store.create(header(Some("k1"))).await;
        assert!(matches!(
            duplicate,
            Err(JournalError::DuplicateIdempotencyKey(_))
        ));

        let replay = store.get_by_idempotency_key("k1").await.unwrap();
        assert_eq!(replay.id, created.id);
    }

    #[tokio::test]
    async fn journals_without_a_key_never_collide() {
        let store = InMemoryJournalStore::new();
        let a = store.create(header(None)).await.unwrap();
        let b = store.create(header(None)).await.unwrap();
        assert_ne!(a.id, b.id);
    }
}
