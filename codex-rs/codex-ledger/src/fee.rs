//! Fee Store: persists fee rows collected per transaction.
//!
//! Real deployment schema (contract):
//! ```sql
//! CREATE TABLE transaction_fees (
//!     id BIGSERIAL PRIMARY KEY,
//!     receipt_code TEXT NOT NULL,
//!     fee_rule_id TEXT,
//!     fee_type TEXT NOT NULL,
//!     amount BIGINT NOT NULL,
//!     currency TEXT NOT NULL,
//!     collected_by_account_id BIGINT,
//!     ledger_id BIGINT,
//!     agent_external_id TEXT,
//!     commission_rate DOUBLE PRECISION,
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

use crate::AccountId;
use crate::FeeId;
use crate::LedgerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeType {
    Platform,
    AgentCommission,
}

impl std::fmt::Display for FeeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FeeType::Platform => "platform",
            FeeType::AgentCommission => "agent_commission",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeeRow {
    pub id: FeeId,
    pub receipt_code: String,
    pub fee_rule_id: Option<String>,
    pub fee_type: FeeType,
    pub amount: i64,
    pub currency: String,
    pub collected_by_account_id: Option<AccountId>,
    pub ledger_id: Option<LedgerId>,
    pub agent_external_id: Option<String>,
    pub commission_rate: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum FeeError {
    #[error("invalid fee row: {0}")]
    Invalid(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type FeeResult<T> = Result<T, FeeError>;

fn validate(fee: &FeeRow) -> FeeResult<()> {
    if fee.currency.is_empty() || fee.currency.len() > 8 {
        return Err(FeeError::Invalid(format!(
            "currency {:?} must be 1-8 chars",
            fee.currency
        )));
    }
    if fee.amount < 0 {
        return Err(FeeError::Invalid("fee amount must not be negative".into()));
    }
    if fee.fee_type == FeeType::AgentCommission && fee.agent_external_id.is_none() {
        return Err(FeeError::Invalid(
            "agent_commission fees require agent_external_id".into(),
        ));
    }
    Ok(())
}

#[async_trait]
pub trait FeeStore: Send + Sync {
    async fn create(&self, fee: FeeRow) -> FeeResult<FeeRow>;
    async fn create_batch(&self, fees: Vec<FeeRow>) -> (Vec<FeeRow>, HashMap<usize, FeeError>);
    async fn list_by_receipt_code(&self, receipt_code: &str) -> FeeResult<Vec<FeeRow>>;
    async fn get_total_fees_by_type(
        &self,
        fee_type: FeeType,
    ) -> FeeResult<HashMap<String, i64>>;
    async fn get_agent_commission_summary(
        &self,
        agent_external_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> FeeResult<HashMap<String, i64>>;
}

#[derive(Default)]
pub struct InMemoryFeeStore {
    rows: Mutex<Vec<FeeRow>>,
    ids: AtomicI64,
}

impl InMemoryFeeStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            ids: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl FeeStore for InMemoryFeeStore {
    async fn create(&self, mut fee: FeeRow) -> FeeResult<FeeRow> {
        validate(&fee)?;
        let mut rows = self.rows.lock().await;
        fee.id = self.ids.fetch_add(1, Ordering::SeqCst);
        fee.created_at = Utc::now();
        rows.push(fee.clone());
        Ok(fee)
    }

    async fn create_batch(&self, fees: Vec<FeeRow>) -> (Vec<FeeRow>, HashMap<usize, FeeError>) {
        let mut created = Vec::with_capacity(fees.len());
        let mut failures = HashMap::new();
        for (idx, fee) in fees.into_iter().enumerate() {
            match self.create(fee).await {
                Ok(row) => created.push(row),
                Err(e) => {
                    failures.insert(idx, e);
                }
            }
        }
        (created, failures)
    }

    async fn list_by_receipt_code(&self, receipt_code: &str) -> FeeResult<Vec<FeeRow>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|r| r.receipt_code == receipt_code)
            .cloned()
            .collect())
    }

    async fn get_total_fees_by_type(
        &self,
        fee_type: FeeType,
    ) -> FeeResult<HashMap<String, i64>> {
        let rows = self.rows.lock().await;
        let mut totals: HashMap<String, i64> = HashMap::new();
        for row in rows.iter().filter(|r| r.fee_type == fee_type) {
            *totals.entry(row.currency.clone()).or_insert(0) += row.amount;
        }
        Ok(totals)
    }

    async fn get_agent_commission_summary(
        &self,
        agent_external_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> FeeResult<HashMap<String, i64>> {
        let rows = self.rows.lock().await;
        let mut totals: HashMap<String, i64> = HashMap::new();
        for row in rows.iter().filter(|r| {
            r.fee_type == FeeType::AgentCommission
                && r.agent_external_id.as_deref() == Some(agent_external_id)
                && r.created_at >= from
                && r.created_at <= to
        }) {
            *totals.entry(row.currency.clone()).or_insert(0) += row.amount;
        }
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform_fee(receipt_code: &str, amount: i64) -> FeeRow {
        FeeRow {
            id: 0,
            receipt_code: receipt_code.to_string(),
            fee_rule_id: None,
            fee_type: FeeType::Platform,
            amount,
            currency: "USD".to_string(),
            collected_by_account_id: None,
            ledger_id: None,
            agent_external_id: None,
            commission_rate: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn agent_commission_requires_agent_external_id() {
        let store = InMemoryFeeStore::new();
        let mut fee = platform_fee("R1", 100);
        fee.fee_type = FeeType::AgentCommission;
        let err = store.create(fee).await;
        assert!(matches!(err, Err(FeeError::Invalid(_))));
    }

    #[tokio::test]
    async fn create_batch_is_sparse_on_invalid_currency() {
        let store = InMemoryFeeStore::new();
        let mut bad = platform_fee("R2", 50);
        bad.currency = "WAYTOOLONGCODE".to_string();
        let (created, failures) = store
            .create_batch(vec![platform_fee("R1", 100), bad])
            .await;
        assert_eq!(created.len(), 1);
        assert_eq!(failures.len(), 1);
        assert!(failures.contains_key(&1));
    }

    #[tokio::test]
    async fn list_by_receipt_code_filters_unrelated_rows() {
        let store = InMemoryFeeStore::new();
        store.create(platform_fee("R1", 100)).await.unwrap();
        store.create(platform_fee("R2", 50)).await.unwrap();
        let rows = store.list_by_receipt_code("R1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, 100);
    }

    #[tokio::test]
    async fn totals_aggregate_by_currency() {
        let store = InMemoryFeeStore::new();
        store.create(platform_fee("R1", 100)).await.unwrap();
        store.create(platform_fee("R2", 50)).await.unwrap();
        let totals = store
            .get_total_fees_by_type(FeeType::Platform)
            .await
            .unwrap();
        assert_eq!(totals.get("USD"), Some(&150));
    }
}
