//! Currency/FX Store: reads of current and historical FX rates by
//! `(base, quote, as_of)`. Writes are a seeder collaborator's job in
//! production; the core still exposes `upsert_rate` so the in-memory store
//! is self-contained rather than perpetually empty.
//!
//! Real deployment schema (contract):
//! ```sql
//! CREATE TABLE fx_rates (
//!     id BIGSERIAL PRIMARY KEY,
//!     base_currency TEXT NOT NULL,
//!     quote_currency TEXT NOT NULL,
//!     rate TEXT NOT NULL,
//!     as_of TIMESTAMPTZ NOT NULL,
//!     bid_rate TEXT,
//!     ask_rate TEXT,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     UNIQUE (base_currency, quote_currency, as_of)
//! );
//! ```

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::FxRateId;

#[derive(Debug, Clone, PartialEq)]
pub struct FxRate {
    pub id: FxRateId,
    pub base_currency: String,
    pub quote_currency: String,
    /// String-encoded decimal so callers never lose
    /// precision round-tripping through a float.
    pub rate: String,
    pub as_of: DateTime<Utc>,
    pub bid_rate: Option<String>,
    pub ask_rate: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FxRate {
    /// Parsed decimal rate used by the orchestrator to compute converted
    /// amounts. Kept off the wire type itself (`rate` stays string-encoded)
    /// so storage and arithmetic use are clearly separated.
    pub fn rate_as_f64(&self) -> Result<f64, FxError> {
        self.rate
            .parse()
            .map_err(|_| FxError::Invalid(format!("non-numeric rate {:?}", self.rate)))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FxError {
    #[error("no fx rate for {base}/{quote} as of {as_of}")]
    RateUnavailable {
        base: String,
        quote: String,
        as_of: DateTime<Utc>,
    },
    #[error("invalid fx rate: {0}")]
    Invalid(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type FxResult<T> = Result<T, FxError>;

#[async_trait]
pub trait FxStore: Send + Sync {
    /// Most recent row with `as_of <= as_of`.
    async fn get_fx_rate(
        &self,
        base: &str,
        quote: &str,
        as_of: DateTime<Utc>,
    ) -> FxResult<FxRate>;
    async fn list_fx_rates(&self, base: &str) -> FxResult<Vec<FxRate>>;
    async fn upsert_rate(
        &self,
        base: &str,
        quote: &str,
        rate: String,
        as_of: DateTime<Utc>,
        bid_rate: Option<String>,
        ask_rate: Option<String>,
    ) -> FxResult<FxRate>;
}

#[derive(Default)]
pub struct InMemoryFxStore {
    rows: Mutex<Vec<FxRate>>,
    ids: AtomicI64,
}

impl InMemoryFxStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            ids: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl FxStore for InMemoryFxStore {
    async fn get_fx_rate(
        &self,
        base: &str,
        quote: &str,
        as_of: DateTime<Utc>,
    ) -> FxResult<FxRate> {
        let rows = self.rows.lock().await;
        rows.iter()
            .filter(|r| r.base_currency == base && r.quote_currency == quote && r.as_of <= as_of)
            .max_by_key(|r| r.as_of)
            .cloned()
            .ok_or_else(|| FxError::RateUnavailable {
                base: base.to_string(),
                quote: quote.to_string(),
                as_of,
            })
    }

    async fn list_fx_rates(&self, base: &str) -> FxResult<Vec<FxRate>> {
        let mut rows = self.rows.lock().await;
        let mut out: Vec<FxRate> = rows
            .iter()
            .filter(|r| r.base_currency == base)
            .cloned()
            .collect();
        out.sort_by_key(|r| std::cmp::Reverse(r.as_of));
        // Keep the backing store's own ordering stable across calls.
        rows.sort_by_key(|r| r.id);
        Ok(out)
    }

    async fn upsert_rate(
        &self,
        base: &str,
        quote: &str,
        rate: String,
        as_of: DateTime<Utc>,
        bid_rate: Option<String>,
        ask_rate: Option<String>,
    ) -> FxResult<FxRate> {
        let mut rows = self.rows.lock().await;
        if let Some(existing) = rows
            .iter_mut()
            .find(|r| r.base_currency == base && r.quote_currency == quote && r.as_of == as_of)
        {
            existing.rate = rate;
            existing.bid_rate = bid_rate;
            existing.ask_rate = ask_rate;
            return Ok(existing.clone());
        }
        let id = self.ids.fetch_add(1, Ordering::SeqCst);
        let row = FxRate {
            id,
            base_currency: base.to_string(),
            quote_currency: quote.to_string(),
            rate,
            as_of,
            bid_rate,
            ask_rate,
            created_at: Utc::now(),
        };
        rows.push(row.clone());
        Ok(row)
    }
}

/// Convenience used by tests and the façade's demo wiring to pre-load a
/// rate table without going through `upsert_rate` one call at a time.
pub async fn seed_rates(store: &InMemoryFxStore, rates: &[(&str, &str, &str, DateTime<Utc>)]) -> FxResult<()> {
    for (base, quote, rate, as_of) in rates {
        store
            .upsert_rate(base, quote, (*rate).to_string(), *as_of, None, None)
            .await?;
    }
    Ok(())
}
