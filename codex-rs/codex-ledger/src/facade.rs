//! High-level Operations: the eight caller-facing entry points layered
//! thinly over [`Engine::execute`]. Each one builds the
//! [`TransactionRequest`] a caller would otherwise have to hand-assemble
//! and resolves the system account the leg posts against, but writes
//! nothing the engine itself would not have written for an equivalent
//! request built by hand.

use std::sync::Arc;

use chrono::Utc;

use crate::AccountType;
use crate::account::Purpose;
use crate::engine::ConcurrencyMode;
use crate::engine::Engine;
use crate::engine::EngineResult;
use crate::engine::ExecutionResult;
use crate::engine::TransactionEntry;
use crate::engine::TransactionRequest;
use crate::engine::round_half_up;
use crate::journal::TransactionType;
use crate::ledger::DrCr;

/// Caller-supplied request metadata common to every façade call. Kept
/// separate from the amount/currency/account arguments so call sites read
/// as "move this money" rather than a single sprawling struct literal.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub idempotency_key: Option<String>,
    pub external_ref: Option<String>,
    pub receipt_code: Option<String>,
    pub description: Option<String>,
    pub created_by_external_id: Option<String>,
    pub created_by_type: Option<String>,
    /// `None` uses `EngineConfig::default_mode`.
    pub mode: Option<ConcurrencyMode>,
}

fn trade_metadata(trade_id: &str, trade_result: &str) -> serde_json::Value {
    serde_json::json!({
        "trade_id": trade_id,
        "trade_type": "trade",
        "trade_result": trade_result,
    })
}

/// Thin façade over [`Engine`]; holds no state of its own beyond the engine
/// it wraps.
pub struct LedgerFacade {
    engine: Arc<Engine>,
}

impl LedgerFacade {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Posts one leg against `account_number` and the matching system
    /// account for `system_purpose`/`currency`, with the system leg taking
    /// the opposite DR/CR side.
    #[allow(clippy::too_many_arguments)]
    async fn post_against_system(
        &self,
        account_number: &str,
        amount: i64,
        currency: &str,
        account_type: AccountType,
        system_purpose: Purpose,
        transaction_type: TransactionType,
        account_dr_cr: DrCr,
        ctx: RequestContext,
        metadata: Option<serde_json::Value>,
    ) -> EngineResult<ExecutionResult> {
        let system_account = self
            .engine
            .accounts()
            .get_system_account(currency, account_type, system_purpose)
            .await?;
        let system_dr_cr = match account_dr_cr {
            DrCr::Dr => DrCr::Cr,
            DrCr::Cr => DrCr::Dr,
        };
        let request = TransactionRequest {
            idempotency_key: ctx.idempotency_key,
            transaction_type,
            account_type,
            receipt_code: ctx.receipt_code,
            external_ref: ctx.external_ref,
            description: ctx.description,
            created_by_external_id: ctx.created_by_external_id,
            created_by_type: ctx.created_by_type,
            is_system_transaction: true,
            agent_external_id: None,
            entries: vec![
                TransactionEntry {
                    account_number: account_number.to_string(),
                    amount,
                    dr_cr: account_dr_cr,
                    currency: currency.to_string(),
                    receipt_code: None,
                    description: None,
                    metadata: metadata.clone(),
                },
                TransactionEntry {
                    account_number: system_account.account_number,
                    amount,
                    dr_cr: system_dr_cr,
                    currency: currency.to_string(),
                    receipt_code: None,
                    description: None,
                    metadata,
                },
            ],
        };
        self.engine.execute(request, ctx.mode).await
    }

    /// Credits `account_number`, debiting the platform's liquidity account.
    pub async fn deposit(
        &self,
        account_number: &str,
        amount: i64,
        currency: &str,
        account_type: AccountType,
        ctx: RequestContext,
    ) -> EngineResult<ExecutionResult> {
        self.post_against_system(
            account_number,
            amount,
            currency,
            account_type,
            Purpose::Liquidity,
            TransactionType::Deposit,
            DrCr::Cr,
            ctx,
            None,
        )
        .await
    }

    /// Debits `account_number`, crediting the platform's liquidity account.
    pub async fn withdrawal(
        &self,
        account_number: &str,
        amount: i64,
        currency: &str,
        account_type: AccountType,
        ctx: RequestContext,
    ) -> EngineResult<ExecutionResult> {
        self.post_against_system(
            account_number,
            amount,
            currency,
            account_type,
            Purpose::Liquidity,
            TransactionType::Withdrawal,
            DrCr::Dr,
            ctx,
            None,
        )
        .await
    }

    /// Direct two-leg transfer between two user-held accounts; not a system
    /// transaction, so no platform fee row is produced automatically.
    pub async fn transfer(
        &self,
        from_account_number: &str,
        to_account_number: &str,
        amount: i64,
        currency: &str,
        account_type: AccountType,
        ctx: RequestContext,
    ) -> EngineResult<ExecutionResult> {
        let request = TransactionRequest {
            idempotency_key: ctx.idempotency_key,
            transaction_type: TransactionType::Transfer,
            account_type,
            receipt_code: ctx.receipt_code,
            external_ref: ctx.external_ref,
            description: ctx.description,
            created_by_external_id: ctx.created_by_external_id,
            created_by_type: ctx.created_by_type,
            is_system_transaction: false,
            agent_external_id: None,
            entries: vec![
                TransactionEntry {
                    account_number: from_account_number.to_string(),
                    amount,
                    dr_cr: DrCr::Dr,
                    currency: currency.to_string(),
                    receipt_code: None,
                    description: None,
                    metadata: None,
                },
                TransactionEntry {
                    account_number: to_account_number.to_string(),
                    amount,
                    dr_cr: DrCr::Cr,
                    currency: currency.to_string(),
                    receipt_code: None,
                    description: None,
                    metadata: None,
                },
            ],
        };
        self.engine.execute(request, ctx.mode).await
    }

    /// Converts `source_amount` of `source_currency` to `dest_currency` on
    /// the same account, both legs carrying the resolved fx rate as
    /// metadata. Resolves the rate itself (rather than reusing
    /// [`crate::engine::convert_amount`]) so the row's id and bid/ask
    /// spread survive into the posting metadata.
    #[allow(clippy::too_many_arguments)]
    pub async fn convert(
        &self,
        account_number: &str,
        source_currency: &str,
        dest_currency: &str,
        source_amount: i64,
        account_type: AccountType,
        ctx: RequestContext,
    ) -> EngineResult<ExecutionResult> {
        let rate = self
            .engine
            .fx()
            .get_fx_rate(source_currency, dest_currency, Utc::now())
            .await?;
        let factor = rate.rate_as_f64()?;
        let converted_amount = round_half_up(source_amount as f64 * factor);
        let metadata = serde_json::json!({
            "fx_rate": rate.rate,
            "fx_rate_id": rate.id,
            "source_amount": source_amount,
            "converted_amount": converted_amount,
            "bid_rate": rate.bid_rate,
            "ask_rate": rate.ask_rate,
        });

        let request = TransactionRequest {
            idempotency_key: ctx.idempotency_key,
            transaction_type: TransactionType::Conversion,
            account_type,
            receipt_code: ctx.receipt_code,
            external_ref: ctx.external_ref,
            description: ctx.description,
            created_by_external_id: ctx.created_by_external_id,
            created_by_type: ctx.created_by_type,
            is_system_transaction: false,
            agent_external_id: None,
            entries: vec![
                TransactionEntry {
                    account_number: account_number.to_string(),
                    amount: source_amount,
                    dr_cr: DrCr::Dr,
                    currency: source_currency.to_string(),
                    receipt_code: None,
                    description: None,
                    metadata: Some(metadata.clone()),
                },
                TransactionEntry {
                    account_number: account_number.to_string(),
                    amount: converted_amount,
                    dr_cr: DrCr::Cr,
                    currency: dest_currency.to_string(),
                    receipt_code: None,
                    description: None,
                    metadata: Some(metadata),
                },
            ],
        };
        self.engine.execute(request, ctx.mode).await
    }

    /// Credits a winning trade's payout, debiting the platform's
    /// settlement account.
    pub async fn trade_win(
        &self,
        account_number: &str,
        amount: i64,
        currency: &str,
        account_type: AccountType,
        trade_id: &str,
        ctx: RequestContext,
    ) -> EngineResult<ExecutionResult> {
        self.post_against_system(
            account_number,
            amount,
            currency,
            account_type,
            Purpose::Settlement,
            TransactionType::TradeWin,
            DrCr::Cr,
            ctx,
            Some(trade_metadata(trade_id, "win")),
        )
        .await
    }

    /// Debits a losing trade's stake, crediting the platform's settlement
    /// account.
    pub async fn trade_loss(
        &self,
        account_number: &str,
        amount: i64,
        currency: &str,
        account_type: AccountType,
        trade_id: &str,
        ctx: RequestContext,
    ) -> EngineResult<ExecutionResult> {
        self.post_against_system(
            account_number,
            amount,
            currency,
            account_type,
            Purpose::Settlement,
            TransactionType::TradeLoss,
            DrCr::Dr,
            ctx,
            Some(trade_metadata(trade_id, "loss")),
        )
        .await
    }

    /// Credits an agent's commission account, debiting the platform's fee
    /// account. Creates the agent account lazily if this is its first
    /// commission.
    pub async fn process_agent_commission(
        &self,
        agent_external_id: &str,
        amount: i64,
        currency: &str,
        originating_ref: &str,
        commission_rate: Option<f64>,
        ctx: RequestContext,
    ) -> EngineResult<ExecutionResult> {
        let agent_account = self
            .engine
            .accounts()
            .get_or_create_agent_account(agent_external_id, currency, commission_rate)
            .await?;
        let fee_account = self.engine.accounts().get_system_fee_account(currency).await?;
        let metadata = serde_json::json!({
            "agent_external_id": agent_external_id,
            "originating_ref": originating_ref,
            "commission_rate": commission_rate,
        });

        let request = TransactionRequest {
            idempotency_key: ctx.idempotency_key,
            transaction_type: TransactionType::Commission,
            account_type: AccountType::Real,
            receipt_code: ctx.receipt_code,
            external_ref: ctx.external_ref.or_else(|| Some(originating_ref.to_string())),
            description: ctx.description,
            created_by_external_id: ctx.created_by_external_id,
            created_by_type: ctx.created_by_type,
            is_system_transaction: true,
            agent_external_id: Some(agent_external_id.to_string()),
            entries: vec![
                TransactionEntry {
                    account_number: fee_account.account_number,
                    amount,
                    dr_cr: DrCr::Dr,
                    currency: currency.to_string(),
                    receipt_code: None,
                    description: None,
                    metadata: Some(metadata.clone()),
                },
                TransactionEntry {
                    account_number: agent_account.account_number,
                    amount,
                    dr_cr: DrCr::Cr,
                    currency: currency.to_string(),
                    receipt_code: None,
                    description: None,
                    metadata: Some(metadata),
                },
            ],
        };
        self.engine.execute(request, ctx.mode).await
    }

    /// Moves `amount` from available into pending-reserved on one account.
    pub async fn reserve(&self, account_number: &str, amount: i64) -> EngineResult<crate::balance::Balance> {
        self.engine.reserve_funds(account_number, amount).await
    }

    /// Releases a prior reservation; `complete` settles it into the posted
    /// balance, `false` returns it to available.
    pub async fn release(
        &self,
        account_number: &str,
        amount: i64,
        complete: bool,
    ) -> EngineResult<crate::balance::Balance> {
        self.engine.release_funds(account_number, amount, complete).await
    }
}
