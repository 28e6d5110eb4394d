//! End-to-end coverage of the public `Engine`/`LedgerFacade` surface: one
//! test per scenario, driven entirely through `codex_ledger`'s exported
//! API rather than any store internals.

use std::sync::Arc;

use chrono::Utc;
use codex_ledger::AccountStore;
use codex_ledger::AccountType;
use codex_ledger::Balance;
use codex_ledger::BalanceStore;
use codex_ledger::ConcurrencyMode;
use codex_ledger::DrCr;
use codex_ledger::Engine;
use codex_ledger::EngineConfig;
use codex_ledger::EngineError;
use codex_ledger::FxStore;
use codex_ledger::InMemoryAccountStore;
use codex_ledger::InMemoryBalanceStore;
use codex_ledger::InMemoryFeeStore;
use codex_ledger::InMemoryFxStore;
use codex_ledger::InMemoryJournalStore;
use codex_ledger::InMemoryLedgerStore;
use codex_ledger::JournalStore;
use codex_ledger::LedgerFacade;
use codex_ledger::LedgerStore;
use codex_ledger::OwnerType;
use codex_ledger::Purpose;
use codex_ledger::RequestContext;
use codex_ledger::TransactionEntry;
use codex_ledger::TransactionRequest;
use codex_ledger::TransactionType;

struct Harness {
    facade: LedgerFacade,
}

async fn harness() -> Harness {
    let balances: Arc<dyn BalanceStore> = Arc::new(InMemoryBalanceStore::new());
    let accounts: Arc<dyn AccountStore> = Arc::new(InMemoryAccountStore::new(balances.clone()));
    let journals: Arc<dyn JournalStore> = Arc::new(InMemoryJournalStore::new());
    let ledgers: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::new());
    let fx: Arc<dyn FxStore> = Arc::new(InMemoryFxStore::new());

    for (purpose, prefix) in [
        (Purpose::Liquidity, "LIQ"),
        (Purpose::Fees, "FEE"),
        (Purpose::Clearing, "CLR"),
        (Purpose::Settlement, "SET"),
    ] {
        accounts
            .create(codex_ledger::Account {
                id: 0,
                account_number: format!("SYS-{prefix}-USD"),
                owner_type: OwnerType::System,
                owner_id: String::new(),
                currency: "USD".to_string(),
                purpose,
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
            .expect("system account created");
    }

    let engine = Arc::new(
        Engine::new(accounts, balances, journals, ledgers, fx, EngineConfig::default())
            .with_fee_store(Arc::new(InMemoryFeeStore::new())),
    );
    Harness {
        facade: LedgerFacade::new(engine),
    }
}

async fn wallet(harness: &Harness, owner_id: &str) -> codex_ledger::Account {
    harness
        .facade
        .engine()
        .accounts()
        .get_or_create_user_accounts(OwnerType::User, owner_id, AccountType::Real, &[])
        .await
        .expect("wallet created")
        .remove(0)
}

async fn balance_of(harness: &Harness, account_id: i64) -> Balance {
    harness
        .facade
        .engine()
        .balances()
        .get_by_account_id(account_id)
        .await
        .expect("balance read")
}

fn transfer_request(from: &str, to: &str, amount: i64, idempotency_key: Option<&str>) -> TransactionRequest {
    TransactionRequest {
        idempotency_key: idempotency_key.map(str::to_string),
        transaction_type: TransactionType::Transfer,
        account_type: AccountType::Real,
        receipt_code: None,
        external_ref: None,
        description: Some("integration transfer".to_string()),
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
async fn scenario_1_simple_transfer_same_currency() {
    let harness = harness().await;
    let u1 = wallet(&harness, "u1").await;
    let u2 = wallet(&harness, "u2").await;
    harness
        .facade
        .deposit(&u1.account_number, 1_000, "USD", AccountType::Real, RequestContext::default())
        .await
        .expect("seed deposit");

    let result = harness
        .facade
        .engine()
        .execute(transfer_request(&u1.account_number, &u2.account_number, 250, None), None)
        .await
        .expect("transfer succeeds");
    assert_eq!(result.postings.len(), 2);
    let dr = result.postings.iter().find(|p| p.dr_cr == DrCr::Dr).unwrap();
    let cr = result.postings.iter().find(|p| p.dr_cr == DrCr::Cr).unwrap();
    assert_eq!(dr.amount, 250);
    assert_eq!(cr.amount, 250);

    assert_eq!(balance_of(&harness, u1.id).await.balance, 750);
    assert_eq!(balance_of(&harness, u2.id).await.balance, 250);
}

#[tokio::test]
async fn scenario_2_idempotent_replay_is_byte_for_byte() {
    let harness = harness().await;
    let u1 = wallet(&harness, "u1").await;
    let u2 = wallet(&harness, "u2").await;
    harness
        .facade
        .deposit(&u1.account_number, 1_000, "USD", AccountType::Real, RequestContext::default())
        .await
        .expect("seed deposit");

    let request = transfer_request(&u1.account_number, &u2.account_number, 250, Some("scenario-2"));
    let first = harness.facade.engine().execute(request.clone(), None).await.expect("first call");
    let second = harness.facade.engine().execute(request, None).await.expect("replay call");

    assert_eq!(first.journal.id, second.journal.id);
    assert_eq!(first.postings.len(), second.postings.len());
    for (a, b) in first.postings.iter().zip(second.postings.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.amount, b.amount);
        assert_eq!(a.currency, b.currency);
        assert_eq!(a.balance_after, b.balance_after);
    }
    assert_eq!(balance_of(&harness, u1.id).await.balance, 750);
}

#[tokio::test]
async fn scenario_3_system_deposit_writes_zero_value_fee() {
    let harness = harness().await;
    let u1 = wallet(&harness, "u1").await;

    let result = harness
        .facade
        .deposit(&u1.account_number, 500, "USD", AccountType::Real, RequestContext::default())
        .await
        .expect("deposit succeeds");

    let dr = result.postings.iter().find(|p| p.dr_cr == DrCr::Dr).unwrap();
    let cr = result.postings.iter().find(|p| p.dr_cr == DrCr::Cr).unwrap();
    assert_eq!(dr.amount, 500);
    assert_eq!(cr.amount, 500);
    assert_eq!(result.fees.len(), 1);
    assert_eq!(result.fees[0].amount, 0);
    assert_eq!(balance_of(&harness, u1.id).await.balance, 500);
}

#[tokio::test]
async fn scenario_4_currency_conversion_records_fx_metadata() {
    let harness = harness().await;
    harness
        .facade
        .engine()
        .fx()
        .upsert_rate("USD", "EUR", "0.90".to_string(), Utc::now(), None, None)
        .await
        .expect("seed rate");
    let u1 = wallet(&harness, "u1").await;
    harness
        .facade
        .deposit(&u1.account_number, 1_000, "USD", AccountType::Real, RequestContext::default())
        .await
        .expect("seed deposit");

    let result = harness
        .facade
        .convert(&u1.account_number, "USD", "EUR", 100, AccountType::Real, RequestContext::default())
        .await
        .expect("conversion succeeds");

    let usd_leg = result.postings.iter().find(|p| p.currency == "USD").unwrap();
    let eur_leg = result.postings.iter().find(|p| p.currency == "EUR").unwrap();
    assert_eq!(usd_leg.amount, 100);
    assert_eq!(eur_leg.amount, 90);
    assert_eq!(usd_leg.metadata.as_ref().unwrap()["fx_rate"], "0.90");
    assert_eq!(eur_leg.metadata.as_ref().unwrap()["fx_rate"], "0.90");

    assert_eq!(balance_of(&harness, u1.id).await.balance, 900);
}

#[tokio::test]
async fn scenario_5_insufficient_funds_respects_overdraft_boundary() {
    let harness = harness().await;
    let u1 = wallet(&harness, "u1").await;
    harness
        .facade
        .deposit(&u1.account_number, 100, "USD", AccountType::Real, RequestContext::default())
        .await
        .expect("seed deposit");
    let mut account = harness.facade.engine().accounts().get_by_number(&u1.account_number).await.unwrap();
    account.overdraft_limit = 50;
    harness.facade.engine().accounts().update(account).await.unwrap();

    let sink = wallet(&harness, "sink").await;

    let rejected = harness
        .facade
        .transfer(&u1.account_number, &sink.account_number, 151, "USD", AccountType::Real, RequestContext::default())
        .await;
    assert!(matches!(rejected, Err(EngineError::InsufficientBalance { .. })));
    assert_eq!(balance_of(&harness, u1.id).await.balance, 100);

    let accepted = harness
        .facade
        .transfer(&u1.account_number, &sink.account_number, 150, "USD", AccountType::Real, RequestContext::default())
        .await
        .expect("exactly at the overdraft boundary succeeds");
    assert_eq!(accepted.postings.len(), 2);
    assert_eq!(balance_of(&harness, u1.id).await.balance, -50);
}

#[tokio::test]
async fn scenario_6_optimistic_conflict_then_external_retry() {
    let harness = harness().await;
    let u1 = wallet(&harness, "u1").await;
    let source = wallet(&harness, "source").await;
    harness
        .facade
        .deposit(&source.account_number, 20, "USD", AccountType::Real, RequestContext::default())
        .await
        .expect("fund the source account");

    let request_a = TransactionRequest {
        idempotency_key: None,
        transaction_type: TransactionType::Transfer,
        account_type: AccountType::Real,
        receipt_code: None,
        external_ref: None,
        description: None,
        created_by_external_id: None,
        created_by_type: None,
        is_system_transaction: false,
        agent_external_id: None,
        entries: vec![
            TransactionEntry {
                account_number: source.account_number.clone(),
                amount: 10,
                dr_cr: DrCr::Dr,
                currency: "USD".to_string(),
                receipt_code: None,
                description: None,
                metadata: None,
            },
            TransactionEntry {
                account_number: u1.account_number.clone(),
                amount: 10,
                dr_cr: DrCr::Cr,
                currency: "USD".to_string(),
                receipt_code: None,
                description: None,
                metadata: None,
            },
        ],
    };
    let request_b = request_a.clone();

    // Simulate the second writer reading a stale version by bumping u1's
    // balance out from under it before it commits.
    let first = harness
        .facade
        .engine()
        .execute(request_a, Some(ConcurrencyMode::Optimistic))
        .await
        .expect("first credit commits");
    assert_eq!(first.postings.len(), 2);
    assert_eq!(balance_of(&harness, u1.id).await.balance, 10);

    // Force the version the second call would have captured to be stale by
    // applying an unrelated optimistic update first.
    let stale_conflict = harness
        .facade
        .engine()
        .balances()
        .update_balance_optimistic(
            codex_ledger::BalanceUpdate {
                account_id: u1.id,
                delta: 0,
                overdraft_limit: 0,
                ledger_id: 0,
            },
            0,
        )
        .await;
    assert!(stale_conflict.is_err(), "version 0 is already stale after the first commit");

    let retried = harness
        .facade
        .engine()
        .execute(request_b, Some(ConcurrencyMode::Optimistic))
        .await
        .expect("retry succeeds against the current version");
    assert_eq!(retried.postings.len(), 2);
    assert_eq!(balance_of(&harness, u1.id).await.balance, 20);
}

#[tokio::test]
async fn boundary_amount_one_is_accepted_amount_zero_is_rejected() {
    let harness = harness().await;
    let u1 = wallet(&harness, "u1").await;
    let u2 = wallet(&harness, "u2").await;
    harness
        .facade
        .deposit(&u1.account_number, 10, "USD", AccountType::Real, RequestContext::default())
        .await
        .expect("seed deposit");

    let ok = harness
        .facade
        .engine()
        .execute(transfer_request(&u1.account_number, &u2.account_number, 1, None), None)
        .await;
    assert!(ok.is_ok());

    let rejected = harness
        .facade
        .engine()
        .execute(transfer_request(&u1.account_number, &u2.account_number, 0, None), None)
        .await;
    assert!(matches!(rejected, Err(EngineError::InvalidRequest(_))));
}

#[tokio::test]
async fn boundary_currency_length_eight_accepted_nine_rejected() {
    let harness = harness().await;
    let u1 = wallet(&harness, "u1").await;
    let u2 = wallet(&harness, "u2").await;

    let mut eight = transfer_request(&u1.account_number, &u2.account_number, 10, None);
    for entry in &mut eight.entries {
        entry.currency = "ABCDEFGH".to_string();
    }
    // The account store's wallets are USD-denominated; an 8-char currency
    // mismatches the account currency rather than failing InvalidRequest,
    // which still proves the length itself passed validation.
    let result = harness.facade.engine().execute(eight, None).await;
    assert!(matches!(result, Err(EngineError::CurrencyMismatch { .. })));

    let mut nine = transfer_request(&u1.account_number, &u2.account_number, 10, None);
    for entry in &mut nine.entries {
        entry.currency = "ABCDEFGHI".to_string();
    }
    let rejected = harness.facade.engine().execute(nine, None).await;
    assert!(matches!(rejected, Err(EngineError::InvalidRequest(_))));
}

#[tokio::test]
async fn boundary_locked_account_fails_whole_journal() {
    let harness = harness().await;
    let u1 = wallet(&harness, "u1").await;
    let u2 = wallet(&harness, "u2").await;
    harness
        .facade
        .deposit(&u1.account_number, 100, "USD", AccountType::Real, RequestContext::default())
        .await
        .expect("seed deposit");
    harness.facade.engine().accounts().lock(u1.id).await.expect("lock account");

    let result = harness
        .facade
        .engine()
        .execute(transfer_request(&u1.account_number, &u2.account_number, 10, None), None)
        .await;
    assert!(matches!(result, Err(EngineError::AccountLocked(_))));
    // Nothing committed: u2 never received a posting.
    assert_eq!(balance_of(&harness, u2.id).await.balance, 0);
}

#[tokio::test]
async fn reserve_and_release_round_trip_through_the_facade() {
    let harness = harness().await;
    let u1 = wallet(&harness, "u1").await;
    harness
        .facade
        .deposit(&u1.account_number, 1_000, "USD", AccountType::Real, RequestContext::default())
        .await
        .expect("seed deposit");

    let reserved = harness.facade.reserve(&u1.account_number, 400).await.expect("reserve succeeds");
    assert_eq!(reserved.available_balance, 600);

    let released = harness
        .facade
        .release(&u1.account_number, 400, false)
        .await
        .expect("release succeeds");
    assert_eq!(released.available_balance, 1_000);
    assert_eq!(released.balance, 1_000);
}
