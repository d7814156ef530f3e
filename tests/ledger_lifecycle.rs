//! End-to-end lifecycle: wallet deposits through the gateway, pool funding
//! from internal wallets, and driver repayments distributed back to the
//! investors, with double delivery thrown in at every external boundary.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha512;

use fleetfund_backend::gateway::webhook;
use fleetfund_backend::ledger::{
    InvestmentEngine, LedgerError, LedgerStore, NewContract, SettlementEngine,
};
use fleetfund_backend::models::{AssetType, ContractStatus, PoolStatus, UserRole};

const SECRET: &str = "sk_test_secret";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleetfund_backend=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha512>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn charge_success(reference: &str, amount_kobo: i64, payment_type: &str, target: (&str, &str)) -> Vec<u8> {
    let mut metadata = serde_json::Map::new();
    metadata.insert("paymentType".to_string(), payment_type.into());
    metadata.insert(target.0.to_string(), target.1.into());

    serde_json::json!({
        "event": "charge.success",
        "data": {
            "reference": reference,
            "amount": amount_kobo,
            "status": "success",
            "metadata": metadata
        }
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn full_lifecycle_with_duplicate_deliveries() {
    init_tracing();
    let temp = tempfile::NamedTempFile::new().unwrap();
    let store = LedgerStore::new(temp.path().to_str().unwrap()).unwrap();
    let invest = InvestmentEngine::new(store.clone());
    let settle = SettlementEngine::new(store.clone());

    let amaka = store.create_user("amaka@example.com", UserRole::Investor).await.unwrap();
    let bola = store.create_user("bola@example.com", UserRole::Investor).await.unwrap();
    let musa = store.create_user("musa@example.com", UserRole::Driver).await.unwrap();

    // Wallet deposits arrive as signed webhooks, amounts in kobo.
    for (user, reference, kobo) in [
        (&amaka, "dep_amaka", 240_000_000i64),
        (&bola, "dep_bola", 120_000_000),
    ] {
        let body = charge_success(reference, kobo, "wallet_funding", ("userId", &user.id));
        let instruction = webhook::parse_event(SECRET, &body, &sign(&body))
            .unwrap()
            .unwrap();
        let result = settle
            .settle_external_payment(
                &instruction.reference,
                instruction.kind,
                instruction.amount_ngn,
                &instruction.target_ref,
            )
            .await
            .unwrap();
        assert!(!result.already_processed);
    }

    // The gateway redelivers one of them; nothing moves twice.
    let body = charge_success("dep_amaka", 240_000_000, "wallet_funding", ("userId", &amaka.id));
    let instruction = webhook::parse_event(SECRET, &body, &sign(&body)).unwrap().unwrap();
    let replay = settle
        .settle_external_payment(
            &instruction.reference,
            instruction.kind,
            instruction.amount_ngn,
            &instruction.target_ref,
        )
        .await
        .unwrap();
    assert!(replay.already_processed);
    assert_eq!(
        store.get_user(&amaka.id).await.unwrap().unwrap().available_balance_ngn,
        2_400_000
    );

    // Both investors fund the pool from their wallets.
    let pool = store.create_pool(AssetType::Shuttle, 3_000_000, 5_000).await.unwrap();
    invest.invest_in_pool(&pool.id, &amaka.id, 2_000_000, None).await.unwrap();
    let funding = invest.invest_in_pool(&pool.id, &bola.id, 1_000_000, None).await.unwrap();
    assert_eq!(funding.pool_status, PoolStatus::Funded);
    assert_eq!(funding.current_raised_ngn, 3_000_000);

    // A funded pool backs a hire-purchase contract for the driver.
    let contract = store
        .create_contract(NewContract {
            driver_user_id: musa.id.clone(),
            pool_id: pool.id.clone(),
            vehicle_display_name: "Shuttle bus 7".to_string(),
            principal_ngn: 3_000_000,
            total_payable_ngn: 3_600_000,
            weekly_payment_ngn: 50_000,
            duration_weeks: 72,
            start_date: Utc::now(),
        })
        .await
        .unwrap();

    // Driver initializes a repayment, the gateway confirms it, and the
    // confirmation is delivered twice.
    let attempt = settle
        .initialize_driver_repayment(&contract.id, &musa.id, 50_000, None)
        .await
        .unwrap();
    let body = charge_success(&attempt.reference, 5_000_000, "driver_repayment", ("contractId", &contract.id));
    let instruction = webhook::parse_event(SECRET, &body, &sign(&body)).unwrap().unwrap();

    let first = settle
        .settle_external_payment(
            &instruction.reference,
            instruction.kind,
            instruction.amount_ngn,
            &instruction.target_ref,
        )
        .await
        .unwrap();
    let second = settle
        .settle_external_payment(
            &instruction.reference,
            instruction.kind,
            instruction.amount_ngn,
            &instruction.target_ref,
        )
        .await
        .unwrap();
    assert!(!first.already_processed);
    assert!(second.already_processed);

    // Distribution conserved every naira along the 2:1 split: floor gives
    // 33,333 + 16,666 and the leftover naira goes to the largest holder.
    let dist = first.distribution.unwrap();
    assert_eq!(dist.distributed_amount_ngn, 50_000);
    assert_eq!(dist.remainder_ngn, 0);
    let amaka_after = store.get_user(&amaka.id).await.unwrap().unwrap();
    let bola_after = store.get_user(&bola.id).await.unwrap().unwrap();
    assert_eq!(amaka_after.available_balance_ngn, 400_000 + 33_334);
    assert_eq!(bola_after.available_balance_ngn, 200_000 + 16_666);
    assert_eq!(amaka_after.total_returns_ngn, 33_334);

    let contract_after = store.get_contract(&contract.id).await.unwrap().unwrap();
    assert_eq!(contract_after.total_paid_ngn, 50_000);
    assert_eq!(contract_after.status, ContractStatus::Active);
    assert!(contract_after.next_due_date.is_some());
}

#[tokio::test]
async fn racing_investors_cannot_overfund_a_pool() {
    init_tracing();
    let temp = tempfile::NamedTempFile::new().unwrap();
    let store = LedgerStore::new(temp.path().to_str().unwrap()).unwrap();
    let invest = InvestmentEngine::new(store.clone());
    let settle = SettlementEngine::new(store.clone());

    let pool = store.create_pool(AssetType::Keke, 1_000_000, 5_000).await.unwrap();
    let a = store.create_user("a@example.com", UserRole::Investor).await.unwrap();
    let b = store.create_user("b@example.com", UserRole::Investor).await.unwrap();
    for (user, reference) in [(&a, "dep_a"), (&b, "dep_b")] {
        settle
            .settle_external_payment(
                reference,
                fleetfund_backend::PaymentKind::WalletDeposit,
                1_000_000,
                &user.id,
            )
            .await
            .unwrap();
    }

    // Both try to take the entire remaining target at once.
    let (left, right) = tokio::join!(
        invest.invest_in_pool(&pool.id, &a.id, 1_000_000, None),
        invest.invest_in_pool(&pool.id, &b.id, 1_000_000, None),
    );

    let outcomes = [left, right];
    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one racing investment may win");
    let loser = outcomes.iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(
        loser.as_ref().unwrap_err(),
        LedgerError::PoolAlreadyFunded | LedgerError::ExceedsRemainingTarget { .. }
    ));

    let pool_after = store.get_pool(&pool.id).await.unwrap().unwrap();
    assert_eq!(pool_after.current_raised_ngn, 1_000_000);
    assert_eq!(pool_after.status, PoolStatus::Funded);

    // The loser's wallet is untouched.
    let a_after = store.get_user(&a.id).await.unwrap().unwrap();
    let b_after = store.get_user(&b.id).await.unwrap().unwrap();
    assert_eq!(a_after.available_balance_ngn + b_after.available_balance_ngn, 1_000_000);

    let investments = store.list_pool_investments(&pool.id).await.unwrap();
    let recorded: i64 = investments.iter().map(|i| i.amount_ngn).sum();
    assert_eq!(recorded, pool_after.current_raised_ngn);
}
