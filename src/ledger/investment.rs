//! Investment engine.
//!
//! One exposed operation: invest internal wallet balance into an open pool.
//! All reads and writes happen in a single write transaction, so two
//! investors racing for the last remaining slot cannot both succeed.

use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use tracing::info;
use uuid::Uuid;

use crate::ledger::error::LedgerError;
use crate::ledger::ownership::compute_ownership;
use crate::ledger::store::{self, LedgerStore};
use crate::models::{
    EntryStatus, EntryType, InvestmentStatus, LedgerEntry, PaymentMethod, PoolInvestment,
    PoolStatus,
};

/// Everything the caller needs to render the outcome, read back from the same
/// atomic unit so a half-applied state is never observable.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InvestmentResult {
    pub pool_id: String,
    pub user_id: String,
    pub amount_ngn: i64,
    pub ownership_units: u64,
    pub ownership_bps: u32,
    pub tx_ref: String,
    pub pool_status: PoolStatus,
    pub current_raised_ngn: i64,
    pub target_amount_ngn: i64,
    pub investor_count: i64,
    pub user_balance_ngn: i64,
}

#[derive(Clone)]
pub struct InvestmentEngine {
    store: LedgerStore,
}

impl InvestmentEngine {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Atomically move `amount_ngn` from the user's wallet into the pool and
    /// record the ownership allocation.
    ///
    /// Preconditions are checked in a fixed order, each with a distinct
    /// failure kind; any failure aborts before any mutation. The engine never
    /// silently clamps an amount that exceeds the remaining target.
    pub async fn invest_in_pool(
        &self,
        pool_id: &str,
        user_id: &str,
        amount_ngn: i64,
        tx_ref: Option<&str>,
    ) -> Result<InvestmentResult, LedgerError> {
        if Uuid::parse_str(pool_id).is_err() {
            return Err(LedgerError::InvalidId("pool"));
        }
        if Uuid::parse_str(user_id).is_err() {
            return Err(LedgerError::InvalidId("user"));
        }
        if amount_ngn <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let tx_ref = match tx_ref {
            Some(supplied) if !supplied.trim().is_empty() => supplied.trim().to_string(),
            _ => default_tx_ref(pool_id),
        };

        let result = self
            .store
            .with_write_tx(|tx| {
                let pool = store::find_pool(tx, pool_id)?.ok_or(LedgerError::PoolNotFound)?;
                let user = store::find_user(tx, user_id)?.ok_or(LedgerError::UserNotFound)?;

                match pool.status {
                    PoolStatus::Open => {}
                    PoolStatus::Funded => return Err(LedgerError::PoolAlreadyFunded),
                    PoolStatus::Closed => return Err(LedgerError::PoolNotOpen),
                }
                if amount_ngn < pool.min_contribution_ngn {
                    return Err(LedgerError::BelowMinimumContribution {
                        minimum: pool.min_contribution_ngn,
                    });
                }

                let remaining = pool.target_amount_ngn - pool.current_raised_ngn;
                if remaining <= 0 {
                    return Err(LedgerError::PoolAlreadyFunded);
                }
                if amount_ngn > remaining {
                    return Err(LedgerError::ExceedsRemainingTarget {
                        excess: amount_ngn - remaining,
                    });
                }
                if amount_ngn > user.available_balance_ngn {
                    return Err(LedgerError::InsufficientBalance);
                }

                // Ownership is computed against the fixed creation-time
                // target, never the live remaining amount.
                let ownership = compute_ownership(amount_ngn, pool.target_amount_ngn)?;

                let first_investment = !store::has_confirmed_investment(tx, pool_id, user_id)?;

                store::insert_investment(
                    tx,
                    &PoolInvestment {
                        id: Uuid::new_v4().to_string(),
                        pool_id: pool.id.clone(),
                        user_id: user.id.clone(),
                        amount_ngn,
                        ownership_units: ownership.units,
                        ownership_bps: ownership.bps,
                        tx_ref: tx_ref.clone(),
                        status: InvestmentStatus::Confirmed,
                        created_at: Utc::now().to_rfc3339(),
                    },
                )
                .map_err(|e| match e {
                    LedgerError::Storage(ref inner)
                        if crate::ledger::error::is_unique_violation(inner) =>
                    {
                        LedgerError::DuplicateReference(tx_ref.clone())
                    }
                    other => other,
                })?;

                store::debit_user_for_investment(tx, &user.id, amount_ngn)?;

                let raised = pool.current_raised_ngn + amount_ngn;
                let investor_count = if first_investment {
                    pool.investor_count + 1
                } else {
                    pool.investor_count
                };
                let status = if raised >= pool.target_amount_ngn {
                    PoolStatus::Funded
                } else {
                    PoolStatus::Open
                };
                store::update_pool_funding(tx, &pool.id, raised, investor_count, status)?;

                store::insert_entry(
                    tx,
                    &LedgerEntry {
                        id: Uuid::new_v4().to_string(),
                        user_id: user.id.clone(),
                        user_type: user.role,
                        entry_type: EntryType::PoolInvestment,
                        amount_ngn,
                        method: PaymentMethod::InternalWallet,
                        gateway_reference: Some(tx_ref.clone()),
                        related_id: Some(pool.id.clone()),
                        description: format!("{} pool investment", pool.asset_type.as_str()),
                        status: EntryStatus::Completed,
                        created_at: Utc::now().to_rfc3339(),
                    },
                )?;

                // Read back committed-to-be state from the same unit.
                let pool = store::find_pool(tx, pool_id)?.ok_or(LedgerError::PoolNotFound)?;
                let user = store::find_user(tx, user_id)?.ok_or(LedgerError::UserNotFound)?;

                Ok(InvestmentResult {
                    pool_id: pool.id,
                    user_id: user.id,
                    amount_ngn,
                    ownership_units: ownership.units,
                    ownership_bps: ownership.bps,
                    tx_ref: tx_ref.clone(),
                    pool_status: pool.status,
                    current_raised_ngn: pool.current_raised_ngn,
                    target_amount_ngn: pool.target_amount_ngn,
                    investor_count: pool.investor_count,
                    user_balance_ngn: user.available_balance_ngn,
                })
            })
            .await?;

        info!(
            pool_id,
            user_id,
            amount_ngn,
            ownership_bps = result.ownership_bps,
            pool_status = result.pool_status.as_str(),
            "💸 Pool investment confirmed"
        );

        Ok(result)
    }
}

/// Millisecond timestamps alone collide under load; the suffix keeps
/// generated references unique without coordinating across callers.
fn default_tx_ref(pool_id: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    format!("pool_{}_{}_{}", pool_id, Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::LedgerStore;
    use crate::models::{AssetType, UserRole};
    use tempfile::NamedTempFile;

    async fn setup() -> (LedgerStore, InvestmentEngine, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let store = LedgerStore::new(temp.path().to_str().unwrap()).unwrap();
        let engine = InvestmentEngine::new(store.clone());
        (store, engine, temp)
    }

    async fn funded_investor(store: &LedgerStore, email: &str, balance_ngn: i64) -> String {
        let user = store.create_user(email, UserRole::Investor).await.unwrap();
        store
            .with_write_tx(|tx| store::credit_user_balance(tx, &user.id, balance_ngn))
            .await
            .unwrap();
        user.id
    }

    #[tokio::test]
    async fn two_investors_fund_the_pool_exactly() {
        let (store, engine, _temp) = setup().await;
        let pool = store
            .create_pool(AssetType::Shuttle, 3_500_000, 5_000)
            .await
            .unwrap();
        let a = funded_investor(&store, "a@x.com", 2_000_000).await;
        let b = funded_investor(&store, "b@x.com", 2_000_000).await;

        let first = engine
            .invest_in_pool(&pool.id, &a, 1_750_000, None)
            .await
            .unwrap();
        assert_eq!(first.ownership_units, 500_000);
        assert_eq!(first.ownership_bps, 5_000);
        assert_eq!(first.current_raised_ngn, 1_750_000);
        assert_eq!(first.pool_status, PoolStatus::Open);
        assert_eq!(first.user_balance_ngn, 250_000);

        let second = engine
            .invest_in_pool(&pool.id, &b, 1_750_000, None)
            .await
            .unwrap();
        assert_eq!(second.ownership_units, 500_000);
        assert_eq!(second.current_raised_ngn, 3_500_000);
        assert_eq!(second.pool_status, PoolStatus::Funded);
        assert_eq!(second.investor_count, 2);

        // Pool is funded; any further amount is rejected before mutation.
        let c = funded_investor(&store, "c@x.com", 100_000).await;
        let err = engine
            .invest_in_pool(&pool.id, &c, 5_000, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PoolAlreadyFunded));
    }

    #[tokio::test]
    async fn exceeding_remaining_target_is_rejected_not_clamped() {
        let (store, engine, _temp) = setup().await;
        let pool = store
            .create_pool(AssetType::Keke, 1_000_000, 5_000)
            .await
            .unwrap();
        let a = funded_investor(&store, "a@x.com", 2_000_000).await;

        engine
            .invest_in_pool(&pool.id, &a, 900_000, None)
            .await
            .unwrap();

        let err = engine
            .invest_in_pool(&pool.id, &a, 250_000, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::ExceedsRemainingTarget { excess: 150_000 }
        ));

        // Nothing was debited by the failed attempt.
        let user = store.get_user(&a).await.unwrap().unwrap();
        assert_eq!(user.available_balance_ngn, 1_100_000);
    }

    #[tokio::test]
    async fn insufficient_balance_mutates_nothing() {
        let (store, engine, _temp) = setup().await;
        let pool = store
            .create_pool(AssetType::Shuttle, 1_000_000, 5_000)
            .await
            .unwrap();
        let a = funded_investor(&store, "a@x.com", 10_000).await;

        let err = engine
            .invest_in_pool(&pool.id, &a, 50_000, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance));

        let pool = store.get_pool(&pool.id).await.unwrap().unwrap();
        assert_eq!(pool.current_raised_ngn, 0);
        assert_eq!(pool.investor_count, 0);
        let user = store.get_user(&a).await.unwrap().unwrap();
        assert_eq!(user.available_balance_ngn, 10_000);
        assert!(store.list_pool_investments(&pool.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn below_minimum_contribution_is_rejected() {
        let (store, engine, _temp) = setup().await;
        let pool = store
            .create_pool(AssetType::Keke, 1_000_000, 5_000)
            .await
            .unwrap();
        let a = funded_investor(&store, "a@x.com", 100_000).await;

        let err = engine
            .invest_in_pool(&pool.id, &a, 4_999, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::BelowMinimumContribution { minimum: 5_000 }
        ));
    }

    #[tokio::test]
    async fn repeat_investor_counts_once() {
        let (store, engine, _temp) = setup().await;
        let pool = store
            .create_pool(AssetType::Shuttle, 1_000_000, 5_000)
            .await
            .unwrap();
        let a = funded_investor(&store, "a@x.com", 500_000).await;

        engine.invest_in_pool(&pool.id, &a, 100_000, None).await.unwrap();
        let second = engine.invest_in_pool(&pool.id, &a, 100_000, None).await.unwrap();
        assert_eq!(second.investor_count, 1);

        let user = store.get_user(&a).await.unwrap().unwrap();
        assert_eq!(user.total_invested_ngn, 200_000);
    }

    #[tokio::test]
    async fn raised_total_equals_sum_of_confirmed_rows() {
        let (store, engine, _temp) = setup().await;
        let pool = store
            .create_pool(AssetType::Shuttle, 2_000_000, 1_000)
            .await
            .unwrap();
        let a = funded_investor(&store, "a@x.com", 1_000_000).await;
        let b = funded_investor(&store, "b@x.com", 1_000_000).await;

        for (user, amount) in [(&a, 123_000), (&b, 45_000), (&a, 6_789), (&b, 700_000)] {
            engine.invest_in_pool(&pool.id, user, amount, None).await.unwrap();
        }

        let pool = store.get_pool(&pool.id).await.unwrap().unwrap();
        let rows = store.list_pool_investments(&pool.id).await.unwrap();
        let sum: i64 = rows.iter().map(|r| r.amount_ngn).sum();
        assert_eq!(sum, pool.current_raised_ngn);
        assert!(pool.current_raised_ngn <= pool.target_amount_ngn);
    }

    #[tokio::test]
    async fn supplied_tx_ref_is_kept_and_cannot_be_reused() {
        let (store, engine, _temp) = setup().await;
        let pool = store
            .create_pool(AssetType::Keke, 1_000_000, 1_000)
            .await
            .unwrap();
        let a = funded_investor(&store, "a@x.com", 500_000).await;

        let result = engine
            .invest_in_pool(&pool.id, &a, 50_000, Some("client_ref_1"))
            .await
            .unwrap();
        assert_eq!(result.tx_ref, "client_ref_1");

        let err = engine
            .invest_in_pool(&pool.id, &a, 50_000, Some("client_ref_1"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateReference(_)));

        // The duplicate attempt left no trace.
        let user = store.get_user(&a).await.unwrap().unwrap();
        assert_eq!(user.available_balance_ngn, 450_000);
    }

    #[tokio::test]
    async fn closed_pool_rejects_investment() {
        let (store, engine, _temp) = setup().await;
        let pool = store
            .create_pool(AssetType::Keke, 1_000_000, 1_000)
            .await
            .unwrap();
        let a = funded_investor(&store, "a@x.com", 500_000).await;

        store.close_pool(&pool.id).await.unwrap();

        let err = engine
            .invest_in_pool(&pool.id, &a, 50_000, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PoolNotOpen));
    }

    #[tokio::test]
    async fn malformed_ids_fail_validation_first() {
        let (_store, engine, _temp) = setup().await;
        assert!(matches!(
            engine.invest_in_pool("not-a-uuid", "also-bad", 1_000, None).await,
            Err(LedgerError::InvalidId("pool"))
        ));
    }
}
