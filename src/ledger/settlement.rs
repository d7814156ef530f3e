//! Settlement engine.
//!
//! Applies a *confirmed* external payment exactly once: wallet deposits,
//! loan down payments, and driver repayments. Every settlement claims its
//! gateway reference as the first step of the write transaction; replays
//! short-circuit to the stored outcome. Confirmed driver repayments are
//! distributed pro-rata to the pool's investors inside the same unit.

use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::error::{is_unique_violation, LedgerError};
use crate::ledger::idempotency::{claim_gateway_reference, Claim};
use crate::ledger::ownership::TOTAL_OWNERSHIP_BPS;
use crate::ledger::store::{self, LedgerStore};
use crate::models::{
    Contract, ContractStatus, DriverPayment, DriverPaymentStatus, EntryStatus, EntryType,
    InvestorCredit, LedgerEntry, PaymentKind, PaymentMethod, UserRole,
};

/// Summary of a pro-rata repayment distribution.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DistributionResult {
    pub pool_id: String,
    pub distributed_amount_ngn: i64,
    pub investor_credit_count: usize,
    pub remainder_ngn: i64,
}

/// Outcome of a settlement. A replayed reference returns the stored effect
/// with `already_processed = true`; that is not an error.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SettlementResult {
    pub reference: String,
    pub kind: PaymentKind,
    pub amount_ngn: i64,
    pub applied_amount_ngn: i64,
    pub already_processed: bool,
    pub user_balance_ngn: Option<i64>,
    pub contract: Option<Contract>,
    pub distribution: Option<DistributionResult>,
}

#[derive(Clone)]
pub struct SettlementEngine {
    store: LedgerStore,
}

impl SettlementEngine {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Apply one confirmed gateway payment atomically.
    ///
    /// `target_ref` names the entity the payment settles against: the user id
    /// for a wallet deposit, the loan id for a down payment, the contract id
    /// for a driver repayment.
    pub async fn settle_external_payment(
        &self,
        reference: &str,
        kind: PaymentKind,
        amount_ngn: i64,
        target_ref: &str,
    ) -> Result<SettlementResult, LedgerError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(LedgerError::InvalidId("reference"));
        }
        if amount_ngn <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let result = self
            .store
            .with_write_tx(|tx| {
                if let Claim::AlreadyClaimed(entry) = claim_gateway_reference(tx, reference)? {
                    return Ok(SettlementResult {
                        reference: reference.to_string(),
                        kind: PaymentKind::from_entry_type(entry.entry_type).unwrap_or(kind),
                        amount_ngn: entry.amount_ngn,
                        applied_amount_ngn: entry.amount_ngn,
                        already_processed: true,
                        user_balance_ngn: None,
                        contract: None,
                        distribution: None,
                    });
                }

                match kind {
                    PaymentKind::WalletDeposit => {
                        settle_wallet_deposit(tx, reference, amount_ngn, target_ref)
                    }
                    PaymentKind::DownPayment => {
                        settle_down_payment(tx, reference, amount_ngn, target_ref)
                    }
                    PaymentKind::DriverRepayment => {
                        settle_driver_repayment(tx, reference, amount_ngn, target_ref)
                    }
                }
            })
            .await
            .map_err(|e| match e {
                // Two racing settlements: the loser hits the partial unique
                // index; report it as contention so the caller re-verifies
                // and receives the replayed outcome.
                LedgerError::Storage(ref inner) if is_unique_violation(inner) => {
                    LedgerError::RetryableConflict
                }
                other => other,
            })?;

        if result.already_processed {
            info!(reference, "🔁 Settlement replay, returning stored outcome");
        } else {
            info!(
                reference,
                kind = kind.as_str(),
                amount_ngn,
                applied_amount_ngn = result.applied_amount_ngn,
                "✅ External payment settled"
            );
        }

        Ok(result)
    }

    /// Record a PENDING repayment attempt before the gateway redirect.
    /// Nothing here moves money; the settlement happens when the gateway
    /// confirms the generated reference.
    pub async fn initialize_driver_repayment(
        &self,
        contract_id: &str,
        driver_user_id: &str,
        amount_ngn: i64,
        reference: Option<&str>,
    ) -> Result<DriverPayment, LedgerError> {
        if amount_ngn <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let reference = match reference {
            Some(supplied) if !supplied.trim().is_empty() => supplied.trim().to_string(),
            _ => repayment_reference(),
        };

        self.store
            .with_write_tx(|tx| {
                let contract =
                    store::find_contract(tx, contract_id)?.ok_or(LedgerError::ContractNotFound)?;
                if contract.driver_user_id != driver_user_id {
                    return Err(LedgerError::ContractNotFound);
                }
                if contract.status != ContractStatus::Active {
                    return Err(LedgerError::ContractNotActive);
                }

                let remaining = contract.remaining_balance_ngn();
                if remaining <= 0 {
                    return Err(LedgerError::ContractSettled);
                }
                if amount_ngn > remaining {
                    return Err(LedgerError::ExceedsRemainingTarget {
                        excess: amount_ngn - remaining,
                    });
                }

                let payment = DriverPayment {
                    id: Uuid::new_v4().to_string(),
                    contract_id: contract.id.clone(),
                    driver_user_id: contract.driver_user_id.clone(),
                    amount_ngn,
                    applied_amount_ngn: 0,
                    reference: reference.clone(),
                    status: DriverPaymentStatus::Pending,
                    failed_reason: None,
                    confirmed_at: None,
                    created_at: Utc::now().to_rfc3339(),
                };
                store::insert_driver_payment(tx, &payment).map_err(|e| match e {
                    LedgerError::Storage(ref inner) if is_unique_violation(inner) => {
                        LedgerError::DuplicateReference(reference.clone())
                    }
                    other => other,
                })?;
                Ok(payment)
            })
            .await
    }

    /// Gateway or network failure while *initializing* a payment. Records a
    /// Failed diagnostics entry (excluded from the idempotency index) and
    /// marks any pending repayment attempt failed. Balances are untouched.
    pub async fn record_failed_initialization(
        &self,
        reference: &str,
        kind: PaymentKind,
        amount_ngn: i64,
        target_ref: &str,
        reason: &str,
    ) -> Result<(), LedgerError> {
        let reference = reference.trim().to_string();
        let reason = reason.to_string();

        warn!(
            reference = %reference,
            kind = kind.as_str(),
            reason = %reason,
            "⚠️ Payment initialization failed"
        );

        self.store
            .with_write_tx(|tx| {
                let user_id = match kind {
                    PaymentKind::WalletDeposit => target_ref.to_string(),
                    PaymentKind::DownPayment => store::find_loan(tx, target_ref)?
                        .map(|l| l.driver_user_id)
                        .unwrap_or_else(|| target_ref.to_string()),
                    PaymentKind::DriverRepayment => {
                        store::mark_driver_payment_failed(tx, &reference, &reason)?;
                        store::find_contract(tx, target_ref)?
                            .map(|c| c.driver_user_id)
                            .unwrap_or_else(|| target_ref.to_string())
                    }
                };

                store::insert_entry(
                    tx,
                    &LedgerEntry {
                        id: Uuid::new_v4().to_string(),
                        user_id,
                        user_type: match kind {
                            PaymentKind::WalletDeposit => UserRole::Investor,
                            _ => UserRole::Driver,
                        },
                        entry_type: kind.entry_type(),
                        amount_ngn,
                        method: PaymentMethod::Paystack,
                        gateway_reference: Some(reference.clone()),
                        related_id: Some(target_ref.to_string()),
                        description: reason.clone(),
                        status: EntryStatus::Failed,
                        created_at: Utc::now().to_rfc3339(),
                    },
                )
            })
            .await
    }
}

fn settle_wallet_deposit(
    tx: &rusqlite::Transaction<'_>,
    reference: &str,
    amount_ngn: i64,
    user_id: &str,
) -> Result<SettlementResult, LedgerError> {
    let user = store::find_user(tx, user_id)?.ok_or(LedgerError::UserNotFound)?;

    store::credit_user_balance(tx, &user.id, amount_ngn)?;
    store::insert_entry(
        tx,
        &LedgerEntry {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            user_type: user.role,
            entry_type: EntryType::Deposit,
            amount_ngn,
            method: PaymentMethod::Paystack,
            gateway_reference: Some(reference.to_string()),
            related_id: None,
            description: "Wallet funded via Paystack".to_string(),
            status: EntryStatus::Completed,
            created_at: Utc::now().to_rfc3339(),
        },
    )?;

    let user = store::find_user(tx, user_id)?.ok_or(LedgerError::UserNotFound)?;
    Ok(SettlementResult {
        reference: reference.to_string(),
        kind: PaymentKind::WalletDeposit,
        amount_ngn,
        applied_amount_ngn: amount_ngn,
        already_processed: false,
        user_balance_ngn: Some(user.available_balance_ngn),
        contract: None,
        distribution: None,
    })
}

fn settle_down_payment(
    tx: &rusqlite::Transaction<'_>,
    reference: &str,
    amount_ngn: i64,
    loan_id: &str,
) -> Result<SettlementResult, LedgerError> {
    let loan = store::find_loan(tx, loan_id)?.ok_or(LedgerError::LoanNotFound)?;
    if loan.down_payment_made {
        return Err(LedgerError::AlreadyPaid);
    }

    store::set_loan_down_payment(tx, &loan.id, amount_ngn)?;
    store::insert_entry(
        tx,
        &LedgerEntry {
            id: Uuid::new_v4().to_string(),
            user_id: loan.driver_user_id.clone(),
            user_type: UserRole::Driver,
            entry_type: EntryType::DownPayment,
            amount_ngn,
            method: PaymentMethod::Paystack,
            gateway_reference: Some(reference.to_string()),
            related_id: Some(loan.id.clone()),
            description: format!("Down payment for loan {}", loan.id),
            status: EntryStatus::Completed,
            created_at: Utc::now().to_rfc3339(),
        },
    )?;

    Ok(SettlementResult {
        reference: reference.to_string(),
        kind: PaymentKind::DownPayment,
        amount_ngn,
        applied_amount_ngn: amount_ngn,
        already_processed: false,
        user_balance_ngn: None,
        contract: None,
        distribution: None,
    })
}

fn settle_driver_repayment(
    tx: &rusqlite::Transaction<'_>,
    reference: &str,
    amount_ngn: i64,
    contract_id: &str,
) -> Result<SettlementResult, LedgerError> {
    let contract =
        store::find_contract(tx, contract_id)?.ok_or(LedgerError::ContractNotFound)?;

    if let Some(payment) = store::find_driver_payment_by_reference(tx, reference)? {
        if payment.status == DriverPaymentStatus::Failed {
            return Err(LedgerError::PaymentAlreadyFailed(
                payment.failed_reason.unwrap_or_default(),
            ));
        }
    }

    match contract.status {
        ContractStatus::Active => {}
        ContractStatus::Completed => return Err(LedgerError::ContractSettled),
        ContractStatus::Defaulted => return Err(LedgerError::ContractNotActive),
    }

    let remaining = contract.remaining_balance_ngn();
    if remaining <= 0 {
        return Err(LedgerError::ContractSettled);
    }

    // Overpayments are applied up to the remaining balance, never past it.
    let applied = amount_ngn.min(remaining);
    let total_paid = contract.total_paid_ngn + applied;
    let status = if total_paid >= contract.total_payable_ngn {
        ContractStatus::Completed
    } else {
        ContractStatus::Active
    };
    let next_due = match status {
        ContractStatus::Completed => None,
        _ => next_due_date(&contract, total_paid),
    };
    store::update_contract_progress(tx, &contract.id, total_paid, status, next_due.as_deref())?;
    store::mark_driver_payment_confirmed(tx, reference, applied)?;

    let distribution = distribute_to_investors(tx, &contract, reference, applied)?;

    store::insert_entry(
        tx,
        &LedgerEntry {
            id: Uuid::new_v4().to_string(),
            user_id: contract.driver_user_id.clone(),
            user_type: UserRole::Driver,
            entry_type: EntryType::Repayment,
            amount_ngn: applied,
            method: PaymentMethod::Paystack,
            gateway_reference: Some(reference.to_string()),
            related_id: Some(contract.id.clone()),
            description: format!("Hire-purchase repayment for {}", contract.vehicle_display_name),
            status: EntryStatus::Completed,
            created_at: Utc::now().to_rfc3339(),
        },
    )?;

    let contract =
        store::find_contract(tx, contract_id)?.ok_or(LedgerError::ContractNotFound)?;
    Ok(SettlementResult {
        reference: reference.to_string(),
        kind: PaymentKind::DriverRepayment,
        amount_ngn,
        applied_amount_ngn: applied,
        already_processed: false,
        user_balance_ngn: None,
        contract: Some(contract),
        distribution: Some(distribution),
    })
}

/// Credit each investor their floor share of the applied repayment, with the
/// integer remainder going to the largest shareholder.
fn distribute_to_investors(
    tx: &rusqlite::Transaction<'_>,
    contract: &Contract,
    reference: &str,
    applied_ngn: i64,
) -> Result<DistributionResult, LedgerError> {
    let holdings = store::confirmed_holdings(tx, &contract.pool_id)?;
    let credits = allocate_pro_rata(applied_ngn, &holdings);

    if credits.is_empty() {
        return Ok(DistributionResult {
            pool_id: contract.pool_id.clone(),
            distributed_amount_ngn: 0,
            investor_credit_count: 0,
            remainder_ngn: applied_ngn,
        });
    }

    let mut distributed = 0i64;
    for (investor_user_id, credit_ngn, bps) in &credits {
        store::credit_user_return(tx, investor_user_id, *credit_ngn)?;
        store::insert_investor_credit(
            tx,
            &InvestorCredit {
                id: Uuid::new_v4().to_string(),
                payment_reference: reference.to_string(),
                pool_id: contract.pool_id.clone(),
                investor_user_id: investor_user_id.clone(),
                amount_ngn: *credit_ngn,
                ownership_bps: *bps,
                created_at: Utc::now().to_rfc3339(),
            },
        )?;
        store::insert_entry(
            tx,
            &LedgerEntry {
                id: Uuid::new_v4().to_string(),
                user_id: investor_user_id.clone(),
                user_type: UserRole::Investor,
                entry_type: EntryType::Return,
                amount_ngn: *credit_ngn,
                method: PaymentMethod::System,
                gateway_reference: Some(format!("{}_{}", reference, investor_user_id)),
                related_id: Some(contract.pool_id.clone()),
                description: format!(
                    "Driver repayment credit from {}",
                    contract.vehicle_display_name
                ),
                status: EntryStatus::Completed,
                created_at: Utc::now().to_rfc3339(),
            },
        )?;
        distributed += credit_ngn;
    }

    Ok(DistributionResult {
        pool_id: contract.pool_id.clone(),
        distributed_amount_ngn: distributed,
        investor_credit_count: credits.len(),
        remainder_ngn: applied_ngn - distributed,
    })
}

/// Floor allocation of `applied_ngn` across holdings (largest first), integer
/// remainder to the largest holder. Zero credits are dropped.
fn allocate_pro_rata(applied_ngn: i64, holdings: &[(String, i64)]) -> Vec<(String, i64, u32)> {
    let total_invested: i64 = holdings.iter().map(|(_, amount)| (*amount).max(0)).sum();
    if applied_ngn <= 0 || total_invested <= 0 {
        return Vec::new();
    }

    let mut allocated = 0i64;
    let mut credits: Vec<(String, i64, u32)> = holdings
        .iter()
        .filter(|(_, amount)| *amount > 0)
        .map(|(user_id, amount)| {
            let credit =
                ((applied_ngn as i128 * *amount as i128) / total_invested as i128) as i64;
            let bps = ((*amount as i128 * TOTAL_OWNERSHIP_BPS as i128) / total_invested as i128)
                .min(TOTAL_OWNERSHIP_BPS as i128) as u32;
            allocated += credit;
            (user_id.clone(), credit, bps)
        })
        .collect();

    let remainder = applied_ngn - allocated;
    if remainder > 0 {
        if let Some(first) = credits.first_mut() {
            first.1 += remainder;
        }
    }

    credits.retain(|(_, credit, _)| *credit > 0);
    credits
}

fn next_due_date(contract: &Contract, total_paid_ngn: i64) -> Option<String> {
    if contract.weekly_payment_ngn <= 0 || contract.duration_weeks <= 0 {
        return None;
    }
    if total_paid_ngn >= contract.total_payable_ngn {
        return None;
    }

    let paid_installments = total_paid_ngn / contract.weekly_payment_ngn;
    if paid_installments >= contract.duration_weeks {
        return None;
    }

    let start = DateTime::parse_from_rfc3339(&contract.start_date)
        .ok()?
        .with_timezone(&Utc);
    Some((start + Duration::weeks(paid_installments + 1)).to_rfc3339())
}

fn repayment_reference() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    format!("ff_repay_{}_{}", Utc::now().timestamp_millis(), suffix)
}
