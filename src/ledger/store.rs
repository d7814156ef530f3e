//! Durable ledger records with SQLite.
//!
//! One connection behind an async mutex; every money-moving effect runs in a
//! single `BEGIN IMMEDIATE` transaction obtained through [`LedgerStore::with_write_tx`].
//! Balance and funding invariants are also CHECK-enforced in the schema so a
//! bug in engine code cannot commit a negative balance or an over-raised pool.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ledger::error::{is_busy_sqlite, LedgerError};
use crate::models::{
    AssetType, Contract, ContractStatus, DriverPayment, DriverPaymentStatus, EntryStatus,
    EntryType, InvestmentStatus, InvestorCredit, LedgerEntry, Loan, PaymentMethod, Pool,
    PoolInvestment, PoolStatus, User, UserRole,
};

/// Bounded retry for transient write contention before surfacing
/// `RetryableConflict` to the caller.
const WRITE_RETRY_LIMIT: u32 = 3;

/// Parameters for opening a hire-purchase contract.
#[derive(Debug, Clone)]
pub struct NewContract {
    pub driver_user_id: String,
    pub pool_id: String,
    pub vehicle_display_name: String,
    pub principal_ngn: i64,
    pub total_payable_ngn: i64,
    pub weekly_payment_ngn: i64,
    pub duration_weeks: i64,
    pub start_date: DateTime<Utc>,
}

#[derive(Clone)]
pub struct LedgerStore {
    conn: Arc<Mutex<Connection>>,
}

impl LedgerStore {
    pub fn new(db_path: &str) -> Result<Self, LedgerError> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();

        init_schema(&conn)?;
        info!(db_path, "📒 Ledger store initialized");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` inside one immediate write transaction, retrying transient
    /// lock contention a bounded number of times. Any error from `op` rolls
    /// the whole unit back; no partial effect is ever visible.
    pub(crate) async fn with_write_tx<T>(
        &self,
        mut op: impl FnMut(&Transaction<'_>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut conn = self.conn.lock().await;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
                Ok(tx) => tx,
                Err(e) if is_busy_sqlite(&e) && attempt < WRITE_RETRY_LIMIT => {
                    debug!(attempt, "write transaction busy at begin, retrying");
                    continue;
                }
                Err(e) if is_busy_sqlite(&e) => return Err(LedgerError::RetryableConflict),
                Err(e) => return Err(e.into()),
            };

            match op(&tx) {
                Ok(value) => match tx.commit() {
                    Ok(()) => return Ok(value),
                    Err(e) if is_busy_sqlite(&e) && attempt < WRITE_RETRY_LIMIT => {
                        debug!(attempt, "commit contention, retrying");
                        continue;
                    }
                    Err(e) if is_busy_sqlite(&e) => return Err(LedgerError::RetryableConflict),
                    Err(e) => return Err(e.into()),
                },
                Err(e) if e.is_busy() && attempt < WRITE_RETRY_LIMIT => {
                    debug!(attempt, "statement contention, retrying");
                    continue;
                }
                Err(e) if e.is_busy() => return Err(LedgerError::RetryableConflict),
                // Dropping the transaction rolls it back.
                Err(e) => return Err(e),
            }
        }
    }

    // ---- entity creation (administrative, outside the engines) ----

    pub async fn create_user(&self, email: &str, role: UserRole) -> Result<User, LedgerError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(LedgerError::InvalidId("user"));
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            email,
            role,
            available_balance_ngn: 0,
            total_invested_ngn: 0,
            total_returns_ngn: 0,
            created_at: Utc::now().to_rfc3339(),
            updated_at: Utc::now().to_rfc3339(),
        };

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO users (id, email, role, available_balance_ngn, total_invested_ngn, total_returns_ngn, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, 0, 0, ?4, ?5)",
            params![user.id, user.email, user.role.as_str(), user.created_at, user.updated_at],
        )?;

        Ok(user)
    }

    pub async fn create_pool(
        &self,
        asset_type: AssetType,
        target_amount_ngn: i64,
        min_contribution_ngn: i64,
    ) -> Result<Pool, LedgerError> {
        if target_amount_ngn <= 0 {
            return Err(LedgerError::InvalidTarget);
        }
        if min_contribution_ngn < 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let pool = Pool {
            id: Uuid::new_v4().to_string(),
            asset_type,
            target_amount_ngn,
            min_contribution_ngn,
            current_raised_ngn: 0,
            investor_count: 0,
            status: PoolStatus::Open,
            created_at: Utc::now().to_rfc3339(),
            updated_at: Utc::now().to_rfc3339(),
        };

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO pools (id, asset_type, target_amount_ngn, min_contribution_ngn, current_raised_ngn, investor_count, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, ?6, ?7)",
            params![
                pool.id,
                pool.asset_type.as_str(),
                pool.target_amount_ngn,
                pool.min_contribution_ngn,
                pool.status.as_str(),
                pool.created_at,
                pool.updated_at,
            ],
        )?;

        info!(
            pool_id = %pool.id,
            asset_type = pool.asset_type.as_str(),
            target_amount_ngn,
            "🏦 Pool created"
        );

        Ok(pool)
    }

    pub async fn create_loan(&self, driver_user_id: &str) -> Result<Loan, LedgerError> {
        let loan = Loan {
            id: Uuid::new_v4().to_string(),
            driver_user_id: driver_user_id.to_string(),
            down_payment_made: false,
            down_payment_amount_ngn: 0,
            down_payment_at: None,
            created_at: Utc::now().to_rfc3339(),
        };

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO loans (id, driver_user_id, down_payment_made, down_payment_amount_ngn, down_payment_at, created_at)
             VALUES (?1, ?2, 0, 0, NULL, ?3)",
            params![loan.id, loan.driver_user_id, loan.created_at],
        )?;

        Ok(loan)
    }

    pub async fn create_contract(&self, new: NewContract) -> Result<Contract, LedgerError> {
        if new.total_payable_ngn <= 0 || new.principal_ngn < 0 || new.weekly_payment_ngn < 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let contract = Contract {
            id: Uuid::new_v4().to_string(),
            driver_user_id: new.driver_user_id,
            pool_id: new.pool_id,
            vehicle_display_name: new.vehicle_display_name,
            principal_ngn: new.principal_ngn,
            total_payable_ngn: new.total_payable_ngn,
            total_paid_ngn: 0,
            weekly_payment_ngn: new.weekly_payment_ngn,
            duration_weeks: new.duration_weeks,
            start_date: new.start_date.to_rfc3339(),
            next_due_date: None,
            status: ContractStatus::Active,
            created_at: Utc::now().to_rfc3339(),
            updated_at: Utc::now().to_rfc3339(),
        };

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO contracts (id, driver_user_id, pool_id, vehicle_display_name, principal_ngn, total_payable_ngn, total_paid_ngn, weekly_payment_ngn, duration_weeks, start_date, next_due_date, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?9, NULL, ?10, ?11, ?12)",
            params![
                contract.id,
                contract.driver_user_id,
                contract.pool_id,
                contract.vehicle_display_name,
                contract.principal_ngn,
                contract.total_payable_ngn,
                contract.weekly_payment_ngn,
                contract.duration_weeks,
                contract.start_date,
                contract.status.as_str(),
                contract.created_at,
                contract.updated_at,
            ],
        )?;

        Ok(contract)
    }

    /// Administrative close. A closed pool takes no further investment.
    pub async fn close_pool(&self, pool_id: &str) -> Result<(), LedgerError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE pools SET status = 'CLOSED', updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), pool_id],
        )?;
        if changed == 0 {
            return Err(LedgerError::PoolNotFound);
        }
        info!(pool_id, "🏦 Pool closed");
        Ok(())
    }

    /// Administrative default. A defaulted contract takes no further repayment.
    pub async fn mark_contract_defaulted(&self, contract_id: &str) -> Result<(), LedgerError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE contracts SET status = 'DEFAULTED', updated_at = ?1
             WHERE id = ?2 AND status = 'ACTIVE'",
            params![Utc::now().to_rfc3339(), contract_id],
        )?;
        if changed == 0 {
            return Err(LedgerError::ContractNotFound);
        }
        Ok(())
    }

    // ---- read-only summaries (committed state only) ----

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, LedgerError> {
        let conn = self.conn.lock().await;
        find_user(&conn, user_id)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, LedgerError> {
        let email = email.trim().to_lowercase();
        let conn = self.conn.lock().await;
        let user = conn
            .query_row(
                "SELECT id, email, role, available_balance_ngn, total_invested_ngn, total_returns_ngn, created_at, updated_at
                 FROM users WHERE email = ?1",
                params![email],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub async fn get_pool(&self, pool_id: &str) -> Result<Option<Pool>, LedgerError> {
        let conn = self.conn.lock().await;
        find_pool(&conn, pool_id)
    }

    pub async fn get_loan(&self, loan_id: &str) -> Result<Option<Loan>, LedgerError> {
        let conn = self.conn.lock().await;
        find_loan(&conn, loan_id)
    }

    pub async fn get_contract(&self, contract_id: &str) -> Result<Option<Contract>, LedgerError> {
        let conn = self.conn.lock().await;
        find_contract(&conn, contract_id)
    }

    pub async fn get_driver_payment(
        &self,
        reference: &str,
    ) -> Result<Option<DriverPayment>, LedgerError> {
        let conn = self.conn.lock().await;
        find_driver_payment_by_reference(&conn, reference)
    }

    pub async fn list_pool_investments(
        &self,
        pool_id: &str,
    ) -> Result<Vec<PoolInvestment>, LedgerError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, pool_id, user_id, amount_ngn, ownership_units, ownership_bps, tx_ref, status, created_at
             FROM pool_investments WHERE pool_id = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![pool_id], investment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn list_ledger_entries(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let limit = limit.clamp(1, 1000) as i64;
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, user_id, user_type, entry_type, amount_ngn, method, gateway_reference, related_id, description, status, created_at
             FROM ledger_entries WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![user_id, limit], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn list_entries_by_reference(
        &self,
        reference: &str,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, user_id, user_type, entry_type, amount_ngn, method, gateway_reference, related_id, description, status, created_at
             FROM ledger_entries WHERE gateway_reference = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![reference], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn list_driver_payments(
        &self,
        driver_user_id: &str,
        limit: usize,
    ) -> Result<Vec<DriverPayment>, LedgerError> {
        let limit = limit.clamp(1, 200) as i64;
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, contract_id, driver_user_id, amount_ngn, applied_amount_ngn, reference, status, failed_reason, confirmed_at, created_at
             FROM driver_payments WHERE driver_user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![driver_user_id, limit], driver_payment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn list_investor_credits(
        &self,
        investor_user_id: &str,
        limit: usize,
    ) -> Result<Vec<InvestorCredit>, LedgerError> {
        let limit = limit.clamp(1, 1000) as i64;
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, payment_reference, pool_id, investor_user_id, amount_ngn, ownership_bps, created_at
             FROM investor_credits WHERE investor_user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![investor_user_id, limit], credit_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn init_schema(conn: &Connection) -> Result<(), LedgerError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            role TEXT NOT NULL,
            available_balance_ngn INTEGER NOT NULL DEFAULT 0 CHECK (available_balance_ngn >= 0),
            total_invested_ngn INTEGER NOT NULL DEFAULT 0,
            total_returns_ngn INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pools (
            id TEXT PRIMARY KEY,
            asset_type TEXT NOT NULL,
            target_amount_ngn INTEGER NOT NULL CHECK (target_amount_ngn > 0),
            min_contribution_ngn INTEGER NOT NULL DEFAULT 0,
            current_raised_ngn INTEGER NOT NULL DEFAULT 0,
            investor_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'OPEN',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK (current_raised_ngn >= 0 AND current_raised_ngn <= target_amount_ngn)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pool_investments (
            id TEXT PRIMARY KEY,
            pool_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            amount_ngn INTEGER NOT NULL CHECK (amount_ngn > 0),
            ownership_units INTEGER NOT NULL,
            ownership_bps INTEGER NOT NULL CHECK (ownership_bps >= 0 AND ownership_bps <= 10000),
            tx_ref TEXT UNIQUE NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (pool_id) REFERENCES pools(id),
            FOREIGN KEY (user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pool_investments_pool_user ON pool_investments(pool_id, user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ledger_entries (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            user_type TEXT NOT NULL,
            entry_type TEXT NOT NULL,
            amount_ngn INTEGER NOT NULL,
            method TEXT NOT NULL,
            gateway_reference TEXT,
            related_id TEXT,
            description TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    // Completed entries are the system of record for idempotency: one
    // reference, one applied effect. Failed diagnostics rows stay outside
    // the index so a later genuine confirmation can still land.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_ledger_entries_gateway_ref
         ON ledger_entries(gateway_reference)
         WHERE gateway_reference IS NOT NULL AND status = 'Completed'",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ledger_entries_user_ts ON ledger_entries(user_id, created_at DESC)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS loans (
            id TEXT PRIMARY KEY,
            driver_user_id TEXT NOT NULL,
            down_payment_made INTEGER NOT NULL DEFAULT 0,
            down_payment_amount_ngn INTEGER NOT NULL DEFAULT 0,
            down_payment_at TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY (driver_user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS contracts (
            id TEXT PRIMARY KEY,
            driver_user_id TEXT NOT NULL,
            pool_id TEXT NOT NULL,
            vehicle_display_name TEXT NOT NULL,
            principal_ngn INTEGER NOT NULL,
            total_payable_ngn INTEGER NOT NULL CHECK (total_payable_ngn > 0),
            total_paid_ngn INTEGER NOT NULL DEFAULT 0 CHECK (total_paid_ngn >= 0 AND total_paid_ngn <= total_payable_ngn),
            weekly_payment_ngn INTEGER NOT NULL,
            duration_weeks INTEGER NOT NULL,
            start_date TEXT NOT NULL,
            next_due_date TEXT,
            status TEXT NOT NULL DEFAULT 'ACTIVE',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (driver_user_id) REFERENCES users(id),
            FOREIGN KEY (pool_id) REFERENCES pools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_contracts_driver_status ON contracts(driver_user_id, status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS driver_payments (
            id TEXT PRIMARY KEY,
            contract_id TEXT NOT NULL,
            driver_user_id TEXT NOT NULL,
            amount_ngn INTEGER NOT NULL CHECK (amount_ngn > 0),
            applied_amount_ngn INTEGER NOT NULL DEFAULT 0,
            reference TEXT UNIQUE NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            failed_reason TEXT,
            confirmed_at TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY (contract_id) REFERENCES contracts(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS investor_credits (
            id TEXT PRIMARY KEY,
            payment_reference TEXT NOT NULL,
            pool_id TEXT NOT NULL,
            investor_user_id TEXT NOT NULL,
            amount_ngn INTEGER NOT NULL CHECK (amount_ngn > 0),
            ownership_bps INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (investor_user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_investor_credits_payment ON investor_credits(payment_reference)",
        [],
    )?;

    Ok(())
}

// ---- row mappers ----

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(2)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        role: UserRole::from_str(&role).unwrap_or(UserRole::Investor),
        available_balance_ngn: row.get(3)?,
        total_invested_ngn: row.get(4)?,
        total_returns_ngn: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn pool_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Pool> {
    let asset_type: String = row.get(1)?;
    let status: String = row.get(6)?;
    Ok(Pool {
        id: row.get(0)?,
        asset_type: AssetType::from_str(&asset_type).unwrap_or(AssetType::Shuttle),
        target_amount_ngn: row.get(2)?,
        min_contribution_ngn: row.get(3)?,
        current_raised_ngn: row.get(4)?,
        investor_count: row.get(5)?,
        status: PoolStatus::from_str(&status).unwrap_or(PoolStatus::Closed),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn investment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PoolInvestment> {
    let status: String = row.get(7)?;
    Ok(PoolInvestment {
        id: row.get(0)?,
        pool_id: row.get(1)?,
        user_id: row.get(2)?,
        amount_ngn: row.get(3)?,
        ownership_units: row.get::<_, i64>(4)? as u64,
        ownership_bps: row.get::<_, i64>(5)? as u32,
        tx_ref: row.get(6)?,
        status: InvestmentStatus::from_str(&status).unwrap_or(InvestmentStatus::Confirmed),
        created_at: row.get(8)?,
    })
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let user_type: String = row.get(2)?;
    let entry_type: String = row.get(3)?;
    let method: String = row.get(5)?;
    let status: String = row.get(9)?;
    Ok(LedgerEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        user_type: UserRole::from_str(&user_type).unwrap_or(UserRole::Investor),
        entry_type: EntryType::from_str(&entry_type).unwrap_or(EntryType::Deposit),
        amount_ngn: row.get(4)?,
        method: PaymentMethod::from_str(&method).unwrap_or(PaymentMethod::System),
        gateway_reference: row.get(6)?,
        related_id: row.get(7)?,
        description: row.get(8)?,
        status: EntryStatus::from_str(&status).unwrap_or(EntryStatus::Completed),
        created_at: row.get(10)?,
    })
}

fn contract_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contract> {
    let status: String = row.get(11)?;
    Ok(Contract {
        id: row.get(0)?,
        driver_user_id: row.get(1)?,
        pool_id: row.get(2)?,
        vehicle_display_name: row.get(3)?,
        principal_ngn: row.get(4)?,
        total_payable_ngn: row.get(5)?,
        total_paid_ngn: row.get(6)?,
        weekly_payment_ngn: row.get(7)?,
        duration_weeks: row.get(8)?,
        start_date: row.get(9)?,
        next_due_date: row.get(10)?,
        status: ContractStatus::from_str(&status).unwrap_or(ContractStatus::Defaulted),
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn loan_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Loan> {
    Ok(Loan {
        id: row.get(0)?,
        driver_user_id: row.get(1)?,
        down_payment_made: row.get::<_, i64>(2)? == 1,
        down_payment_amount_ngn: row.get(3)?,
        down_payment_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn driver_payment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DriverPayment> {
    let status: String = row.get(6)?;
    Ok(DriverPayment {
        id: row.get(0)?,
        contract_id: row.get(1)?,
        driver_user_id: row.get(2)?,
        amount_ngn: row.get(3)?,
        applied_amount_ngn: row.get(4)?,
        reference: row.get(5)?,
        status: DriverPaymentStatus::from_str(&status).unwrap_or(DriverPaymentStatus::Pending),
        failed_reason: row.get(7)?,
        confirmed_at: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn credit_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InvestorCredit> {
    Ok(InvestorCredit {
        id: row.get(0)?,
        payment_reference: row.get(1)?,
        pool_id: row.get(2)?,
        investor_user_id: row.get(3)?,
        amount_ngn: row.get(4)?,
        ownership_bps: row.get::<_, i64>(5)? as u32,
        created_at: row.get(6)?,
    })
}

// ---- transaction-scoped helpers used by the engines ----
// All take a plain `&Connection` so they work both inside a write transaction
// (via Deref) and for autocommit reads.

pub(crate) fn find_user(conn: &Connection, user_id: &str) -> Result<Option<User>, LedgerError> {
    let user = conn
        .query_row(
            "SELECT id, email, role, available_balance_ngn, total_invested_ngn, total_returns_ngn, created_at, updated_at
             FROM users WHERE id = ?1",
            params![user_id],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

pub(crate) fn find_pool(conn: &Connection, pool_id: &str) -> Result<Option<Pool>, LedgerError> {
    let pool = conn
        .query_row(
            "SELECT id, asset_type, target_amount_ngn, min_contribution_ngn, current_raised_ngn, investor_count, status, created_at, updated_at
             FROM pools WHERE id = ?1",
            params![pool_id],
            pool_from_row,
        )
        .optional()?;
    Ok(pool)
}

pub(crate) fn find_loan(conn: &Connection, loan_id: &str) -> Result<Option<Loan>, LedgerError> {
    let loan = conn
        .query_row(
            "SELECT id, driver_user_id, down_payment_made, down_payment_amount_ngn, down_payment_at, created_at
             FROM loans WHERE id = ?1",
            params![loan_id],
            loan_from_row,
        )
        .optional()?;
    Ok(loan)
}

pub(crate) fn find_contract(
    conn: &Connection,
    contract_id: &str,
) -> Result<Option<Contract>, LedgerError> {
    let contract = conn
        .query_row(
            "SELECT id, driver_user_id, pool_id, vehicle_display_name, principal_ngn, total_payable_ngn, total_paid_ngn, weekly_payment_ngn, duration_weeks, start_date, next_due_date, status, created_at, updated_at
             FROM contracts WHERE id = ?1",
            params![contract_id],
            contract_from_row,
        )
        .optional()?;
    Ok(contract)
}

pub(crate) fn find_driver_payment_by_reference(
    conn: &Connection,
    reference: &str,
) -> Result<Option<DriverPayment>, LedgerError> {
    let payment = conn
        .query_row(
            "SELECT id, contract_id, driver_user_id, amount_ngn, applied_amount_ngn, reference, status, failed_reason, confirmed_at, created_at
             FROM driver_payments WHERE reference = ?1",
            params![reference],
            driver_payment_from_row,
        )
        .optional()?;
    Ok(payment)
}

pub(crate) fn find_completed_entry_by_reference(
    conn: &Connection,
    reference: &str,
) -> Result<Option<LedgerEntry>, LedgerError> {
    let entry = conn
        .query_row(
            "SELECT id, user_id, user_type, entry_type, amount_ngn, method, gateway_reference, related_id, description, status, created_at
             FROM ledger_entries WHERE gateway_reference = ?1 AND status = 'Completed' LIMIT 1",
            params![reference],
            entry_from_row,
        )
        .optional()?;
    Ok(entry)
}

pub(crate) fn insert_entry(conn: &Connection, entry: &LedgerEntry) -> Result<(), LedgerError> {
    conn.execute(
        "INSERT INTO ledger_entries (id, user_id, user_type, entry_type, amount_ngn, method, gateway_reference, related_id, description, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            entry.id,
            entry.user_id,
            entry.user_type.as_str(),
            entry.entry_type.as_str(),
            entry.amount_ngn,
            entry.method.as_str(),
            entry.gateway_reference,
            entry.related_id,
            entry.description,
            entry.status.as_str(),
            entry.created_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn insert_investment(
    conn: &Connection,
    investment: &PoolInvestment,
) -> Result<(), LedgerError> {
    conn.execute(
        "INSERT INTO pool_investments (id, pool_id, user_id, amount_ngn, ownership_units, ownership_bps, tx_ref, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            investment.id,
            investment.pool_id,
            investment.user_id,
            investment.amount_ngn,
            investment.ownership_units as i64,
            investment.ownership_bps as i64,
            investment.tx_ref,
            investment.status.as_str(),
            investment.created_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn has_confirmed_investment(
    conn: &Connection,
    pool_id: &str,
    user_id: &str,
) -> Result<bool, LedgerError> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM pool_investments WHERE pool_id = ?1 AND user_id = ?2 AND status = 'CONFIRMED')",
        params![pool_id, user_id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

pub(crate) fn debit_user_for_investment(
    conn: &Connection,
    user_id: &str,
    amount_ngn: i64,
) -> Result<(), LedgerError> {
    conn.execute(
        "UPDATE users SET available_balance_ngn = available_balance_ngn - ?1,
                          total_invested_ngn = total_invested_ngn + ?1,
                          updated_at = ?2
         WHERE id = ?3",
        params![amount_ngn, Utc::now().to_rfc3339(), user_id],
    )?;
    Ok(())
}

pub(crate) fn credit_user_balance(
    conn: &Connection,
    user_id: &str,
    amount_ngn: i64,
) -> Result<(), LedgerError> {
    conn.execute(
        "UPDATE users SET available_balance_ngn = available_balance_ngn + ?1, updated_at = ?2
         WHERE id = ?3",
        params![amount_ngn, Utc::now().to_rfc3339(), user_id],
    )?;
    Ok(())
}

pub(crate) fn credit_user_return(
    conn: &Connection,
    user_id: &str,
    amount_ngn: i64,
) -> Result<(), LedgerError> {
    conn.execute(
        "UPDATE users SET available_balance_ngn = available_balance_ngn + ?1,
                          total_returns_ngn = total_returns_ngn + ?1,
                          updated_at = ?2
         WHERE id = ?3",
        params![amount_ngn, Utc::now().to_rfc3339(), user_id],
    )?;
    Ok(())
}

pub(crate) fn update_pool_funding(
    conn: &Connection,
    pool_id: &str,
    current_raised_ngn: i64,
    investor_count: i64,
    status: PoolStatus,
) -> Result<(), LedgerError> {
    conn.execute(
        "UPDATE pools SET current_raised_ngn = ?1, investor_count = ?2, status = ?3, updated_at = ?4
         WHERE id = ?5",
        params![
            current_raised_ngn,
            investor_count,
            status.as_str(),
            Utc::now().to_rfc3339(),
            pool_id
        ],
    )?;
    Ok(())
}

pub(crate) fn set_loan_down_payment(
    conn: &Connection,
    loan_id: &str,
    amount_ngn: i64,
) -> Result<(), LedgerError> {
    conn.execute(
        "UPDATE loans SET down_payment_made = 1, down_payment_amount_ngn = ?1, down_payment_at = ?2
         WHERE id = ?3",
        params![amount_ngn, Utc::now().to_rfc3339(), loan_id],
    )?;
    Ok(())
}

pub(crate) fn update_contract_progress(
    conn: &Connection,
    contract_id: &str,
    total_paid_ngn: i64,
    status: ContractStatus,
    next_due_date: Option<&str>,
) -> Result<(), LedgerError> {
    conn.execute(
        "UPDATE contracts SET total_paid_ngn = ?1, status = ?2, next_due_date = ?3, updated_at = ?4
         WHERE id = ?5",
        params![
            total_paid_ngn,
            status.as_str(),
            next_due_date,
            Utc::now().to_rfc3339(),
            contract_id
        ],
    )?;
    Ok(())
}

pub(crate) fn insert_driver_payment(
    conn: &Connection,
    payment: &DriverPayment,
) -> Result<(), LedgerError> {
    conn.execute(
        "INSERT INTO driver_payments (id, contract_id, driver_user_id, amount_ngn, applied_amount_ngn, reference, status, failed_reason, confirmed_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            payment.id,
            payment.contract_id,
            payment.driver_user_id,
            payment.amount_ngn,
            payment.applied_amount_ngn,
            payment.reference,
            payment.status.as_str(),
            payment.failed_reason,
            payment.confirmed_at,
            payment.created_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn mark_driver_payment_confirmed(
    conn: &Connection,
    reference: &str,
    applied_amount_ngn: i64,
) -> Result<(), LedgerError> {
    conn.execute(
        "UPDATE driver_payments SET status = 'CONFIRMED', applied_amount_ngn = ?1, confirmed_at = ?2, failed_reason = NULL
         WHERE reference = ?3",
        params![applied_amount_ngn, Utc::now().to_rfc3339(), reference],
    )?;
    Ok(())
}

pub(crate) fn mark_driver_payment_failed(
    conn: &Connection,
    reference: &str,
    reason: &str,
) -> Result<(), LedgerError> {
    conn.execute(
        "UPDATE driver_payments SET status = 'FAILED', failed_reason = ?1
         WHERE reference = ?2 AND status = 'PENDING'",
        params![reason, reference],
    )?;
    Ok(())
}

pub(crate) fn insert_investor_credit(
    conn: &Connection,
    credit: &InvestorCredit,
) -> Result<(), LedgerError> {
    conn.execute(
        "INSERT INTO investor_credits (id, payment_reference, pool_id, investor_user_id, amount_ngn, ownership_bps, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            credit.id,
            credit.payment_reference,
            credit.pool_id,
            credit.investor_user_id,
            credit.amount_ngn,
            credit.ownership_bps as i64,
            credit.created_at,
        ],
    )?;
    Ok(())
}

/// Confirmed holdings per investor for a pool, largest first. Used for
/// pro-rata repayment distribution.
pub(crate) fn confirmed_holdings(
    conn: &Connection,
    pool_id: &str,
) -> Result<Vec<(String, i64)>, LedgerError> {
    let mut stmt = conn.prepare_cached(
        "SELECT user_id, SUM(amount_ngn) AS invested
         FROM pool_investments
         WHERE pool_id = ?1 AND status = 'CONFIRMED'
         GROUP BY user_id
         ORDER BY invested DESC, user_id ASC",
    )?;
    let rows = stmt
        .query_map(params![pool_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryStatus;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (LedgerStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        let store = LedgerStore::new(db_path).unwrap();
        (store, temp_file)
    }

    fn entry(reference: Option<&str>, status: EntryStatus) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4().to_string(),
            user_id: "u1".to_string(),
            user_type: UserRole::Investor,
            entry_type: EntryType::Deposit,
            amount_ngn: 1_000,
            method: PaymentMethod::Paystack,
            gateway_reference: reference.map(|r| r.to_string()),
            related_id: None,
            description: String::new(),
            status,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn create_and_fetch_user() {
        let (store, _temp) = create_test_store();

        let user = store
            .create_user("Amaka@Example.com", UserRole::Investor)
            .await
            .unwrap();
        assert_eq!(user.email, "amaka@example.com");
        assert_eq!(user.available_balance_ngn, 0);

        let fetched = store.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(fetched.email, user.email);

        let by_email = store
            .get_user_by_email("amaka@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.id, user.id);
    }

    #[tokio::test]
    async fn pool_creation_rejects_non_positive_target() {
        let (store, _temp) = create_test_store();
        assert!(matches!(
            store.create_pool(AssetType::Keke, 0, 5_000).await,
            Err(LedgerError::InvalidTarget)
        ));
    }

    #[tokio::test]
    async fn completed_gateway_reference_is_unique() {
        let (store, _temp) = create_test_store();

        store
            .with_write_tx(|tx| insert_entry(tx, &entry(Some("ref_dup"), EntryStatus::Completed)))
            .await
            .unwrap();

        let err = store
            .with_write_tx(|tx| insert_entry(tx, &entry(Some("ref_dup"), EntryStatus::Completed)))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));
    }

    #[tokio::test]
    async fn failed_entries_do_not_block_a_later_confirmation() {
        let (store, _temp) = create_test_store();

        store
            .with_write_tx(|tx| insert_entry(tx, &entry(Some("ref_retry"), EntryStatus::Failed)))
            .await
            .unwrap();

        // Gateway succeeded on retry with the same reference.
        store
            .with_write_tx(|tx| insert_entry(tx, &entry(Some("ref_retry"), EntryStatus::Completed)))
            .await
            .unwrap();

        let entries = store.list_entries_by_reference("ref_retry").await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn schema_rejects_negative_balance() {
        let (store, _temp) = create_test_store();
        let user = store.create_user("d@x.com", UserRole::Driver).await.unwrap();

        let err = store
            .with_write_tx(|tx| debit_user_for_investment(tx, &user.id, 500))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));

        // Nothing committed.
        let fetched = store.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(fetched.available_balance_ngn, 0);
    }
}
