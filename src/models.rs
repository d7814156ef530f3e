//! Core domain records for the FleetFund ledger.
//!
//! Every money-moving entity lives here; engines mutate them only inside a
//! single storage transaction that also appends the matching ledger entry.

use serde::{Deserialize, Serialize};

/// Platform roles. Drivers repay hire-purchase contracts, investors fund pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Investor,
    Driver,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Investor => "investor",
            UserRole::Driver => "driver",
            UserRole::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "investor" => Some(UserRole::Investor),
            "driver" => Some(UserRole::Driver),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }
}

/// A platform user with an internal fiat wallet denominated in whole naira.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub role: UserRole,
    pub available_balance_ngn: i64,
    pub total_invested_ngn: i64,
    pub total_returns_ngn: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Asset class a pool finances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetType {
    #[serde(rename = "SHUTTLE")]
    Shuttle,
    #[serde(rename = "KEKE")]
    Keke,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Shuttle => "SHUTTLE",
            AssetType::Keke => "KEKE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SHUTTLE" => Some(AssetType::Shuttle),
            "KEKE" => Some(AssetType::Keke),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolStatus {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "FUNDED")]
    Funded,
    #[serde(rename = "CLOSED")]
    Closed,
}

impl PoolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::Open => "OPEN",
            PoolStatus::Funded => "FUNDED",
            PoolStatus::Closed => "CLOSED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(PoolStatus::Open),
            "FUNDED" => Some(PoolStatus::Funded),
            "CLOSED" => Some(PoolStatus::Closed),
            _ => None,
        }
    }
}

/// A fundraising vehicle for one financeable asset. The target is fixed at
/// creation; ownership is always computed against it, never against the live
/// remaining amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub id: String,
    pub asset_type: AssetType,
    pub target_amount_ngn: i64,
    pub min_contribution_ngn: i64,
    pub current_raised_ngn: i64,
    pub investor_count: i64,
    pub status: PoolStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl Pool {
    pub fn remaining_ngn(&self) -> i64 {
        (self.target_amount_ngn - self.current_raised_ngn).max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvestmentStatus {
    #[serde(rename = "CONFIRMED")]
    Confirmed,
    #[serde(rename = "REVERSED")]
    Reversed,
}

impl InvestmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestmentStatus::Confirmed => "CONFIRMED",
            InvestmentStatus::Reversed => "REVERSED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "CONFIRMED" => Some(InvestmentStatus::Confirmed),
            "REVERSED" => Some(InvestmentStatus::Reversed),
            _ => None,
        }
    }
}

/// One confirmed contribution to a pool. A user may hold several rows per
/// pool; their cumulative stake is the sum of bps across CONFIRMED rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolInvestment {
    pub id: String,
    pub pool_id: String,
    pub user_id: String,
    pub amount_ngn: i64,
    pub ownership_units: u64,
    pub ownership_bps: u32,
    pub tx_ref: String,
    pub status: InvestmentStatus,
    pub created_at: String,
}

/// Balance-affecting event kinds recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Deposit,
    PoolInvestment,
    DownPayment,
    Repayment,
    Return,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Deposit => "deposit",
            EntryType::PoolInvestment => "pool_investment",
            EntryType::DownPayment => "down_payment",
            EntryType::Repayment => "repayment",
            EntryType::Return => "return",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(EntryType::Deposit),
            "pool_investment" => Some(EntryType::PoolInvestment),
            "down_payment" => Some(EntryType::DownPayment),
            "repayment" => Some(EntryType::Repayment),
            "return" => Some(EntryType::Return),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    InternalWallet,
    Paystack,
    System,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::InternalWallet => "internal_wallet",
            PaymentMethod::Paystack => "paystack",
            PaymentMethod::System => "system",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "internal_wallet" => Some(PaymentMethod::InternalWallet),
            "paystack" => Some(PaymentMethod::Paystack),
            "system" => Some(PaymentMethod::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    Completed,
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Completed => "Completed",
            EntryStatus::Failed => "Failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Completed" => Some(EntryStatus::Completed),
            "Failed" => Some(EntryStatus::Failed),
            _ => None,
        }
    }
}

/// Append-only audit record. A Completed entry's gateway reference is unique
/// platform-wide and is the system of record for idempotency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub user_id: String,
    pub user_type: UserRole,
    pub entry_type: EntryType,
    pub amount_ngn: i64,
    pub method: PaymentMethod,
    pub gateway_reference: Option<String>,
    pub related_id: Option<String>,
    pub description: String,
    pub status: EntryStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "DEFAULTED")]
    Defaulted,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Active => "ACTIVE",
            ContractStatus::Completed => "COMPLETED",
            ContractStatus::Defaulted => "DEFAULTED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(ContractStatus::Active),
            "COMPLETED" => Some(ContractStatus::Completed),
            "DEFAULTED" => Some(ContractStatus::Defaulted),
            _ => None,
        }
    }
}

/// Hire-purchase contract a driver repays week by week. Linked to the pool
/// whose investors receive pro-rata returns from each repayment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: String,
    pub driver_user_id: String,
    pub pool_id: String,
    pub vehicle_display_name: String,
    pub principal_ngn: i64,
    pub total_payable_ngn: i64,
    pub total_paid_ngn: i64,
    pub weekly_payment_ngn: i64,
    pub duration_weeks: i64,
    pub start_date: String,
    pub next_due_date: Option<String>,
    pub status: ContractStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl Contract {
    pub fn remaining_balance_ngn(&self) -> i64 {
        (self.total_payable_ngn - self.total_paid_ngn).max(0)
    }
}

/// Loan record targeted by down-payment settlements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: String,
    pub driver_user_id: String,
    pub down_payment_made: bool,
    pub down_payment_amount_ngn: i64,
    pub down_payment_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverPaymentStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "CONFIRMED")]
    Confirmed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl DriverPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverPaymentStatus::Pending => "PENDING",
            DriverPaymentStatus::Confirmed => "CONFIRMED",
            DriverPaymentStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(DriverPaymentStatus::Pending),
            "CONFIRMED" => Some(DriverPaymentStatus::Confirmed),
            "FAILED" => Some(DriverPaymentStatus::Failed),
            _ => None,
        }
    }
}

/// One initialized repayment attempt against a contract. The gateway
/// reference doubles as the settlement idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverPayment {
    pub id: String,
    pub contract_id: String,
    pub driver_user_id: String,
    pub amount_ngn: i64,
    pub applied_amount_ngn: i64,
    pub reference: String,
    pub status: DriverPaymentStatus,
    pub failed_reason: Option<String>,
    pub confirmed_at: Option<String>,
    pub created_at: String,
}

/// One investor's share of a distributed driver repayment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestorCredit {
    pub id: String,
    pub payment_reference: String,
    pub pool_id: String,
    pub investor_user_id: String,
    pub amount_ngn: i64,
    pub ownership_bps: u32,
    pub created_at: String,
}

/// Settlement kinds accepted from the external gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    WalletDeposit,
    DownPayment,
    DriverRepayment,
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::WalletDeposit => "wallet_deposit",
            PaymentKind::DownPayment => "down_payment",
            PaymentKind::DriverRepayment => "driver_repayment",
        }
    }

    pub fn entry_type(&self) -> EntryType {
        match self {
            PaymentKind::WalletDeposit => EntryType::Deposit,
            PaymentKind::DownPayment => EntryType::DownPayment,
            PaymentKind::DriverRepayment => EntryType::Repayment,
        }
    }

    pub fn from_entry_type(entry_type: EntryType) -> Option<Self> {
        match entry_type {
            EntryType::Deposit => Some(PaymentKind::WalletDeposit),
            EntryType::DownPayment => Some(PaymentKind::DownPayment),
            EntryType::Repayment => Some(PaymentKind::DriverRepayment),
            _ => None,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub paystack_secret_key: Option<String>,
    pub paystack_base_url: String,
    pub callback_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./fleetfund.db".to_string());

        let paystack_secret_key = std::env::var("PAYSTACK_SECRET_KEY").ok();

        let paystack_base_url = std::env::var("PAYSTACK_BASE_URL")
            .unwrap_or_else(|_| "https://api.paystack.co".to_string());

        let callback_url = std::env::var("PAYMENT_CALLBACK_URL").ok();

        Ok(Self {
            database_path,
            paystack_secret_key,
            paystack_base_url,
            callback_url,
        })
    }
}
