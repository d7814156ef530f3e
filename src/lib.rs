//! Fractional vehicle-financing ledger.
//!
//! Investors fund shuttle and keke pools from internal wallets and receive a
//! fixed-point ownership stake; drivers repay hire-purchase contracts through
//! an external gateway, and confirmed repayments are distributed pro-rata
//! back to the pool's investors. Every balance movement is a row in an
//! append-style ledger, and every external confirmation settles exactly once.

pub mod gateway;
pub mod ledger;
pub mod models;

pub use gateway::{GatewayError, PaystackClient, SettlementInstruction};
pub use ledger::{
    InvestmentEngine, InvestmentResult, LedgerError, LedgerStore, SettlementEngine,
    SettlementResult,
};
pub use models::{Config, PaymentKind};
