//! Ledger core: pool investment and exactly-once external settlement.
//!
//! All money movement funnels through two engines sharing one durable store:
//! [`investment::InvestmentEngine`] for internal-wallet pool contributions and
//! [`settlement::SettlementEngine`] for gateway-confirmed payments.

pub mod error;
pub mod idempotency;
pub mod investment;
pub mod ownership;
pub mod settlement;
pub mod store;

pub use error::{ErrorKind, LedgerError};
pub use idempotency::{claim_gateway_reference, Claim};
pub use investment::{InvestmentEngine, InvestmentResult};
pub use ownership::{compute_ownership, Ownership, TOTAL_OWNERSHIP_BPS, TOTAL_OWNERSHIP_UNITS};
pub use settlement::{DistributionResult, SettlementEngine, SettlementResult};
pub use store::{LedgerStore, NewContract};
