//! Ledger error taxonomy.
//!
//! Engines return typed failures so the calling tier can map each one 1:1 to
//! a response. Retryable storage contention is surfaced separately from
//! business-rule rejections so callers can tell "try again" from "invalid".

use thiserror::Error;

/// Coarse classification used by callers when mapping to a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input shape or range. Never retried.
    Validation,
    /// A business rule rejected the request. Never retried.
    BusinessRule,
    /// Missing entity.
    NotFound,
    /// Transaction contention survived all retries. Safe to retry with backoff.
    Conflict,
    /// Underlying storage failure.
    Storage,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid {0} id")]
    InvalidId(&'static str),

    #[error("amount must be greater than zero")]
    InvalidAmount,

    #[error("target amount must be greater than zero")]
    InvalidTarget,

    #[error("pool not found")]
    PoolNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("loan not found")]
    LoanNotFound,

    #[error("contract not found")]
    ContractNotFound,

    #[error("driver payment not found")]
    PaymentNotFound,

    #[error("this pool is not open for investment")]
    PoolNotOpen,

    #[error("minimum contribution is {minimum} NGN")]
    BelowMinimumContribution { minimum: i64 },

    #[error("this pool has already reached its target amount")]
    PoolAlreadyFunded,

    #[error("amount exceeds remaining target by {excess} NGN")]
    ExceedsRemainingTarget { excess: i64 },

    #[error("insufficient internal wallet balance")]
    InsufficientBalance,

    #[error("down payment has already been made for this loan")]
    AlreadyPaid,

    #[error("this hire-purchase contract is not active")]
    ContractNotActive,

    #[error("this contract has already been settled")]
    ContractSettled,

    #[error("this payment has already failed: {0}")]
    PaymentAlreadyFailed(String),

    #[error("transaction reference {0} is already in use")]
    DuplicateReference(String),

    #[error("transaction conflict, please try again")]
    RetryableConflict,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidId(_) | LedgerError::InvalidAmount | LedgerError::InvalidTarget => {
                ErrorKind::Validation
            }
            LedgerError::PoolNotFound
            | LedgerError::UserNotFound
            | LedgerError::LoanNotFound
            | LedgerError::ContractNotFound
            | LedgerError::PaymentNotFound => ErrorKind::NotFound,
            LedgerError::PoolNotOpen
            | LedgerError::BelowMinimumContribution { .. }
            | LedgerError::PoolAlreadyFunded
            | LedgerError::ExceedsRemainingTarget { .. }
            | LedgerError::InsufficientBalance
            | LedgerError::AlreadyPaid
            | LedgerError::ContractNotActive
            | LedgerError::ContractSettled
            | LedgerError::PaymentAlreadyFailed(_)
            | LedgerError::DuplicateReference(_) => ErrorKind::BusinessRule,
            LedgerError::RetryableConflict => ErrorKind::Conflict,
            LedgerError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// True when the underlying storage error is transient lock contention.
    pub(crate) fn is_busy(&self) -> bool {
        match self {
            LedgerError::Storage(e) => is_busy_sqlite(e),
            _ => false,
        }
    }
}

pub(crate) fn is_busy_sqlite(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ConstraintViolation)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_classify_for_response_mapping() {
        assert_eq!(LedgerError::InvalidAmount.kind(), ErrorKind::Validation);
        assert_eq!(LedgerError::PoolNotFound.kind(), ErrorKind::NotFound);
        assert_eq!(LedgerError::InsufficientBalance.kind(), ErrorKind::BusinessRule);
        assert_eq!(
            LedgerError::ExceedsRemainingTarget { excess: 10 }.kind(),
            ErrorKind::BusinessRule
        );
        assert_eq!(LedgerError::RetryableConflict.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn business_messages_carry_the_specific_reason() {
        let err = LedgerError::ExceedsRemainingTarget { excess: 250_000 };
        assert_eq!(err.to_string(), "amount exceeds remaining target by 250000 NGN");

        let err = LedgerError::BelowMinimumContribution { minimum: 5_000 };
        assert_eq!(err.to_string(), "minimum contribution is 5000 NGN");
    }
}
