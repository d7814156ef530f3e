//! Fixed-point ownership math.
//!
//! Ownership must be a deterministic function of contribution size alone so
//! concurrent investors can be allocated independently. All arithmetic is
//! integer; floor truncation under-allocates the last fractional unit rather
//! than letting aggregate bps drift past 10,000.

use serde::{Deserialize, Serialize};

use crate::ledger::error::LedgerError;

/// 1,000,000 units = 100% of a pool.
pub const TOTAL_OWNERSHIP_UNITS: u64 = 1_000_000;

/// 10,000 basis points = 100%.
pub const TOTAL_OWNERSHIP_BPS: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub units: u64,
    pub bps: u32,
}

/// Compute the stake a contribution buys against a pool's fixed target.
///
/// The target is the pool's creation-time `target_amount_ngn`, never the live
/// remaining amount, so percentages are stable and comparable across
/// contributors. Negative amounts clamp to zero ownership.
pub fn compute_ownership(amount_ngn: i64, target_amount_ngn: i64) -> Result<Ownership, LedgerError> {
    if target_amount_ngn <= 0 {
        return Err(LedgerError::InvalidTarget);
    }

    let amount = amount_ngn.max(0) as i128;
    let target = target_amount_ngn as i128;

    let units = (amount * TOTAL_OWNERSHIP_UNITS as i128) / target;
    let bps = (amount * TOTAL_OWNERSHIP_BPS as i128) / target;

    Ok(Ownership {
        units: units as u64,
        bps: bps as u32,
    })
}
