//! Gateway-reference idempotency guard.
//!
//! External gateways deliver the same confirmation more than once: webhook
//! and client verify racing, browser back-button replay, gateway retry on
//! timeout. Claiming the reference as the first step of the settlement
//! transaction converts at-least-once delivery into apply-at-most-once. The
//! partial unique index on completed ledger entries is the backstop, so the
//! check-then-act window is closed by the storage engine, not narrowed.

use rusqlite::Connection;

use crate::ledger::error::LedgerError;
use crate::ledger::store;
use crate::models::LedgerEntry;

/// Outcome of claiming a gateway reference inside a settlement transaction.
#[derive(Debug, Clone)]
pub enum Claim {
    /// Nothing applied under this reference yet; proceed with the effect.
    First,
    /// A completed entry already carries this reference. The settlement is a
    /// replay and must return the stored outcome unchanged.
    AlreadyClaimed(LedgerEntry),
}

pub fn claim_gateway_reference(conn: &Connection, reference: &str) -> Result<Claim, LedgerError> {
    match store::find_completed_entry_by_reference(conn, reference)? {
        Some(entry) => Ok(Claim::AlreadyClaimed(entry)),
        None => Ok(Claim::First),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::LedgerStore;
    use crate::models::{EntryStatus, EntryType, PaymentMethod, UserRole};
    use chrono::Utc;
    use tempfile::NamedTempFile;
    use uuid::Uuid;

    fn completed_entry(reference: &str) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4().to_string(),
            user_id: "u1".to_string(),
            user_type: UserRole::Investor,
            entry_type: EntryType::Deposit,
            amount_ngn: 50_000,
            method: PaymentMethod::Paystack,
            gateway_reference: Some(reference.to_string()),
            related_id: None,
            description: String::new(),
            status: EntryStatus::Completed,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn first_claim_then_already_claimed() {
        let temp = NamedTempFile::new().unwrap();
        let store = LedgerStore::new(temp.path().to_str().unwrap()).unwrap();

        store
            .with_write_tx(|tx| {
                assert!(matches!(
                    claim_gateway_reference(tx, "ref_123")?,
                    Claim::First
                ));
                store::insert_entry(tx, &completed_entry("ref_123"))
            })
            .await
            .unwrap();

        store
            .with_write_tx(|tx| {
                match claim_gateway_reference(tx, "ref_123")? {
                    Claim::AlreadyClaimed(entry) => {
                        assert_eq!(entry.amount_ngn, 50_000);
                        assert_eq!(entry.gateway_reference.as_deref(), Some("ref_123"));
                    }
                    Claim::First => panic!("reference should already be claimed"),
                }
                Ok(())
            })
            .await
            .unwrap();
    }
}
