//! Webhook authentication and payload normalization.
//!
//! Paystack signs each delivery with HMAC-SHA512 over the raw body using the
//! account secret key. Verification runs against the raw bytes before any
//! JSON parsing; an unsigned or tampered body never reaches the ledger.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha512;
use tracing::debug;

use crate::gateway::GatewayError;
use crate::models::PaymentKind;

type HmacSha512 = Hmac<Sha512>;

/// Raw webhook envelope as Paystack delivers it.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub data: ChargeData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeData {
    pub reference: String,
    /// Kobo, per the gateway wire format.
    pub amount: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: Option<ChargeMetadata>,
}

/// Routing metadata attached at transaction initialization.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeMetadata {
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub loan_id: Option<String>,
    #[serde(default)]
    pub contract_id: Option<String>,
}

/// A verified, normalized webhook ready for the settlement engine. Amounts
/// are whole naira; sub-naira kobo are truncated at this boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementInstruction {
    pub reference: String,
    pub kind: PaymentKind,
    pub amount_ngn: i64,
    pub target_ref: String,
}

/// Check the `x-paystack-signature` header against the raw request body.
pub fn verify_signature(secret_key: &str, body: &[u8], signature: &str) -> bool {
    let Ok(decoded) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret_key.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&decoded).is_ok()
}

/// Verify and normalize one webhook delivery.
///
/// Returns `Ok(None)` for events the ledger does not settle (anything other
/// than `charge.success`); those are acknowledged and dropped, never errors,
/// so the gateway stops redelivering them.
pub fn parse_event(
    secret_key: &str,
    body: &[u8],
    signature: &str,
) -> Result<Option<SettlementInstruction>, GatewayError> {
    if !verify_signature(secret_key, body, signature) {
        return Err(GatewayError::InvalidSignature);
    }

    let event: WebhookEvent =
        serde_json::from_slice(body).map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;

    if event.event != "charge.success" {
        debug!(event = %event.event, "ignoring non-settlement webhook event");
        return Ok(None);
    }

    Ok(Some(instruction_from_charge(event.data)?))
}

fn instruction_from_charge(data: ChargeData) -> Result<SettlementInstruction, GatewayError> {
    let reference = data.reference.trim().to_string();
    if reference.is_empty() {
        return Err(GatewayError::MalformedPayload(
            "charge without a reference".to_string(),
        ));
    }

    let metadata = data
        .metadata
        .ok_or_else(|| GatewayError::MalformedPayload("charge without metadata".to_string()))?;
    let payment_type = metadata
        .payment_type
        .unwrap_or_default()
        .to_lowercase();

    let (kind, target_ref) = match payment_type.as_str() {
        // Older initializations used "wallet_funding"; both route the same.
        "wallet_deposit" | "wallet_funding" => (PaymentKind::WalletDeposit, metadata.user_id),
        "down_payment" => (PaymentKind::DownPayment, metadata.loan_id),
        "driver_repayment" => (PaymentKind::DriverRepayment, metadata.contract_id),
        other => return Err(GatewayError::UnsupportedPaymentType(other.to_string())),
    };
    let target_ref = target_ref.filter(|t| !t.trim().is_empty()).ok_or_else(|| {
        GatewayError::MalformedPayload(format!("{payment_type} charge without a target id"))
    })?;

    Ok(SettlementInstruction {
        reference,
        kind,
        amount_ngn: data.amount / 100,
        target_ref,
    })
}
