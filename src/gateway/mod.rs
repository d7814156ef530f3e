//! Paystack integration: webhook verification and the REST client.
//!
//! The gateway layer never touches balances. It authenticates and normalizes
//! gateway traffic into [`webhook::SettlementInstruction`] values; the ledger
//! settlement engine owns every effect.

pub mod client;
pub mod webhook;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("webhook signature verification failed")]
    InvalidSignature,

    #[error("malformed gateway payload: {0}")]
    MalformedPayload(String),

    #[error("unsupported payment type: {0}")]
    UnsupportedPaymentType(String),

    #[error("gateway rejected the request: {0}")]
    Api(String),

    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub use client::{
    deposit_reference, down_payment_reference, InitializedTransaction, PaystackClient,
    VerifiedTransaction,
};
pub use webhook::{verify_signature, SettlementInstruction, WebhookEvent};
