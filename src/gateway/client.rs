//! Paystack REST client.
//!
//! Initialize-then-verify flow: we create a transaction carrying routing
//! metadata, the customer pays on the hosted page, and we confirm the charge
//! by reference before asking the ledger to settle. Webhook and verify both
//! feed the same settlement path, so double delivery is harmless.

use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::gateway::GatewayError;
use crate::models::{Config, PaymentKind};

#[derive(Clone)]
pub struct PaystackClient {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
    callback_url: Option<String>,
}

/// A transaction the customer has yet to pay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializedTransaction {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

/// Gateway-side view of a charge, fetched by reference.
#[derive(Debug, Clone)]
pub struct VerifiedTransaction {
    pub reference: String,
    pub status: String,
    pub amount_ngn: i64,
}

impl VerifiedTransaction {
    pub fn is_paid(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    reference: String,
    status: String,
    /// Kobo.
    amount: i64,
}

impl PaystackClient {
    pub fn from_config(config: &Config) -> Result<Self, GatewayError> {
        let secret_key = config
            .paystack_secret_key
            .clone()
            .ok_or_else(|| GatewayError::Api("PAYSTACK_SECRET_KEY is not set".to_string()))?;

        Ok(Self {
            http: reqwest::Client::new(),
            secret_key,
            base_url: config.paystack_base_url.trim_end_matches('/').to_string(),
            callback_url: config.callback_url.clone(),
        })
    }

    /// Create a hosted-checkout transaction. Amounts are whole naira here and
    /// kobo on the wire.
    pub async fn initialize_transaction(
        &self,
        email: &str,
        amount_ngn: i64,
        reference: &str,
        kind: PaymentKind,
        target_ref: &str,
    ) -> Result<InitializedTransaction, GatewayError> {
        let metadata = match kind {
            PaymentKind::WalletDeposit => json!({ "paymentType": kind.as_str(), "userId": target_ref }),
            PaymentKind::DownPayment => json!({ "paymentType": kind.as_str(), "loanId": target_ref }),
            PaymentKind::DriverRepayment => {
                json!({ "paymentType": kind.as_str(), "contractId": target_ref })
            }
        };

        let mut body = json!({
            "email": email,
            "amount": amount_ngn * 100,
            "reference": reference,
            "metadata": metadata,
        });
        if let Some(callback) = &self.callback_url {
            body["callback_url"] = json!(callback);
        }

        let envelope: ApiEnvelope<InitializedTransaction> = self
            .http
            .post(format!("{}/transaction/initialize", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        let data = match envelope {
            ApiEnvelope {
                status: true,
                data: Some(data),
                ..
            } => data,
            ApiEnvelope { message, .. } => return Err(GatewayError::Api(message)),
        };

        info!(
            reference,
            kind = kind.as_str(),
            amount_ngn,
            "💳 Gateway transaction initialized"
        );
        Ok(data)
    }

    /// Fetch the gateway's verdict on a charge by reference.
    pub async fn verify_transaction(
        &self,
        reference: &str,
    ) -> Result<VerifiedTransaction, GatewayError> {
        let envelope: ApiEnvelope<VerifyData> = self
            .http
            .get(format!("{}/transaction/verify/{}", self.base_url, reference))
            .bearer_auth(&self.secret_key)
            .send()
            .await?
            .json()
            .await?;

        match envelope {
            ApiEnvelope {
                status: true,
                data: Some(data),
                ..
            } => Ok(VerifiedTransaction {
                reference: data.reference,
                status: data.status,
                amount_ngn: data.amount / 100,
            }),
            ApiEnvelope { message, .. } => Err(GatewayError::Api(message)),
        }
    }
}

/// Reference for a wallet deposit initialization.
pub fn deposit_reference() -> String {
    gateway_reference("ff_dep")
}

/// Reference for a loan down payment initialization.
pub fn down_payment_reference() -> String {
    gateway_reference("ff_down")
}

fn gateway_reference(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    format!("{}_{}_{}", prefix, Utc::now().timestamp_millis(), suffix)
}
