//! Outbound client for the card payment gateway.
//!
//! Only payment-intent creation is needed: the browser completes the payment
//! with the returned client secret and later reports it to
//! `POST /payments/confirm`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tap::TapFallible;

/// Currency every payment intent is created in.
pub const INTENT_CURRENCY: &str = "usd";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    Request(#[from] reqwest::Error),

    #[error("gateway responded {status}: {message}")]
    Api {
        status: reqwest::StatusCode,
        message: String,
    },

    #[error("gateway returned a payment intent without a client secret")]
    MissingClientSecret,
}

impl GatewayError {
    /// What the caller of `/create-payment` gets to see.
    pub fn client_message(&self) -> String {
        match self {
            Self::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

#[axum::async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a card payment intent for `amount` in the currency's smallest unit.
    async fn create_payment_intent(&self, amount: i64) -> Result<PaymentIntent, GatewayError>;
}

pub type SharedGateway = Arc<dyn PaymentGateway>;

#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        }
    }
}

#[derive(Deserialize)]
struct IntentBody {
    id: String,
    client_secret: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: Option<String>,
    r#type: Option<String>,
}

#[derive(Serialize)]
struct IntentForm<'a> {
    amount: i64,
    currency: &'a str,
    #[serde(rename = "payment_method_types[]")]
    payment_method_types: &'a str,
}

#[axum::async_trait]
impl PaymentGateway for StripeGateway {
    #[tracing::instrument(skip(self))]
    async fn create_payment_intent(&self, amount: i64) -> Result<PaymentIntent, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&IntentForm {
                amount,
                currency: INTENT_CURRENCY,
                payment_method_types: "card",
            })
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(ErrorBody { error }) => error
                    .message
                    .or(error.r#type)
                    .unwrap_or_else(|| status.to_string()),
                Err(_) => status.to_string(),
            };

            return Err(GatewayError::Api { status, message })
                .tap_err(|err| tracing::debug!("payment intent rejected: {}", err));
        }

        let body = response.json::<IntentBody>().await?;

        tracing::debug!("created payment intent {}", body.id);

        Ok(PaymentIntent {
            client_secret: body.client_secret.ok_or(GatewayError::MissingClientSecret)?,
            id: body.id,
        })
    }
}
