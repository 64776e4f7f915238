use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// What the gateway reports about a payment. `paid` is its settled flag,
/// `amount` is what the buyer was actually charged.
#[derive(Debug, Clone)]
pub struct GatewayPayment {
    pub imp_uid: String,
    pub merchant_uid: Option<String>,
    pub amount: i64,
    pub paid: bool,
}

/// Seam to the third-party payment gateway. Verification and refunds go
/// through here so route handlers never talk HTTP to the gateway directly.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn fetch_payment(&self, imp_uid: &str) -> Result<GatewayPayment>;

    async fn cancel_payment(&self, imp_uid: &str, amount: i64, reason: Option<&str>)
        -> Result<()>;
}

/// PortOne (Iamport) REST adapter: short-lived access token per call, then
/// the payment lookup or cancel endpoint. No retry; failures surface to the
/// caller as upstream errors.
pub struct PortOneGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    imp_key: &'a str,
    imp_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    message: Option<String>,
    response: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct PaymentBody {
    imp_uid: String,
    merchant_uid: Option<String>,
    amount: i64,
    status: String,
}

#[derive(Debug, Serialize)]
struct CancelRequest<'a> {
    imp_uid: &'a str,
    amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

impl PortOneGateway {
    pub fn new(base_url: String, api_key: String, api_secret: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            api_secret,
        }
    }

    async fn access_token(&self) -> Result<String> {
        let envelope: Envelope<TokenBody> = self
            .client
            .post(format!("{}/users/getToken", self.base_url))
            .json(&TokenRequest {
                imp_key: &self.api_key,
                imp_secret: &self.api_secret,
            })
            .send()
            .await
            .map_err(|err| AppError::UpstreamPayment(format!("token request failed: {err}")))?
            .json()
            .await
            .map_err(|err| AppError::UpstreamPayment(format!("malformed token response: {err}")))?;

        let body = unwrap_envelope(envelope, "token")?;
        Ok(body.access_token)
    }
}

fn unwrap_envelope<T>(envelope: Envelope<T>, what: &str) -> Result<T> {
    if envelope.code != 0 {
        return Err(AppError::UpstreamPayment(format!(
            "{what} rejected by gateway: {}",
            envelope.message.unwrap_or_else(|| "no message".into())
        )));
    }
    envelope
        .response
        .ok_or_else(|| AppError::UpstreamPayment(format!("{what} response missing body")))
}

#[async_trait]
impl PaymentGateway for PortOneGateway {
    async fn fetch_payment(&self, imp_uid: &str) -> Result<GatewayPayment> {
        let token = self.access_token().await?;

        let envelope: Envelope<PaymentBody> = self
            .client
            .get(format!("{}/payments/{imp_uid}", self.base_url))
            .header("Authorization", &token)
            .send()
            .await
            .map_err(|err| AppError::UpstreamPayment(format!("payment lookup failed: {err}")))?
            .json()
            .await
            .map_err(|err| {
                AppError::UpstreamPayment(format!("malformed payment response: {err}"))
            })?;

        let body = unwrap_envelope(envelope, "payment lookup")?;
        Ok(GatewayPayment {
            paid: body.status == "paid",
            imp_uid: body.imp_uid,
            merchant_uid: body.merchant_uid,
            amount: body.amount,
        })
    }

    async fn cancel_payment(
        &self,
        imp_uid: &str,
        amount: i64,
        reason: Option<&str>,
    ) -> Result<()> {
        let token = self.access_token().await?;

        let envelope: Envelope<PaymentBody> = self
            .client
            .post(format!("{}/payments/cancel", self.base_url))
            .header("Authorization", &token)
            .json(&CancelRequest {
                imp_uid,
                amount,
                reason,
            })
            .send()
            .await
            .map_err(|err| AppError::UpstreamPayment(format!("cancel failed: {err}")))?
            .json()
            .await
            .map_err(|err| AppError::UpstreamPayment(format!("malformed cancel response: {err}")))?;

        unwrap_envelope(envelope, "cancel")?;
        Ok(())
    }
}
