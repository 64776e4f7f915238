use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{auth::AuthService, utils::validate_auth_token};
use crate::db::request::PgRequestStore;
use crate::db::tx::{
    Transaction, TransactionStatus, TransactionStore, TransactionType, TxRepository,
};
use crate::error::{AppError, Result};
use crate::gateway::{GatewayPayment, PaymentGateway};
use crate::lifecycle::LifecycleService;

#[derive(Clone)]
pub struct PaymentsState {
    pub auth: Arc<AuthService>,
    pub txs: TxRepository,
    pub gateway: Arc<dyn PaymentGateway>,
    pub lifecycle: Arc<LifecycleService<PgRequestStore>>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub imp_uid: String,
    pub merchant_uid: String,
    #[serde(rename = "requestId")]
    pub request_id: Option<i64>,
    pub amount: i64,
    #[serde(rename = "type")]
    pub tx_type: String,
}

/// The gateway's word is only trusted when it reports the payment settled
/// and for exactly the amount the caller claims to have paid.
fn check_gateway_amount(payment: &GatewayPayment, expected: i64) -> Result<()> {
    if !payment.paid {
        return Err(AppError::UpstreamPayment(
            "payment not completed at gateway".into(),
        ));
    }
    if payment.amount != expected {
        return Err(AppError::UpstreamPayment(format!(
            "amount mismatch: gateway reports {}, expected {expected}",
            payment.amount
        )));
    }
    Ok(())
}

/// Checked before any gateway traffic: only a COMPLETED transaction with a
/// gateway payment id can be refunded.
fn check_refundable(tx: &Transaction) -> Result<&str> {
    if tx.status != TransactionStatus::Completed {
        return Err(AppError::InvalidState(format!(
            "transaction is {}",
            tx.status.as_str()
        )));
    }
    tx.imp_uid
        .as_deref()
        .ok_or_else(|| AppError::InvalidState("transaction has no gateway payment id".into()))
}

async fn verify_payment(
    headers: HeaderMap,
    State(state): State<PaymentsState>,
    Json(body): Json<VerifyRequest>,
) -> Result<impl IntoResponse> {
    let user = validate_auth_token(&headers, &state.auth)?;

    let tx_type: TransactionType = body.tx_type.parse().map_err(AppError::Validation)?;
    if body.amount <= 0 {
        return Err(AppError::Validation("amount must be positive".into()));
    }

    // the transaction row exists only after the gateway confirms the amount
    let payment = state.gateway.fetch_payment(&body.imp_uid).await?;
    check_gateway_amount(&payment, body.amount)?;

    let tx = state
        .txs
        .insert_completed(
            user,
            body.request_id,
            tx_type,
            body.amount,
            &body.imp_uid,
            &body.merchant_uid,
        )
        .await?;
    tracing::info!(
        "verified {} payment {} for user {user} (transaction {})",
        tx_type.as_str(),
        body.imp_uid,
        tx.id
    );

    // a confirmed deposit lets the request move on to moderation
    if tx_type == TransactionType::Deposit {
        if let Some(request_id) = body.request_id {
            state.lifecycle.deposit_received(request_id).await?;
        }
    }

    Ok((StatusCode::CREATED, Json(tx)))
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    #[serde(rename = "transactionId")]
    pub transaction_id: i64,
    pub reason: Option<String>,
}

/// The refund flow proper. The refundability checks run before any gateway
/// traffic, and the COMPLETED -> REFUNDED flip is claimed up front so only
/// one of two racing refunds ever reaches the gateway; if the gateway then
/// refuses, the claim is handed back.
pub async fn execute_refund(
    txs: &dyn TransactionStore,
    gateway: &dyn PaymentGateway,
    user: Uuid,
    transaction_id: i64,
    reason: Option<&str>,
) -> Result<Transaction> {
    let tx = txs
        .find_for_user(transaction_id, user)
        .await?
        .ok_or(AppError::NotFound("transaction"))?;

    let imp_uid = check_refundable(&tx)?;

    if !txs.mark_refunded(tx.id).await? {
        return Err(AppError::InvalidState(
            "transaction was refunded concurrently".into(),
        ));
    }

    if let Err(err) = gateway.cancel_payment(imp_uid, tx.amount, reason).await {
        // gateway refused, hand the claim back so the user can retry
        if !txs.revert_refund(tx.id).await? {
            tracing::error!("transaction {} left REFUNDED without a gateway cancel", tx.id);
        }
        return Err(err);
    }
    tracing::info!("refunded transaction {} for user {user}", tx.id);

    txs.find_for_user(tx.id, user)
        .await?
        .ok_or(AppError::NotFound("transaction"))
}

async fn refund_payment(
    headers: HeaderMap,
    State(state): State<PaymentsState>,
    Json(body): Json<RefundRequest>,
) -> Result<impl IntoResponse> {
    let user = validate_auth_token(&headers, &state.auth)?;

    let refunded = execute_refund(
        &state.txs,
        state.gateway.as_ref(),
        user,
        body.transaction_id,
        body.reason.as_deref(),
    )
    .await?;
    Ok(Json(refunded))
}

async fn my_transactions(
    headers: HeaderMap,
    State(state): State<PaymentsState>,
) -> Result<impl IntoResponse> {
    let user = validate_auth_token(&headers, &state.auth)?;
    let transactions = state.txs.list_for_user(user).await?;
    Ok(Json(transactions))
}

pub fn payment_routes(state: PaymentsState) -> Router {
    Router::new()
        .route("/payments/verify", post(verify_payment))
        .route("/payments/refund", post(refund_payment))
        .route("/payments/my-transactions", get(my_transactions))
        .with_state(state)
}
