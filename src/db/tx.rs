use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Reward,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Reward => "REWARD",
            TransactionType::Refund => "REFUND",
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(TransactionType::Deposit),
            "REWARD" => Ok(TransactionType::Reward),
            "REFUND" => Ok(TransactionType::Refund),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Completed,
    Pending,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Refunded => "REFUNDED",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "PENDING" => Ok(TransactionStatus::Pending),
            "FAILED" => Ok(TransactionStatus::Failed),
            "REFUNDED" => Ok(TransactionStatus::Refunded),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// A payment event, recorded only after the gateway confirmed it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: i64,
    pub user_id: Uuid,
    pub request_id: Option<i64>,
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: i64,
    pub imp_uid: Option<String>,
    pub merchant_uid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn map_transaction(row: &PgRow) -> std::result::Result<Transaction, sqlx::Error> {
    let tx_type: String = row.try_get("tx_type")?;
    let status: String = row.try_get("status")?;
    Ok(Transaction {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        request_id: row.try_get("request_id")?,
        tx_type: tx_type
            .parse()
            .map_err(|err: String| sqlx::Error::Decode(err.into()))?,
        status: status
            .parse()
            .map_err(|err: String| sqlx::Error::Decode(err.into()))?,
        amount: row.try_get("amount")?,
        imp_uid: row.try_get("imp_uid")?,
        merchant_uid: row.try_get("merchant_uid")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// The slice of transaction persistence the refund flow runs on.
/// `mark_refunded`/`revert_refund` are compare-and-swap on `status`, so a
/// refund is claimed by exactly one caller before any gateway traffic.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn find_for_user(&self, id: i64, user_id: Uuid) -> Result<Option<Transaction>>;

    /// COMPLETED -> REFUNDED, conditionally; false means someone got there
    /// first or the transaction was never completed.
    async fn mark_refunded(&self, id: i64) -> Result<bool>;

    /// REFUNDED -> COMPLETED, undoing a claimed refund whose gateway cancel
    /// did not go through.
    async fn revert_refund(&self, id: i64) -> Result<bool>;
}

#[derive(Clone)]
pub struct TxRepository {
    pool: PgPool,
}

impl TxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Records a gateway-confirmed payment. Callers verify first; nothing is
    /// ever inserted speculatively.
    pub async fn insert_completed(
        &self,
        user_id: Uuid,
        request_id: Option<i64>,
        tx_type: TransactionType,
        amount: i64,
        imp_uid: &str,
        merchant_uid: &str,
    ) -> Result<Transaction> {
        let row = sqlx::query(
            r#"
            INSERT INTO transactions
                (user_id, request_id, tx_type, status, amount, imp_uid, merchant_uid)
            VALUES ($1, $2, $3, 'COMPLETED', $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(request_id)
        .bind(tx_type.as_str())
        .bind(amount)
        .bind(imp_uid)
        .bind(merchant_uid)
        .fetch_one(&self.pool)
        .await?;
        Ok(map_transaction(&row)?)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Transaction>> {
        let rows =
            sqlx::query("SELECT * FROM transactions WHERE user_id = $1 ORDER BY created_at DESC")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(map_transaction)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}

#[async_trait]
impl TransactionStore for TxRepository {
    async fn find_for_user(&self, id: i64, user_id: Uuid) -> Result<Option<Transaction>> {
        let row = sqlx::query("SELECT * FROM transactions WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(map_transaction)
            .transpose()
            .map_err(Into::into)
    }

    async fn mark_refunded(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = 'REFUNDED', updated_at = NOW()
            WHERE id = $1 AND status = 'COMPLETED'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revert_refund(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = 'COMPLETED', updated_at = NOW()
            WHERE id = $1 AND status = 'REFUNDED'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
