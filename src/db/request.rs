use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, QueryBuilder, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::lifecycle::{ListFilter, NewRequest, RequestCategory, RequestStatus, SortOrder};

/// A lost/found listing as persisted. `ItemRequest` rather than `Request` to
/// stay clear of the HTTP type of the same name.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRequest {
    pub id: i64,
    pub user_id: Uuid,
    pub category: RequestCategory,
    pub status: RequestStatus,
    pub title: String,
    pub description: String,
    pub reward_amount: i64,
    pub deposit_amount: i64,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub images: Vec<String>,
    pub accepted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationStats {
    pub pending_deposit: i64,
    pub pending: i64,
    pub open: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub canceled: i64,
    pub deposit_revenue: i64,
}

/// Persistence seam for the lifecycle service. `transition` and `claim` are
/// compare-and-swap on `status`: false means the request was not in the
/// expected state anymore.
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn insert(
        &self,
        owner: Uuid,
        new: &NewRequest,
        status: RequestStatus,
        deposit: i64,
    ) -> Result<ItemRequest>;

    async fn find(&self, id: i64) -> Result<Option<ItemRequest>>;

    async fn transition(&self, id: i64, from: RequestStatus, to: RequestStatus) -> Result<bool>;

    /// OPEN -> IN_PROGRESS, recording who accepted, in one conditional update.
    async fn claim(&self, id: i64, actor: Uuid) -> Result<bool>;

    async fn list(&self, filter: &ListFilter) -> Result<Vec<ItemRequest>>;

    async fn open_with_coordinates(&self) -> Result<Vec<ItemRequest>>;

    async fn awaiting_moderation(&self) -> Result<Vec<ItemRequest>>;

    /// Moves every listed id still awaiting moderation to OPEN, skipping the
    /// rest. Returns the number of rows that actually changed.
    async fn approve_many(&self, ids: &[i64]) -> Result<u64>;

    async fn stats(&self) -> Result<ModerationStats>;
}

#[derive(Clone)]
pub struct PgRequestStore {
    pool: PgPool,
}

impl PgRequestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_request(row: &PgRow) -> std::result::Result<ItemRequest, sqlx::Error> {
    let category: String = row.try_get("category")?;
    let status: String = row.try_get("status")?;
    Ok(ItemRequest {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        category: category
            .parse()
            .map_err(|err: String| sqlx::Error::Decode(err.into()))?,
        status: status
            .parse()
            .map_err(|err: String| sqlx::Error::Decode(err.into()))?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        reward_amount: row.try_get("reward_amount")?,
        deposit_amount: row.try_get("deposit_amount")?,
        location: row.try_get("location")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        images: row.try_get("images")?,
        accepted_by: row.try_get("accepted_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl RequestStore for PgRequestStore {
    async fn insert(
        &self,
        owner: Uuid,
        new: &NewRequest,
        status: RequestStatus,
        deposit: i64,
    ) -> Result<ItemRequest> {
        let row = sqlx::query(
            r#"
            INSERT INTO requests
                (user_id, category, status, title, description,
                 reward_amount, deposit_amount, location, latitude, longitude, images)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(owner)
        .bind(new.category.as_str())
        .bind(status.as_str())
        .bind(&new.title)
        .bind(&new.description)
        .bind(new.reward_amount)
        .bind(deposit)
        .bind(&new.location)
        .bind(new.latitude)
        .bind(new.longitude)
        .bind(&new.images)
        .fetch_one(&self.pool)
        .await?;

        Ok(map_request(&row)?)
    }

    async fn find(&self, id: i64) -> Result<Option<ItemRequest>> {
        let row = sqlx::query("SELECT * FROM requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_request).transpose().map_err(Into::into)
    }

    async fn transition(&self, id: i64, from: RequestStatus, to: RequestStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE requests SET status = $1, updated_at = NOW() WHERE id = $2 AND status = $3",
        )
        .bind(to.as_str())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim(&self, id: i64, actor: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE requests
            SET status = 'IN_PROGRESS', accepted_by = $1, updated_at = NOW()
            WHERE id = $2 AND status = 'OPEN'
            "#,
        )
        .bind(actor)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<ItemRequest>> {
        let mut qb = QueryBuilder::<sqlx::Postgres>::new("SELECT * FROM requests WHERE 1=1");

        if let Some(category) = filter.category {
            qb.push(" AND category = ").push_bind(category.as_str());
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(keyword) = &filter.keyword {
            let pattern = format!("%{keyword}%");
            qb.push(" AND (title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR description ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(location) = &filter.location {
            qb.push(" AND location ILIKE ")
                .push_bind(format!("%{location}%"));
        }
        if let Some(min) = filter.min_reward {
            qb.push(" AND reward_amount >= ").push_bind(min);
        }
        if let Some(max) = filter.max_reward {
            qb.push(" AND reward_amount <= ").push_bind(max);
        }
        if let Some(from) = filter.date_from {
            qb.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = filter.date_to {
            qb.push(" AND created_at <= ").push_bind(to);
        }

        qb.push(match filter.sort {
            SortOrder::Newest => " ORDER BY created_at DESC",
            SortOrder::RewardHigh => " ORDER BY reward_amount DESC, created_at DESC",
            SortOrder::RewardLow => " ORDER BY reward_amount ASC, created_at DESC",
        });

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(map_request)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    async fn open_with_coordinates(&self) -> Result<Vec<ItemRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM requests
            WHERE status = 'OPEN' AND latitude IS NOT NULL AND longitude IS NOT NULL
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(map_request)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    async fn awaiting_moderation(&self) -> Result<Vec<ItemRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM requests
            WHERE status IN ('PENDING_DEPOSIT', 'PENDING')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(map_request)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    async fn approve_many(&self, ids: &[i64]) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE requests
            SET status = 'OPEN', updated_at = NOW()
            WHERE id = ANY($1) AND status IN ('PENDING_DEPOSIT', 'PENDING')
            "#,
        )
        .bind(ids.to_vec())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<ModerationStats> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS cnt, COALESCE(SUM(deposit_amount), 0)::BIGINT AS deposit_sum
            FROM requests
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = ModerationStats::default();
        for row in &rows {
            let status: String = row.try_get("status")?;
            let status: RequestStatus = status
                .parse()
                .map_err(|err: String| sqlx::Error::Decode(err.into()))?;
            let count: i64 = row.try_get("cnt")?;
            let deposit_sum: i64 = row.try_get("deposit_sum")?;

            match status {
                RequestStatus::PendingDeposit => stats.pending_deposit = count,
                RequestStatus::Pending => stats.pending = count,
                RequestStatus::Open => stats.open = count,
                RequestStatus::InProgress => stats.in_progress = count,
                RequestStatus::Completed => stats.completed = count,
                RequestStatus::Canceled => stats.canceled = count,
            }
            // canceled deposits get refunded, they are not revenue
            if status != RequestStatus::Canceled {
                stats.deposit_revenue += deposit_sum;
            }
        }
        Ok(stats)
    }
}
