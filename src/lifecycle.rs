use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::request::{ItemRequest, ModerationStats, RequestStore};
use crate::error::{AppError, Result};
use crate::notify::{self, NotificationSender};

/// What kind of listing a request is. LOST and REWARD promise a reward and
/// therefore owe a deposit before moderation; FOUND and REPORT do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestCategory {
    Lost,
    Found,
    Reward,
    Report,
}

impl RequestCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestCategory::Lost => "LOST",
            RequestCategory::Found => "FOUND",
            RequestCategory::Reward => "REWARD",
            RequestCategory::Report => "REPORT",
        }
    }

    pub fn requires_deposit(&self) -> bool {
        matches!(self, RequestCategory::Lost | RequestCategory::Reward)
    }
}

impl FromStr for RequestCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "LOST" => Ok(RequestCategory::Lost),
            "FOUND" => Ok(RequestCategory::Found),
            "REWARD" => Ok(RequestCategory::Reward),
            "REPORT" => Ok(RequestCategory::Report),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    PendingDeposit,
    Pending,
    Open,
    InProgress,
    Completed,
    Canceled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::PendingDeposit => "PENDING_DEPOSIT",
            RequestStatus::Pending => "PENDING",
            RequestStatus::Open => "OPEN",
            RequestStatus::InProgress => "IN_PROGRESS",
            RequestStatus::Completed => "COMPLETED",
            RequestStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Canceled)
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING_DEPOSIT" => Ok(RequestStatus::PendingDeposit),
            "PENDING" => Ok(RequestStatus::Pending),
            "OPEN" => Ok(RequestStatus::Open),
            "IN_PROGRESS" => Ok(RequestStatus::InProgress),
            "COMPLETED" => Ok(RequestStatus::Completed),
            "CANCELED" => Ok(RequestStatus::Canceled),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    DepositReceived,
    Approve,
    Accept,
    Complete,
    Cancel,
}

/// The full transition table. Anything not enumerated here is illegal,
/// including every edge out of the terminal states.
pub fn next_status(current: RequestStatus, action: LifecycleAction) -> Option<RequestStatus> {
    use LifecycleAction::*;
    use RequestStatus::*;

    match (current, action) {
        (PendingDeposit, DepositReceived) => Some(Pending),
        (PendingDeposit, Approve) | (Pending, Approve) => Some(Open),
        (Open, Accept) => Some(InProgress),
        (InProgress, Complete) => Some(Completed),
        (PendingDeposit, Cancel) | (Open, Cancel) | (InProgress, Cancel) => Some(Canceled),
        _ => None,
    }
}

/// Status a fresh request starts in. Every listing waits for moderation;
/// deposit-bearing categories additionally wait for the deposit first.
pub fn initial_status(category: RequestCategory) -> RequestStatus {
    if category.requires_deposit() {
        RequestStatus::PendingDeposit
    } else {
        RequestStatus::Pending
    }
}

/// Rewards up to this amount are collateralized in full.
pub const FULL_COLLATERAL_LIMIT: i64 = 100_000;

/// Deposit owed for a promised reward: the whole reward for small amounts,
/// 10% (floor) above the full-collateral limit.
pub fn deposit_amount(reward_amount: i64) -> i64 {
    if reward_amount <= FULL_COLLATERAL_LIMIT {
        reward_amount
    } else {
        reward_amount / 10
    }
}

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometers between two coordinate pairs.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    // rounding can nudge a past 1.0 near antipodal pairs, which would NaN
    let a = a.clamp(0.0, 1.0);

    EARTH_RADIUS_KM * 2.0 * a.sqrt().asin()
}

/// Creation command. Status and deposit are intentionally absent: the
/// server derives both, a client supplied value has nowhere to go.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub category: RequestCategory,
    pub title: String,
    pub description: String,
    pub reward_amount: i64,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Newest,
    RewardHigh,
    RewardLow,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "reward_high" => Ok(SortOrder::RewardHigh),
            "reward_low" => Ok(SortOrder::RewardLow),
            other => Err(format!("unknown sortBy: {other}")),
        }
    }
}

/// Validated listing filter. Every recognized option is an explicit field,
/// there is no pass-through of raw query params into the query.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub category: Option<RequestCategory>,
    pub status: Option<RequestStatus>,
    pub keyword: Option<String>,
    pub location: Option<String>,
    pub min_reward: Option<i64>,
    pub max_reward: Option<i64>,
    pub date_from: Option<chrono::DateTime<chrono::Utc>>,
    pub date_to: Option<chrono::DateTime<chrono::Utc>>,
    pub sort: SortOrder,
}

/// Owns the request state machine: every status change funnels through here
/// and is applied as a conditional update so concurrent callers cannot both
/// win the same edge.
pub struct LifecycleService<S> {
    store: S,
    notifier: Arc<dyn NotificationSender>,
}

impl<S: RequestStore> LifecycleService<S> {
    pub fn new(store: S, notifier: Arc<dyn NotificationSender>) -> Self {
        Self { store, notifier }
    }

    pub async fn create(&self, owner: Uuid, new: NewRequest) -> Result<ItemRequest> {
        if new.title.trim().is_empty() {
            return Err(AppError::Validation("title must not be empty".into()));
        }
        if new.reward_amount < 0 {
            return Err(AppError::Validation(
                "rewardAmount must be non-negative".into(),
            ));
        }
        if new.latitude.is_some() != new.longitude.is_some() {
            return Err(AppError::Validation(
                "latitude and longitude must be supplied together".into(),
            ));
        }

        let status = initial_status(new.category);
        let deposit = deposit_amount(new.reward_amount);

        let created = self.store.insert(owner, &new, status, deposit).await?;
        tracing::info!(
            "request {} created by {owner} as {} (deposit {deposit})",
            created.id,
            status.as_str()
        );
        Ok(created)
    }

    pub async fn get(&self, id: i64) -> Result<ItemRequest> {
        self.store
            .find(id)
            .await?
            .ok_or(AppError::NotFound("request"))
    }

    pub async fn list(&self, filter: ListFilter) -> Result<Vec<ItemRequest>> {
        self.store.list(&filter).await
    }

    /// Post-query Haversine filter over open listings that carry coordinates.
    pub async fn nearby(&self, latitude: f64, longitude: f64, radius_km: f64) -> Result<Vec<ItemRequest>> {
        if radius_km <= 0.0 {
            return Err(AppError::Validation("radius must be positive".into()));
        }
        let candidates = self.store.open_with_coordinates().await?;
        Ok(candidates
            .into_iter()
            .filter(|req| match (req.latitude, req.longitude) {
                (Some(lat), Some(lon)) => {
                    haversine_km(latitude, longitude, lat, lon) <= radius_km
                }
                _ => false,
            })
            .collect())
    }

    pub async fn accept(&self, actor: Uuid, id: i64) -> Result<ItemRequest> {
        let req = self.get(id).await?;
        if req.user_id == actor {
            return Err(AppError::Forbidden("cannot accept your own request"));
        }
        if next_status(req.status, LifecycleAction::Accept).is_none() {
            return Err(AppError::InvalidState(format!(
                "request is {}",
                req.status.as_str()
            )));
        }
        if !self.store.claim(id, actor).await? {
            // lost the race to another acceptor
            return Err(AppError::InvalidState("request is no longer OPEN".into()));
        }
        tracing::info!("request {id} accepted by {actor}");
        notify::best_effort(
            self.notifier.clone(),
            req.user_id,
            "Your request was accepted",
            "Someone started working on your listing.",
        );
        self.get(id).await
    }

    pub async fn complete(&self, actor: Uuid, id: i64) -> Result<ItemRequest> {
        let req = self.get(id).await?;
        if req.user_id != actor {
            return Err(AppError::Forbidden("only the owner can complete a request"));
        }
        self.transition(&req, LifecycleAction::Complete).await?;
        tracing::info!("request {id} completed by owner {actor}");
        if let Some(finder) = req.accepted_by {
            notify::best_effort(
                self.notifier.clone(),
                finder,
                "Request completed",
                "The owner marked the request as completed.",
            );
        }
        self.get(id).await
    }

    pub async fn cancel(&self, actor: Uuid, id: i64) -> Result<ItemRequest> {
        let req = self.get(id).await?;
        if req.user_id != actor {
            return Err(AppError::Forbidden("only the owner can cancel a request"));
        }
        self.transition(&req, LifecycleAction::Cancel).await?;
        tracing::info!("request {id} canceled by owner {actor}");
        self.get(id).await
    }

    /// Admin approval: PENDING_DEPOSIT/PENDING to OPEN, rejecting anything
    /// already past moderation (a second approve of the same id fails here).
    pub async fn approve(&self, id: i64) -> Result<ItemRequest> {
        let req = self.get(id).await?;
        self.transition(&req, LifecycleAction::Approve).await?;
        tracing::info!("request {id} approved");
        notify::best_effort(
            self.notifier.clone(),
            req.user_id,
            "Listing approved",
            "Your listing is now public.",
        );
        self.get(id).await
    }

    /// Approves whichever of the given ids are still awaiting moderation and
    /// reports how many actually transitioned. Ineligible ids are skipped,
    /// never an error.
    pub async fn bulk_approve(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let approved = self.store.approve_many(ids).await?;
        tracing::info!("bulk approve: {approved} of {} requests", ids.len());
        Ok(approved)
    }

    /// Called once a deposit payment is verified: PENDING_DEPOSIT moves on to
    /// PENDING (deposit received, moderation still ahead). Losing the race or
    /// addressing a request past that state is fine, the request was simply
    /// already moderated.
    pub async fn deposit_received(&self, id: i64) -> Result<()> {
        let Some(req) = self.store.find(id).await? else {
            return Ok(());
        };
        let Some(to) = next_status(req.status, LifecycleAction::DepositReceived) else {
            return Ok(());
        };
        if self.store.transition(req.id, req.status, to).await? {
            tracing::info!("request {id} deposit received, awaiting moderation");
        }
        Ok(())
    }

    pub async fn moderation_queue(&self) -> Result<Vec<ItemRequest>> {
        self.store.awaiting_moderation().await
    }

    pub async fn stats(&self) -> Result<ModerationStats> {
        self.store.stats().await
    }

    async fn transition(&self, req: &ItemRequest, action: LifecycleAction) -> Result<()> {
        let to = next_status(req.status, action).ok_or_else(|| {
            AppError::InvalidState(format!("request is {}", req.status.as_str()))
        })?;
        if self.store.transition(req.id, req.status, to).await? {
            Ok(())
        } else {
            Err(AppError::InvalidState(
                "request changed state concurrently".into(),
            ))
        }
    }
}
