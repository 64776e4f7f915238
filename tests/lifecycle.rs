//! Lifecycle behavior against an in-memory store with the same
//! compare-and-swap semantics as the Postgres one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use uuid::Uuid;

use lostfound_backend::db::request::{ItemRequest, ModerationStats, RequestStore};
use lostfound_backend::error::{AppError, Result};
use lostfound_backend::lifecycle::{
    LifecycleService, ListFilter, NewRequest, RequestCategory, RequestStatus,
};
use lostfound_backend::notify::LogNotifier;

#[derive(Default)]
struct MemStore {
    rows: Mutex<HashMap<i64, ItemRequest>>,
    next_id: AtomicI64,
}

#[async_trait]
impl RequestStore for MemStore {
    async fn insert(
        &self,
        owner: Uuid,
        new: &NewRequest,
        status: RequestStatus,
        deposit: i64,
    ) -> Result<ItemRequest> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let row = ItemRequest {
            id,
            user_id: owner,
            category: new.category,
            status,
            title: new.title.clone(),
            description: new.description.clone(),
            reward_amount: new.reward_amount,
            deposit_amount: deposit,
            location: new.location.clone(),
            latitude: new.latitude,
            longitude: new.longitude,
            images: new.images.clone(),
            accepted_by: None,
            created_at: now,
            updated_at: now,
        };
        self.rows.lock().unwrap().insert(id, row.clone());
        Ok(row)
    }

    async fn find(&self, id: i64) -> Result<Option<ItemRequest>> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn transition(&self, id: i64, from: RequestStatus, to: RequestStatus) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row) if row.status == from => {
                row.status = to;
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim(&self, id: i64, actor: Uuid) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row) if row.status == RequestStatus::Open => {
                row.status = RequestStatus::InProgress;
                row.accepted_by = Some(actor);
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<ItemRequest>> {
        let rows = self.rows.lock().unwrap();
        let mut out: Vec<_> = rows
            .values()
            .filter(|row| filter.status.map_or(true, |status| row.status == status))
            .filter(|row| filter.category.map_or(true, |cat| row.category == cat))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn open_with_coordinates(&self) -> Result<Vec<ItemRequest>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|row| {
                row.status == RequestStatus::Open
                    && row.latitude.is_some()
                    && row.longitude.is_some()
            })
            .cloned()
            .collect())
    }

    async fn awaiting_moderation(&self) -> Result<Vec<ItemRequest>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|row| {
                matches!(
                    row.status,
                    RequestStatus::PendingDeposit | RequestStatus::Pending
                )
            })
            .cloned()
            .collect())
    }

    async fn approve_many(&self, ids: &[i64]) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let mut approved = 0;
        for id in ids {
            if let Some(row) = rows.get_mut(id) {
                if matches!(
                    row.status,
                    RequestStatus::PendingDeposit | RequestStatus::Pending
                ) {
                    row.status = RequestStatus::Open;
                    approved += 1;
                }
            }
        }
        Ok(approved)
    }

    async fn stats(&self) -> Result<ModerationStats> {
        let rows = self.rows.lock().unwrap();
        let mut stats = ModerationStats::default();
        for row in rows.values() {
            match row.status {
                RequestStatus::PendingDeposit => stats.pending_deposit += 1,
                RequestStatus::Pending => stats.pending += 1,
                RequestStatus::Open => stats.open += 1,
                RequestStatus::InProgress => stats.in_progress += 1,
                RequestStatus::Completed => stats.completed += 1,
                RequestStatus::Canceled => stats.canceled += 1,
            }
            if row.status != RequestStatus::Canceled {
                stats.deposit_revenue += row.deposit_amount;
            }
        }
        Ok(stats)
    }
}

fn service() -> Arc<LifecycleService<MemStore>> {
    Arc::new(LifecycleService::new(
        MemStore::default(),
        Arc::new(LogNotifier),
    ))
}

fn lost_item(reward: i64) -> NewRequest {
    NewRequest {
        category: RequestCategory::Lost,
        title: "Lost wallet near the station".into(),
        description: "Brown leather, cards inside".into(),
        reward_amount: reward,
        location: "Gangnam".into(),
        latitude: Some(37.4979),
        longitude: Some(127.0276),
        images: vec![],
    }
}

fn found_item() -> NewRequest {
    NewRequest {
        category: RequestCategory::Found,
        title: "Found a black umbrella".into(),
        description: String::new(),
        reward_amount: 0,
        location: "Hongdae".into(),
        latitude: None,
        longitude: None,
        images: vec![],
    }
}

#[tokio::test]
async fn create_derives_status_and_deposit() {
    let svc = service();
    let owner = Uuid::new_v4();

    let lost = svc.create(owner, lost_item(250_000)).await.unwrap();
    assert_eq!(lost.status, RequestStatus::PendingDeposit);
    assert_eq!(lost.deposit_amount, 25_000);

    let found = svc.create(owner, found_item()).await.unwrap();
    assert_eq!(found.status, RequestStatus::Pending);
    assert_eq!(found.deposit_amount, 0);
}

#[tokio::test]
async fn create_rejects_negative_reward() {
    let svc = service();
    let err = svc
        .create(Uuid::new_v4(), lost_item(-1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn full_happy_path() {
    let svc = service();
    let owner = Uuid::new_v4();
    let finder = Uuid::new_v4();

    let req = svc.create(owner, lost_item(50_000)).await.unwrap();
    svc.deposit_received(req.id).await.unwrap();
    assert_eq!(svc.get(req.id).await.unwrap().status, RequestStatus::Pending);

    svc.approve(req.id).await.unwrap();
    assert_eq!(svc.get(req.id).await.unwrap().status, RequestStatus::Open);

    let accepted = svc.accept(finder, req.id).await.unwrap();
    assert_eq!(accepted.status, RequestStatus::InProgress);
    assert_eq!(accepted.accepted_by, Some(finder));

    let done = svc.complete(owner, req.id).await.unwrap();
    assert_eq!(done.status, RequestStatus::Completed);
}

#[tokio::test]
async fn self_accept_is_forbidden() {
    let svc = service();
    let owner = Uuid::new_v4();

    let req = svc.create(owner, found_item()).await.unwrap();
    svc.approve(req.id).await.unwrap();

    let err = svc.accept(owner, req.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
    assert_eq!(svc.get(req.id).await.unwrap().status, RequestStatus::Open);
}

#[tokio::test]
async fn accept_rejects_completed_request() {
    let svc = service();
    let owner = Uuid::new_v4();
    let finder = Uuid::new_v4();

    let req = svc.create(owner, found_item()).await.unwrap();
    svc.approve(req.id).await.unwrap();
    svc.accept(finder, req.id).await.unwrap();
    svc.complete(owner, req.id).await.unwrap();

    let err = svc.accept(Uuid::new_v4(), req.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[tokio::test]
async fn approve_is_not_idempotent() {
    let svc = service();
    let req = svc.create(Uuid::new_v4(), found_item()).await.unwrap();

    svc.approve(req.id).await.unwrap();
    let err = svc.approve(req.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[tokio::test]
async fn approve_unknown_id_is_not_found() {
    let svc = service();
    let err = svc.approve(999).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn bulk_approve_reports_partial_success() {
    let svc = service();
    let owner = Uuid::new_v4();

    let eligible = svc.create(owner, found_item()).await.unwrap();
    let already_open = svc.create(owner, found_item()).await.unwrap();
    svc.approve(already_open.id).await.unwrap();

    let approved = svc
        .bulk_approve(&[eligible.id, already_open.id])
        .await
        .unwrap();
    assert_eq!(approved, 1);
    assert_eq!(
        svc.get(eligible.id).await.unwrap().status,
        RequestStatus::Open
    );
}

#[tokio::test]
async fn owner_only_completion_and_cancellation() {
    let svc = service();
    let owner = Uuid::new_v4();
    let finder = Uuid::new_v4();

    let req = svc.create(owner, found_item()).await.unwrap();
    svc.approve(req.id).await.unwrap();
    svc.accept(finder, req.id).await.unwrap();

    let err = svc.complete(finder, req.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let err = svc.cancel(finder, req.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let canceled = svc.cancel(owner, req.id).await.unwrap();
    assert_eq!(canceled.status, RequestStatus::Canceled);

    // terminal: no further transitions
    let err = svc.cancel(owner, req.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
    let err = svc.complete(owner, req.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[tokio::test]
async fn concurrent_accepts_admit_exactly_one_winner() {
    let svc = service();
    let owner = Uuid::new_v4();

    let req = svc.create(owner, lost_item(10_000)).await.unwrap();
    svc.deposit_received(req.id).await.unwrap();
    svc.approve(req.id).await.unwrap();

    let attempts = 16;
    let results = join_all((0..attempts).map(|_| {
        let svc = svc.clone();
        let id = req.id;
        tokio::spawn(async move { svc.accept(Uuid::new_v4(), id).await })
    }))
    .await;

    let mut winners = 0;
    for result in results {
        match result.unwrap() {
            Ok(updated) => {
                winners += 1;
                assert_eq!(updated.status, RequestStatus::InProgress);
            }
            Err(err) => assert!(matches!(err, AppError::InvalidState(_))),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn nearby_filters_by_haversine_radius() {
    let svc = service();
    let owner = Uuid::new_v4();

    let close = svc.create(owner, lost_item(1_000)).await.unwrap();
    svc.deposit_received(close.id).await.unwrap();
    svc.approve(close.id).await.unwrap();

    let mut far_item = lost_item(1_000);
    far_item.latitude = Some(35.1796); // Busan, ~325 km away
    far_item.longitude = Some(129.0756);
    let far = svc.create(owner, far_item).await.unwrap();
    svc.deposit_received(far.id).await.unwrap();
    svc.approve(far.id).await.unwrap();

    let nearby = svc.nearby(37.4979, 127.0276, 5.0).await.unwrap();
    assert_eq!(nearby.len(), 1);
    assert_eq!(nearby[0].id, close.id);

    let err = svc.nearby(37.4979, 127.0276, 0.0).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn moderation_queue_lists_both_pending_kinds() {
    let svc = service();
    let owner = Uuid::new_v4();

    svc.create(owner, lost_item(1_000)).await.unwrap(); // PENDING_DEPOSIT
    svc.create(owner, found_item()).await.unwrap(); // PENDING
    let open = svc.create(owner, found_item()).await.unwrap();
    svc.approve(open.id).await.unwrap();

    let queue = svc.moderation_queue().await.unwrap();
    assert_eq!(queue.len(), 2);
}

#[tokio::test]
async fn stats_exclude_canceled_deposits_from_revenue() {
    let svc = service();
    let owner = Uuid::new_v4();

    let kept = svc.create(owner, lost_item(200_000)).await.unwrap(); // deposit 20000
    let dropped = svc.create(owner, lost_item(50_000)).await.unwrap(); // deposit 50000
    svc.cancel(owner, dropped.id).await.unwrap();

    let stats = svc.stats().await.unwrap();
    assert_eq!(stats.pending_deposit, 1);
    assert_eq!(stats.canceled, 1);
    assert_eq!(stats.deposit_revenue, kept.deposit_amount);
    assert_eq!(stats.deposit_revenue, 20_000);
}
