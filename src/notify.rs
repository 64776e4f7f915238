use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

/// Push/real-time delivery seam. Strictly best-effort: the lifecycle never
/// waits on or rolls back for a notification.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, user_id: Uuid, title: &str, body: &str) -> anyhow::Result<()>;
}

/// Stand-in sender that only logs. The real push channel lives outside this
/// service and is swapped in behind the same trait.
pub struct LogNotifier;

#[async_trait]
impl NotificationSender for LogNotifier {
    async fn send(&self, user_id: Uuid, title: &str, body: &str) -> anyhow::Result<()> {
        tracing::info!("notify {user_id}: {title} - {body}");
        Ok(())
    }
}

/// Fires the notification on a detached task; a failure is logged and
/// otherwise dropped.
pub fn best_effort(sender: Arc<dyn NotificationSender>, user_id: Uuid, title: &str, body: &str) {
    let title = title.to_string();
    let body = body.to_string();
    tokio::spawn(async move {
        if let Err(err) = sender.send(user_id, &title, &body).await {
            tracing::warn!("notification to {user_id} failed: {err}");
        }
    });
}
