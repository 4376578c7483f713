//! Per-view notification bus and subscriptions

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::hub::ChannelHub;
use crate::message::{ChangeKind, Notification, ViewId};
use crate::Result;

const LOCAL_CAPACITY: usize = 64;

/// Ids remembered per subscription for duplicate suppression.
const DEDUP_WINDOW: usize = 256;

/// The notification endpoints of one view.
pub struct NotificationBus {
    view_id: ViewId,
    channel_name: String,
    topic: broadcast::Sender<Notification>,
    local: broadcast::Sender<Notification>,
}

impl NotificationBus {
    pub fn new(hub: &ChannelHub, channel_name: &str, view_id: ViewId) -> Result<Self> {
        let topic = hub.topic(channel_name)?;
        let (local, _) = broadcast::channel(LOCAL_CAPACITY);

        Ok(Self {
            view_id,
            channel_name: channel_name.to_string(),
            topic,
            local,
        })
    }

    pub fn view_id(&self) -> ViewId {
        self.view_id
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Announce a change to every view, this one included.
    pub fn publish(&self, kind: ChangeKind) -> Notification {
        let message = Notification::new(self.view_id, kind);

        // A send only fails when nobody is listening, which is fine here
        let remote = self.topic.send(message.clone()).unwrap_or(0);
        let local = self.local.send(message.clone()).unwrap_or(0);

        tracing::debug!(
            kind = %kind,
            origin = %self.view_id,
            channel = %self.channel_name,
            remote_receivers = remote,
            local_receivers = local,
            "Published change notification"
        );

        message
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            view_id: self.view_id,
            local: Some(self.local.subscribe()),
            remote: Some(self.topic.subscribe()),
            seen: VecDeque::with_capacity(DEDUP_WINDOW),
            seen_ids: HashSet::with_capacity(DEDUP_WINDOW),
        }
    }

    /// Drive `handler` on a background task for every delivered notification.
    pub fn subscribe_with<F, Fut>(&self, mut handler: F) -> SubscriptionHandle
    where
        F: FnMut(Notification) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut subscription = self.subscribe();
        let task = tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                handler(message).await;
            }
        });

        SubscriptionHandle { task: Some(task) }
    }
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Local,
    Remote,
}

/// Listens on both the local channel and the shared topic.
///
/// Topic messages published by this same view are skipped (the local channel
/// already carries them) and ids already delivered are dropped, so one
/// mutation produces one delivery.
pub struct Subscription {
    view_id: ViewId,
    local: Option<broadcast::Receiver<Notification>>,
    remote: Option<broadcast::Receiver<Notification>>,
    seen: VecDeque<Uuid>,
    seen_ids: HashSet<Uuid>,
}

impl Subscription {
    /// Next notification, or `None` once both channels are closed or the
    /// subscription was cancelled.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            if self.local.is_none() && self.remote.is_none() {
                return None;
            }

            let (source, result) = tokio::select! {
                r = recv_from(&mut self.local) => (Source::Local, r),
                r = recv_from(&mut self.remote) => (Source::Remote, r),
            };

            match result {
                Ok(message) => {
                    if matches!(source, Source::Remote) && message.origin == self.view_id {
                        continue;
                    }
                    if !self.remember(message.id) {
                        continue;
                    }
                    return Some(message);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        view_id = %self.view_id,
                        ?source,
                        skipped,
                        "Subscriber lagged, skipping notifications"
                    );
                }
                Err(RecvError::Closed) => match source {
                    Source::Local => self.local = None,
                    Source::Remote => self.remote = None,
                },
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.local.is_some() || self.remote.is_some()
    }

    /// Release both receivers. Nothing is delivered afterwards.
    pub fn unsubscribe(&mut self) {
        self.local = None;
        self.remote = None;
    }

    fn remember(&mut self, id: Uuid) -> bool {
        if !self.seen_ids.insert(id) {
            return false;
        }
        self.seen.push_back(id);
        if self.seen.len() > DEDUP_WINDOW {
            if let Some(oldest) = self.seen.pop_front() {
                self.seen_ids.remove(&oldest);
            }
        }
        true
    }
}

async fn recv_from(
    rx: &mut Option<broadcast::Receiver<Notification>>,
) -> std::result::Result<Notification, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Background subscription started by [`NotificationBus::subscribe_with`].
/// Dropping the handle cancels it as well.
pub struct SubscriptionHandle {
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    async fn next(subscription: &mut Subscription) -> Option<Notification> {
        tokio::time::timeout(Duration::from_millis(200), subscription.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_originator_receives_once() {
        let hub = ChannelHub::new();
        let bus = NotificationBus::new(&hub, "patients", ViewId::new()).unwrap();
        let mut sub = bus.subscribe();

        let sent = bus.publish(ChangeKind::PatientAdded);

        let received = next(&mut sub).await.unwrap();
        assert_eq!(received.id, sent.id);
        // The topic copy of the same message is not delivered a second time
        assert!(next(&mut sub).await.is_none());
    }

    #[tokio::test]
    async fn test_other_views_receive() {
        let hub = ChannelHub::new();
        let a = NotificationBus::new(&hub, "patients", ViewId::new()).unwrap();
        let b = NotificationBus::new(&hub, "patients", ViewId::new()).unwrap();
        let c = NotificationBus::new(&hub, "elsewhere", ViewId::new()).unwrap();

        let mut sub_b = b.subscribe();
        let mut sub_c = c.subscribe();

        let sent = a.publish(ChangeKind::SqlExecuted);

        let received = next(&mut sub_b).await.unwrap();
        assert_eq!(received.origin, a.view_id());
        assert_eq!(received.kind, ChangeKind::SqlExecuted);
        assert_eq!(received.id, sent.id);
        assert!(next(&mut sub_c).await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_ids_suppressed() {
        let hub = ChannelHub::new();
        let a = NotificationBus::new(&hub, "patients", ViewId::new()).unwrap();
        let b = NotificationBus::new(&hub, "patients", ViewId::new()).unwrap();
        let mut sub_b = b.subscribe();

        let message = Notification::new(a.view_id(), ChangeKind::StoreChanged);
        let topic = hub.topic("patients").unwrap();
        topic.send(message.clone()).unwrap();
        topic.send(message).unwrap();

        assert!(next(&mut sub_b).await.is_some());
        assert!(next(&mut sub_b).await.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let hub = ChannelHub::new();
        let bus = NotificationBus::new(&hub, "patients", ViewId::new()).unwrap();
        let mut sub = bus.subscribe();

        sub.unsubscribe();
        bus.publish(ChangeKind::PatientAdded);

        assert!(!sub.is_active());
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_handler_subscription() {
        let hub = ChannelHub::new();
        let bus = NotificationBus::new(&hub, "patients", ViewId::new()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let mut handle = bus.subscribe_with(move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        bus.publish(ChangeKind::PatientAdded);
        for _ in 0..50 {
            if calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        handle.unsubscribe();
        assert!(!handle.is_active());
        bus.publish(ChangeKind::PatientAdded);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
