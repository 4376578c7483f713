//! Named broadcast topics shared by the views of one device

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast;

use crate::error::BusError;
use crate::message::Notification;
use crate::Result;

const DEFAULT_CAPACITY: usize = 64;

static GLOBAL: OnceLock<ChannelHub> = OnceLock::new();

/// Registry of named topics. Views that ask for the same name share one
/// broadcast channel.
#[derive(Clone)]
pub struct ChannelHub {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<Notification>>>>,
    capacity: usize,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Process-wide hub. Tests should build their own with [`ChannelHub::new`].
    pub fn global() -> &'static ChannelHub {
        GLOBAL.get_or_init(ChannelHub::new)
    }

    /// Sender for topic `name`, created on first use.
    pub fn topic(&self, name: &str) -> Result<broadcast::Sender<Notification>> {
        if name.trim().is_empty() {
            return Err(BusError::EmptyChannelName);
        }

        if let Some(sender) = self.topics.read().get(name) {
            return Ok(sender.clone());
        }

        let mut topics = self.topics.write();
        let sender = topics
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(sender.clone())
    }
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ChangeKind, ViewId};

    #[test]
    fn test_same_name_shares_channel() {
        let hub = ChannelHub::new();
        let a = hub.topic("patients").unwrap();
        let b = hub.topic("patients").unwrap();
        let other = hub.topic("audit").unwrap();

        let mut rx = b.subscribe();
        let mut other_rx = other.subscribe();
        a.send(Notification::new(ViewId::new(), ChangeKind::StoreChanged))
            .unwrap();

        assert_eq!(rx.try_recv().unwrap().kind, ChangeKind::StoreChanged);
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn test_empty_name_rejected() {
        let hub = ChannelHub::new();
        assert!(matches!(hub.topic("  "), Err(BusError::EmptyChannelName)));
    }
}
