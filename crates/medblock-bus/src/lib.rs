//! MedBlock Notification Bus
//!
//! Every view of the store runs the same refresh path after a mutation,
//! whether the mutation happened in that view or in another one:
//! - a named broadcast topic reaches every other view on the device
//! - a local channel reaches the view that made the change
//! - subscriptions listen to both and drop duplicates

mod bus;
mod error;
mod hub;
mod message;

pub use bus::{NotificationBus, Subscription, SubscriptionHandle};
pub use error::BusError;
pub use hub::ChannelHub;
pub use message::{ChangeKind, Notification, ViewId};

pub type Result<T> = std::result::Result<T, BusError>;

/// Topic shared by every view of the patient store.
pub const DEFAULT_CHANNEL: &str = "patient_db_channel";
