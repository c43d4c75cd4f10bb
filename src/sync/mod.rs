//! Observer-side synchronization — reconciled view, notification
//! detection, and the reconnecting stream client.

pub mod client;
pub mod notify;
pub mod view;

pub use client::{ConnectionState, SyncClient, SyncConfig};
pub use notify::{Notification, NotificationDetector, Severity};
pub use view::TaskView;
