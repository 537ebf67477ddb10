//! Realtime data synchronization services.
//!
//! Four cooperating services keep the application's critical tables live:
//! [`channels::ChannelService`] manages per-table change-feed subscriptions,
//! [`listeners::DataListenersService`] maintains typed in-memory caches over
//! them, [`errors::RealtimeErrorHandler`] classifies failures and drives
//! retry/escalation, and [`mobile::MobileSyncService`] pauses and resumes the
//! whole layer as device connectivity changes. [`stack::RealtimeSyncStack`]
//! wires them together.

pub mod channels;
pub mod config;
pub mod errors;
pub mod listeners;
pub mod mobile;
pub mod notify;
pub mod recovery;
pub mod rows;
pub mod stack;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use channels::{ChannelService, SubscribeOptions};
pub use config::RealtimeSyncConfig;
pub use errors::{
    ErrorCategory, ErrorSeverity, ErrorStats, RealtimeErrorHandler, SyncError,
};
pub use listeners::{DataListenersService, ListenersStatus, TableCallback, TableChange};
pub use mobile::{MobileSyncService, MobileSyncState};
pub use notify::{LogNotifier, Notification, NotificationKind, Notifier};
pub use recovery::{RecoveryStrategy, RestartOrchestrator};
pub use rows::{CriticalTable, Lease, Payment, Property, TableRow, UserProfile};
pub use stack::RealtimeSyncStack;
pub use types::{SubscriptionHandle, SubscriptionPhase, SyncCallback, SyncServiceError};
