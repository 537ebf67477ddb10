//! Backend transport boundary for the realtime sync stack.
//!
//! The sync services never talk to a vendor SDK directly; they depend on the
//! traits in this module. `RealtimeTransport` opens change-feed channels,
//! `PlatformMonitor` surfaces device network/app-lifecycle notifications.
//! The production implementation is the websocket gateway client in
//! `gateway`; tests substitute in-memory fakes.

/// Websocket gateway client implementing `RealtimeTransport`
mod gateway;
/// Type definitions for the transport boundary
mod types;

pub use gateway::GatewayClient;
pub use types::*;

use futures::stream::BoxStream;

/// A live channel: its message stream plus the handle used to close it.
pub struct Channel {
    pub messages: BoxStream<'static, ChannelMessage>,
    pub handle: Box<dyn ChannelHandle>,
}

/// Handle for closing an open channel.
#[async_trait::async_trait]
pub trait ChannelHandle: Send + Sync {
    async fn close(&self) -> Result<(), TransportError>;
}

/// Client-side contract against the realtime backend.
#[async_trait::async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Probe backend reachability. Called by the channel service on
    /// initialization and during reconnect attempts.
    async fn establish(&self) -> Result<(), TransportError>;

    /// Open a uniquely-named channel scoped to one table/filter.
    async fn open_channel(
        &self,
        channel_name: &str,
        scope: &ChangeScope,
    ) -> Result<Channel, TransportError>;
}

/// Device-level awareness during sync: network reachability and app
/// foreground/background transitions.
#[async_trait::async_trait]
pub trait PlatformMonitor: Send + Sync {
    /// Whether this runtime has OS-level network/app-state notifications at
    /// all. On the web there is nothing to observe.
    fn is_native(&self) -> bool;

    /// Current network status snapshot.
    async fn network_status(&self) -> Result<NetworkStatus, TransportError>;

    /// Stream of network status transitions.
    fn network_changes(&self) -> BoxStream<'static, NetworkStatus>;

    /// Stream of app foreground/background transitions.
    fn app_state_changes(&self) -> BoxStream<'static, AppStateChange>;
}

/// Platform monitor for non-native runtimes. Reports a permanently-online,
/// always-foregrounded environment and never emits a transition.
pub struct WebPlatform;

#[async_trait::async_trait]
impl PlatformMonitor for WebPlatform {
    fn is_native(&self) -> bool {
        false
    }

    async fn network_status(&self) -> Result<NetworkStatus, TransportError> {
        Ok(NetworkStatus {
            connected: true,
            connection_type: "unknown".to_string(),
        })
    }

    fn network_changes(&self) -> BoxStream<'static, NetworkStatus> {
        Box::pin(futures::stream::pending())
    }

    fn app_state_changes(&self) -> BoxStream<'static, AppStateChange> {
        Box::pin(futures::stream::pending())
    }
}
