//! Network and app-lifecycle awareness.
//!
//! On native platforms this watches connectivity and foreground/background
//! transitions and pauses or resumes the whole sync layer accordingly. Resume
//! is debounced so flapping networks do not trigger a reconnect storm. On
//! non-native platforms the service is a no-op.

use crate::sync::channels::ChannelService;
use crate::sync::config::RealtimeSyncConfig;
use crate::sync::errors::{ErrorCategory, ErrorSeverity, RealtimeErrorHandler};
use crate::sync::listeners::DataListenersService;
use crate::sync::types::SyncServiceError;
use crate::transport::{AppStateChange, NetworkStatus, PlatformMonitor};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Mobile-facing view of the sync layer.
#[derive(Debug, Clone)]
pub struct MobileSyncState {
    pub is_online: bool,
    pub is_app_active: bool,
    pub connection_type: String,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub sync_paused: bool,
}

impl Default for MobileSyncState {
    fn default() -> Self {
        Self {
            is_online: true,
            is_app_active: true,
            connection_type: "unknown".to_string(),
            last_sync_time: None,
            sync_paused: false,
        }
    }
}

pub struct MobileSyncService {
    monitor: Arc<dyn PlatformMonitor>,
    channels: Arc<ChannelService>,
    listeners: Arc<DataListenersService>,
    errors: Arc<RealtimeErrorHandler>,
    config: RealtimeSyncConfig,
    state: Mutex<MobileSyncState>,
    resume_timer: Mutex<Option<JoinHandle<()>>>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl MobileSyncService {
    pub fn new(
        monitor: Arc<dyn PlatformMonitor>,
        channels: Arc<ChannelService>,
        listeners: Arc<DataListenersService>,
        errors: Arc<RealtimeErrorHandler>,
        config: RealtimeSyncConfig,
    ) -> Self {
        Self {
            monitor,
            channels,
            listeners,
            errors,
            config,
            state: Mutex::new(MobileSyncState::default()),
            resume_timer: Mutex::new(None),
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// Reconcile against the current network status and start the platform
    /// watchers. A failed status probe is reported but does not abort
    /// startup.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), SyncServiceError> {
        if !self.monitor.is_native() {
            info!("Mobile sync service: non-native runtime, using standard sync");
            return Ok(());
        }

        info!("Initializing mobile sync service...");

        match self.monitor.network_status().await {
            Ok(status) => {
                let paused = {
                    let mut state = self.state.lock().unwrap();
                    state.is_online = status.connected;
                    state.connection_type = status.connection_type.clone();
                    state.sync_paused
                };
                info!(
                    "Network status: {} ({})",
                    if status.connected { "online" } else { "offline" },
                    status.connection_type
                );
                if !status.connected && !paused {
                    self.pause_sync("Network disconnected");
                } else if status.connected && paused {
                    self.resume_sync("Network reconnected");
                }
            }
            Err(e) => {
                error!("Error checking network status: {}", e);
                self.errors.report_error(
                    ErrorCategory::Connection,
                    ErrorSeverity::High,
                    "Failed to initialize mobile sync service",
                    Some(json!({ "error": e.to_string() })),
                );
            }
        }

        let mut watchers = self.watchers.lock().unwrap();

        let this = self.clone();
        let mut network_changes = self.monitor.network_changes();
        watchers.push(tokio::spawn(async move {
            while let Some(status) = network_changes.next().await {
                this.on_network_change(status);
            }
        }));

        let this = self.clone();
        let mut app_state_changes = self.monitor.app_state_changes();
        watchers.push(tokio::spawn(async move {
            while let Some(change) = app_state_changes.next().await {
                this.on_app_state_change(change);
            }
        }));

        info!("Mobile sync service initialized");
        Ok(())
    }

    fn on_network_change(self: &Arc<Self>, status: NetworkStatus) {
        info!(
            "Network status changed: {} ({})",
            if status.connected { "online" } else { "offline" },
            status.connection_type
        );

        let (was_online, paused) = {
            let mut state = self.state.lock().unwrap();
            let was_online = state.is_online;
            state.is_online = status.connected;
            state.connection_type = status.connection_type;
            (was_online, state.sync_paused)
        };

        if !status.connected && !paused {
            self.pause_sync("Network disconnected");
        } else if status.connected && !was_online {
            self.resume_sync("Network reconnected");
        }
    }

    fn on_app_state_change(self: &Arc<Self>, change: AppStateChange) {
        let was_active = {
            let mut state = self.state.lock().unwrap();
            let was_active = state.is_app_active;
            state.is_app_active = change.is_active;
            was_active
        };

        if !change.is_active {
            // Stay subscribed in the background so the cache keeps up.
            info!("App backgrounded, keeping sync running");
        } else if !was_active {
            info!("App foregrounded, resuming normal sync");
            self.resume_sync("App foregrounded");
        }
    }

    /// Tear down every listener and channel. Safe to call when already
    /// paused.
    pub fn pause_sync(&self, reason: &str) {
        {
            let mut state = self.state.lock().unwrap();
            if state.sync_paused {
                return;
            }
            state.sync_paused = true;
        }
        info!("Pausing sync: {}", reason);
        self.listeners.stop_all_listeners();
        self.channels.unsubscribe_all();
    }

    /// Schedule a debounced resume. Each call replaces the previous pending
    /// timer, so a burst of resume triggers yields a single reconnect.
    pub fn resume_sync(self: &Arc<Self>, reason: &str) {
        if !self.state.lock().unwrap().sync_paused {
            return;
        }
        info!("Resuming sync: {}", reason);

        let mut timer = self.resume_timer.lock().unwrap();
        if let Some(pending) = timer.take() {
            pending.abort();
        }

        let this = self.clone();
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(this.config.resume_debounce).await;

            {
                let mut state = this.state.lock().unwrap();
                state.sync_paused = false;
                state.last_sync_time = Some(Utc::now());
            }

            let scope = this.listeners.owner_scope();
            let result: Result<(), SyncServiceError> = async {
                this.channels.initialize().await?;
                this.listeners
                    .initialize_all_listeners(scope.as_deref())
                    .await?;
                Ok(())
            }
            .await;

            match result {
                Ok(()) => info!("Sync resumed successfully"),
                Err(e) => {
                    error!("Error resuming sync: {}", e);
                    this.errors.report_error(
                        ErrorCategory::Connection,
                        ErrorSeverity::Medium,
                        "Failed to resume sync after reconnection",
                        Some(json!({ "error": e.to_string() })),
                    );
                }
            }
        }));
    }

    /// Full pause/resume cycle, used after the app suspects it missed
    /// changes.
    pub async fn force_resync(self: &Arc<Self>) {
        info!("Forcing complete resync...");
        self.pause_sync("Force resync requested");
        tokio::time::sleep(self.config.force_resync_gap).await;
        self.resume_sync("Force resync");
    }

    /// Abort the pending resume timer and the platform watchers.
    pub fn cleanup(&self) {
        info!("Cleaning up mobile sync service...");
        if let Some(pending) = self.resume_timer.lock().unwrap().take() {
            pending.abort();
        }
        for watcher in self.watchers.lock().unwrap().drain(..) {
            watcher.abort();
        }
    }

    pub fn state(&self) -> MobileSyncState {
        self.state.lock().unwrap().clone()
    }

    pub fn is_sync_active(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.is_online && state.is_app_active && !state.sync_paused
    }

    pub fn is_mobile_platform(&self) -> bool {
        self.monitor.is_native()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::test_support::{harness, TestHarness};
    use std::time::Duration;

    async fn started() -> TestHarness {
        let h = harness();
        h.stack.start(Some("user-42")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        h
    }

    fn online() -> NetworkStatus {
        NetworkStatus {
            connected: true,
            connection_type: "wifi".to_string(),
        }
    }

    fn offline() -> NetworkStatus {
        NetworkStatus {
            connected: false,
            connection_type: "none".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pause_is_idempotent() {
        let h = started().await;
        let mobile = h.stack.mobile();

        mobile.pause_sync("test");
        tokio::time::sleep(Duration::from_millis(10)).await;
        let closed_after_first = h.transport.closed().len();
        assert_eq!(closed_after_first, 4);

        mobile.pause_sync("test again");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.transport.closed().len(), closed_after_first);
        assert!(mobile.state().sync_paused);
        assert!(!mobile.is_sync_active());
    }

    #[tokio::test(start_paused = true)]
    async fn offline_then_online_pauses_and_resumes() {
        let h = started().await;
        let mobile = h.stack.mobile();
        assert_eq!(h.transport.opens().len(), 4);

        h.monitor.push_network(offline());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(mobile.state().sync_paused);
        assert_eq!(h.stack.channels().active_subscriptions_count(), 0);

        h.monitor.push_network(online());
        // Resume only happens after the debounce window.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(mobile.state().sync_paused);

        tokio::time::sleep(Duration::from_secs(3)).await;
        let state = mobile.state();
        assert!(!state.sync_paused);
        assert!(state.last_sync_time.is_some());
        assert_eq!(h.stack.channels().active_subscriptions_count(), 4);
        assert_eq!(h.transport.opens().len(), 8);

        // Restored listeners keep the original user scope.
        let properties = h
            .transport
            .opens()
            .into_iter()
            .filter(|o| o.scope.table == "properties")
            .collect::<Vec<_>>();
        assert_eq!(properties.len(), 2);
        assert_eq!(
            properties[1].scope.filter.as_deref(),
            Some("owner_id=eq.user-42")
        );

        // A clean pause/resume cycle surfaces nothing to the user.
        assert!(h.notifier.records().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_resume_triggers_reconnects_once() {
        let h = started().await;
        let establishes_after_start = h.transport.establish_calls();

        h.monitor.push_network(offline());
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Several triggers inside the debounce window collapse into one
        // reconnect.
        h.monitor.push_network(online());
        tokio::time::sleep(Duration::from_millis(500)).await;
        h.monitor.push_app(AppStateChange { is_active: false });
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.monitor.push_app(AppStateChange { is_active: true });
        tokio::time::sleep(Duration::from_secs(5)).await;

        // One resume cycle establishes twice, once for the channel service
        // and once inside the listener bootstrap.
        assert_eq!(h.transport.establish_calls(), establishes_after_start + 2);
        assert_eq!(h.transport.opens().len(), 8);
        assert!(!h.stack.mobile().state().sync_paused);
    }

    #[tokio::test(start_paused = true)]
    async fn backgrounding_does_not_pause() {
        let h = started().await;

        h.monitor.push_app(AppStateChange { is_active: false });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let state = h.stack.mobile().state();
        assert!(!state.sync_paused);
        assert!(!state.is_app_active);
        assert_eq!(h.stack.channels().active_subscriptions_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn force_resync_cycles_the_stack() {
        let h = started().await;

        h.stack.mobile().force_resync().await;
        assert!(h.stack.mobile().state().sync_paused);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!h.stack.mobile().state().sync_paused);
        assert_eq!(h.transport.opens().len(), 8);
    }
}
