//! Composition root for the sync layer.
//!
//! Wires the channel, listener, error and mobile services together, registers
//! the per-category recovery strategies, and exposes a single start/stop
//! surface for applications.

use crate::sync::channels::ChannelService;
use crate::sync::config::RealtimeSyncConfig;
use crate::sync::errors::{ErrorCategory, ErrorSeverity, RealtimeErrorHandler};
use crate::sync::listeners::DataListenersService;
use crate::sync::mobile::MobileSyncService;
use crate::sync::notify::Notifier;
use crate::sync::recovery::{ReinitializeChannels, RestartListeners, RestartOrchestrator};
use crate::sync::types::SyncServiceError;
use crate::transport::{PlatformMonitor, RealtimeTransport};

use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Restart seam handed to the error handler for critical recovery.
struct StackRestart {
    channels: Arc<ChannelService>,
    listeners: Arc<DataListenersService>,
}

#[async_trait::async_trait]
impl RestartOrchestrator for StackRestart {
    async fn stop_all(&self) {
        self.listeners.stop_all_listeners();
    }

    async fn full_restart(&self) -> Result<(), SyncServiceError> {
        info!("Performing full sync stack restart...");
        self.channels.initialize().await?;
        let scope = self.listeners.owner_scope();
        self.listeners
            .initialize_all_listeners(scope.as_deref())
            .await?;
        Ok(())
    }
}

/// The fully wired realtime sync services.
pub struct RealtimeSyncStack {
    channels: Arc<ChannelService>,
    listeners: Arc<DataListenersService>,
    errors: Arc<RealtimeErrorHandler>,
    mobile: Arc<MobileSyncService>,
}

impl RealtimeSyncStack {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        monitor: Arc<dyn PlatformMonitor>,
        notifier: Arc<dyn Notifier>,
        config: RealtimeSyncConfig,
    ) -> Self {
        let errors = Arc::new(RealtimeErrorHandler::new(config.clone(), notifier));
        let channels = Arc::new(ChannelService::new(
            transport,
            errors.clone(),
            config.clone(),
        ));
        let listeners = Arc::new(DataListenersService::new(channels.clone(), errors.clone()));
        let mobile = Arc::new(MobileSyncService::new(
            monitor,
            channels.clone(),
            listeners.clone(),
            errors.clone(),
            config,
        ));

        errors.register_strategy(
            ErrorCategory::Connection,
            Arc::new(ReinitializeChannels::new(channels.clone())),
        );
        errors.register_strategy(
            ErrorCategory::Subscription,
            Arc::new(RestartListeners::new(listeners.clone())),
        );
        errors.set_restart_orchestrator(Arc::new(StackRestart {
            channels: channels.clone(),
            listeners: listeners.clone(),
        }));

        Self {
            channels,
            listeners,
            errors,
            mobile,
        }
    }

    /// Bring the whole stack up for the given user. A failure anywhere in the
    /// bootstrap is reported as critical and returned.
    pub async fn start(&self, user_id: Option<&str>) -> Result<(), SyncServiceError> {
        info!("Initializing realtime sync services...");

        let result: Result<(), SyncServiceError> = async {
            self.mobile.initialize().await?;
            self.channels.initialize().await?;
            self.listeners.initialize_all_listeners(user_id).await?;
            Ok(())
        }
        .await;

        match &result {
            Ok(()) => info!("Realtime sync services initialized"),
            Err(e) => {
                self.errors.report_error(
                    ErrorCategory::Connection,
                    ErrorSeverity::Critical,
                    "Failed to initialize realtime sync services",
                    Some(json!({ "error": e.to_string() })),
                );
            }
        }
        result
    }

    /// Stop listeners, close channels and detach platform watchers.
    pub async fn stop(&self) {
        info!("Cleaning up realtime sync services...");
        self.listeners.stop_all_listeners();
        self.channels.unsubscribe_all();
        self.mobile.cleanup();
        info!("Realtime sync services cleaned up");
    }

    pub fn channels(&self) -> &Arc<ChannelService> {
        &self.channels
    }

    pub fn listeners(&self) -> &Arc<DataListenersService> {
        &self.listeners
    }

    pub fn errors(&self) -> &Arc<RealtimeErrorHandler> {
        &self.errors
    }

    pub fn mobile(&self) -> &Arc<MobileSyncService> {
        &self.mobile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::test_support::harness;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_cycle_the_whole_stack() {
        let h = harness();

        h.stack.start(Some("user-1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.stack.channels().active_subscriptions_count(), 4);
        assert!(h.stack.channels().is_service_connected());

        h.stack.stop().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.stack.channels().active_subscriptions_count(), 0);
        assert_eq!(h.transport.closed().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_bootstrap_reports_critical_then_self_heals() {
        let h = harness();
        h.transport.fail_establish(1);

        assert!(h.stack.start(None).await.is_err());
        let stats = h.stack.errors().error_stats();
        assert!(stats.by_severity.get(&ErrorSeverity::Critical).copied().unwrap_or(0) >= 1);

        // The critical restart path brings the stack back once the transport
        // recovers.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.stack.channels().is_service_connected());
        assert_eq!(h.stack.channels().active_subscriptions_count(), 4);
        assert!(
            h.stack
                .errors()
                .errors_by_severity(ErrorSeverity::Critical)
                .iter()
                .all(|e| e.resolved)
        );
    }
}
