use crate::sync::channels::ChannelService;
use crate::sync::listeners::DataListenersService;
use crate::sync::types::SyncServiceError;

use std::sync::Arc;
use tracing::info;

/// Recovery action for one error category.
///
/// Strategies are registered on the error handler at construction time, so
/// the retry/escalation logic never hard-codes which service an error
/// category touches and tests can substitute fakes.
#[async_trait::async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Attempt to recover. An `Err` counts as a failed attempt and feeds the
    /// retry/escalation loop.
    async fn recover(&self) -> Result<(), SyncServiceError>;

    /// Get the name of this strategy for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Full-stack restart seam used by the critical error path.
#[async_trait::async_trait]
pub trait RestartOrchestrator: Send + Sync {
    /// Tear down all listeners and subscriptions.
    async fn stop_all(&self);

    /// Reinitialize the channel service and the data listeners.
    async fn full_restart(&self) -> Result<(), SyncServiceError>;
}

/// Recovery for `connection` errors: reinitialize the channel service.
pub struct ReinitializeChannels {
    channels: Arc<ChannelService>,
}

impl ReinitializeChannels {
    pub fn new(channels: Arc<ChannelService>) -> Self {
        Self { channels }
    }
}

#[async_trait::async_trait]
impl RecoveryStrategy for ReinitializeChannels {
    async fn recover(&self) -> Result<(), SyncServiceError> {
        self.channels.initialize().await
    }

    fn name(&self) -> &'static str {
        "ReinitializeChannels"
    }
}

/// Recovery for `subscription` errors: restart every data listener, keeping
/// the row scope of the last successful initialization.
pub struct RestartListeners {
    listeners: Arc<DataListenersService>,
}

impl RestartListeners {
    pub fn new(listeners: Arc<DataListenersService>) -> Self {
        Self { listeners }
    }
}

#[async_trait::async_trait]
impl RecoveryStrategy for RestartListeners {
    async fn recover(&self) -> Result<(), SyncServiceError> {
        let scope = self.listeners.owner_scope();
        self.listeners.restart_all_listeners(scope.as_deref()).await
    }

    fn name(&self) -> &'static str {
        "RestartListeners"
    }
}

/// Recovery for categories this layer cannot act on (authentication,
/// permission, data). Logs and reports success so the error resolves without
/// touching the subscriptions; the owning layer handles the real fix.
pub struct DelegatedRecovery {
    concern: &'static str,
}

impl DelegatedRecovery {
    pub fn new(concern: &'static str) -> Self {
        Self { concern }
    }
}

#[async_trait::async_trait]
impl RecoveryStrategy for DelegatedRecovery {
    async fn recover(&self) -> Result<(), SyncServiceError> {
        info!("{} error - delegated to the owning layer", self.concern);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DelegatedRecovery"
    }
}
