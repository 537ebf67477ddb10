//! Channel and subscription lifecycle management.
//!
//! Bridges "watch table T for changes" onto the transport's channel
//! abstraction: opens a uniquely-named channel per subscription, tracks the
//! acknowledgment phase, invokes the subscriber callback for every change,
//! and transparently re-creates a subscription after a channel-level failure.
//! All failures are reported to the error handler; this module never retries
//! on its own beyond the scheduled reconnect/resubscribe delays.

use crate::sync::config::RealtimeSyncConfig;
use crate::sync::errors::{ErrorCategory, ErrorSeverity, RealtimeErrorHandler};
use crate::sync::types::{SubscriptionHandle, SubscriptionPhase, SyncCallback, SyncServiceError};
use crate::transport::{
    ChangeScope, ChannelMessage, ChannelStatus, EventScope, RealtimeTransport,
};

use chrono::Utc;
use futures_util::StreamExt;
use rand::Rng;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, watch};
use tracing::{debug, error, info};

/// Options for a table subscription.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    pub event: EventScope,
    /// Row predicate in `column=op.value` form.
    pub filter: Option<String>,
    /// Defaults to `public`.
    pub schema: Option<String>,
}

struct SubscriptionRecord {
    table: String,
    scope: ChangeScope,
    callback: SyncCallback,
    phase: watch::Sender<SubscriptionPhase>,
    stop: Arc<Notify>,
}

#[derive(Default)]
struct ServiceState {
    connected: bool,
    reconnect_attempts: u32,
    subscriptions: HashMap<String, SubscriptionRecord>,
}

/// Owns every open realtime channel.
pub struct ChannelService {
    transport: Arc<dyn RealtimeTransport>,
    errors: Arc<RealtimeErrorHandler>,
    config: RealtimeSyncConfig,
    state: Mutex<ServiceState>,
}

impl ChannelService {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        errors: Arc<RealtimeErrorHandler>,
        config: RealtimeSyncConfig,
    ) -> Self {
        Self {
            transport,
            errors,
            config,
            state: Mutex::new(ServiceState::default()),
        }
    }

    /// Establish service readiness against the transport.
    ///
    /// On failure this reports a `connection`/`high` error, schedules its own
    /// exponential-backoff re-initialization, and returns the error so
    /// bootstrap callers can abort.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), SyncServiceError> {
        info!("Initializing realtime channel service...");

        match self.transport.establish().await {
            Ok(()) => {
                let mut state = self.state.lock().unwrap();
                state.connected = true;
                state.reconnect_attempts = 0;
                info!("Realtime channel service initialized");
                Ok(())
            }
            Err(e) => {
                error!("Failed to initialize realtime channel service: {}", e);
                self.state.lock().unwrap().connected = false;
                self.errors.report_error(
                    ErrorCategory::Connection,
                    ErrorSeverity::High,
                    "Failed to initialize realtime channel service",
                    Some(json!({ "error": e.to_string() })),
                );
                self.schedule_reconnect();
                Err(e.into())
            }
        }
    }

    /// Retry `initialize` after `base * 2^attempt`, up to the attempt cap.
    /// Exceeding the cap logs and stops; higher-level restarts re-invoke
    /// `initialize` with a fresh attempt budget anyway.
    fn schedule_reconnect(self: &Arc<Self>) {
        let attempt = {
            let mut state = self.state.lock().unwrap();
            if state.reconnect_attempts >= self.config.max_reconnect_attempts {
                error!("Max reconnection attempts reached");
                return;
            }
            state.reconnect_attempts += 1;
            state.reconnect_attempts
        };

        let delay = self.config.reconnect_base_delay * 2u32.pow(attempt - 1);
        info!(
            "Attempting reconnection {}/{} in {:?}...",
            attempt, self.config.max_reconnect_attempts, delay
        );

        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = this.initialize().await;
        });
    }

    /// Subscribe to changes on a table. Returns immediately; the channel is
    /// opened on a spawned task and the handle's phase watch reports the
    /// eventual acknowledgment outcome.
    pub fn subscribe(
        self: &Arc<Self>,
        table: &str,
        callback: SyncCallback,
        options: SubscribeOptions,
    ) -> SubscriptionHandle {
        let subscription_id = format!(
            "{}_{}_{}",
            table,
            Utc::now().timestamp_millis(),
            rand::rng().random::<u32>()
        );

        let scope = ChangeScope {
            schema: options.schema.unwrap_or_else(|| "public".to_string()),
            table: table.to_string(),
            event: options.event,
            filter: options.filter,
        };

        let (phase_tx, phase_rx) = watch::channel(SubscriptionPhase::Pending);
        let stop = Arc::new(Notify::new());

        {
            let mut state = self.state.lock().unwrap();
            state.subscriptions.insert(
                subscription_id.clone(),
                SubscriptionRecord {
                    table: table.to_string(),
                    scope,
                    callback,
                    phase: phase_tx,
                    stop,
                },
            );
        }

        info!(
            "Created subscription {} for table {}",
            subscription_id, table
        );

        let this = self.clone();
        let id = subscription_id.clone();
        tokio::spawn(async move {
            this.run_channel(id).await;
        });

        SubscriptionHandle::new(subscription_id, phase_rx)
    }

    /// Drive one subscription's channel until it is closed, fails, or is
    /// unsubscribed.
    async fn run_channel(self: Arc<Self>, subscription_id: String) {
        let (scope, callback, phase, stop) = {
            let state = self.state.lock().unwrap();
            let Some(record) = state.subscriptions.get(&subscription_id) else {
                return;
            };
            (
                record.scope.clone(),
                record.callback.clone(),
                record.phase.clone(),
                record.stop.clone(),
            )
        };

        let channel_name = format!("sync_{}_{}", scope.table, subscription_id);
        let channel = match self.transport.open_channel(&channel_name, &scope).await {
            Ok(channel) => channel,
            Err(e) => {
                error!("Failed to subscribe to {}: {}", scope.table, e);
                phase.send_replace(SubscriptionPhase::Failed);
                self.errors.report_error(
                    ErrorCategory::Subscription,
                    ErrorSeverity::High,
                    format!("Failed to subscribe to table {}", scope.table),
                    Some(json!({
                        "table": scope.table,
                        "subscription_id": subscription_id,
                        "error": e.to_string(),
                    })),
                );
                self.schedule_resubscribe(subscription_id);
                return;
            }
        };

        let mut messages = channel.messages;
        let handle = channel.handle;
        let mut acknowledged = false;

        loop {
            tokio::select! {
                _ = stop.notified() => {
                    if let Err(e) = handle.close().await {
                        self.errors.report_error(
                            ErrorCategory::Subscription,
                            ErrorSeverity::Low,
                            format!("Error unsubscribing from table {}", scope.table),
                            Some(json!({ "error": e.to_string() })),
                        );
                    }
                    phase.send_replace(SubscriptionPhase::Closed);
                    return;
                }
                message = messages.next() => match message {
                    Some(ChannelMessage::Status(ChannelStatus::Subscribed)) => {
                        info!("Subscribed to {} changes", scope.table);
                        acknowledged = true;
                        phase.send_replace(SubscriptionPhase::Subscribed);
                    }
                    Some(ChannelMessage::Status(ChannelStatus::ChannelError { reason })) => {
                        // A failure before the first acknowledgment means the
                        // subscription never went live; report it louder.
                        let severity = if acknowledged {
                            ErrorSeverity::Medium
                        } else {
                            ErrorSeverity::High
                        };
                        error!("Channel error for {}: {}", scope.table, reason);
                        self.errors.report_error(
                            ErrorCategory::Subscription,
                            severity,
                            format!("Channel error for table {}", scope.table),
                            Some(json!({
                                "reason": reason,
                                "subscription_id": subscription_id,
                            })),
                        );
                        phase.send_replace(SubscriptionPhase::Failed);
                        let _ = handle.close().await;
                        self.schedule_resubscribe(subscription_id);
                        return;
                    }
                    Some(ChannelMessage::Status(ChannelStatus::Closed)) | None => {
                        debug!("Channel for {} closed by the backend", scope.table);
                        phase.send_replace(SubscriptionPhase::Closed);
                        self.state.lock().unwrap().subscriptions.remove(&subscription_id);
                        return;
                    }
                    Some(ChannelMessage::Change(event)) => {
                        debug!(
                            "Realtime update for {}: {}",
                            scope.table,
                            event.event_type.as_str()
                        );
                        callback(event);
                    }
                }
            }
        }
    }

    /// Re-create a failed subscription after the fixed delay, carrying the
    /// original table, callback and options through. Skips silently if the
    /// subscription was unsubscribed while the delay was pending.
    fn schedule_resubscribe(self: &Arc<Self>, subscription_id: String) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.config.resubscribe_delay).await;

            let removed = {
                let mut state = this.state.lock().unwrap();
                state.subscriptions.remove(&subscription_id)
            };
            let Some(record) = removed else {
                debug!(
                    "Subscription {} removed before resubscription, skipping",
                    subscription_id
                );
                return;
            };

            info!("Resubscribing to {}...", record.table);
            let options = SubscribeOptions {
                event: record.scope.event,
                filter: record.scope.filter.clone(),
                schema: Some(record.scope.schema.clone()),
            };
            let _handle = this.subscribe(&record.table, record.callback.clone(), options);
        });
    }

    /// Close one subscription's channel and drop its bookkeeping. Close
    /// failures are reported at `low` severity, never escalated.
    pub fn unsubscribe(&self, subscription_id: &str) {
        let record = {
            let mut state = self.state.lock().unwrap();
            state.subscriptions.remove(subscription_id)
        };
        if let Some(record) = record {
            record.stop.notify_one();
            info!("Unsubscribed from {}", record.table);
        }
    }

    /// Unsubscribe every tracked subscription.
    pub fn unsubscribe_all(&self) {
        info!("Unsubscribing from all channels...");
        let ids: Vec<String> = {
            let state = self.state.lock().unwrap();
            state.subscriptions.keys().cloned().collect()
        };
        for id in ids {
            self.unsubscribe(&id);
        }
    }

    pub fn is_service_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    pub fn active_subscriptions_count(&self) -> usize {
        self.state.lock().unwrap().subscriptions.len()
    }

    /// Tables with at least one tracked subscription, one entry per
    /// subscription.
    pub fn watched_tables(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .values()
            .map(|record| record.table.clone())
            .collect()
    }

    pub(crate) fn subscription_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .keys()
            .cloned()
            .collect()
    }
}
