//! Central error registry and recovery orchestration.
//!
//! Every sync component reports failures here instead of retrying on its own.
//! The handler classifies by category and severity, drives the bounded
//! retry/escalation loop through the registered per-category recovery
//! strategies, and owns the one-at-a-time critical restart path. It is also
//! the only component allowed to mutate a recorded error.

use crate::sync::config::RealtimeSyncConfig;
use crate::sync::notify::{Notification, Notifier};
use crate::sync::recovery::{DelegatedRecovery, RecoveryStrategy, RestartOrchestrator};
use crate::sync::types::SyncServiceError;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// What part of the stack an error originated from; selects the recovery
/// strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Connection,
    Subscription,
    Data,
    Authentication,
    Permission,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 5] = [
        ErrorCategory::Connection,
        ErrorCategory::Subscription,
        ErrorCategory::Data,
        ErrorCategory::Authentication,
        ErrorCategory::Permission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Connection => "connection",
            ErrorCategory::Subscription => "subscription",
            ErrorCategory::Data => "data",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Permission => "permission",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Determines retry behavior and user visibility.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub const ALL: [ErrorSeverity; 4] = [
        ErrorSeverity::Low,
        ErrorSeverity::Medium,
        ErrorSeverity::High,
        ErrorSeverity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded synchronization error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncError {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub resolved: bool,
    pub retry_count: u32,
}

/// Aggregate error counts for diagnostics surfaces.
#[derive(Debug, Clone)]
pub struct ErrorStats {
    pub total: usize,
    pub unresolved: usize,
    pub by_category: HashMap<ErrorCategory, usize>,
    pub by_severity: HashMap<ErrorSeverity, usize>,
}

type ErrorCallback = Arc<dyn Fn(&SyncError) + Send + Sync>;

/// Central error handler for the realtime sync stack.
pub struct RealtimeErrorHandler {
    config: RealtimeSyncConfig,
    notifier: Arc<dyn Notifier>,
    errors: Mutex<HashMap<String, SyncError>>,
    strategies: Mutex<HashMap<ErrorCategory, Arc<dyn RecoveryStrategy>>>,
    restart: Mutex<Option<Arc<dyn RestartOrchestrator>>>,
    callbacks: Mutex<Vec<(u64, ErrorCallback)>>,
    next_callback_id: AtomicU64,
    /// Only one critical recovery sequence may run at a time; further
    /// critical reports are dropped while this is set.
    handling_critical: AtomicBool,
}

impl RealtimeErrorHandler {
    /// Create a handler with the delegated default strategies for the
    /// categories this layer cannot act on. Connection and subscription
    /// strategies are registered by the composition root once the services
    /// they touch exist.
    pub fn new(config: RealtimeSyncConfig, notifier: Arc<dyn Notifier>) -> Self {
        let mut strategies: HashMap<ErrorCategory, Arc<dyn RecoveryStrategy>> = HashMap::new();
        strategies.insert(
            ErrorCategory::Authentication,
            Arc::new(DelegatedRecovery::new("Authentication")),
        );
        strategies.insert(
            ErrorCategory::Permission,
            Arc::new(DelegatedRecovery::new("Permission")),
        );
        strategies.insert(ErrorCategory::Data, Arc::new(DelegatedRecovery::new("Data")));

        Self {
            config,
            notifier,
            errors: Mutex::new(HashMap::new()),
            strategies: Mutex::new(strategies),
            restart: Mutex::new(None),
            callbacks: Mutex::new(Vec::new()),
            next_callback_id: AtomicU64::new(0),
            handling_critical: AtomicBool::new(false),
        }
    }

    /// Register (or replace) the recovery strategy for a category.
    pub fn register_strategy(&self, category: ErrorCategory, strategy: Arc<dyn RecoveryStrategy>) {
        self.strategies.lock().unwrap().insert(category, strategy);
    }

    /// Register the full-restart seam used by the critical path.
    pub fn set_restart_orchestrator(&self, restart: Arc<dyn RestartOrchestrator>) {
        *self.restart.lock().unwrap() = Some(restart);
    }

    /// Record a new error and dispatch its severity-specific handling.
    /// Returns the error id immediately; retries run on scheduled tasks.
    pub fn report_error(
        self: &Arc<Self>,
        category: ErrorCategory,
        severity: ErrorSeverity,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> String {
        let message = message.into();
        let error_id = format!(
            "{}_{}_{}",
            category.as_str(),
            Utc::now().timestamp_millis(),
            rand::rng().random::<u32>()
        );

        let sync_error = SyncError {
            id: error_id.clone(),
            timestamp: Utc::now(),
            category,
            severity,
            message: message.clone(),
            details,
            resolved: false,
            retry_count: 0,
        };

        self.errors
            .lock()
            .unwrap()
            .insert(error_id.clone(), sync_error.clone());

        error!(
            "Realtime error [{}] {}: {}",
            severity.as_str().to_uppercase(),
            category,
            message
        );

        self.notify_error_callbacks(&sync_error);

        match severity {
            ErrorSeverity::Low => {
                warn!("Minor sync issue: {}", message);
            }
            ErrorSeverity::Medium => {
                warn!("Sync issue detected: {}", message);
                self.attempt_auto_recovery(error_id.clone());
            }
            ErrorSeverity::High => {
                self.notifier.notify(Notification::warning(
                    "Sync issue detected",
                    "Attempting to reconnect...",
                ));
                self.attempt_auto_recovery(error_id.clone());
            }
            ErrorSeverity::Critical => {
                let this = self.clone();
                let id = error_id.clone();
                tokio::spawn(async move {
                    this.handle_critical_error(&id).await;
                });
            }
        }

        error_id
    }

    /// Bounded retry loop for one error. Each attempt waits the progressive
    /// delay, runs the category's strategy, and either resolves the error or
    /// loops; exhausting the retry budget escalates exactly once.
    fn attempt_auto_recovery(self: &Arc<Self>, error_id: String) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let step = {
                    let mut errors = this.errors.lock().unwrap();
                    let Some(sync_error) = errors.get_mut(&error_id) else {
                        return;
                    };
                    if sync_error.resolved {
                        return;
                    }
                    if sync_error.retry_count >= this.config.max_retries {
                        None
                    } else {
                        let attempt = sync_error.retry_count;
                        sync_error.retry_count += 1;
                        Some((sync_error.category, attempt))
                    }
                };
                let Some((category, attempt)) = step else {
                    this.escalate_error(&error_id).await;
                    return;
                };

                info!(
                    "Attempting recovery for error {} (attempt {}/{})",
                    error_id,
                    attempt + 1,
                    this.config.max_retries
                );
                tokio::time::sleep(this.config.retry_delay(attempt)).await;

                let strategy = this.strategies.lock().unwrap().get(&category).cloned();
                let outcome = match strategy {
                    Some(strategy) => strategy.recover().await,
                    None => {
                        warn!("No recovery strategy registered for category {}", category);
                        Ok(())
                    }
                };

                match outcome {
                    Ok(()) => {
                        let severity = this.mark_error_resolved(&error_id);
                        info!("Successfully recovered from error: {}", error_id);
                        if severity == Some(ErrorSeverity::High) {
                            this.notifier.notify(Notification::success(
                                "Synchronization restored",
                                "The realtime connection is working again.",
                            ));
                        }
                        return;
                    }
                    Err(e) => {
                        error!("Recovery failed for error {}: {}", error_id, e);
                    }
                }
            }
        });
    }

    /// Promote an exhausted error to critical, or surface the persistent
    /// refresh notification if it already was.
    async fn escalate_error(self: &Arc<Self>, error_id: &str) {
        error!("Escalating error {} - max retries exceeded", error_id);

        let promoted = {
            let mut errors = self.errors.lock().unwrap();
            match errors.get_mut(error_id) {
                Some(sync_error) if sync_error.severity != ErrorSeverity::Critical => {
                    sync_error.severity = ErrorSeverity::Critical;
                    true
                }
                Some(_) => false,
                None => return,
            }
        };

        if promoted {
            self.handle_critical_error(error_id).await;
        } else {
            self.notifier.notify(
                Notification::error(
                    "Persistent sync failure",
                    "Please refresh the page to restore synchronization.",
                )
                .persistent(),
            );
        }
    }

    /// Full-stack critical recovery: stop everything, settle, restart,
    /// resolve. Guarded so only one sequence runs at a time.
    async fn handle_critical_error(self: &Arc<Self>, error_id: &str) {
        if self.handling_critical.swap(true, Ordering::SeqCst) {
            info!("Already handling a critical error, skipping");
            return;
        }

        error!("Handling critical error {} - stopping all services", error_id);
        self.notifier.notify(Notification::error(
            "Critical synchronization error",
            "Restarting the sync stack...",
        ));

        let outcome = self.perform_full_restart().await;

        match outcome {
            Ok(()) => {
                self.mark_error_resolved(error_id);
                self.notifier.notify(Notification::success(
                    "Sync stack restarted",
                    "Realtime synchronization is operational again.",
                ));
            }
            Err(e) => {
                error!("Failed to recover from critical error: {}", e);
                self.notifier.notify(
                    Notification::error(
                        "Recovery failed",
                        "Please refresh the page to restore synchronization.",
                    )
                    .persistent(),
                );
            }
        }

        self.handling_critical.store(false, Ordering::SeqCst);
    }

    async fn perform_full_restart(&self) -> Result<(), SyncServiceError> {
        let restart = self.restart.lock().unwrap().clone();
        let Some(restart) = restart else {
            return Err(SyncServiceError::Recovery(
                "No restart orchestrator registered".to_string(),
            ));
        };

        restart.stop_all().await;
        tokio::time::sleep(self.config.critical_settle_delay).await;
        restart.full_restart().await?;

        info!("Full sync stack restart completed");
        Ok(())
    }

    /// Mark an error as resolved, returning its severity if it was known.
    pub fn mark_error_resolved(&self, error_id: &str) -> Option<ErrorSeverity> {
        let mut errors = self.errors.lock().unwrap();
        let sync_error = errors.get_mut(error_id)?;
        sync_error.resolved = true;
        info!("Error resolved: {}", error_id);
        Some(sync_error.severity)
    }

    /// Register an observer for every reported error. The returned closure
    /// unregisters it.
    pub fn on_error(
        self: &Arc<Self>,
        callback: impl Fn(&SyncError) + Send + Sync + 'static,
    ) -> impl FnOnce() + Send + 'static {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .lock()
            .unwrap()
            .push((id, Arc::new(callback)));

        let this = self.clone();
        move || {
            this.callbacks
                .lock()
                .unwrap()
                .retain(|(callback_id, _)| *callback_id != id);
        }
    }

    fn notify_error_callbacks(&self, sync_error: &SyncError) {
        let callbacks: Vec<ErrorCallback> = self
            .callbacks
            .lock()
            .unwrap()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(sync_error);
        }
    }

    pub fn all_errors(&self) -> Vec<SyncError> {
        self.errors.lock().unwrap().values().cloned().collect()
    }

    pub fn unresolved_errors(&self) -> Vec<SyncError> {
        self.errors
            .lock()
            .unwrap()
            .values()
            .filter(|e| !e.resolved)
            .cloned()
            .collect()
    }

    pub fn errors_by_category(&self, category: ErrorCategory) -> Vec<SyncError> {
        self.errors
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.category == category)
            .cloned()
            .collect()
    }

    pub fn errors_by_severity(&self, severity: ErrorSeverity) -> Vec<SyncError> {
        self.errors
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.severity == severity)
            .cloned()
            .collect()
    }

    /// Aggregate counts across all recorded errors.
    pub fn error_stats(&self) -> ErrorStats {
        let errors = self.errors.lock().unwrap();

        let mut by_category: HashMap<ErrorCategory, usize> =
            ErrorCategory::ALL.iter().map(|c| (*c, 0)).collect();
        let mut by_severity: HashMap<ErrorSeverity, usize> =
            ErrorSeverity::ALL.iter().map(|s| (*s, 0)).collect();
        let mut unresolved = 0;

        for sync_error in errors.values() {
            *by_category.entry(sync_error.category).or_default() += 1;
            *by_severity.entry(sync_error.severity).or_default() += 1;
            if !sync_error.resolved {
                unresolved += 1;
            }
        }

        ErrorStats {
            total: errors.len(),
            unresolved,
            by_category,
            by_severity,
        }
    }

    /// Prune resolved errors older than the given age.
    pub fn cleanup_resolved_errors(&self, older_than_hours: i64) {
        let cutoff = Utc::now() - chrono::Duration::hours(older_than_hours);
        let mut errors = self.errors.lock().unwrap();
        let before = errors.len();
        errors.retain(|_, e| !(e.resolved && e.timestamp < cutoff));
        info!(
            "Cleaned up {} resolved errors older than {}h",
            before - errors.len(),
            older_than_hours
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::test_support::RecordingNotifier;
    use crate::sync::NotificationKind;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct FailingStrategy;

    #[async_trait::async_trait]
    impl RecoveryStrategy for FailingStrategy {
        async fn recover(&self) -> Result<(), SyncServiceError> {
            Err(SyncServiceError::Recovery("still broken".to_string()))
        }

        fn name(&self) -> &'static str {
            "FailingStrategy"
        }
    }

    struct SucceedingStrategy;

    #[async_trait::async_trait]
    impl RecoveryStrategy for SucceedingStrategy {
        async fn recover(&self) -> Result<(), SyncServiceError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "SucceedingStrategy"
        }
    }

    #[derive(Default)]
    struct RecordingOrchestrator {
        stop_calls: AtomicUsize,
        restart_calls: AtomicUsize,
        restart_delay: Option<Duration>,
    }

    impl RecordingOrchestrator {
        fn slow(delay: Duration) -> Self {
            Self {
                restart_delay: Some(delay),
                ..Default::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl RestartOrchestrator for RecordingOrchestrator {
        async fn stop_all(&self) {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
        }

        async fn full_restart(&self) -> Result<(), SyncServiceError> {
            if let Some(delay) = self.restart_delay {
                tokio::time::sleep(delay).await;
            }
            self.restart_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn handler_with_notifier() -> (Arc<RealtimeErrorHandler>, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let handler = Arc::new(RealtimeErrorHandler::new(
            RealtimeSyncConfig::default(),
            notifier.clone(),
        ));
        (handler, notifier)
    }

    #[tokio::test(start_paused = true)]
    async fn low_and_medium_reports_stay_silent() {
        let (handler, notifier) = handler_with_notifier();

        handler.report_error(
            ErrorCategory::Subscription,
            ErrorSeverity::Low,
            "unsubscribe failed",
            None,
        );
        let id = handler.report_error(
            ErrorCategory::Data,
            ErrorSeverity::Medium,
            "odd payload",
            None,
        );

        // Let the medium recovery (delegated, succeeds) run to completion.
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(notifier.records().is_empty());
        let errors = handler.all_errors();
        let medium = errors.iter().find(|e| e.id == id).unwrap();
        assert!(medium.resolved);
    }

    #[tokio::test(start_paused = true)]
    async fn high_report_warns_then_confirms_recovery() {
        let (handler, notifier) = handler_with_notifier();
        handler.register_strategy(ErrorCategory::Connection, Arc::new(SucceedingStrategy));

        handler.report_error(
            ErrorCategory::Connection,
            ErrorSeverity::High,
            "gateway unreachable",
            None,
        );

        // The warning toast is synchronous with the report.
        assert_eq!(notifier.records().len(), 1);
        assert_eq!(notifier.records()[0].kind, NotificationKind::Warning);

        tokio::time::sleep(Duration::from_secs(30)).await;

        let records = notifier.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].kind, NotificationKind::Success);
        assert!(handler.unresolved_errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_escalate_exactly_once() {
        let (handler, notifier) = handler_with_notifier();
        handler.register_strategy(ErrorCategory::Connection, Arc::new(FailingStrategy));
        let orchestrator = Arc::new(RecordingOrchestrator::default());
        handler.set_restart_orchestrator(orchestrator.clone());

        let id = handler.report_error(
            ErrorCategory::Connection,
            ErrorSeverity::Medium,
            "gateway unreachable",
            None,
        );

        // Three failed attempts (1s + 3s + 5s) then escalation and restart.
        tokio::time::sleep(Duration::from_secs(60)).await;

        let sync_error = handler
            .all_errors()
            .into_iter()
            .find(|e| e.id == id)
            .unwrap();
        assert_eq!(sync_error.retry_count, 3);
        assert_eq!(sync_error.severity, ErrorSeverity::Critical);
        assert!(sync_error.resolved);
        assert_eq!(orchestrator.stop_calls.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.restart_calls.load(Ordering::SeqCst), 1);

        let kinds: Vec<NotificationKind> =
            notifier.records().iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![NotificationKind::Error, NotificationKind::Success]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_critical_reports_run_one_recovery() {
        let (handler, _notifier) = handler_with_notifier();
        let orchestrator = Arc::new(RecordingOrchestrator::slow(Duration::from_secs(5)));
        handler.set_restart_orchestrator(orchestrator.clone());

        handler.report_error(
            ErrorCategory::Connection,
            ErrorSeverity::Critical,
            "stack down",
            None,
        );
        handler.report_error(
            ErrorCategory::Subscription,
            ErrorSeverity::Critical,
            "stack down again",
            None,
        );

        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(orchestrator.restart_calls.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.stop_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn error_stats_match_reported_counts() {
        let (handler, _notifier) = handler_with_notifier();

        // Only low severity avoids spawning recovery tasks; report one error
        // per category at varying severities without letting timers run.
        for category in ErrorCategory::ALL {
            handler.report_error(category, ErrorSeverity::Low, "probe", None);
        }
        let resolved_id =
            handler.report_error(ErrorCategory::Data, ErrorSeverity::Low, "probe", None);
        handler.mark_error_resolved(&resolved_id);

        let stats = handler.error_stats();
        assert_eq!(stats.total, 6);
        assert_eq!(stats.unresolved, 5);
        assert_eq!(stats.by_category[&ErrorCategory::Data], 2);
        assert_eq!(stats.by_category[&ErrorCategory::Connection], 1);
        assert_eq!(stats.by_severity[&ErrorSeverity::Low], 6);
        assert_eq!(stats.by_severity[&ErrorSeverity::Critical], 0);
    }

    #[tokio::test]
    async fn cleanup_prunes_only_old_resolved_errors() {
        let (handler, _notifier) = handler_with_notifier();

        let resolved = handler.report_error(
            ErrorCategory::Connection,
            ErrorSeverity::Low,
            "transient",
            None,
        );
        handler.mark_error_resolved(&resolved);
        handler.report_error(ErrorCategory::Data, ErrorSeverity::Low, "still open", None);

        // A negative age puts the cutoff in the future, so every resolved
        // error qualifies regardless of how recently it was recorded.
        handler.cleanup_resolved_errors(-1);

        let remaining = handler.all_errors();
        assert_eq!(remaining.len(), 1);
        assert!(!remaining[0].resolved);
    }

    #[tokio::test]
    async fn unregistered_callback_sees_no_further_errors() {
        let (handler, _notifier) = handler_with_notifier();
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_clone = seen.clone();
        let unregister = handler.on_error(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        handler.report_error(ErrorCategory::Connection, ErrorSeverity::Low, "one", None);
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        unregister();
        handler.report_error(ErrorCategory::Connection, ErrorSeverity::Low, "two", None);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
