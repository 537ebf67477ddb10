//! Listeners over the business-critical tables.
//!
//! Keeps a typed in-memory cache per table, applies INSERT/UPDATE/DELETE
//! events to it, and fans decoded changes out to registered callbacks.
//! Property and profile listeners are scoped to the owning user; lease and
//! payment listeners are unfiltered.

use crate::sync::channels::{ChannelService, SubscribeOptions};
use crate::sync::errors::{ErrorCategory, ErrorSeverity, RealtimeErrorHandler};
use crate::sync::rows::{CriticalTable, TableRow};
use crate::sync::types::{SyncCallback, SyncServiceError};
use crate::transport::{ChangeEvent, ChangeEventType};

use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// A fully decoded change on a critical table.
#[derive(Debug, Clone)]
pub struct TableChange {
    pub event_type: ChangeEventType,
    pub new: Option<TableRow>,
    pub old: Option<TableRow>,
}

pub type TableCallback = Arc<dyn Fn(&TableChange) + Send + Sync>;

/// Snapshot of the listener layer for diagnostics.
#[derive(Debug, Clone)]
pub struct ListenersStatus {
    pub active: Vec<CriticalTable>,
    pub service_connected: bool,
    pub cache_size: HashMap<CriticalTable, usize>,
}

#[derive(Default)]
struct ListenersState {
    active: HashSet<CriticalTable>,
    cache: HashMap<CriticalTable, Vec<TableRow>>,
    callbacks: HashMap<CriticalTable, Vec<(u64, TableCallback)>>,
    /// User id of the most recent initialization, reused by restarts.
    owner_scope: Option<String>,
}

pub struct DataListenersService {
    channels: Arc<ChannelService>,
    errors: Arc<RealtimeErrorHandler>,
    state: Mutex<ListenersState>,
    next_callback_id: AtomicU64,
}

impl DataListenersService {
    pub fn new(channels: Arc<ChannelService>, errors: Arc<RealtimeErrorHandler>) -> Self {
        Self {
            channels,
            errors,
            state: Mutex::new(ListenersState::default()),
            next_callback_id: AtomicU64::new(0),
        }
    }

    /// Start a listener for every critical table. Tables that already have an
    /// active listener are skipped, so repeated calls are safe.
    pub async fn initialize_all_listeners(
        self: &Arc<Self>,
        user_id: Option<&str>,
    ) -> Result<(), SyncServiceError> {
        info!("Initializing data listeners for critical tables...");

        if let Err(e) = self.channels.initialize().await {
            self.errors.report_error(
                ErrorCategory::Data,
                ErrorSeverity::Critical,
                "Failed to initialize all data listeners",
                Some(json!({ "error": e.to_string() })),
            );
            return Err(e);
        }

        self.state.lock().unwrap().owner_scope = user_id.map(str::to_string);

        for table in CriticalTable::ALL {
            self.start_listener(table, user_id);
        }

        info!("All data listeners initialized");
        Ok(())
    }

    fn start_listener(self: &Arc<Self>, table: CriticalTable, user_id: Option<&str>) {
        {
            let mut state = self.state.lock().unwrap();
            if !state.active.insert(table) {
                info!("{} listener already active", table);
                return;
            }
        }

        let filter = match table {
            CriticalTable::Properties => user_id.map(|u| format!("owner_id=eq.{u}")),
            CriticalTable::Profiles => user_id.map(|u| format!("id=eq.{u}")),
            CriticalTable::Leases | CriticalTable::Payments => None,
        };

        let weak = Arc::downgrade(self);
        let callback: SyncCallback = Arc::new(move |event: ChangeEvent| {
            if let Some(service) = weak.upgrade() {
                service.handle_change(table, event);
            }
        });

        let handle = self.channels.subscribe(
            table.as_str(),
            callback,
            SubscribeOptions {
                filter: filter.clone(),
                ..Default::default()
            },
        );
        debug!(
            "{} listener started (subscription {}, filter: {})",
            table,
            handle.id(),
            filter.as_deref().unwrap_or("none")
        );
    }

    /// Decode a change event, apply it to the cache, and notify callbacks.
    /// Rows that fail to decode are reported at `data`/`low` and the event is
    /// dropped without touching the cache.
    fn handle_change(self: &Arc<Self>, table: CriticalTable, event: ChangeEvent) {
        let new = match event.new.as_ref().map(|v| table.decode_row(v)).transpose() {
            Ok(row) => row,
            Err(e) => {
                self.report_decode_failure(table, "new", e);
                return;
            }
        };
        let old = match event.old.as_ref().map(|v| table.decode_row(v)).transpose() {
            Ok(row) => row,
            Err(e) => {
                self.report_decode_failure(table, "old", e);
                return;
            }
        };

        let change = TableChange {
            event_type: event.event_type,
            new,
            old,
        };

        self.update_cache(table, &change);
        self.log_table_change(table, &change);
        self.notify_table_callbacks(table, &change);
    }

    fn report_decode_failure(&self, table: CriticalTable, field: &str, e: serde_json::Error) {
        warn!("Failed to decode {} row for {}: {}", field, table, e);
        self.errors.report_error(
            ErrorCategory::Data,
            ErrorSeverity::Low,
            format!("Failed to decode {table} change"),
            Some(json!({ "table": table.as_str(), "field": field, "error": e.to_string() })),
        );
    }

    fn update_cache(&self, table: CriticalTable, change: &TableChange) {
        let mut state = self.state.lock().unwrap();
        let rows = state.cache.entry(table).or_default();

        match change.event_type {
            ChangeEventType::Insert => {
                if let Some(row) = &change.new {
                    rows.push(row.clone());
                }
            }
            ChangeEventType::Update => {
                if let Some(row) = &change.new {
                    // An update for a row we never cached is a no-op.
                    if let Some(slot) = rows.iter_mut().find(|r| r.id() == row.id()) {
                        *slot = row.clone();
                    }
                }
            }
            ChangeEventType::Delete => {
                if let Some(old) = &change.old {
                    rows.retain(|r| r.id() != old.id());
                }
            }
        }
    }

    fn notify_table_callbacks(&self, table: CriticalTable, change: &TableChange) {
        let callbacks: Vec<TableCallback> = {
            let state = self.state.lock().unwrap();
            state
                .callbacks
                .get(&table)
                .map(|entries| entries.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };
        for callback in callbacks {
            callback(change);
        }
    }

    fn log_table_change(&self, table: CriticalTable, change: &TableChange) {
        match (table, change.event_type, &change.new, &change.old) {
            (CriticalTable::Properties, ChangeEventType::Insert, Some(TableRow::Property(p)), _) => {
                info!("New property listed: {}", p.title);
            }
            (
                CriticalTable::Properties,
                ChangeEventType::Update,
                Some(TableRow::Property(new)),
                Some(TableRow::Property(old)),
            ) if new.status != old.status => {
                info!(
                    "Property {} status changed: {:?} -> {:?}",
                    new.title, old.status, new.status
                );
            }
            (CriticalTable::Properties, ChangeEventType::Delete, _, Some(TableRow::Property(p))) => {
                info!("Property removed: {}", p.title);
            }
            (
                CriticalTable::Leases,
                ChangeEventType::Update,
                Some(TableRow::Lease(new)),
                Some(TableRow::Lease(old)),
            ) if new.status != old.status => {
                info!(
                    "Lease {} status changed: {:?} -> {:?}",
                    new.id, old.status, new.status
                );
            }
            (CriticalTable::Payments, ChangeEventType::Insert, Some(TableRow::Payment(p)), _) => {
                info!("New payment recorded: {} for {}", p.id, p.amount);
            }
            (
                CriticalTable::Payments,
                ChangeEventType::Update,
                Some(TableRow::Payment(new)),
                Some(TableRow::Payment(old)),
            ) if new.status != old.status => {
                info!(
                    "Payment {} confirmed: {:?} -> {:?}",
                    new.id, old.status, new.status
                );
            }
            (CriticalTable::Profiles, ChangeEventType::Update, Some(TableRow::Profile(p)), _) => {
                info!("Profile updated: {}", p.email);
            }
            _ => {
                debug!("{} change: {}", table, change.event_type.as_str());
            }
        }
    }

    /// Register a callback for decoded changes on one table. The returned
    /// closure unregisters it.
    pub fn register_callback(
        self: &Arc<Self>,
        table: CriticalTable,
        callback: impl Fn(&TableChange) + Send + Sync + 'static,
    ) -> impl FnOnce() + Send + 'static {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.state.lock().unwrap();
            state
                .callbacks
                .entry(table)
                .or_default()
                .push((id, Arc::new(callback)));
        }

        let this = self.clone();
        move || {
            let mut state = this.state.lock().unwrap();
            if let Some(entries) = state.callbacks.get_mut(&table) {
                entries.retain(|(entry_id, _)| *entry_id != id);
            }
        }
    }

    /// Current cache contents for one table.
    pub fn cached_rows(&self, table: CriticalTable) -> Vec<TableRow> {
        self.state
            .lock()
            .unwrap()
            .cache
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    /// User id of the most recent initialization.
    pub fn owner_scope(&self) -> Option<String> {
        self.state.lock().unwrap().owner_scope.clone()
    }

    /// Tear down every listener and drop cached rows and callbacks. The owner
    /// scope is kept so a later restart can resubscribe with the same filters.
    pub fn stop_all_listeners(&self) {
        info!("Stopping all data listeners...");
        self.channels.unsubscribe_all();

        let mut state = self.state.lock().unwrap();
        state.active.clear();
        state.cache.clear();
        state.callbacks.clear();
        info!("All data listeners stopped");
    }

    pub async fn restart_all_listeners(
        self: &Arc<Self>,
        user_id: Option<&str>,
    ) -> Result<(), SyncServiceError> {
        info!("Restarting all data listeners...");
        self.stop_all_listeners();
        self.initialize_all_listeners(user_id).await
    }

    pub fn listeners_status(&self) -> ListenersStatus {
        let state = self.state.lock().unwrap();
        let mut active: Vec<CriticalTable> = state.active.iter().copied().collect();
        active.sort_by_key(|t| t.as_str());
        ListenersStatus {
            active,
            service_connected: self.channels.is_service_connected(),
            cache_size: state
                .cache
                .iter()
                .map(|(table, rows)| (*table, rows.len()))
                .collect(),
        }
    }
}
