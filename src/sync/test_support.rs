//! Shared fakes for the sync layer tests.

use crate::sync::config::RealtimeSyncConfig;
use crate::sync::notify::{Notification, Notifier};
use crate::sync::stack::RealtimeSyncStack;
use crate::transport::{
    AppStateChange, Channel, ChangeScope, ChannelHandle, ChannelMessage, NetworkStatus,
    PlatformMonitor, RealtimeTransport, TransportError,
};

use futures::channel::mpsc;
use futures_util::stream::BoxStream;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A channel the mock transport has been asked to open.
#[derive(Debug, Clone)]
pub struct OpenRecord {
    pub channel: String,
    pub scope: ChangeScope,
}

#[derive(Default)]
struct MockTransportState {
    establish_calls: usize,
    establish_failures: usize,
    open_failures: usize,
    opens: Vec<OpenRecord>,
    closed: Vec<String>,
    senders: HashMap<String, mpsc::UnboundedSender<ChannelMessage>>,
}

/// In-memory transport. Tests inject channel messages through `emit_table`
/// and inspect which channels were opened and closed.
pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockTransportState::default())),
        }
    }

    /// Make the next `n` establish calls fail.
    pub fn fail_establish(&self, n: usize) {
        self.state.lock().unwrap().establish_failures = n;
    }

    /// Make the next `n` channel opens fail.
    pub fn fail_opens(&self, n: usize) {
        self.state.lock().unwrap().open_failures = n;
    }

    pub fn establish_calls(&self) -> usize {
        self.state.lock().unwrap().establish_calls
    }

    pub fn opens(&self) -> Vec<OpenRecord> {
        self.state.lock().unwrap().opens.clone()
    }

    pub fn closed(&self) -> Vec<String> {
        self.state.lock().unwrap().closed.clone()
    }

    /// Push a message into every open channel for the given table.
    pub fn emit_table(&self, table: &str, message: ChannelMessage) {
        let senders: Vec<mpsc::UnboundedSender<ChannelMessage>> = {
            let state = self.state.lock().unwrap();
            state
                .opens
                .iter()
                .filter(|open| open.scope.table == table)
                .filter_map(|open| state.senders.get(&open.channel).cloned())
                .collect()
        };
        for sender in senders {
            let _ = sender.unbounded_send(message.clone());
        }
    }
}

struct MockChannelHandle {
    channel: String,
    state: Arc<Mutex<MockTransportState>>,
}

#[async_trait::async_trait]
impl ChannelHandle for MockChannelHandle {
    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.closed.push(self.channel.clone());
        state.senders.remove(&self.channel);
        Ok(())
    }
}

#[async_trait::async_trait]
impl RealtimeTransport for MockTransport {
    async fn establish(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.establish_calls += 1;
        if state.establish_failures > 0 {
            state.establish_failures -= 1;
            return Err(TransportError::Gateway("mock establish failure".to_string()));
        }
        Ok(())
    }

    async fn open_channel(
        &self,
        channel_name: &str,
        scope: &ChangeScope,
    ) -> Result<Channel, TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(TransportError::Gateway("mock open failure".to_string()));
        }

        state.opens.push(OpenRecord {
            channel: channel_name.to_string(),
            scope: scope.clone(),
        });
        let (sender, receiver) = mpsc::unbounded();
        state.senders.insert(channel_name.to_string(), sender);

        Ok(Channel {
            messages: Box::pin(receiver),
            handle: Box::new(MockChannelHandle {
                channel: channel_name.to_string(),
                state: self.state.clone(),
            }),
        })
    }
}

#[derive(Default)]
struct MockMonitorState {
    status: Option<NetworkStatus>,
    network_senders: Vec<mpsc::UnboundedSender<NetworkStatus>>,
    app_senders: Vec<mpsc::UnboundedSender<AppStateChange>>,
}

/// Native platform monitor with test-driven network and app-state streams.
pub struct MockMonitor {
    state: Mutex<MockMonitorState>,
}

impl MockMonitor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockMonitorState::default()),
        }
    }

    pub fn set_status(&self, status: NetworkStatus) {
        self.state.lock().unwrap().status = Some(status);
    }

    pub fn push_network(&self, status: NetworkStatus) {
        self.set_status(status.clone());
        let senders = self.state.lock().unwrap().network_senders.clone();
        for sender in senders {
            let _ = sender.unbounded_send(status.clone());
        }
    }

    pub fn push_app(&self, change: AppStateChange) {
        let senders = self.state.lock().unwrap().app_senders.clone();
        for sender in senders {
            let _ = sender.unbounded_send(change.clone());
        }
    }
}

#[async_trait::async_trait]
impl PlatformMonitor for MockMonitor {
    fn is_native(&self) -> bool {
        true
    }

    async fn network_status(&self) -> Result<NetworkStatus, TransportError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .status
            .clone()
            .unwrap_or(NetworkStatus {
                connected: true,
                connection_type: "wifi".to_string(),
            }))
    }

    fn network_changes(&self) -> BoxStream<'static, NetworkStatus> {
        let (sender, receiver) = mpsc::unbounded();
        self.state.lock().unwrap().network_senders.push(sender);
        Box::pin(receiver)
    }

    fn app_state_changes(&self) -> BoxStream<'static, AppStateChange> {
        let (sender, receiver) = mpsc::unbounded();
        self.state.lock().unwrap().app_senders.push(sender);
        Box::pin(receiver)
    }
}

/// Notifier that records every toast it is asked to show.
#[derive(Default)]
pub struct RecordingNotifier {
    records: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Notification> {
        self.records.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.records.lock().unwrap().push(notification);
    }
}

/// A fully wired stack over the mocks.
pub struct TestHarness {
    pub transport: Arc<MockTransport>,
    pub monitor: Arc<MockMonitor>,
    pub notifier: Arc<RecordingNotifier>,
    pub stack: RealtimeSyncStack,
}

pub fn harness() -> TestHarness {
    let transport = Arc::new(MockTransport::new());
    let monitor = Arc::new(MockMonitor::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let stack = RealtimeSyncStack::new(
        transport.clone(),
        monitor.clone(),
        notifier.clone(),
        RealtimeSyncConfig::default(),
    );
    TestHarness {
        transport,
        monitor,
        notifier,
        stack,
    }
}
