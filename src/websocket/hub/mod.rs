//! Real-time broadcast hub
//!
//! Tracks connected observers and one room per observed scenario. A room
//! holds its subscriber set, the terminals seen for the scenario and a
//! bounded history ring. History is only replayed on explicit request.
//!
//! Lock order: `rooms` is never held while taking `clients` or the reverse.
//! Frames are queued with `try_send`; a full queue drops the frame.

mod types;


pub use types::{HubConfig, HubSweepReport, Outbound};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vanguard_core::TerminalRegistry;
use vanguard_tools::ProcessSupervisor;

use super::protocol::{HistoryEntry, HistoryKind, ServerFrame};
use types::{Client, Room};

/// Broadcast hub shared by every connection
pub struct Hub {
    clients: RwLock<HashMap<Uuid, Client>>,
    rooms: RwLock<HashMap<String, Room>>,
    next_entry: AtomicU64,
    config: HubConfig,
    supervisor: Arc<ProcessSupervisor>,
    terminals: Arc<TerminalRegistry>,
}

impl Hub {
    pub fn new(
        config: HubConfig,
        supervisor: Arc<ProcessSupervisor>,
        terminals: Arc<TerminalRegistry>,
    ) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            next_entry: AtomicU64::new(0),
            config,
            supervisor,
            terminals,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Add an observer and return the queue its writer drains
    pub async fn register(&self, conn_id: Uuid) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(self.config.client_buffer);
        self.clients.write().await.insert(conn_id, Client::new(tx));
        debug!(conn_id = %conn_id, "Observer registered");
        rx
    }

    /// Drop an observer and its subscriptions
    pub async fn unregister(&self, conn_id: Uuid) {
        let Some(client) = self.clients.write().await.remove(&conn_id) else {
            return;
        };
        let mut rooms = self.rooms.write().await;
        for scenario_id in &client.subscriptions {
            if let Some(room) = rooms.get_mut(scenario_id) {
                room.subscribers.remove(&conn_id);
            }
        }
        debug!(conn_id = %conn_id, "Observer unregistered");
    }

    /// Record inbound activity
    pub async fn touch(&self, conn_id: Uuid) {
        if let Some(client) = self.clients.write().await.get_mut(&conn_id) {
            client.last_activity = Instant::now();
        }
    }

    /// Outbound queue of an observer, for callbacks that outlive the request
    pub async fn sender(&self, conn_id: Uuid) -> Option<mpsc::Sender<Outbound>> {
        self.clients
            .read()
            .await
            .get(&conn_id)
            .map(|client| client.tx.clone())
    }

    /// Queue a frame for one observer
    pub async fn send_to(&self, conn_id: Uuid, frame: &ServerFrame) -> bool {
        match self.sender(conn_id).await {
            Some(tx) => deliver(&tx, frame.to_json()),
            None => false,
        }
    }

    /// Join the room of `scenario_id`, creating it on first use
    pub async fn subscribe(&self, conn_id: Uuid, scenario_id: &str) -> bool {
        {
            let mut clients = self.clients.write().await;
            let Some(client) = clients.get_mut(&conn_id) else {
                return false;
            };
            client.subscriptions.insert(scenario_id.to_string());
        }

        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(scenario_id.to_string())
            .or_insert_with(Room::new);
        room.subscribers.insert(conn_id);
        room.touch();
        debug!(conn_id = %conn_id, scenario_id = %scenario_id, "Subscribed to scenario");
        true
    }

    pub async fn unsubscribe(&self, conn_id: Uuid, scenario_id: &str) {
        if let Some(client) = self.clients.write().await.get_mut(&conn_id) {
            client.subscriptions.remove(scenario_id);
        }
        if let Some(room) = self.rooms.write().await.get_mut(scenario_id) {
            room.subscribers.remove(&conn_id);
        }
        debug!(conn_id = %conn_id, scenario_id = %scenario_id, "Unsubscribed from scenario");
    }

    /// Retained history of a room, oldest first
    pub async fn history(&self, scenario_id: &str) -> Vec<HistoryEntry> {
        self.rooms
            .read()
            .await
            .get(scenario_id)
            .map(|room| room.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Send the full retained history of a room to one observer
    pub async fn request_history(&self, conn_id: Uuid, scenario_id: &str) -> bool {
        let frame = ServerFrame::ExecutionHistory {
            scenario_id: scenario_id.to_string(),
            history: self.history(scenario_id).await,
        };
        self.send_to(conn_id, &frame).await
    }

    /// Append an entry to a room's ring and push it to the room
    pub async fn record_history(
        &self,
        scenario_id: &str,
        kind: HistoryKind,
        data: Value,
    ) -> HistoryEntry {
        let entry = HistoryEntry {
            id: self.next_entry.fetch_add(1, Ordering::Relaxed) + 1,
            timestamp: Utc::now(),
            kind,
            data,
        };

        {
            let mut rooms = self.rooms.write().await;
            let room = rooms
                .entry(scenario_id.to_string())
                .or_insert_with(Room::new);
            room.history.push_back(entry.clone());
            while room.history.len() > self.config.history_capacity {
                room.history.pop_front();
            }
            room.touch();
        }

        let update = ServerFrame::ExecutionHistoryUpdate {
            scenario_id: scenario_id.to_string(),
            entry: entry.clone(),
        };
        self.push_to_room(scenario_id, &update).await;
        entry
    }

    /// Push a frame to a room's subscribers, recording it when it has a history kind.
    ///
    /// Scenario and terminal-status updates identical to the last one pushed
    /// for the same key are dropped.
    pub async fn broadcast_scenario(&self, scenario_id: &str, frame: ServerFrame) {
        {
            let mut rooms = self.rooms.write().await;
            let room = rooms
                .entry(scenario_id.to_string())
                .or_insert_with(Room::new);
            if let Some((key, value)) = frame.update_key() {
                if room.last_updates.get(&key) == Some(&value) {
                    debug!(scenario_id = %scenario_id, key = %key, "Dropped repeated update");
                    return;
                }
                room.last_updates.insert(key, value);
            }
            match &frame {
                ServerFrame::TerminalRemoved { terminal_id, .. } => {
                    room.terminals.remove(terminal_id);
                    room.last_updates.remove(&format!("status:{terminal_id}"));
                }
                ServerFrame::TerminalState { terminal, .. } => {
                    room.terminals.insert(terminal.id.clone());
                    room.last_updates.remove(&format!("status:{}", terminal.id));
                }
                ServerFrame::TerminalOutput { terminal_id, .. }
                | ServerFrame::TerminalError { terminal_id, .. }
                | ServerFrame::TerminalStatus { terminal_id, .. }
                | ServerFrame::TerminalCleared { terminal_id, .. } => {
                    room.terminals.insert(terminal_id.clone());
                }
                _ => {}
            }
            room.touch();
        }

        self.push_to_room(scenario_id, &frame).await;

        if let Some(kind) = frame.history_kind() {
            let data = serde_json::to_value(&frame).unwrap_or(Value::Null);
            self.record_history(scenario_id, kind, data).await;
        }
    }

    /// Campaigns have no room; every observer gets their updates
    pub async fn broadcast_campaign(&self, campaign_id: &str, frame: ServerFrame) {
        let sent = self.broadcast_global(frame).await;
        debug!(campaign_id = %campaign_id, observers = sent, "Campaign update broadcast");
    }

    /// Push to every observer without recording
    pub async fn broadcast_global(&self, frame: ServerFrame) -> usize {
        self.push_to_all(&frame).await
    }

    async fn push_to_room(&self, scenario_id: &str, frame: &ServerFrame) -> usize {
        let subscribers: Vec<Uuid> = match self.rooms.read().await.get(scenario_id) {
            Some(room) => room.subscribers.iter().copied().collect(),
            None => return 0,
        };
        if subscribers.is_empty() {
            return 0;
        }

        let json = frame.to_json();
        let clients = self.clients.read().await;
        subscribers
            .iter()
            .filter_map(|id| clients.get(id))
            .filter(|client| deliver(&client.tx, json.clone()))
            .count()
    }

    async fn push_to_all(&self, frame: &ServerFrame) -> usize {
        let json = frame.to_json();
        self.clients
            .read()
            .await
            .values()
            .filter(|client| deliver(&client.tx, json.clone()))
            .count()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn subscriber_count(&self, scenario_id: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(scenario_id)
            .map_or(0, |room| room.subscribers.len())
    }

    /// Terminals seen for a scenario
    pub async fn room_terminals(&self, scenario_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .rooms
            .read()
            .await
            .get(scenario_id)
            .map(|room| room.terminals.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Evict idle rooms, then idle or disconnected observers
    pub async fn sweep(&self) -> HubSweepReport {
        let now = Instant::now();
        let ttl = self.config.idle_ttl;
        let mut report = HubSweepReport::default();

        let evicted_rooms: Vec<(String, Room)> = {
            let mut rooms = self.rooms.write().await;
            let stale: Vec<String> = rooms
                .iter()
                .filter(|(_, room)| now.saturating_duration_since(room.last_activity) > ttl)
                .map(|(id, _)| id.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|id| rooms.remove(&id).map(|room| (id, room)))
                .collect()
        };
        report.rooms = evicted_rooms.len();

        let evicted_clients: Vec<(Uuid, Client)> = {
            let mut clients = self.clients.write().await;
            for (scenario_id, mut room) in evicted_rooms {
                for conn_id in room.subscribers.drain() {
                    if let Some(client) = clients.get_mut(&conn_id) {
                        client.subscriptions.remove(&scenario_id);
                    }
                }
                room.terminals.clear();
                room.last_updates.clear();
            }

            let stale: Vec<Uuid> = clients
                .iter()
                .filter(|(_, client)| {
                    client.tx.is_closed()
                        || now.saturating_duration_since(client.last_activity) > ttl
                })
                .map(|(id, _)| *id)
                .collect();
            stale
                .into_iter()
                .filter_map(|id| clients.remove(&id).map(|client| (id, client)))
                .collect()
        };
        report.clients = evicted_clients.len();

        if !evicted_clients.is_empty() {
            let mut rooms = self.rooms.write().await;
            for (conn_id, client) in &evicted_clients {
                let _ = client.tx.try_send(Outbound::Close);
                for scenario_id in &client.subscriptions {
                    if let Some(room) = rooms.get_mut(scenario_id) {
                        room.subscribers.remove(conn_id);
                    }
                }
            }
        }

        if report.rooms > 0 || report.clients > 0 {
            info!(
                rooms = report.rooms,
                observers = report.clients,
                "Evicted idle rooms and observers"
            );
        }
        report
    }

    /// Sweep on an interval until cancelled
    pub async fn run_sweeper(self: Arc<Self>, token: CancellationToken) {
        info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            "Broadcast sweeper started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.sweep_interval) => {
                    self.sweep().await;
                }
                _ = token.cancelled() => {
                    info!("Broadcast sweeper shutting down");
                    break;
                }
            }
        }
    }

    /// Kill every process, remove every terminal and close every connection
    pub async fn shutdown(&self) {
        let killed = self.supervisor.shutdown_all().await;
        let terminals = self.terminals.remove_all();

        let clients: Vec<Client> = self.clients.write().await.drain().map(|(_, c)| c).collect();
        for client in &clients {
            let _ = client.tx.try_send(Outbound::Close);
        }
        self.rooms.write().await.clear();

        info!(
            processes = killed,
            terminals,
            connections = clients.len(),
            "Broadcast layer shut down"
        );
    }
}

fn deliver(tx: &mpsc::Sender<Outbound>, json: String) -> bool {
    match tx.try_send(Outbound::Text(json)) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Observer queue full, dropping frame");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}
