//! Hub types

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::websocket::protocol::HistoryEntry;

/// Broadcast hub configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Entries kept per room
    pub history_capacity: usize,
    /// Rooms and observers idle longer than this are evicted
    pub idle_ttl: Duration,
    /// Interval between eviction sweeps
    pub sweep_interval: Duration,
    /// Outbound frames queued per observer before frames are dropped
    pub client_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            history_capacity: 500,
            idle_ttl: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(15 * 60),
            client_buffer: 1024,
        }
    }
}

/// Item queued for a connection's writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    /// Close the socket and stop the writer
    Close,
}

pub(crate) struct Client {
    pub(crate) tx: mpsc::Sender<Outbound>,
    pub(crate) subscriptions: HashSet<String>,
    pub(crate) last_activity: Instant,
}

impl Client {
    pub(crate) fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            tx,
            subscriptions: HashSet::new(),
            last_activity: Instant::now(),
        }
    }
}

pub(crate) struct Room {
    pub(crate) terminals: HashSet<String>,
    pub(crate) subscribers: HashSet<Uuid>,
    pub(crate) history: VecDeque<HistoryEntry>,
    /// Last pushed value per update key, to drop repeats
    pub(crate) last_updates: HashMap<String, String>,
    pub(crate) last_activity: Instant,
}

impl Room {
    pub(crate) fn new() -> Self {
        Self {
            terminals: HashSet::new(),
            subscribers: HashSet::new(),
            history: VecDeque::new(),
            last_updates: HashMap::new(),
            last_activity: Instant::now(),
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Result of one eviction sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HubSweepReport {
    pub rooms: usize,
    pub clients: usize,
}
