use super::models::ScanRecord;
use super::{HistoryError, ScanHistory};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

pub const DEFAULT_CAPACITY: usize = 50;
pub const DEFAULT_MAX_CLIENTS: usize = 10_000;

#[derive(Default)]
struct ClientLog {
    touched: u64,
    records: VecDeque<ScanRecord>,
}

#[derive(Default)]
struct Entries {
    clock: u64,
    clients: HashMap<String, ClientLog>,
}

/// Process-local scan history, bounded per client and in the number of clients.
///
/// When a new client arrives at the client limit, the client that recorded
/// least recently is dropped.
pub struct InMemoryScanHistory {
    capacity: usize,
    max_clients: usize,
    entries: Mutex<Entries>,
}

impl Default for InMemoryScanHistory {
    fn default() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, DEFAULT_MAX_CLIENTS)
    }
}

impl InMemoryScanHistory {
    pub fn with_limits(capacity: usize, max_clients: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            max_clients: max_clients.max(1),
            entries: Mutex::new(Entries::default()),
        }
    }
}

#[async_trait]
impl ScanHistory for InMemoryScanHistory {
    async fn record(&self, client: &str, record: ScanRecord) -> Result<(), HistoryError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.clock += 1;
        let touched = entries.clock;

        if !entries.clients.contains_key(client) && entries.clients.len() >= self.max_clients {
            let stalest = entries
                .clients
                .iter()
                .min_by_key(|(_, client_log)| client_log.touched)
                .map(|(key, _)| key.clone());
            if let Some(key) = stalest {
                log::debug!("Scan history full; dropping records for {}", key);
                entries.clients.remove(&key);
            }
        }

        let client_log = entries.clients.entry(client.to_string()).or_default();
        client_log.touched = touched;
        client_log.records.push_front(record);
        client_log.records.truncate(self.capacity);
        Ok(())
    }

    async fn list(&self, client: &str) -> Result<Vec<ScanRecord>, HistoryError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .clients
            .get(client)
            .map(|client_log| client_log.records.iter().cloned().collect())
            .unwrap_or_default())
    }
}
