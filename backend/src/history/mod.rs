pub mod memory;
pub mod models;

use async_trait::async_trait;
use models::ScanRecord;

// The in-memory store never fails; persistent stores report through this.
#[allow(dead_code)]
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("History store unavailable: {0}")]
    Unavailable(String),
}

/// Where finished scans are kept for a client's history.
#[async_trait]
pub trait ScanHistory: Send + Sync {
    async fn record(&self, client: &str, record: ScanRecord) -> Result<(), HistoryError>;

    /// Newest first.
    async fn list(&self, client: &str) -> Result<Vec<ScanRecord>, HistoryError>;
}
