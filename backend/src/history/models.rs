use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::ScanResponse;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub id: Uuid,
    pub image_digest: String,
    pub created_at: DateTime<Utc>,
    pub scan: ScanResponse,
}

impl ScanRecord {
    pub fn new(image_digest: String, scan: ScanResponse) -> Self {
        Self {
            id: Uuid::new_v4(),
            image_digest,
            created_at: Utc::now(),
            scan,
        }
    }
}
