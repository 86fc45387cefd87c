use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ScanRequest {
    pub image: String,
}

/// Coarse handling tag attached to every scan.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Classification {
    Safe,
    Hazardous,
    NonReusable,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UpcycleIdea {
    pub title: String,
    pub description: String,
    #[serde(rename = "difficulty")]
    pub difficulty_level: Difficulty,
    #[serde(rename = "thumbnail")]
    pub thumbnail_ref: String,
    #[serde(rename = "source")]
    pub source_tag: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub object_name: String,
    pub category: String,
    pub material: String,
    pub condition: String,
    #[serde(rename = "confidence")]
    pub confidence_score: f64,
    #[serde(rename = "estimatedCoins")]
    pub estimated_reward: u32,
    #[serde(rename = "co2Savings")]
    pub co2_savings_kg: f64,
    pub upcycle_ideas: Vec<UpcycleIdea>,
    pub recyclable: bool,
    pub recycle_info: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ScanResponse {
    pub success: bool,
    pub classification: Classification,
    #[serde(rename = "xpEarned")]
    pub xp_awarded: u32,
    pub item: ScanResult,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            retry_after: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
}
