use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::providers::{JobStatus, ProviderKind};

/// key: generation-models -> lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Starting => "starting",
            GenerationStatus::Processing => "processing",
            GenerationStatus::Succeeded => "succeeded",
            GenerationStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStatus::Succeeded | GenerationStatus::Failed)
    }

    /// Position in the lifecycle; a record never moves to a lower rank.
    pub fn rank(&self) -> u8 {
        match self {
            GenerationStatus::Starting => 0,
            GenerationStatus::Processing => 1,
            GenerationStatus::Succeeded | GenerationStatus::Failed => 2,
        }
    }
}

impl From<JobStatus> for GenerationStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Queued => GenerationStatus::Starting,
            JobStatus::Processing => GenerationStatus::Processing,
            JobStatus::Succeeded => GenerationStatus::Succeeded,
            JobStatus::Failed => GenerationStatus::Failed,
        }
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "starting" => Ok(GenerationStatus::Starting),
            "processing" => Ok(GenerationStatus::Processing),
            "succeeded" => Ok(GenerationStatus::Succeeded),
            "failed" => Ok(GenerationStatus::Failed),
            other => Err(format!("unknown generation status `{other}`")),
        }
    }
}

/// key: generation-models -> persisted record
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRecord {
    pub generation_id: String,
    pub reservation_id: Uuid,
    pub user_id: Uuid,
    pub provider: ProviderKind,
    pub model: String,
    pub prompt: String,
    pub status: GenerationStatus,
    pub credits_reserved: Decimal,
    pub cost_to_operator: Decimal,
    pub video_url: Option<String>,
    pub error_message: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationRecord {
    pub fn needs_refund(&self) -> bool {
        self.status == GenerationStatus::Failed && self.refunded_at.is_none()
    }
}

/// Status change computed from a provider poll, applied only to non-terminal records.
#[derive(Debug, Clone)]
pub struct GenerationProgress {
    pub status: GenerationStatus,
    pub video_url: Option<String>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationHandle {
    pub generation_id: String,
    pub status: GenerationStatus,
    pub estimated_duration_seconds: u32,
    pub poll_interval_seconds: u64,
    pub provider: ProviderKind,
    pub model: String,
    pub credits_reserved: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationStats {
    pub total_videos: usize,
    pub completed_videos: usize,
    pub total_credits: Decimal,
    pub total_cost: Decimal,
    pub average_cost: Decimal,
}

impl GenerationStats {
    pub fn from_records(records: &[GenerationRecord]) -> Self {
        let total_videos = records.len();
        let completed_videos = records
            .iter()
            .filter(|record| record.status == GenerationStatus::Succeeded)
            .count();
        let total_credits = records.iter().map(|record| record.credits_reserved).sum();
        let total_cost: Decimal = records.iter().map(|record| record.cost_to_operator).sum();
        let average_cost = if total_videos > 0 {
            (total_cost / Decimal::from(total_videos)).round_dp(4)
        } else {
            Decimal::ZERO
        };
        Self {
            total_videos,
            completed_videos,
            total_credits,
            total_cost,
            average_cost,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationHistory {
    pub videos: Vec<GenerationRecord>,
    pub stats: GenerationStats,
}
