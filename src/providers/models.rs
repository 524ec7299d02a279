use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// key: provider-models -> closed set of generation backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Replicate,
    Runway,
    Veo,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Replicate => "replicate",
            ProviderKind::Runway => "runway",
            ProviderKind::Veo => "veo",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "replicate" => Ok(ProviderKind::Replicate),
            "runway" => Ok(ProviderKind::Runway),
            "veo" => Ok(ProviderKind::Veo),
            other => Err(format!("unknown provider `{other}`")),
        }
    }
}

/// Canonical job states every adapter translates into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResult {
    pub status: JobStatus,
    pub output_url: Option<String>,
    pub error_detail: Option<String>,
}

/// key: provider-models -> model table row
#[derive(Debug, Clone, Serialize)]
pub struct ModelSpec {
    pub id: &'static str,
    pub display_name: &'static str,
    pub provider: ProviderKind,
    /// Identifier the backend expects in its own API.
    pub provider_model: &'static str,
    pub credits: Decimal,
    pub operator_cost: Decimal,
    pub estimated_duration_seconds: u32,
    pub duration_seconds: u32,
}

static MODELS: Lazy<Vec<ModelSpec>> = Lazy::new(|| {
    vec![
        ModelSpec {
            id: "seedance-1-pro-fast",
            display_name: "Seedance 1 Pro Fast",
            provider: ProviderKind::Replicate,
            provider_model: "bytedance/seedance-1-pro-fast",
            credits: Decimal::new(4, 1),
            operator_cost: Decimal::new(36, 2),
            estimated_duration_seconds: 30,
            duration_seconds: 6,
        },
        ModelSpec {
            id: "gen-4-turbo",
            display_name: "Runway Gen-4 Turbo",
            provider: ProviderKind::Runway,
            provider_model: "gen4_turbo",
            credits: Decimal::new(3, 1),
            operator_cost: Decimal::new(30, 2),
            estimated_duration_seconds: 60,
            duration_seconds: 5,
        },
        ModelSpec {
            id: "gen-4",
            display_name: "Runway Gen-4",
            provider: ProviderKind::Runway,
            provider_model: "gen4",
            credits: Decimal::new(8, 1),
            operator_cost: Decimal::new(72, 2),
            estimated_duration_seconds: 60,
            duration_seconds: 5,
        },
        ModelSpec {
            id: "veo-3-1",
            display_name: "Runway Veo 3.1",
            provider: ProviderKind::Runway,
            provider_model: "veo3.1",
            credits: Decimal::new(27, 1),
            operator_cost: Decimal::new(240, 2),
            estimated_duration_seconds: 60,
            duration_seconds: 8,
        },
        ModelSpec {
            id: "veo-3",
            display_name: "Google Veo 3",
            provider: ProviderKind::Veo,
            provider_model: "veo-3.0-generate-001",
            credits: Decimal::new(27, 1),
            operator_cost: Decimal::new(240, 2),
            estimated_duration_seconds: 90,
            duration_seconds: 8,
        },
        ModelSpec {
            id: "veo-3-1-fast",
            display_name: "Google Veo 3.1 Fast",
            provider: ProviderKind::Veo,
            provider_model: "veo-3.1-fast-generate-preview",
            credits: Decimal::new(9, 1),
            operator_cost: Decimal::new(80, 2),
            estimated_duration_seconds: 90,
            duration_seconds: 8,
        },
    ]
});

/// Resolves a public model id. This is the only place credits and operator cost are defined.
pub fn lookup(model_id: &str) -> Option<&'static ModelSpec> {
    MODELS.iter().find(|model| model.id == model_id)
}

pub fn catalog() -> &'static [ModelSpec] {
    MODELS.as_slice()
}
