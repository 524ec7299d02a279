use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config;
use crate::ledger::{GrantOutcome, Tier};

/// key: billing-models -> verified payment-provider notification
#[derive(Debug, Clone)]
pub struct BillingEvent {
    pub id: String,
    pub event_type: String,
    pub created: DateTime<Utc>,
    /// `data.object` of the event.
    pub object: Value,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: Value,
}

impl BillingEvent {
    pub fn from_json(raw: &[u8]) -> Result<Self, String> {
        let parsed: RawEvent =
            serde_json::from_slice(raw).map_err(|err| format!("malformed event: {err}"))?;
        let created = Utc
            .timestamp_opt(parsed.created, 0)
            .single()
            .ok_or_else(|| format!("event timestamp {} out of range", parsed.created))?;
        Ok(Self {
            id: parsed.id,
            event_type: parsed.event_type,
            created,
            object: parsed.data.object,
        })
    }

    /// Metadata attached to the event object, or to the subscription behind an invoice.
    pub fn metadata(&self) -> Option<&serde_json::Map<String, Value>> {
        self.object
            .pointer("/subscription_details/metadata")
            .and_then(Value::as_object)
            .filter(|metadata| !metadata.is_empty())
            .or_else(|| self.object.get("metadata").and_then(Value::as_object))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutMode {
    Payment,
    Subscription,
}

impl CheckoutMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutMode::Payment => "payment",
            CheckoutMode::Subscription => "subscription",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineItem {
    /// A price configured at the payment provider.
    Price { price_id: String, quantity: u32 },
    /// An ad-hoc price defined at checkout time.
    Custom {
        name: String,
        unit_amount_cents: i64,
        currency: String,
        quantity: u32,
    },
}

/// key: billing-models -> checkout session request
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub customer_email: String,
    pub mode: CheckoutMode,
    pub line_item: LineItem,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Granted {
        user_id: Uuid,
        outcome: GrantOutcome,
    },
    Ignored {
        reason: String,
    },
}

/// key: billing-models -> tier allotments and subscription prices
#[derive(Debug, Clone, Default)]
pub struct TierCatalog {
    allotments: HashMap<Tier, Decimal>,
    prices: HashMap<Tier, String>,
}

impl TierCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tier(mut self, tier: Tier, allotment: Decimal, price_id: Option<&str>) -> Self {
        self.allotments.insert(tier, allotment);
        if let Some(price_id) = price_id {
            self.prices.insert(tier, price_id.to_string());
        }
        self
    }

    pub fn from_env() -> Self {
        let mut catalog = Self::new();
        for tier in [Tier::Starter, Tier::Pro, Tier::Business] {
            let allotment = config::TIER_MONTHLY_CREDITS
                .get(tier.as_str())
                .copied()
                .unwrap_or(Decimal::ZERO);
            let price_id = config::STRIPE_TIER_PRICES.get(tier.as_str());
            catalog = catalog.with_tier(tier, allotment, price_id.map(String::as_str));
        }
        catalog
    }

    /// Monthly credits for a tier. The free tier never receives an allotment.
    pub fn allotment(&self, tier: Tier) -> Decimal {
        if !tier.is_paid() {
            return Decimal::ZERO;
        }
        self.allotments.get(&tier).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn price_id(&self, tier: Tier) -> Option<&str> {
        self.prices.get(&tier).map(String::as_str)
    }
}
