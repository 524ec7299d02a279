use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// key: ledger-models -> account tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Starter,
    Pro,
    Business,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Starter => "starter",
            Tier::Pro => "pro",
            Tier::Business => "business",
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, Tier::Free)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "starter" => Ok(Tier::Starter),
            "pro" => Ok(Tier::Pro),
            "business" => Ok(Tier::Business),
            other => Err(format!("unknown tier `{other}`")),
        }
    }
}

/// key: ledger-models -> credit account snapshot
#[derive(Debug, Clone, Serialize)]
pub struct CreditAccount {
    pub user_id: Uuid,
    pub credits_remaining: Decimal,
    pub tier: Tier,
    pub monthly_credits: Decimal,
    pub credits_used: Decimal,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub last_renewal_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreditAccount {
    pub fn new(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            credits_remaining: Decimal::ZERO,
            tier: Tier::Free,
            monthly_credits: Decimal::ZERO,
            credits_used: Decimal::ZERO,
            current_period_start: None,
            current_period_end: None,
            last_renewal_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Reserve,
    Refund,
    Grant,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Reserve => "reserve",
            TransactionKind::Refund => "refund",
            TransactionKind::Grant => "grant",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "reserve" => Ok(TransactionKind::Reserve),
            "refund" => Ok(TransactionKind::Refund),
            "grant" => Ok(TransactionKind::Grant),
            other => Err(format!("unknown transaction kind `{other}`")),
        }
    }
}

/// key: ledger-models -> append-only log entry
///
/// `amount` is the signed delta applied to the balance, so the sum over a user's
/// entries always equals the current balance.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerTransaction {
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub reference: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantMode {
    /// One-time purchase, added to the balance.
    Add,
    /// Subscription renewal: the balance becomes the tier allotment.
    SetMonthly { tier: Tier },
}

impl GrantMode {
    pub fn label(&self) -> &'static str {
        match self {
            GrantMode::Add => "add",
            GrantMode::SetMonthly { .. } => "set-monthly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved { balance: Decimal },
    AlreadyReserved { balance: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundOutcome {
    Refunded { balance: Decimal },
    AlreadyRefunded { balance: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    Applied { balance: Decimal },
    AlreadyApplied { balance: Decimal },
    /// A renewal older than one already applied; recorded, balance untouched.
    Stale { balance: Decimal },
}

impl GrantOutcome {
    pub fn balance(&self) -> Decimal {
        match self {
            GrantOutcome::Applied { balance }
            | GrantOutcome::AlreadyApplied { balance }
            | GrantOutcome::Stale { balance } => *balance,
        }
    }
}

/// A reserve entry that never got a generation record nor a refund.
#[derive(Debug, Clone)]
pub struct OrphanedReservation {
    pub user_id: Uuid,
    pub reservation_id: Uuid,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerAudit {
    pub user_id: Uuid,
    pub balance: Decimal,
    pub log_sum: Decimal,
    pub consistent: bool,
}
