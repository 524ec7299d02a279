use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::adapters::PaymentProvider;
use super::models::{
    BillingEvent, CheckoutMode, CheckoutRequest, CheckoutSession, LineItem, TierCatalog,
    WebhookOutcome,
};
use super::{CheckoutError, WebhookError};
use crate::ledger::{GrantMode, Ledger, LedgerError, Tier};

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub app_url: String,
    pub credit_unit_price_cents: i64,
    pub currency: String,
}

impl CheckoutSettings {
    pub fn from_env() -> Self {
        Self {
            app_url: crate::config::APP_URL.clone(),
            credit_unit_price_cents: *crate::config::CREDIT_UNIT_PRICE_CENTS,
            currency: crate::config::CHECKOUT_CURRENCY.clone(),
        }
    }

    fn return_url(&self) -> String {
        format!("{}/dashboard", self.app_url.trim_end_matches('/'))
    }
}

/// A grant decoded from event metadata.
struct PendingGrant {
    user_id: Uuid,
    amount: Decimal,
    mode: GrantMode,
}

/// key: billing-service -> webhook dispatch and checkout creation
#[derive(Clone)]
pub struct BillingService {
    ledger: Ledger,
    payments: Arc<dyn PaymentProvider>,
    tiers: TierCatalog,
    checkout: CheckoutSettings,
}

impl BillingService {
    pub fn new(
        ledger: Ledger,
        payments: Arc<dyn PaymentProvider>,
        tiers: TierCatalog,
        checkout: CheckoutSettings,
    ) -> Self {
        Self {
            ledger,
            payments,
            tiers,
            checkout,
        }
    }

    // key: billing-service -> webhook entrypoint
    pub async fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature: &str,
    ) -> Result<WebhookOutcome, WebhookError> {
        let event = self
            .payments
            .verify_and_parse_webhook(raw_body, signature)
            .map_err(|err| {
                warn!(?err, "rejected billing webhook");
                WebhookError::Rejected(err.to_string())
            })?;

        info!(event_id = %event.id, event_type = %event.event_type, "billing webhook received");

        let pending = match self.decode_grant(&event) {
            Ok(Some(pending)) => pending,
            Ok(None) => {
                return Ok(WebhookOutcome::Ignored {
                    reason: format!("unhandled event type `{}`", event.event_type),
                })
            }
            Err(reason) => {
                // redelivery would carry the same metadata
                error!(event_id = %event.id, event_type = %event.event_type, %reason, "malformed billing event");
                return Ok(WebhookOutcome::Ignored { reason });
            }
        };

        match self
            .ledger
            .grant(
                pending.user_id,
                &event.id,
                pending.amount,
                pending.mode,
                event.created,
            )
            .await
        {
            Ok(outcome) => Ok(WebhookOutcome::Granted {
                user_id: pending.user_id,
                outcome,
            }),
            Err(LedgerError::Store(err)) => {
                error!(?err, event_id = %event.id, "store failure while applying billing event");
                Err(WebhookError::Transient(err.to_string()))
            }
            Err(err) => {
                error!(?err, event_id = %event.id, "billing event could not be applied");
                Ok(WebhookOutcome::Ignored {
                    reason: err.to_string(),
                })
            }
        }
    }

    /// `Ok(None)` for events that carry no grant, `Err` for grant events with bad metadata.
    fn decode_grant(&self, event: &BillingEvent) -> Result<Option<PendingGrant>, String> {
        match event.event_type.as_str() {
            "checkout.session.completed" => {
                let metadata = event
                    .metadata()
                    .ok_or_else(|| "checkout session without metadata".to_string())?;
                if metadata.get("type").and_then(Value::as_str) == Some("credits") {
                    let user_id = metadata_user(metadata)?;
                    let amount = metadata_amount(metadata.get("credit_amount"))?;
                    return Ok(Some(PendingGrant {
                        user_id,
                        amount,
                        mode: GrantMode::Add,
                    }));
                }
                if metadata.contains_key("tier") {
                    return self.subscription_grant(metadata).map(Some);
                }
                Ok(None)
            }
            "invoice.paid" => {
                let reason = event.object.get("billing_reason").and_then(Value::as_str);
                if reason != Some("subscription_cycle") {
                    return Ok(None);
                }
                let metadata = event
                    .metadata()
                    .ok_or_else(|| "renewal invoice without subscription metadata".to_string())?;
                self.subscription_grant(metadata).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn subscription_grant(
        &self,
        metadata: &serde_json::Map<String, Value>,
    ) -> Result<PendingGrant, String> {
        let user_id = metadata_user(metadata)?;
        let tier: Tier = metadata
            .get("tier")
            .and_then(Value::as_str)
            .ok_or_else(|| "tier missing".to_string())?
            .parse()?;
        if !tier.is_paid() {
            return Err(format!("tier `{tier}` carries no allotment"));
        }
        Ok(PendingGrant {
            user_id,
            amount: self.tiers.allotment(tier),
            mode: GrantMode::SetMonthly { tier },
        })
    }

    // key: billing-service -> one-time credit purchase
    pub async fn create_credits_checkout(
        &self,
        user_id: Uuid,
        email: &str,
        credit_amount: u32,
    ) -> Result<CheckoutSession, CheckoutError> {
        if credit_amount < 1 {
            return Err(CheckoutError::InvalidRequest(
                "credit_amount must be at least 1".to_string(),
            ));
        }
        let email = validate_email(email)?;

        let mut metadata = BTreeMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("type".to_string(), "credits".to_string());
        metadata.insert("credit_amount".to_string(), credit_amount.to_string());

        let request = CheckoutRequest {
            customer_email: email,
            mode: CheckoutMode::Payment,
            line_item: LineItem::Custom {
                name: format!("{credit_amount} Video Credits"),
                unit_amount_cents: self.checkout.credit_unit_price_cents,
                currency: self.checkout.currency.clone(),
                quantity: credit_amount,
            },
            success_url: format!(
                "{}?session_id={{CHECKOUT_SESSION_ID}}",
                self.checkout.return_url()
            ),
            cancel_url: self.checkout.return_url(),
            metadata,
        };

        let session = self.payments.create_checkout_session(&request).await?;
        info!(%user_id, credit_amount, session_id = %session.id, "credits checkout created");
        Ok(session)
    }

    // key: billing-service -> subscription purchase
    pub async fn create_subscription_checkout(
        &self,
        user_id: Uuid,
        email: &str,
        tier: Tier,
    ) -> Result<CheckoutSession, CheckoutError> {
        if !tier.is_paid() {
            return Err(CheckoutError::InvalidRequest(format!(
                "tier `{tier}` cannot be purchased"
            )));
        }
        let price_id = self
            .tiers
            .price_id(tier)
            .ok_or_else(|| CheckoutError::NotConfigured(format!("price for tier `{tier}`")))?
            .to_string();
        let email = validate_email(email)?;

        let mut metadata = BTreeMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("tier".to_string(), tier.as_str().to_string());

        let request = CheckoutRequest {
            customer_email: email,
            mode: CheckoutMode::Subscription,
            line_item: LineItem::Price {
                price_id,
                quantity: 1,
            },
            success_url: format!(
                "{}?session_id={{CHECKOUT_SESSION_ID}}",
                self.checkout.return_url()
            ),
            cancel_url: self.checkout.return_url(),
            metadata,
        };

        let session = self.payments.create_checkout_session(&request).await?;
        info!(%user_id, %tier, session_id = %session.id, "subscription checkout created");
        Ok(session)
    }
}

fn metadata_user(metadata: &serde_json::Map<String, Value>) -> Result<Uuid, String> {
    let raw = metadata
        .get("user_id")
        .and_then(Value::as_str)
        .ok_or_else(|| "user_id missing".to_string())?;
    Uuid::parse_str(raw).map_err(|err| format!("user_id `{raw}` is not a uuid: {err}"))
}

fn metadata_amount(value: Option<&Value>) -> Result<Decimal, String> {
    let amount = match value {
        Some(Value::String(text)) => text.trim().parse::<Decimal>().ok(),
        Some(Value::Number(number)) => number.to_string().parse::<Decimal>().ok(),
        _ => None,
    }
    .ok_or_else(|| "credit_amount missing or not a number".to_string())?;
    if amount <= Decimal::ZERO {
        return Err(format!("credit_amount {amount} must be positive"));
    }
    Ok(amount)
}

fn validate_email(email: &str) -> Result<String, CheckoutError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(CheckoutError::InvalidRequest(
            "a valid email is required".to_string(),
        ));
    }
    Ok(email.to_string())
}
