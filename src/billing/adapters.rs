use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

use super::models::{BillingEvent, CheckoutRequest, CheckoutSession, LineItem};
use super::CheckoutError;
use crate::config;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookVerificationError {
    #[error("webhook secret is not configured")]
    NotConfigured,
    #[error("malformed signature header")]
    MalformedHeader,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("no matching signature")]
    SignatureMismatch,
    #[error("{0}")]
    InvalidPayload(String),
}

/// key: payment-adapter -> checkout + webhook verification
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, CheckoutError>;
    fn verify_and_parse_webhook(
        &self,
        raw: &[u8],
        signature: &str,
    ) -> Result<BillingEvent, WebhookVerificationError>;
}

/// key: payment-adapter-stripe -> Stripe REST + signed webhooks
pub struct StripeAdapter {
    client: reqwest::Client,
    base_url: String,
    secret_key: Option<String>,
    webhook_secret: Option<String>,
    tolerance: Duration,
}

impl StripeAdapter {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: Option<String>,
        webhook_secret: Option<String>,
        tolerance: Duration,
    ) -> Result<Self, CheckoutError> {
        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(*config::PROVIDER_TIMEOUT_SECS))
            .build()
            .map_err(|err| CheckoutError::Provider(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            secret_key,
            webhook_secret,
            tolerance,
        })
    }

    pub fn from_env() -> Result<Self, CheckoutError> {
        Self::new(
            config::STRIPE_API_URL.as_str(),
            config::STRIPE_SECRET_KEY.clone(),
            config::STRIPE_WEBHOOK_SECRET.clone(),
            Duration::seconds(*config::STRIPE_WEBHOOK_TOLERANCE_SECS),
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Verifies a `Stripe-Signature` header against the raw body at a given instant.
    pub fn verify_at(
        &self,
        raw: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<BillingEvent, WebhookVerificationError> {
        let secret = self
            .webhook_secret
            .as_deref()
            .ok_or(WebhookVerificationError::NotConfigured)?;
        verify_signature(secret, raw, signature, now, self.tolerance)?;
        BillingEvent::from_json(raw).map_err(WebhookVerificationError::InvalidPayload)
    }
}

#[async_trait]
impl PaymentProvider for StripeAdapter {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, CheckoutError> {
        let secret_key = self
            .secret_key
            .as_deref()
            .ok_or_else(|| CheckoutError::NotConfigured("STRIPE_SECRET_KEY".to_string()))?;

        let response = self
            .client
            .post(self.endpoint("v1/checkout/sessions"))
            .bearer_auth(secret_key)
            .form(&checkout_form(request))
            .send()
            .await
            .map_err(|err| CheckoutError::Provider(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CheckoutError::Provider(format!(
                "checkout rejected with status {status}: {body}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| CheckoutError::Provider(err.to_string()))?;
        let id = body.get("id").and_then(Value::as_str);
        let url = body.get("url").and_then(Value::as_str);
        match (id, url) {
            (Some(id), Some(url)) => Ok(CheckoutSession {
                id: id.to_string(),
                url: url.to_string(),
            }),
            _ => Err(CheckoutError::Provider(
                "checkout session without id or url".to_string(),
            )),
        }
    }

    fn verify_and_parse_webhook(
        &self,
        raw: &[u8],
        signature: &str,
    ) -> Result<BillingEvent, WebhookVerificationError> {
        self.verify_at(raw, signature, Utc::now())
    }
}

/// Checks `t=<unix>,v1=<hex>` against HMAC-SHA256 of `"<t>.<body>"`. Any `v1` entry may match.
pub fn verify_signature(
    secret: &str,
    raw: &[u8],
    header: &str,
    now: DateTime<Utc>,
    tolerance: Duration,
) -> Result<(), WebhookVerificationError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => candidates.push(value),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(WebhookVerificationError::MalformedHeader)?;
    if candidates.is_empty() {
        return Err(WebhookVerificationError::MalformedHeader);
    }
    // t= is untrusted here; skew is computed without overflow
    if now.timestamp().abs_diff(timestamp) > tolerance.num_seconds().unsigned_abs() {
        return Err(WebhookVerificationError::Expired);
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookVerificationError::NotConfigured)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw);

    let matched = candidates.into_iter().any(|candidate| {
        hex::decode(candidate)
            .map(|expected| mac.clone().verify_slice(&expected).is_ok())
            .unwrap_or(false)
    });
    if matched {
        Ok(())
    } else {
        Err(WebhookVerificationError::SignatureMismatch)
    }
}

/// Produces a `Stripe-Signature` header value for `raw` at `timestamp`.
///
/// Helper for signing fixture events in tests and for replaying captured events against a
/// local instance. Production traffic is only ever verified, never signed.
pub fn sign_payload(secret: &str, raw: &[u8], timestamp: i64) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can use any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

fn checkout_form(request: &CheckoutRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), request.mode.as_str().to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        ("customer_email".to_string(), request.customer_email.clone()),
    ];

    match &request.line_item {
        LineItem::Price { price_id, quantity } => {
            form.push(("line_items[0][price]".to_string(), price_id.clone()));
            form.push(("line_items[0][quantity]".to_string(), quantity.to_string()));
        }
        LineItem::Custom {
            name,
            unit_amount_cents,
            currency,
            quantity,
        } => {
            form.push((
                "line_items[0][price_data][currency]".to_string(),
                currency.clone(),
            ));
            form.push((
                "line_items[0][price_data][product_data][name]".to_string(),
                name.clone(),
            ));
            form.push((
                "line_items[0][price_data][unit_amount]".to_string(),
                unit_amount_cents.to_string(),
            ));
            form.push(("line_items[0][quantity]".to_string(), quantity.to_string()));
        }
    }

    for (key, value) in &request.metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
        if request.mode == super::models::CheckoutMode::Subscription {
            form.push((format!("subscription_data[metadata][{key}]"), value.clone()));
        }
    }
    form
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::models::CheckoutMode;
    use std::collections::BTreeMap;

    const SECRET: &str = "whsec_test";

    #[test]
    fn signed_payload_verifies() {
        let now = Utc::now();
        let body = br#"{"id":"evt_1"}"#;
        let header = sign_payload(SECRET, body, now.timestamp());
        assert!(verify_signature(SECRET, body, &header, now, Duration::seconds(300)).is_ok());
    }

    #[test]
    fn any_v1_entry_may_match() {
        let now = Utc::now();
        let body = br#"{"id":"evt_1"}"#;
        let valid = sign_payload(SECRET, body, now.timestamp());
        let v1 = valid.split(",v1=").nth(1).unwrap();
        let header = format!("t={},v1=deadbeef,v1={v1}", now.timestamp());
        assert!(verify_signature(SECRET, body, &header, now, Duration::seconds(300)).is_ok());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let now = Utc::now();
        let header = sign_payload(SECRET, br#"{"amount":1}"#, now.timestamp());
        assert_eq!(
            verify_signature(SECRET, br#"{"amount":9}"#, &header, now, Duration::seconds(300)),
            Err(WebhookVerificationError::SignatureMismatch)
        );
    }

    #[test]
    fn old_timestamp_is_rejected() {
        let now = Utc::now();
        let body = b"{}";
        let header = sign_payload(SECRET, body, now.timestamp() - 301);
        assert_eq!(
            verify_signature(SECRET, body, &header, now, Duration::seconds(300)),
            Err(WebhookVerificationError::Expired)
        );
    }

    #[test]
    fn extreme_timestamps_are_expired_without_overflow() {
        let now = Utc::now();
        for t in [i64::MIN, i64::MAX] {
            let header = format!("t={t},v1=00");
            assert_eq!(
                verify_signature(SECRET, b"{}", &header, now, Duration::seconds(300)),
                Err(WebhookVerificationError::Expired)
            );
        }
    }

    #[test]
    fn header_without_timestamp_is_malformed() {
        assert_eq!(
            verify_signature(SECRET, b"{}", "v1=abc", Utc::now(), Duration::seconds(300)),
            Err(WebhookVerificationError::MalformedHeader)
        );
    }

    #[test]
    fn subscription_metadata_is_copied_to_subscription_data() {
        let mut metadata = BTreeMap::new();
        metadata.insert("tier".to_string(), "pro".to_string());
        let form = checkout_form(&CheckoutRequest {
            customer_email: "a@example.com".to_string(),
            mode: CheckoutMode::Subscription,
            line_item: LineItem::Price {
                price_id: "price_pro".to_string(),
                quantity: 1,
            },
            success_url: "https://app/ok".to_string(),
            cancel_url: "https://app/cancel".to_string(),
            metadata,
        });
        assert!(form.contains(&("metadata[tier]".to_string(), "pro".to_string())));
        assert!(form.contains(&(
            "subscription_data[metadata][tier]".to_string(),
            "pro".to_string()
        )));
    }
}
