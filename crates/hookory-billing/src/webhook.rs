//! Webhook signature verification.
//!
//! Signatures are checked by [`stripe::Webhook::construct_event`], which also
//! enforces the library's 300 second timestamp tolerance. Payloads from API
//! versions the typed event model cannot parse are still accepted once the
//! signature holds, and decode through [`Event::from_payload`].

use stripe::{EventObject as StripeObject, Webhook, WebhookError};
use tracing::debug;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::types::{Event, EventObject};

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Verifies webhook payloads against the endpoint secret.
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: String,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Build from config; fails if no webhook secret is configured.
    pub fn from_config(config: &BillingConfig) -> BillingResult<Self> {
        Ok(Self::new(config.webhook_secret()?))
    }

    /// Verify the signature and decode the event.
    pub fn verify(&self, payload: &[u8], header: &str) -> BillingResult<Event> {
        let payload = std::str::from_utf8(payload)
            .map_err(|e| BillingError::invalid_payload(format!("payload is not UTF-8: {}", e)))?;

        match Webhook::construct_event(payload, header, &self.secret) {
            Ok(event) => Ok(event.into()),
            Err(WebhookError::BadParse(e)) => {
                debug!(error = %e, "Typed event parse failed after signature check");
                Event::from_payload(payload)
                    .map_err(|e| BillingError::invalid_payload(format!("malformed event: {}", e)))
            }
            Err(e) => Err(BillingError::invalid_signature(e.to_string())),
        }
    }
}

impl From<stripe::Event> for Event {
    fn from(event: stripe::Event) -> Self {
        let object = match event.data.object {
            StripeObject::CheckoutSession(session) => EventObject::CheckoutSession(session.into()),
            StripeObject::Subscription(sub) => EventObject::Subscription(sub.into()),
            StripeObject::Invoice(invoice) => EventObject::Invoice(invoice.into()),
            _ => EventObject::Other,
        };
        Self {
            id: event.id.to_string(),
            event_type: event.type_.to_string(),
            created: event.created,
            object,
        }
    }
}

/// Build a valid signature header for `payload`.
#[cfg(any(test, feature = "test-support"))]
pub fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::subscription_object;
    use chrono::{Duration, Utc};

    const SECRET: &str = "whsec_test";

    fn payload() -> Vec<u8> {
        br#"{"id":"evt_1","type":"invoice.paid","created":1,"data":{"object":{"id":"in_1","customer":"cus_1","subscription":"sub_1"}}}"#.to_vec()
    }

    #[test]
    fn test_valid_signature_decodes_event() {
        let header = sign_payload(SECRET, &payload(), Utc::now().timestamp());
        let event = WebhookVerifier::new(SECRET)
            .verify(&payload(), &header)
            .unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.event_type, "invoice.paid");
        assert_eq!(event.subscription_id(), Some("sub_1"));
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let header = sign_payload(SECRET, &payload(), Utc::now().timestamp());
        let mut body = payload();
        body[10] = b'X';
        let err = WebhookVerifier::new(SECRET)
            .verify(&body, &header)
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidSignature(_)));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let header = sign_payload("whsec_other", &payload(), Utc::now().timestamp());
        assert!(WebhookVerifier::new(SECRET)
            .verify(&payload(), &header)
            .is_err());
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let signed_at = (Utc::now() - Duration::seconds(301)).timestamp();
        let header = sign_payload(SECRET, &payload(), signed_at);
        assert!(matches!(
            WebhookVerifier::new(SECRET).verify(&payload(), &header),
            Err(BillingError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_malformed_headers_are_rejected() {
        let verifier = WebhookVerifier::new(SECRET);
        for header in ["", "v1=abc", "t=notanumber,v1=abc", "t=1"] {
            assert!(verifier.verify(&payload(), header).is_err(), "{header}");
        }
    }

    #[test]
    fn test_subscription_event_maps_to_local_object() {
        let body = serde_json::json!({
            "id": "evt_sub",
            "object": "event",
            "created": Utc::now().timestamp(),
            "livemode": false,
            "pending_webhooks": 1,
            "request": {"id": null, "idempotency_key": null},
            "type": "customer.subscription.updated",
            "data": {"object": subscription_object("sub_1", "cus_1", "past_due")}
        })
        .to_string();
        let header = sign_payload(SECRET, body.as_bytes(), Utc::now().timestamp());

        let event = WebhookVerifier::new(SECRET)
            .verify(body.as_bytes(), &header)
            .unwrap();
        assert_eq!(event.event_type, "customer.subscription.updated");
        let EventObject::Subscription(sub) = &event.object else {
            panic!("expected a subscription, got {:?}", event.object);
        };
        assert_eq!(sub.status, crate::types::SubscriptionState::PastDue);
        assert_eq!(event.customer_id(), Some("cus_1"));
        assert_eq!(sub.period_end().map(|t| t.timestamp()), Some(1738368000));
    }

    #[test]
    fn test_signed_garbage_is_a_payload_error() {
        let body = br#"{"not":"an event"}"#;
        let header = sign_payload(SECRET, body, Utc::now().timestamp());
        assert!(matches!(
            WebhookVerifier::new(SECRET).verify(body, &header),
            Err(BillingError::InvalidPayload(_))
        ));
    }
}
