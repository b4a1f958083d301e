//! Billing objects as the backend sees them.
//!
//! Provider responses are mapped into these in [`crate::stripe_client`].
//! Webhook payloads the typed event model cannot represent decode straight
//! from JSON, where related objects may arrive either as an id string or as
//! an expanded object; both decode to the id.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::error::BillingResult;

/// Metadata key carrying the identity id on customers and checkout sessions.
pub const METADATA_USER_ID: &str = "firebaseUid";

fn expandable_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdOrObject {
        Id(String),
        Object { id: String },
    }

    Ok(Option::<IdOrObject>::deserialize(deserializer)?.map(|v| match v {
        IdOrObject::Id(id) | IdOrObject::Object { id } => id,
    }))
}

/// Subscription lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Paused,
    #[serde(other)]
    Unknown,
}

impl SubscriptionState {
    /// Parse a provider status string; unrecognized values map to `Unknown`.
    pub fn parse(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            "canceled" => Self::Canceled,
            "unpaid" => Self::Unpaid,
            "incomplete" => Self::Incomplete,
            "incomplete_expired" => Self::IncompleteExpired,
            "paused" => Self::Paused,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Unpaid => "unpaid",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Paused => "paused",
            Self::Unknown => "unknown",
        }
    }

    /// Statuses that grant access regardless of period dates.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing | Self::PastDue)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

/// Newer API versions report billing periods per item.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItem {
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub current_period_start: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub current_period_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub id: String,
    #[serde(default, deserialize_with = "expandable_id")]
    pub customer: Option<String>,
    pub status: SubscriptionState,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub current_period_start: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub current_period_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub canceled_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub items: SubscriptionItems,
}

impl Subscription {
    pub fn new(id: impl Into<String>, customer: impl Into<String>, status: SubscriptionState) -> Self {
        Self {
            id: id.into(),
            customer: Some(customer.into()),
            status,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            canceled_at: None,
            ended_at: None,
            metadata: HashMap::new(),
            items: SubscriptionItems::default(),
        }
    }

    pub fn with_period(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.current_period_start = Some(start);
        self.current_period_end = Some(end);
        self
    }

    pub fn with_cancellation(
        mut self,
        canceled_at: Option<DateTime<Utc>>,
        cancel_at_period_end: bool,
        ended_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.canceled_at = canceled_at;
        self.cancel_at_period_end = cancel_at_period_end;
        self.ended_at = ended_at;
        self
    }

    /// Billing period start, falling back to the first item.
    pub fn period_start(&self) -> Option<DateTime<Utc>> {
        self.current_period_start
            .or_else(|| self.items.data.first().and_then(|i| i.current_period_start))
    }

    /// Billing period end, falling back to the first item.
    pub fn period_end(&self) -> Option<DateTime<Utc>> {
        self.current_period_end
            .or_else(|| self.items.data.first().and_then(|i| i.current_period_end))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub deleted: bool,
}

impl Customer {
    /// Identity id recorded when the customer was created.
    pub fn user_id(&self) -> Option<&str> {
        self.metadata
            .get(METADATA_USER_ID)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "expandable_id")]
    pub customer: Option<String>,
    #[serde(default, deserialize_with = "expandable_id")]
    pub subscription: Option<String>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceParent {
    #[serde(default)]
    pub subscription_details: Option<InvoiceSubscriptionDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceSubscriptionDetails {
    #[serde(default, deserialize_with = "expandable_id")]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "expandable_id")]
    pub customer: Option<String>,
    #[serde(default, deserialize_with = "expandable_id")]
    pub subscription: Option<String>,
    #[serde(default)]
    pub parent: Option<InvoiceParent>,
}

impl Invoice {
    /// Subscription the invoice bills, from either API shape.
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription.as_deref().or_else(|| {
            self.parent
                .as_ref()
                .and_then(|p| p.subscription_details.as_ref())
                .and_then(|d| d.subscription.as_deref())
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalSession {
    pub id: String,
    pub url: String,
}

/// Payload of a verified event.
#[derive(Debug, Clone)]
pub enum EventObject {
    CheckoutSession(CheckoutSession),
    Subscription(Subscription),
    Invoice(Invoice),
    Other,
}

/// Verified webhook event.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: String,
    pub event_type: String,
    pub created: i64,
    pub object: EventObject,
}

/// Event types the backend reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    CheckoutSessionCompleted,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaymentFailed,
    InvoicePaid,
    Other,
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created: i64,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

fn decode<T: DeserializeOwned>(object: serde_json::Value) -> BillingResult<T> {
    Ok(serde_json::from_value(object)?)
}

impl Event {
    /// Decode an event envelope from raw JSON.
    ///
    /// The object is typed by the event's type prefix; anything the backend
    /// does not read becomes [`EventObject::Other`].
    pub fn from_payload(payload: &str) -> BillingResult<Self> {
        let raw: RawEvent = serde_json::from_str(payload)?;
        let kind = raw.event_type.as_str();
        let object = if kind.starts_with("checkout.session.") {
            EventObject::CheckoutSession(decode(raw.data.object)?)
        } else if kind.starts_with("customer.subscription.") {
            EventObject::Subscription(decode(raw.data.object)?)
        } else if kind.starts_with("invoice.") {
            EventObject::Invoice(decode(raw.data.object)?)
        } else {
            EventObject::Other
        };
        Ok(Self {
            id: raw.id,
            event_type: raw.event_type,
            created: raw.created,
            object,
        })
    }

    pub fn kind(&self) -> EventKind {
        match self.event_type.as_str() {
            "checkout.session.completed" => EventKind::CheckoutSessionCompleted,
            "customer.subscription.created" => EventKind::SubscriptionCreated,
            "customer.subscription.updated" => EventKind::SubscriptionUpdated,
            "customer.subscription.deleted" => EventKind::SubscriptionDeleted,
            "invoice.payment_failed" => EventKind::InvoicePaymentFailed,
            "invoice.paid" | "invoice.payment_succeeded" => EventKind::InvoicePaid,
            _ => EventKind::Other,
        }
    }

    /// Subscription the event refers to, if its object names one.
    pub fn subscription_id(&self) -> Option<&str> {
        match &self.object {
            EventObject::Subscription(sub) => Some(sub.id.as_str()),
            EventObject::CheckoutSession(session) => session.subscription.as_deref(),
            EventObject::Invoice(invoice) => invoice.subscription_id(),
            EventObject::Other => None,
        }
    }

    /// Billing customer the event refers to, if its object names one.
    pub fn customer_id(&self) -> Option<&str> {
        match &self.object {
            EventObject::Subscription(sub) => sub.customer.as_deref(),
            EventObject::CheckoutSession(session) => session.customer.as_deref(),
            EventObject::Invoice(invoice) => invoice.customer.as_deref(),
            EventObject::Other => None,
        }
    }
}
