//! Stripe implementation of [`BillingProvider`] over `async-stripe`.

use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use stripe::{
    BillingPortalSession, CheckoutSessionMode, Client, CreateBillingPortalSession,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, CreateCustomer, CustomerId,
    ListSubscriptions, StripeError, SubscriptionId, SubscriptionStatusFilter,
};
use tracing::{debug, info_span, Instrument};

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::provider::{BillingProvider, CreateCheckoutParams, CreateCustomerParams};
use crate::types::{
    CheckoutSession, Customer, Invoice, PortalSession, Subscription, SubscriptionItems,
    SubscriptionState, METADATA_USER_ID,
};

/// Page size when listing a customer's subscriptions.
const SUBSCRIPTION_PAGE_SIZE: u64 = 100;

pub struct StripeClient {
    /// Absent until a secret key is configured.
    client: Option<Client>,
    config: BillingConfig,
}

impl StripeClient {
    pub fn new(config: BillingConfig) -> BillingResult<Self> {
        url::Url::parse(&config.api_base).map_err(|e| {
            BillingError::InvalidConfig(format!("STRIPE_API_BASE {}: {}", config.api_base, e))
        })?;
        let client = config
            .secret_key
            .as_deref()
            .map(|key| Client::from_url(config.api_base.as_str(), key));
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    fn client(&self) -> BillingResult<&Client> {
        self.client
            .as_ref()
            .ok_or(BillingError::NotConfigured("STRIPE_SECRET_KEY"))
    }

    /// Await a provider call under the configured deadline, with tracing and metrics.
    async fn call<T, F>(&self, operation: &'static str, request: F) -> BillingResult<T>
    where
        F: Future<Output = Result<T, StripeError>>,
    {
        let span = info_span!("stripe_request", operation = %operation);
        let start = Instant::now();

        let result = match tokio::time::timeout(self.config.timeout, request.instrument(span)).await
        {
            Ok(result) => result.map_err(BillingError::from),
            Err(_) => Err(BillingError::Timeout(self.config.timeout.as_secs())),
        };

        let status = match &result {
            Ok(_) => "ok".to_string(),
            Err(BillingError::Api { status, .. }) => status.to_string(),
            Err(BillingError::Timeout(_)) => "timeout".to_string(),
            Err(_) => "error".to_string(),
        };
        if let Err(e) = &result {
            debug!(operation, error = %e, "Stripe request failed");
        }
        counter!(
            "billing_requests_total",
            "operation" => operation,
            "status" => status
        )
        .increment(1);
        histogram!("billing_request_duration_seconds", "operation" => operation)
            .record(start.elapsed().as_secs_f64());

        result
    }
}

fn parse_id<T: FromStr>(id: &str, what: &str) -> BillingResult<T> {
    T::from_str(id).map_err(|_| BillingError::invalid_payload(format!("invalid {} id: {}", what, id)))
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn list_subscriptions(&self, customer_id: &str) -> BillingResult<Vec<Subscription>> {
        let client = self.client()?;
        let mut params = ListSubscriptions {
            customer: Some(parse_id::<CustomerId>(customer_id, "customer")?),
            status: Some(SubscriptionStatusFilter::All),
            limit: Some(SUBSCRIPTION_PAGE_SIZE),
            ..Default::default()
        };

        let mut subscriptions = Vec::new();
        loop {
            let page = self
                .call("list_subscriptions", stripe::Subscription::list(client, &params))
                .await?;
            let cursor = page.data.last().map(|sub| sub.id.clone());
            subscriptions.extend(page.data.into_iter().map(Subscription::from));

            match cursor {
                Some(last) if page.has_more => params.starting_after = Some(last),
                _ => break,
            }
        }
        Ok(subscriptions)
    }

    async fn get_subscription(&self, subscription_id: &str) -> BillingResult<Subscription> {
        let client = self.client()?;
        let id = parse_id::<SubscriptionId>(subscription_id, "subscription")?;
        let sub = self
            .call(
                "get_subscription",
                stripe::Subscription::retrieve(client, &id, &[]),
            )
            .await?;
        Ok(sub.into())
    }

    async fn get_customer(&self, customer_id: &str) -> BillingResult<Customer> {
        let client = self.client()?;
        let id = parse_id::<CustomerId>(customer_id, "customer")?;
        let customer = self
            .call("get_customer", stripe::Customer::retrieve(client, &id, &[]))
            .await?;
        Ok(customer.into())
    }

    async fn create_customer(&self, params: CreateCustomerParams<'_>) -> BillingResult<Customer> {
        let client = self.client()?;
        let customer = self
            .call(
                "create_customer",
                stripe::Customer::create(
                    client,
                    CreateCustomer {
                        email: params.email,
                        name: params.name,
                        metadata: Some(HashMap::from([(
                            METADATA_USER_ID.to_string(),
                            params.user_id.to_string(),
                        )])),
                        ..Default::default()
                    },
                ),
            )
            .await?;
        Ok(customer.into())
    }

    async fn create_checkout_session(
        &self,
        params: CreateCheckoutParams<'_>,
    ) -> BillingResult<CheckoutSession> {
        let client = self.client()?;
        let price_id = self.config.price_id_creator()?;

        let mut create = CreateCheckoutSession::new();
        create.mode = Some(CheckoutSessionMode::Subscription);
        create.customer = Some(parse_id::<CustomerId>(params.customer_id, "customer")?);
        create.client_reference_id = Some(params.user_id);
        create.success_url = Some(params.success_url);
        create.cancel_url = Some(params.cancel_url);
        create.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_id.to_string()),
            quantity: Some(1),
            ..Default::default()
        }]);
        create.metadata = Some(HashMap::from([(
            METADATA_USER_ID.to_string(),
            params.user_id.to_string(),
        )]));

        let session = self
            .call(
                "create_checkout_session",
                stripe::CheckoutSession::create(client, create),
            )
            .await?;
        Ok(session.into())
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> BillingResult<PortalSession> {
        let client = self.client()?;
        let mut create =
            CreateBillingPortalSession::new(parse_id::<CustomerId>(customer_id, "customer")?);
        create.return_url = Some(return_url);

        let session = self
            .call(
                "create_portal_session",
                BillingPortalSession::create(client, create),
            )
            .await?;
        Ok(session.into())
    }
}

impl From<stripe::Subscription> for Subscription {
    fn from(value: stripe::Subscription) -> Self {
        Self {
            id: value.id.to_string(),
            customer: Some(value.customer.id().to_string()),
            status: SubscriptionState::parse(value.status.as_str()),
            current_period_start: timestamp(value.current_period_start),
            current_period_end: timestamp(value.current_period_end),
            cancel_at_period_end: value.cancel_at_period_end,
            canceled_at: value.canceled_at.and_then(timestamp),
            ended_at: value.ended_at.and_then(timestamp),
            metadata: value.metadata,
            items: SubscriptionItems::default(),
        }
    }
}

impl From<stripe::Customer> for Customer {
    fn from(value: stripe::Customer) -> Self {
        Self {
            id: value.id.to_string(),
            email: value.email,
            name: value.name,
            metadata: value.metadata.unwrap_or_default(),
            deleted: value.deleted,
        }
    }
}

impl From<stripe::CheckoutSession> for CheckoutSession {
    fn from(value: stripe::CheckoutSession) -> Self {
        Self {
            id: value.id.to_string(),
            url: value.url,
            customer: value.customer.as_ref().map(|c| c.id().to_string()),
            subscription: value.subscription.as_ref().map(|s| s.id().to_string()),
            client_reference_id: value.client_reference_id,
            metadata: value.metadata.unwrap_or_default(),
        }
    }
}

impl From<stripe::Invoice> for Invoice {
    fn from(value: stripe::Invoice) -> Self {
        Self {
            id: Some(value.id.to_string()),
            customer: value.customer.as_ref().map(|c| c.id().to_string()),
            subscription: value.subscription.as_ref().map(|s| s.id().to_string()),
            parent: None,
        }
    }
}

impl From<BillingPortalSession> for PortalSession {
    fn from(value: BillingPortalSession) -> Self {
        Self {
            id: value.id.to_string(),
            url: value.url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::subscription_object;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> StripeClient {
        StripeClient::new(BillingConfig {
            secret_key: Some("sk_test_abc".into()),
            price_id_creator: Some("price_creator".into()),
            api_base: format!("{}/", server.uri()),
            ..Default::default()
        })
        .unwrap()
    }

    fn subscription_page(subs: Vec<serde_json::Value>, has_more: bool) -> serde_json::Value {
        json!({
            "object": "list",
            "data": subs,
            "has_more": has_more,
            "url": "/v1/subscriptions"
        })
    }

    #[tokio::test]
    async fn test_list_subscriptions_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/subscriptions"))
            .and(query_param("starting_after", "sub_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(subscription_page(
                vec![subscription_object("sub_2", "cus_1", "canceled")],
                false,
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/subscriptions"))
            .and(query_param("customer", "cus_1"))
            .and(query_param("status", "all"))
            .and(header("authorization", "Bearer sk_test_abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(subscription_page(
                vec![subscription_object("sub_1", "cus_1", "active")],
                true,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let subs = client_for(&server).list_subscriptions("cus_1").await.unwrap();
        let ids: Vec<_> = subs.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["sub_1", "sub_2"]);
        assert_eq!(subs[0].status, SubscriptionState::Active);
        assert_eq!(subs[0].customer.as_deref(), Some("cus_1"));
        assert_eq!(subs[0].period_end().unwrap().timestamp(), 1738368000);
        assert_eq!(subs[1].status, SubscriptionState::Canceled);
    }

    #[tokio::test]
    async fn test_api_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/customers/cus_missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {
                    "code": "resource_missing",
                    "message": "No such customer: 'cus_missing'",
                    "type": "invalid_request_error"
                }
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .get_customer("cus_missing")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("No such customer"));
    }

    #[tokio::test]
    async fn test_create_customer_sends_user_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/customers"))
            .and(body_string_contains("metadata%5BfirebaseUid%5D=uid-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cus_new",
                "object": "customer",
                "created": 1735689600,
                "email": "a@example.com",
                "livemode": false,
                "metadata": {"firebaseUid": "uid-1"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let customer = client_for(&server)
            .create_customer(CreateCustomerParams {
                email: Some("a@example.com"),
                name: None,
                user_id: "uid-1",
            })
            .await
            .unwrap();
        assert_eq!(customer.id, "cus_new");
        assert_eq!(customer.user_id(), Some("uid-1"));
    }

    #[tokio::test]
    async fn test_missing_secret_key_fails_without_request() {
        let client = StripeClient::new(BillingConfig::default()).unwrap();
        let err = client.list_subscriptions("cus_1").await.unwrap_err();
        assert!(matches!(err, BillingError::NotConfigured("STRIPE_SECRET_KEY")));
    }

    #[test]
    fn test_invalid_api_base_is_rejected() {
        let result = StripeClient::new(BillingConfig {
            api_base: "not a url".into(),
            ..Default::default()
        });
        assert!(matches!(result, Err(BillingError::InvalidConfig(_))));
    }
}
