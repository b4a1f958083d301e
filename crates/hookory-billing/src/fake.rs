//! In-process billing provider for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{BillingError, BillingResult};
use crate::provider::{BillingProvider, CreateCheckoutParams, CreateCustomerParams};
use crate::types::{CheckoutSession, Customer, PortalSession, Subscription, METADATA_USER_ID};

#[derive(Default)]
pub struct FakeBillingProvider {
    customers: Mutex<HashMap<String, Customer>>,
    subscriptions: Mutex<Vec<Subscription>>,
    failing: AtomicBool,
    list_calls: AtomicUsize,
    checkout_calls: AtomicUsize,
    next_id: AtomicUsize,
}

impl FakeBillingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a customer linked to `user_id` through metadata.
    pub fn add_customer(&self, customer_id: &str, user_id: Option<&str>) {
        let mut metadata = HashMap::new();
        if let Some(uid) = user_id {
            metadata.insert(METADATA_USER_ID.to_string(), uid.to_string());
        }
        self.customers.lock().unwrap().insert(
            customer_id.to_string(),
            Customer {
                id: customer_id.to_string(),
                email: None,
                name: None,
                metadata,
                deleted: false,
            },
        );
    }

    /// Insert or replace a subscription by id.
    pub fn add_subscription(&self, sub: Subscription) {
        let mut subs = self.subscriptions.lock().unwrap();
        subs.retain(|s| s.id != sub.id);
        subs.push(sub);
    }

    /// Make every call fail with a 503.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn checkout_calls(&self) -> usize {
        self.checkout_calls.load(Ordering::SeqCst)
    }

    pub fn customer_count(&self) -> usize {
        self.customers.lock().unwrap().len()
    }

    fn check_available(&self) -> BillingResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BillingError::Api {
                status: 503,
                message: "billing provider unavailable".into(),
            });
        }
        Ok(())
    }

    fn not_found(what: &str, id: &str) -> BillingError {
        BillingError::Api {
            status: 404,
            message: format!("No such {}: '{}'", what, id),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl BillingProvider for FakeBillingProvider {
    async fn list_subscriptions(&self, customer_id: &str) -> BillingResult<Vec<Subscription>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.customer.as_deref() == Some(customer_id))
            .cloned()
            .collect())
    }

    async fn get_subscription(&self, subscription_id: &str) -> BillingResult<Subscription> {
        self.check_available()?;
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == subscription_id)
            .cloned()
            .ok_or_else(|| Self::not_found("subscription", subscription_id))
    }

    async fn get_customer(&self, customer_id: &str) -> BillingResult<Customer> {
        self.check_available()?;
        self.customers
            .lock()
            .unwrap()
            .get(customer_id)
            .cloned()
            .ok_or_else(|| Self::not_found("customer", customer_id))
    }

    async fn create_customer(&self, params: CreateCustomerParams<'_>) -> BillingResult<Customer> {
        self.check_available()?;
        let id = self.next_id("cus");
        self.add_customer(&id, Some(params.user_id));
        let mut customers = self.customers.lock().unwrap();
        let customer = customers
            .get_mut(&id)
            .ok_or_else(|| Self::not_found("customer", &id))?;
        customer.email = params.email.map(str::to_string);
        customer.name = params.name.map(str::to_string);
        Ok(customer.clone())
    }

    async fn create_checkout_session(
        &self,
        params: CreateCheckoutParams<'_>,
    ) -> BillingResult<CheckoutSession> {
        self.checkout_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let id = self.next_id("cs");
        Ok(CheckoutSession {
            url: Some(format!("https://checkout.test/{}", id)),
            id,
            customer: Some(params.customer_id.to_string()),
            subscription: None,
            client_reference_id: Some(params.user_id.to_string()),
            metadata: HashMap::from([(
                METADATA_USER_ID.to_string(),
                params.user_id.to_string(),
            )]),
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        _return_url: &str,
    ) -> BillingResult<PortalSession> {
        self.check_available()?;
        let id = self.next_id("bps");
        Ok(PortalSession {
            url: format!("https://portal.test/{}/{}", customer_id, id),
            id,
        })
    }
}
