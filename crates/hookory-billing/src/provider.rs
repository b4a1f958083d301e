//! Billing provider seam.

use async_trait::async_trait;

use crate::error::BillingResult;
use crate::types::{CheckoutSession, Customer, PortalSession, Subscription};

#[derive(Debug, Clone, Copy)]
pub struct CreateCustomerParams<'a> {
    pub email: Option<&'a str>,
    pub name: Option<&'a str>,
    /// Identity id, stored in the customer's metadata.
    pub user_id: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub struct CreateCheckoutParams<'a> {
    pub customer_id: &'a str,
    pub user_id: &'a str,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
}

/// Operations the backend needs from the billing provider.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Recent subscriptions of a customer in any status.
    async fn list_subscriptions(&self, customer_id: &str) -> BillingResult<Vec<Subscription>>;

    async fn get_subscription(&self, subscription_id: &str) -> BillingResult<Subscription>;

    async fn get_customer(&self, customer_id: &str) -> BillingResult<Customer>;

    async fn create_customer(&self, params: CreateCustomerParams<'_>) -> BillingResult<Customer>;

    /// Subscription checkout for the creator plan.
    async fn create_checkout_session(
        &self,
        params: CreateCheckoutParams<'_>,
    ) -> BillingResult<CheckoutSession>;

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> BillingResult<PortalSession>;
}
