use async_trait::async_trait;
use common::{
    error::{AppError, Res},
    plan::BillingItems,
    stripe::STRIPE_API_BASE,
};
use mockall::automock;
use stripe::{
    CancelSubscription, CheckoutSession, CheckoutSessionMode, Client, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CustomerId, ListSubscriptions, Subscription, SubscriptionId,
    SubscriptionStatusFilter, UpdateSubscription, UpdateSubscriptionItems, Webhook, WebhookError,
};
use uuid::Uuid;

use crate::models::sub::{
    CheckoutHandle, PaymentMethodSummary, SubscriptionLine, SubscriptionSnapshot,
    SubscriptionStatus,
};

/// Operations the reconciliation flow needs from the billing provider.
#[automock]
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Creates a customer and returns its id.
    async fn create_customer(&self, user_id: Uuid, email: &str) -> Res<String>;

    /// Starts a hosted subscription checkout for the given plan items.
    async fn create_checkout(
        &self,
        customer_id: &str,
        items: &BillingItems,
        success_url: &str,
        cancel_url: &str,
    ) -> Res<CheckoutHandle>;

    /// Current subscription of the customer, or a `none` snapshot.
    async fn fetch_subscription(&self, customer_id: &str) -> Res<SubscriptionSnapshot>;

    /// Cancels immediately and returns the status the provider reports afterwards.
    async fn cancel_subscription(&self, subscription_id: &str) -> Res<SubscriptionStatus>;

    async fn subscription_items(&self, subscription_id: &str) -> Res<Vec<SubscriptionLine>>;

    async fn update_subscription_items(
        &self,
        subscription_id: &str,
        lines: Vec<SubscriptionLine>,
    ) -> Res<()>;

    /// Sends a billing meter event for the customer.
    async fn report_usage(&self, customer_id: &str, event_name: &str, value: i64) -> Res<()>;
}

pub struct StripeBilling {
    client: Client,
    http: reqwest::Client,
    secret_key: String,
}

impl StripeBilling {
    pub fn new(secret_key: &str) -> Self {
        StripeBilling {
            client: common::stripe::create_client(secret_key),
            http: reqwest::Client::new(),
            secret_key: secret_key.to_string(),
        }
    }
}

fn parse_subscription_id(subscription_id: &str) -> Res<SubscriptionId> {
    subscription_id.parse::<SubscriptionId>().map_err(|e| {
        AppError::Internal(format!(
            "Failed to parse subscription id: {}. {}",
            subscription_id, e
        ))
    })
}

fn parse_customer_id(customer_id: &str) -> Res<CustomerId> {
    customer_id.parse::<CustomerId>().map_err(|e| {
        AppError::Internal(format!(
            "Failed to parse customer id: {}. {}",
            customer_id, e
        ))
    })
}

/// Builds the cached snapshot from a provider subscription.
fn to_snapshot(subscription: &Subscription) -> SubscriptionSnapshot {
    let payment_method = subscription
        .default_payment_method
        .as_ref()
        .and_then(|pm| pm.as_object())
        .map(|pm| PaymentMethodSummary {
            brand: pm.card.as_ref().map(|card| card.brand.clone()),
            last4: pm.card.as_ref().map(|card| card.last4.clone()),
        });

    SubscriptionSnapshot {
        subscription_id: Some(subscription.id.to_string()),
        status: subscription.status.clone().into(),
        price_id: subscription
            .items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|price| price.id.to_string()),
        current_period_start: Some(subscription.current_period_start),
        current_period_end: Some(subscription.current_period_end),
        cancel_at_period_end: subscription.cancel_at_period_end,
        payment_method,
    }
}

#[async_trait]
impl BillingProvider for StripeBilling {
    async fn create_customer(&self, user_id: Uuid, email: &str) -> Res<String> {
        let customer = common::stripe::create_customer(&self.client, user_id, email).await?;
        log::info!("Created billing customer {} for user {}", customer.id, user_id);
        Ok(customer.id.to_string())
    }

    async fn create_checkout(
        &self,
        customer_id: &str,
        items: &BillingItems,
        success_url: &str,
        cancel_url: &str,
    ) -> Res<CheckoutHandle> {
        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.customer = Some(parse_customer_id(customer_id)?);
        params.success_url = Some(success_url);
        params.cancel_url = Some(cancel_url);
        // metered prices must not carry a quantity
        params.line_items = Some(vec![
            CreateCheckoutSessionLineItems {
                price: Some(items.base.clone()),
                quantity: Some(1),
                ..Default::default()
            },
            CreateCheckoutSessionLineItems {
                price: Some(items.uploads.clone()),
                ..Default::default()
            },
            CreateCheckoutSessionLineItems {
                price: Some(items.messages.clone()),
                ..Default::default()
            },
        ]);

        let session = CheckoutSession::create(&self.client, params)
            .await
            .map_err(|e| {
                log::error!("Checkout creation failed for {}: {}", customer_id, e);
                AppError::CheckoutCreation("Billing provider rejected the checkout".to_string())
            })?;

        let url = session.url.ok_or_else(|| {
            AppError::CheckoutCreation("Checkout session has no redirect url".to_string())
        })?;

        Ok(CheckoutHandle {
            session_id: session.id.to_string(),
            url,
        })
    }

    async fn fetch_subscription(&self, customer_id: &str) -> Res<SubscriptionSnapshot> {
        let mut params = ListSubscriptions::new();
        params.customer = Some(parse_customer_id(customer_id)?);
        params.status = Some(SubscriptionStatusFilter::All);
        params.limit = Some(1);
        params.expand = &["data.default_payment_method"];

        let subscriptions = Subscription::list(&self.client, &params).await?;

        Ok(subscriptions
            .data
            .first()
            .map(to_snapshot)
            .unwrap_or_else(SubscriptionSnapshot::none))
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Res<SubscriptionStatus> {
        let id = parse_subscription_id(subscription_id)?;
        let subscription = Subscription::cancel(&self.client, &id, CancelSubscription::new())
            .await
            .map_err(|e| {
                log::error!("Cancelling subscription {} failed: {}", subscription_id, e);
                AppError::CancellationFailed("Billing provider did not cancel".to_string())
            })?;
        Ok(subscription.status.into())
    }

    async fn subscription_items(&self, subscription_id: &str) -> Res<Vec<SubscriptionLine>> {
        let id = parse_subscription_id(subscription_id)?;
        let subscription = Subscription::retrieve(&self.client, &id, &[]).await?;

        Ok(subscription
            .items
            .data
            .iter()
            .filter_map(|item| {
                item.price.as_ref().map(|price| SubscriptionLine {
                    item_id: item.id.to_string(),
                    price_id: price.id.to_string(),
                })
            })
            .collect())
    }

    async fn update_subscription_items(
        &self,
        subscription_id: &str,
        lines: Vec<SubscriptionLine>,
    ) -> Res<()> {
        let id = parse_subscription_id(subscription_id)?;
        let items = lines
            .into_iter()
            .map(|line| UpdateSubscriptionItems {
                id: Some(line.item_id),
                price: Some(line.price_id),
                ..Default::default()
            })
            .collect();
        let params = UpdateSubscription {
            items: Some(items),
            ..Default::default()
        };

        Subscription::update(&self.client, &id, params).await?;
        Ok(())
    }

    async fn report_usage(&self, customer_id: &str, event_name: &str, value: i64) -> Res<()> {
        let body = [
            ("event_name", event_name.to_string()),
            ("payload[stripe_customer_id]", customer_id.to_string()),
            ("payload[value]", value.to_string()),
        ];

        let response = self
            .http
            .post(format!("{}/v1/billing/meter_events", STRIPE_API_BASE))
            .bearer_auth(&self.secret_key)
            .form(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Meter event {} rejected ({}): {}",
                event_name, status, text
            )));
        }

        Ok(())
    }
}

/// Checks the `Stripe-Signature` header against the payload.
///
/// Event types the stripe crate cannot deserialize still count as verified,
/// since parsing happens after the signature check succeeded.
pub fn verify_webhook(payload: &str, signature: &str, webhook_secret: &str) -> Res<()> {
    match Webhook::construct_event(payload, signature, webhook_secret) {
        Ok(_) => Ok(()),
        Err(WebhookError::BadParse(e)) => {
            log::debug!("Webhook verified but not parsed by stripe types: {}", e);
            Ok(())
        }
        Err(
            e @ (WebhookError::BadKey
            | WebhookError::BadSignature
            | WebhookError::BadTimestamp(_)
            | WebhookError::BadHeader(_)),
        ) => Err(AppError::Unauthorized(format!("Webhook Error: {}", e))),
    }
}
