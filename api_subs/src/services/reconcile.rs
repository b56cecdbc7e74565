use std::sync::Arc;

use common::{
    env_config::BillingConfig,
    error::{AppError, Res},
    plan::{BillingItems, Plan},
};
use db::{ledger::UsageLedger, models::user::User};
use uuid::Uuid;

use crate::{
    models::sub::{
        CheckoutCompletion, PlanChange, SubscriptionLine, SubscriptionSnapshot,
        SubscriptionStatus, WebhookOutcome,
    },
    services::{
        cache::SnapshotCache,
        events::BillingEvent,
        stripe::{BillingProvider, verify_webhook},
    },
};

/// How long a plan change may hold the per-user lock before it expires on its own.
const PLAN_CHANGE_LOCK_TTL_MS: u64 = 30_000;

/// Keeps the cached subscription snapshot and the user's plan in line with
/// the billing provider.
pub struct ReconciliationService {
    billing: Arc<dyn BillingProvider>,
    cache: Arc<dyn SnapshotCache>,
    ledger: Arc<dyn UsageLedger>,
    config: BillingConfig,
    webhook_secret: String,
}

impl ReconciliationService {
    pub fn new(
        billing: Arc<dyn BillingProvider>,
        cache: Arc<dyn SnapshotCache>,
        ledger: Arc<dyn UsageLedger>,
        config: BillingConfig,
        webhook_secret: impl Into<String>,
    ) -> Self {
        ReconciliationService {
            billing,
            cache,
            ledger,
            config,
            webhook_secret: webhook_secret.into(),
        }
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    /// Moves the user to `new_plan_id`.
    ///
    /// - no subscription, or one that ended: returns a checkout handle, the plan is set once
    ///   checkout completes; a free target only clears a stale paid plan
    /// - subscription not active: `UnresolvedSubscription`
    /// - active and target free: cancels, plan becomes free only on confirmed cancellation
    /// - active and target paid: remaps the subscription items onto the target plan
    ///
    /// Concurrent changes for the same user are rejected with `Conflict`.
    pub async fn change_plan(&self, user_id: Uuid, new_plan_id: &str) -> Res<PlanChange> {
        let target: Plan = new_plan_id.parse()?;

        let Some(token) = self
            .cache
            .try_lock_plan_change(user_id, PLAN_CHANGE_LOCK_TTL_MS)
            .await?
        else {
            return Err(AppError::Conflict(
                "A plan change is already in progress".to_string(),
            ));
        };

        let result = self.apply_plan_change(user_id, target).await;

        if let Err(e) = self.cache.release_plan_change(user_id, &token).await {
            log::warn!("Failed to release plan change lock of {}: {}", user_id, e);
        }

        result
    }

    async fn apply_plan_change(&self, user_id: Uuid, target: Plan) -> Res<PlanChange> {
        let user = self.ledger.get_user(user_id).await?;
        let customer_id = self.customer_for(&user).await?;
        let snapshot = self
            .cache
            .snapshot(&customer_id)
            .await?
            .unwrap_or_else(SubscriptionSnapshot::none);

        if snapshot.is_lapsed() {
            return match self.config.catalog.items_for(target) {
                None if user.plan.is_paid() => {
                    self.ledger.set_plan(user_id, Plan::Free).await?;
                    Ok(PlanChange::Downgraded)
                }
                None => Ok(PlanChange::Unchanged(user.plan)),
                Some(items) => self.start_checkout(&customer_id, target, items).await,
            };
        }

        if !snapshot.is_active() {
            return Err(AppError::UnresolvedSubscription(format!(
                "Subscription is {}, resolve billing before changing plans",
                snapshot.status
            )));
        }

        let subscription_id = snapshot.subscription_id.clone().ok_or_else(|| {
            AppError::Internal(format!("Active snapshot of {} has no id", customer_id))
        })?;

        match self.config.catalog.items_for(target) {
            None => {
                self.downgrade(user_id, &customer_id, &subscription_id)
                    .await
            }
            Some(items) => {
                if user.plan == target {
                    return Ok(PlanChange::Unchanged(target));
                }
                self.switch(user_id, &customer_id, &subscription_id, target, items)
                    .await
            }
        }
    }

    async fn start_checkout(
        &self,
        customer_id: &str,
        target: Plan,
        items: &BillingItems,
    ) -> Res<PlanChange> {
        let base_url = &self.config.redirect_base_url;
        let success_url = format!("{}/checkout?newPlan={}", base_url, target);
        let cancel_url = format!("{}/dashboard", base_url);

        let handle = self
            .billing
            .create_checkout(customer_id, items, &success_url, &cancel_url)
            .await
            .map_err(|e| match e {
                AppError::CheckoutCreation(_) => e,
                other => {
                    log::error!("Checkout for {} failed: {}", customer_id, other);
                    AppError::CheckoutCreation("Billing provider rejected the checkout".into())
                }
            })?;

        log::info!("Checkout {} started for plan {}", handle.session_id, target);
        Ok(PlanChange::Checkout(handle))
    }

    async fn downgrade(
        &self,
        user_id: Uuid,
        customer_id: &str,
        subscription_id: &str,
    ) -> Res<PlanChange> {
        self.cancel_confirmed(subscription_id).await?;
        self.cache.delete_snapshot(customer_id).await?;
        self.ledger.set_plan(user_id, Plan::Free).await?;
        Ok(PlanChange::Downgraded)
    }

    /// Cancels and fails unless the provider confirms the subscription is cancelled.
    async fn cancel_confirmed(&self, subscription_id: &str) -> Res<()> {
        let status = self
            .billing
            .cancel_subscription(subscription_id)
            .await
            .map_err(|e| match e {
                AppError::CancellationFailed(_) => e,
                other => {
                    log::error!("Cancelling {} failed: {}", subscription_id, other);
                    AppError::CancellationFailed("Billing provider did not cancel".into())
                }
            })?;

        if status != SubscriptionStatus::Canceled {
            log::warn!(
                "Cancellation of {} not confirmed, provider reports {}",
                subscription_id,
                status
            );
            return Err(AppError::CancellationFailed(format!(
                "Subscription is still {}",
                status
            )));
        }
        Ok(())
    }

    async fn switch(
        &self,
        user_id: Uuid,
        customer_id: &str,
        subscription_id: &str,
        target: Plan,
        items: &BillingItems,
    ) -> Res<PlanChange> {
        let lines = self.billing.subscription_items(subscription_id).await?;
        let remapped = self.remap_lines(lines, items)?;

        self.billing
            .update_subscription_items(subscription_id, remapped)
            .await?;
        self.ledger.set_plan(user_id, target).await?;

        if let Err(e) = self.sync_customer(customer_id).await {
            log::warn!("Snapshot refresh after plan switch failed: {}", e);
        }

        Ok(PlanChange::Switched(target))
    }

    /// Points each line at the target plan's item with the same role.
    fn remap_lines(
        &self,
        lines: Vec<SubscriptionLine>,
        items: &BillingItems,
    ) -> Res<Vec<SubscriptionLine>> {
        lines
            .into_iter()
            .map(|line| {
                let role = self.config.catalog.role_of(&line.price_id).ok_or_else(|| {
                    AppError::Internal(format!("Unknown subscription price {}", line.price_id))
                })?;
                Ok(SubscriptionLine {
                    item_id: line.item_id,
                    price_id: items.price_for(role).to_string(),
                })
            })
            .collect()
    }

    /// Processes a billing provider callback.
    ///
    /// Unsigned or forged payloads are rejected without touching any state.
    /// The snapshot is rebuilt from the provider, never from the payload.
    pub async fn handle_webhook_event(
        &self,
        raw_body: &str,
        signature: Option<&str>,
    ) -> Res<WebhookOutcome> {
        let Some(signature) = signature else {
            log::warn!("Billing webhook without signature header");
            return Ok(WebhookOutcome::Rejected);
        };

        if let Err(e) = verify_webhook(raw_body, signature, &self.webhook_secret) {
            log::warn!("Billing webhook rejected: {}", e);
            return Ok(WebhookOutcome::Rejected);
        }

        let event = BillingEvent::parse(raw_body)?;
        if !event.is_tracked() {
            log::debug!("Ignoring billing event {}", event.type_);
            return Ok(WebhookOutcome::Ignored(event.type_));
        }

        let customer_id = event.customer_id()?.to_string();
        let snapshot = self.sync_customer(&customer_id).await?;
        log::info!(
            "Billing event {} synced {} to {}",
            event.type_,
            customer_id,
            snapshot.status
        );

        Ok(WebhookOutcome::Synced {
            customer_id,
            snapshot,
        })
    }

    /// Re-reads the customer's subscription from the provider and overwrites the cache.
    ///
    /// A subscription that ended also moves its owner back to the free plan.
    pub async fn sync_customer(&self, customer_id: &str) -> Res<SubscriptionSnapshot> {
        let snapshot = self.billing.fetch_subscription(customer_id).await?;
        self.cache.put_snapshot(customer_id, &snapshot).await?;
        if snapshot.is_terminal() {
            self.release_lapsed_plan(customer_id, snapshot.status).await?;
        }
        Ok(snapshot)
    }

    async fn release_lapsed_plan(
        &self,
        customer_id: &str,
        status: SubscriptionStatus,
    ) -> Res<()> {
        let Some(user_id) = self.cache.user_for_customer(customer_id).await? else {
            log::warn!("Subscription of {} is {} but its owner is unknown", customer_id, status);
            return Ok(());
        };

        let user = self.ledger.get_user(user_id).await?;
        if user.plan.is_paid() {
            self.ledger.set_plan(user_id, Plan::Free).await?;
            log::info!(
                "User {} back on free, subscription of {} is {}",
                user_id,
                customer_id,
                status
            );
        }
        Ok(())
    }

    /// Billing customer of the user, created on first use.
    pub async fn ensure_customer(&self, user_id: Uuid) -> Res<String> {
        if let Some(customer_id) = self.cache.customer_for_user(user_id).await? {
            return Ok(customer_id);
        }
        let user = self.ledger.get_user(user_id).await?;
        self.customer_for(&user).await
    }

    async fn customer_for(&self, user: &User) -> Res<String> {
        if let Some(customer_id) = self.cache.customer_for_user(user.id).await? {
            return Ok(customer_id);
        }
        let customer_id = self.billing.create_customer(user.id, &user.email).await?;
        self.cache
            .set_customer_for_user(user.id, &customer_id)
            .await?;
        Ok(customer_id)
    }

    /// Return leg of the hosted checkout. The plan is only applied once the
    /// provider reports an active subscription, and it is the plan the
    /// subscription actually bills. `new_plan_id` must agree with it.
    pub async fn complete_checkout(
        &self,
        user_id: Uuid,
        new_plan_id: &str,
    ) -> Res<CheckoutCompletion> {
        let requested: Plan = new_plan_id.parse()?;
        if !requested.is_paid() {
            return Err(AppError::InvalidPlan(new_plan_id.to_string()));
        }

        let customer_id = self
            .cache
            .customer_for_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("No billing customer for user".to_string()))?;
        let snapshot = self.sync_customer(&customer_id).await?;

        let plan = if snapshot.is_active() {
            let billed = snapshot
                .price_id
                .as_deref()
                .and_then(|price_id| self.config.catalog.plan_of(price_id))
                .ok_or_else(|| {
                    AppError::Internal(format!(
                        "Subscription of {} bills no known plan",
                        customer_id
                    ))
                })?;
            if billed != requested {
                log::warn!(
                    "Checkout return for {} asked for {} but {} is billed",
                    user_id,
                    requested,
                    billed
                );
                return Err(AppError::Conflict(format!(
                    "Subscription is for the {} plan, not {}",
                    billed, requested
                )));
            }
            self.ledger.set_plan(user_id, billed).await?;
            billed
        } else {
            log::warn!(
                "Checkout return for {} with subscription {}, plan left unchanged",
                user_id,
                snapshot.status
            );
            self.ledger.get_user(user_id).await?.plan
        };

        Ok(CheckoutCompletion { plan, snapshot })
    }

    /// Cached snapshot of the user, `none` when nothing is known.
    pub async fn current_snapshot(&self, user_id: Uuid) -> Res<SubscriptionSnapshot> {
        let Some(customer_id) = self.cache.customer_for_user(user_id).await? else {
            return Ok(SubscriptionSnapshot::none());
        };
        Ok(self
            .cache
            .snapshot(&customer_id)
            .await?
            .unwrap_or_else(SubscriptionSnapshot::none))
    }

    /// False while the subscription is in a state that needs the user's
    /// attention. Users without a subscription, or whose subscription ended,
    /// are on the free tier and pass.
    pub async fn has_paid_access(&self, user_id: Uuid) -> Res<bool> {
        let snapshot = self.current_snapshot(user_id).await?;
        Ok(snapshot.is_lapsed() || snapshot.is_active())
    }

    /// Cancels any live subscription and forgets the billing customer.
    pub async fn close_account(&self, user_id: Uuid) -> Res<()> {
        let Some(customer_id) = self.cache.customer_for_user(user_id).await? else {
            return Ok(());
        };

        let snapshot = self
            .cache
            .snapshot(&customer_id)
            .await?
            .unwrap_or_else(SubscriptionSnapshot::none);

        if let (false, Some(subscription_id)) =
            (snapshot.is_lapsed(), snapshot.subscription_id.as_deref())
        {
            self.cancel_confirmed(subscription_id).await?;
        }

        self.cache.delete_snapshot(&customer_id).await?;
        self.cache.delete_customer(user_id).await?;
        log::info!("Billing data of {} removed", user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;
    use common::plan::{PlanCatalog, PlanLimitsTable};
    use db::ledger::MockUsageLedger;

    use super::*;
    use crate::{
        models::sub::CheckoutHandle,
        services::{
            cache::MockSnapshotCache,
            stripe::{
                MockBillingProvider,
                tests::{SECRET, sign},
            },
        },
    };

    fn items(plan: &str) -> BillingItems {
        BillingItems {
            base: format!("price_{plan}_base"),
            uploads: format!("price_{plan}_pages"),
            messages: format!("price_{plan}_msgs"),
        }
    }

    fn config() -> BillingConfig {
        BillingConfig {
            limits: PlanLimitsTable::default(),
            catalog: PlanCatalog {
                starter: items("starter"),
                pro: items("pro"),
                enterprise: items("enterprise"),
            },
            warn_threshold: 0.9,
            redirect_base_url: "https://jarvas.test".to_string(),
        }
    }

    fn user(id: Uuid, plan: Plan) -> User {
        let now = Utc::now().naive_utc();
        User {
            id,
            email: "ana@example.pt".to_string(),
            name: "Ana".to_string(),
            plan,
            messages_used: 0,
            credits_used: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn snapshot(status: SubscriptionStatus) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            subscription_id: Some("sub_1".to_string()),
            status,
            price_id: Some("price_starter_base".to_string()),
            current_period_start: Some(1_700_000_000),
            current_period_end: Some(1_702_592_000),
            cancel_at_period_end: false,
            payment_method: None,
        }
    }

    /// Cache mock with a free lock and a known customer.
    fn cache_with(snapshot: Option<SubscriptionSnapshot>) -> MockSnapshotCache {
        let mut cache = MockSnapshotCache::new();
        cache
            .expect_try_lock_plan_change()
            .returning(|_, _| Ok(Some("lock-token".to_string())));
        cache.expect_release_plan_change().returning(|_, _| Ok(()));
        cache
            .expect_customer_for_user()
            .returning(|_| Ok(Some("cus_1".to_string())));
        cache
            .expect_snapshot()
            .returning(move |_| Ok(snapshot.clone()));
        cache
    }

    fn ledger_with(plan: Plan) -> MockUsageLedger {
        let mut ledger = MockUsageLedger::new();
        ledger
            .expect_get_user()
            .returning(move |id| Ok(user(id, plan)));
        ledger
    }

    fn service(
        billing: MockBillingProvider,
        cache: MockSnapshotCache,
        ledger: MockUsageLedger,
    ) -> ReconciliationService {
        ReconciliationService::new(
            Arc::new(billing),
            Arc::new(cache),
            Arc::new(ledger),
            config(),
            SECRET,
        )
    }

    #[tokio::test]
    async fn unknown_plan_is_rejected_before_any_side_effect() {
        let service = service(
            MockBillingProvider::new(),
            MockSnapshotCache::new(),
            MockUsageLedger::new(),
        );
        let result = service.change_plan(Uuid::new_v4(), "platinum").await;
        assert!(matches!(result, Err(AppError::InvalidPlan(_))));
    }

    #[tokio::test]
    async fn free_user_upgrading_gets_checkout_and_keeps_plan() {
        let mut billing = MockBillingProvider::new();
        billing
            .expect_create_checkout()
            .times(1)
            .returning(|_, items, success_url, _| {
                assert_eq!(items.base, "price_pro_base");
                assert!(success_url.ends_with("/checkout?newPlan=pro"));
                Ok(CheckoutHandle {
                    session_id: "cs_1".to_string(),
                    url: "https://checkout.stripe.com/cs_1".to_string(),
                })
            });
        let mut ledger = ledger_with(Plan::Free);
        ledger.expect_set_plan().never();

        let service = service(billing, cache_with(None), ledger);
        let result = service.change_plan(Uuid::new_v4(), "pro").await.unwrap();
        assert!(matches!(result, PlanChange::Checkout(handle) if handle.session_id == "cs_1"));
    }

    #[tokio::test]
    async fn missing_customer_is_created_before_checkout() {
        let mut cache = MockSnapshotCache::new();
        cache
            .expect_try_lock_plan_change()
            .returning(|_, _| Ok(Some("lock-token".to_string())));
        cache.expect_release_plan_change().returning(|_, _| Ok(()));
        cache.expect_customer_for_user().returning(|_| Ok(None));
        cache
            .expect_set_customer_for_user()
            .times(1)
            .returning(|_, _| Ok(()));
        cache.expect_snapshot().returning(|_| Ok(None));

        let mut billing = MockBillingProvider::new();
        billing
            .expect_create_customer()
            .times(1)
            .returning(|_, _| Ok("cus_new".to_string()));
        billing.expect_create_checkout().returning(|_, _, _, _| {
            Ok(CheckoutHandle {
                session_id: "cs_2".to_string(),
                url: "https://checkout.stripe.com/cs_2".to_string(),
            })
        });

        let service = service(billing, cache, ledger_with(Plan::Free));
        let result = service.change_plan(Uuid::new_v4(), "starter").await.unwrap();
        assert!(matches!(result, PlanChange::Checkout(_)));
    }

    #[tokio::test]
    async fn checkout_rejection_is_reported_as_checkout_error() {
        let mut billing = MockBillingProvider::new();
        billing
            .expect_create_checkout()
            .returning(|_, _, _, _| Err(AppError::Internal("stripe down".to_string())));

        let service = service(billing, cache_with(None), ledger_with(Plan::Free));
        let result = service.change_plan(Uuid::new_v4(), "starter").await;
        assert!(matches!(result, Err(AppError::CheckoutCreation(_))));
    }

    #[tokio::test]
    async fn past_due_subscription_blocks_plan_changes() {
        let mut billing = MockBillingProvider::new();
        billing.expect_cancel_subscription().never();
        billing.expect_update_subscription_items().never();
        let mut ledger = ledger_with(Plan::Starter);
        ledger.expect_set_plan().never();

        let service = service(
            billing,
            cache_with(Some(snapshot(SubscriptionStatus::PastDue))),
            ledger,
        );
        let result = service.change_plan(Uuid::new_v4(), "pro").await;
        assert!(matches!(result, Err(AppError::UnresolvedSubscription(_))));
    }

    #[tokio::test]
    async fn confirmed_cancellation_downgrades_to_free() {
        let mut billing = MockBillingProvider::new();
        billing
            .expect_cancel_subscription()
            .times(1)
            .returning(|_| Ok(SubscriptionStatus::Canceled));
        let mut cache = cache_with(Some(snapshot(SubscriptionStatus::Active)));
        cache
            .expect_delete_snapshot()
            .times(1)
            .returning(|_| Ok(()));
        let mut ledger = ledger_with(Plan::Starter);
        ledger
            .expect_set_plan()
            .withf(|_, plan| *plan == Plan::Free)
            .times(1)
            .returning(|_, _| Ok(()));

        let service = service(billing, cache, ledger);
        let result = service.change_plan(Uuid::new_v4(), "free").await.unwrap();
        assert_eq!(result, PlanChange::Downgraded);
    }

    #[tokio::test]
    async fn unconfirmed_cancellation_keeps_plan() {
        let mut billing = MockBillingProvider::new();
        billing
            .expect_cancel_subscription()
            .returning(|_| Ok(SubscriptionStatus::Active));
        let mut cache = cache_with(Some(snapshot(SubscriptionStatus::Active)));
        cache.expect_delete_snapshot().never();
        let mut ledger = ledger_with(Plan::Pro);
        ledger.expect_set_plan().never();

        let service = service(billing, cache, ledger);
        let result = service.change_plan(Uuid::new_v4(), "free").await;
        assert!(matches!(result, Err(AppError::CancellationFailed(_))));
    }

    #[tokio::test]
    async fn paid_switch_remaps_items_by_role_and_sets_plan() {
        let mut billing = MockBillingProvider::new();
        billing.expect_subscription_items().returning(|_| {
            Ok(vec![
                SubscriptionLine {
                    item_id: "si_base".to_string(),
                    price_id: "price_starter_base".to_string(),
                },
                SubscriptionLine {
                    item_id: "si_msgs".to_string(),
                    price_id: "price_starter_msgs".to_string(),
                },
                SubscriptionLine {
                    item_id: "si_pages".to_string(),
                    price_id: "price_starter_pages".to_string(),
                },
            ])
        });
        billing
            .expect_update_subscription_items()
            .times(1)
            .returning(|_, lines| {
                assert_eq!(
                    lines,
                    vec![
                        SubscriptionLine {
                            item_id: "si_base".to_string(),
                            price_id: "price_enterprise_base".to_string(),
                        },
                        SubscriptionLine {
                            item_id: "si_msgs".to_string(),
                            price_id: "price_enterprise_msgs".to_string(),
                        },
                        SubscriptionLine {
                            item_id: "si_pages".to_string(),
                            price_id: "price_enterprise_pages".to_string(),
                        },
                    ]
                );
                Ok(())
            });
        billing
            .expect_fetch_subscription()
            .returning(|_| Ok(snapshot(SubscriptionStatus::Active)));

        let mut cache = cache_with(Some(snapshot(SubscriptionStatus::Active)));
        cache.expect_put_snapshot().returning(|_, _| Ok(()));
        let mut ledger = ledger_with(Plan::Starter);
        ledger
            .expect_set_plan()
            .withf(|_, plan| *plan == Plan::Enterprise)
            .times(1)
            .returning(|_, _| Ok(()));

        let service = service(billing, cache, ledger);
        let result = service
            .change_plan(Uuid::new_v4(), "enterprise")
            .await
            .unwrap();
        assert_eq!(result, PlanChange::Switched(Plan::Enterprise));
    }

    #[tokio::test]
    async fn held_lock_rejects_concurrent_change() {
        let mut cache = MockSnapshotCache::new();
        cache
            .expect_try_lock_plan_change()
            .returning(|_, _| Ok(None));
        cache.expect_release_plan_change().never();

        let service = service(MockBillingProvider::new(), cache, MockUsageLedger::new());
        let result = service.change_plan(Uuid::new_v4(), "pro").await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    const INVOICE_PAID: &str =
        r#"{"id":"evt_1","type":"invoice.paid","data":{"object":{"customer":"cus_1","subscription":"sub_stale"}}}"#;

    #[tokio::test]
    async fn replayed_webhook_leaves_same_snapshot() {
        let stored: Arc<Mutex<Vec<SubscriptionSnapshot>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = stored.clone();

        let mut billing = MockBillingProvider::new();
        billing
            .expect_fetch_subscription()
            .times(2)
            .returning(|_| Ok(snapshot(SubscriptionStatus::Active)));
        let mut cache = MockSnapshotCache::new();
        cache.expect_put_snapshot().returning(move |_, snap| {
            sink.lock().unwrap().push(snap.clone());
            Ok(())
        });

        let service = service(billing, cache, MockUsageLedger::new());
        let header = sign(INVOICE_PAID, SECRET);
        let first = service
            .handle_webhook_event(INVOICE_PAID, Some(&header))
            .await
            .unwrap();
        let second = service
            .handle_webhook_event(INVOICE_PAID, Some(&header))
            .await
            .unwrap();

        assert_eq!(first, second);
        let stored = stored.lock().unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0], stored[1]);
    }

    #[tokio::test]
    async fn tampered_webhook_is_rejected_without_mutation() {
        let mut billing = MockBillingProvider::new();
        billing.expect_fetch_subscription().never();
        let mut cache = MockSnapshotCache::new();
        cache.expect_put_snapshot().never();

        let service = service(billing, cache, MockUsageLedger::new());
        let header = sign(INVOICE_PAID, SECRET);
        let tampered = INVOICE_PAID.replace("cus_1", "cus_attacker");

        let outcome = service
            .handle_webhook_event(&tampered, Some(&header))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Rejected);

        let unsigned = service
            .handle_webhook_event(INVOICE_PAID, None)
            .await
            .unwrap();
        assert_eq!(unsigned, WebhookOutcome::Rejected);
    }

    #[tokio::test]
    async fn untracked_events_are_ignored() {
        let mut billing = MockBillingProvider::new();
        billing.expect_fetch_subscription().never();
        let service = service(billing, MockSnapshotCache::new(), MockUsageLedger::new());

        let payload = r#"{"type":"customer.created","data":{"object":{"customer":"cus_1"}}}"#;
        let outcome = service
            .handle_webhook_event(payload, Some(&sign(payload, SECRET)))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored("customer.created".to_string()));
    }

    #[tokio::test]
    async fn non_string_customer_is_an_error() {
        let service = service(
            MockBillingProvider::new(),
            MockSnapshotCache::new(),
            MockUsageLedger::new(),
        );
        let payload = r#"{"type":"invoice.paid","data":{"object":{"customer":42}}}"#;
        let result = service
            .handle_webhook_event(payload, Some(&sign(payload, SECRET)))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn checkout_return_applies_plan_only_when_active() {
        let mut billing = MockBillingProvider::new();
        billing
            .expect_fetch_subscription()
            .returning(|_| Ok(snapshot(SubscriptionStatus::Incomplete)));
        let mut cache = MockSnapshotCache::new();
        cache
            .expect_customer_for_user()
            .returning(|_| Ok(Some("cus_1".to_string())));
        cache.expect_put_snapshot().returning(|_, _| Ok(()));
        let mut ledger = ledger_with(Plan::Free);
        ledger.expect_set_plan().never();

        let service = service(billing, cache, ledger);
        let completion = service
            .complete_checkout(Uuid::new_v4(), "pro")
            .await
            .unwrap();
        assert_eq!(completion.plan, Plan::Free);
        assert_eq!(completion.snapshot.status, SubscriptionStatus::Incomplete);
    }

    #[tokio::test]
    async fn lock_is_released_with_the_token_it_was_taken_with() {
        let mut cache = MockSnapshotCache::new();
        cache
            .expect_try_lock_plan_change()
            .returning(|_, _| Ok(Some("token-a".to_string())));
        cache
            .expect_release_plan_change()
            .withf(|_, token| token == "token-a")
            .times(1)
            .returning(|_, _| Ok(()));
        cache
            .expect_customer_for_user()
            .returning(|_| Ok(Some("cus_1".to_string())));
        cache.expect_snapshot().returning(|_| Ok(None));

        let service = service(MockBillingProvider::new(), cache, ledger_with(Plan::Free));
        let result = service.change_plan(Uuid::new_v4(), "free").await.unwrap();
        assert_eq!(result, PlanChange::Unchanged(Plan::Free));
    }

    #[tokio::test]
    async fn ended_subscription_can_be_replaced_through_checkout() {
        for status in [SubscriptionStatus::Canceled, SubscriptionStatus::IncompleteExpired] {
            let mut billing = MockBillingProvider::new();
            billing.expect_cancel_subscription().never();
            billing
                .expect_create_checkout()
                .times(1)
                .returning(|_, items, _, _| {
                    assert_eq!(items.base, "price_pro_base");
                    Ok(CheckoutHandle {
                        session_id: "cs_again".to_string(),
                        url: "https://checkout.stripe.com/cs_again".to_string(),
                    })
                });

            let service = service(
                billing,
                cache_with(Some(snapshot(status))),
                ledger_with(Plan::Pro),
            );
            let result = service.change_plan(Uuid::new_v4(), "pro").await.unwrap();
            assert!(matches!(result, PlanChange::Checkout(handle) if handle.session_id == "cs_again"));
        }
    }

    #[tokio::test]
    async fn moving_to_free_after_cancellation_clears_stale_plan() {
        let mut billing = MockBillingProvider::new();
        billing.expect_cancel_subscription().never();
        let mut ledger = ledger_with(Plan::Pro);
        ledger
            .expect_set_plan()
            .withf(|_, plan| *plan == Plan::Free)
            .times(1)
            .returning(|_, _| Ok(()));

        let service = service(
            billing,
            cache_with(Some(snapshot(SubscriptionStatus::Canceled))),
            ledger,
        );
        let result = service.change_plan(Uuid::new_v4(), "free").await.unwrap();
        assert_eq!(result, PlanChange::Downgraded);
    }

    #[tokio::test]
    async fn ended_subscription_keeps_free_tier_access() {
        let service = service(
            MockBillingProvider::new(),
            cache_with(Some(snapshot(SubscriptionStatus::Canceled))),
            MockUsageLedger::new(),
        );
        assert!(service.has_paid_access(Uuid::new_v4()).await.unwrap());

        let service = service_past_due();
        assert!(!service.has_paid_access(Uuid::new_v4()).await.unwrap());
    }

    fn service_past_due() -> ReconciliationService {
        service(
            MockBillingProvider::new(),
            cache_with(Some(snapshot(SubscriptionStatus::PastDue))),
            MockUsageLedger::new(),
        )
    }

    #[tokio::test]
    async fn deleted_subscription_webhook_moves_owner_to_free() {
        let owner = Uuid::new_v4();
        let payload = r#"{"type":"customer.subscription.deleted","data":{"object":{"customer":"cus_1"}}}"#;

        let mut billing = MockBillingProvider::new();
        billing
            .expect_fetch_subscription()
            .returning(|_| Ok(snapshot(SubscriptionStatus::Canceled)));
        let mut cache = MockSnapshotCache::new();
        cache.expect_put_snapshot().times(1).returning(|_, _| Ok(()));
        cache
            .expect_user_for_customer()
            .returning(move |_| Ok(Some(owner)));
        let mut ledger = ledger_with(Plan::Pro);
        ledger
            .expect_set_plan()
            .withf(move |id, plan| *id == owner && *plan == Plan::Free)
            .times(1)
            .returning(|_, _| Ok(()));

        let service = service(billing, cache, ledger);
        let outcome = service
            .handle_webhook_event(payload, Some(&sign(payload, SECRET)))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            WebhookOutcome::Synced { snapshot, .. } if snapshot.status == SubscriptionStatus::Canceled
        ));
    }

    fn checkout_return_service(ledger: MockUsageLedger) -> ReconciliationService {
        let mut billing = MockBillingProvider::new();
        billing
            .expect_fetch_subscription()
            .returning(|_| Ok(snapshot(SubscriptionStatus::Active)));
        let mut cache = MockSnapshotCache::new();
        cache
            .expect_customer_for_user()
            .returning(|_| Ok(Some("cus_1".to_string())));
        cache.expect_put_snapshot().returning(|_, _| Ok(()));
        service(billing, cache, ledger)
    }

    #[tokio::test]
    async fn checkout_return_cannot_claim_a_plan_that_is_not_billed() {
        let mut ledger = ledger_with(Plan::Starter);
        ledger.expect_set_plan().never();

        let service = checkout_return_service(ledger);
        let result = service.complete_checkout(Uuid::new_v4(), "enterprise").await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn checkout_return_applies_the_billed_plan() {
        let mut ledger = ledger_with(Plan::Free);
        ledger
            .expect_set_plan()
            .withf(|_, plan| *plan == Plan::Starter)
            .times(1)
            .returning(|_, _| Ok(()));

        let service = checkout_return_service(ledger);
        let completion = service
            .complete_checkout(Uuid::new_v4(), "starter")
            .await
            .unwrap();
        assert_eq!(completion.plan, Plan::Starter);
    }

    #[tokio::test]
    async fn account_closure_requires_confirmed_cancellation() {
        let mut billing = MockBillingProvider::new();
        billing
            .expect_cancel_subscription()
            .returning(|_| Ok(SubscriptionStatus::PastDue));
        let mut cache = cache_with(Some(snapshot(SubscriptionStatus::Active)));
        cache.expect_delete_customer().never();

        let service = service(billing, cache, MockUsageLedger::new());
        let result = service.close_account(Uuid::new_v4()).await;
        assert!(matches!(result, Err(AppError::CancellationFailed(_))));
    }
}
