use std::sync::Arc;

use api_subs::services::{cache::SnapshotCache, stripe::BillingProvider};
use common::{
    env_config::BillingConfig,
    error::{AppError, Res},
    plan::{Plan, UNLIMITED, UsageKind},
};
use db::{ledger::UsageLedger, models::user::User};
use uuid::Uuid;

use crate::notifier::Notifier;

/// Admission and accounting of metered actions.
pub struct UsageGate {
    ledger: Arc<dyn UsageLedger>,
    billing: Arc<dyn BillingProvider>,
    cache: Arc<dyn SnapshotCache>,
    notifier: Arc<dyn Notifier>,
    config: BillingConfig,
}

/// Free-plan admission rule. Upload credits are exhausted once the total
/// reaches the limit, messages only once it is exceeded.
pub fn exceeds_free_limit(kind: UsageKind, used: i64, requested: i64, limit: i64) -> bool {
    let total = used.saturating_add(requested);
    match kind {
        UsageKind::UploadCredit => total >= limit,
        UsageKind::Message => total > limit,
    }
}

/// Whether moving from `before` to `after` crosses `threshold` of `limit` upwards.
pub fn crosses_threshold(before: i64, after: i64, limit: i64, threshold: f64) -> bool {
    if limit == UNLIMITED || limit <= 0 {
        return false;
    }
    let fraction = |value: i64| value as f64 / limit as f64;
    fraction(after) >= threshold && fraction(before) < threshold
}

impl UsageGate {
    pub fn new(
        ledger: Arc<dyn UsageLedger>,
        billing: Arc<dyn BillingProvider>,
        cache: Arc<dyn SnapshotCache>,
        notifier: Arc<dyn Notifier>,
        config: BillingConfig,
    ) -> Self {
        UsageGate {
            ledger,
            billing,
            cache,
            notifier,
            config,
        }
    }

    pub fn limit(&self, plan: Plan, kind: UsageKind) -> i64 {
        self.config.limits.limit(plan, kind)
    }

    /// Loads the user and refuses the action when a free user would go over
    /// their allowance. Paid plans are never blocked here.
    pub async fn check_and_admit(
        &self,
        user_id: Uuid,
        kind: UsageKind,
        requested: i64,
    ) -> Res<User> {
        let user = self.ledger.get_user(user_id).await?;

        match user.plan {
            Plan::Free => {
                let limit = self.limit(Plan::Free, kind);
                if exceeds_free_limit(kind, user.used(kind), requested, limit) {
                    log::info!(
                        "User {} refused {} x{} ({}/{})",
                        user_id,
                        kind.label(),
                        requested,
                        user.used(kind),
                        limit
                    );
                    return Err(AppError::LimitReached(format!(
                        "{} limit of the free plan reached",
                        kind.label()
                    )));
                }
            }
            Plan::Starter | Plan::Pro | Plan::Enterprise => {}
        }

        Ok(user)
    }

    /// Adds `amount` to the user's counter and returns the new total.
    ///
    /// Paid usage is forwarded to the metering endpoint and a warning is sent
    /// the first time usage crosses the configured fraction of the limit.
    /// Neither side effect can fail the call.
    pub async fn record(&self, user: &User, kind: UsageKind, amount: i64) -> Res<i64> {
        let after = self.ledger.increment_usage(user.id, kind, amount).await?;
        let before = after - amount;

        if user.plan.is_paid() {
            self.report_metered(user, kind, amount).await;
        }

        let limit = self.limit(user.plan, kind);
        if crosses_threshold(before, after, limit, self.config.warn_threshold) {
            let percent = ((after as f64 / limit as f64) * 100.0).round() as u32;
            if let Err(e) = self.notifier.limit_warning(user, kind, percent).await {
                log::warn!("Limit warning for {} not delivered: {}", user.id, e);
            }
        }

        Ok(after)
    }

    async fn report_metered(&self, user: &User, kind: UsageKind, amount: i64) {
        let customer_id = match self.cache.customer_for_user(user.id).await {
            Ok(Some(customer_id)) => customer_id,
            Ok(None) => {
                log::warn!("Paid user {} has no billing customer", user.id);
                return;
            }
            Err(e) => {
                log::warn!("Billing customer lookup for {} failed: {}", user.id, e);
                return;
            }
        };

        if let Err(e) = self
            .billing
            .report_usage(&customer_id, kind.meter_event(), amount)
            .await
        {
            log::warn!(
                "Metering {} x{} for {} failed: {}",
                kind.meter_event(),
                amount,
                customer_id,
                e
            );
        }
    }
}
