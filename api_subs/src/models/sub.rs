use std::fmt;

use common::plan::Plan;
use serde::{Deserialize, Serialize};

/// Subscription status as reported by the billing provider, plus `None` for
/// customers without any subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Unpaid,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Paused,
    None,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::None => "none",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<stripe::SubscriptionStatus> for SubscriptionStatus {
    fn from(status: stripe::SubscriptionStatus) -> Self {
        match status.as_str() {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "past_due" => SubscriptionStatus::PastDue,
            "unpaid" => SubscriptionStatus::Unpaid,
            "canceled" => SubscriptionStatus::Canceled,
            "incomplete_expired" => SubscriptionStatus::IncompleteExpired,
            "paused" => SubscriptionStatus::Paused,
            // unknown states are never treated as active
            _ => SubscriptionStatus::Incomplete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethodSummary {
    pub brand: Option<String>,
    pub last4: Option<String>,
}

/// Cached copy of a customer's subscription. Always rebuilt from the billing
/// provider, never from webhook payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSnapshot {
    pub subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    pub price_id: Option<String>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub cancel_at_period_end: bool,
    pub payment_method: Option<PaymentMethodSummary>,
}

impl SubscriptionSnapshot {
    pub fn none() -> Self {
        SubscriptionSnapshot {
            subscription_id: None,
            status: SubscriptionStatus::None,
            price_id: None,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            payment_method: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    pub fn is_none(&self) -> bool {
        self.status == SubscriptionStatus::None
    }

    /// The subscription ended for good and has nothing left to resolve.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Canceled | SubscriptionStatus::IncompleteExpired
        )
    }

    /// No subscription the customer is still bound to, either none at all
    /// or one that already ended.
    pub fn is_lapsed(&self) -> bool {
        self.is_none() || self.is_terminal()
    }
}

/// Hosted checkout the user is redirected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutHandle {
    pub session_id: String,
    pub url: String,
}

/// One line item of a live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionLine {
    pub item_id: String,
    pub price_id: String,
}

/// Result of a plan change request.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanChange {
    /// No subscription yet, the user must complete a hosted checkout.
    Checkout(CheckoutHandle),
    /// Paid plan swapped for another paid plan.
    Switched(Plan),
    /// Subscription cancelled, user is back on the free plan.
    Downgraded,
    /// Nothing to do.
    Unchanged(Plan),
}

/// State after the user returned from the hosted checkout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutCompletion {
    pub plan: Plan,
    pub snapshot: SubscriptionSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// Signature missing or invalid. Nothing was processed.
    Rejected,
    /// Event type outside the tracked set.
    Ignored(String),
    /// Snapshot refreshed for the customer.
    Synced {
        customer_id: String,
        snapshot: SubscriptionSnapshot,
    },
}
