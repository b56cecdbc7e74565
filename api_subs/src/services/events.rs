use common::error::{AppError, Res};
use serde::Deserialize;

/// Billing events that can change a customer's subscription state.
pub const TRACKED_EVENTS: [&str; 18] = [
    "checkout.session.completed",
    "customer.subscription.created",
    "customer.subscription.updated",
    "customer.subscription.deleted",
    "customer.subscription.paused",
    "customer.subscription.resumed",
    "customer.subscription.pending_update_applied",
    "customer.subscription.pending_update_expired",
    "customer.subscription.trial_will_end",
    "invoice.paid",
    "invoice.payment_failed",
    "invoice.payment_action_required",
    "invoice.upcoming",
    "invoice.marked_uncollectible",
    "invoice.payment_succeeded",
    "payment_intent.succeeded",
    "payment_intent.payment_failed",
    "payment_intent.canceled",
];

#[derive(Debug, Deserialize)]
pub struct BillingEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_: String,
    pub data: BillingEventData,
}

#[derive(Debug, Deserialize)]
pub struct BillingEventData {
    pub object: serde_json::Value,
}

impl BillingEvent {
    pub fn parse(payload: &str) -> Res<Self> {
        serde_json::from_str(payload)
            .map_err(|e| AppError::BadRequest(format!("Malformed billing event: {}", e)))
    }

    pub fn is_tracked(&self) -> bool {
        TRACKED_EVENTS.contains(&self.type_.as_str())
    }

    /// Customer id carried by the event object. Anything other than a string
    /// means the event shape is not what the reconciliation expects.
    pub fn customer_id(&self) -> Res<&str> {
        match self.data.object.get("customer") {
            Some(serde_json::Value::String(id)) => Ok(id.as_str()),
            other => Err(AppError::Internal(format!(
                "Event {} of type {} has no string customer id: {:?}",
                self.id.as_deref().unwrap_or("unknown"),
                self.type_,
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_subscription_invoice_and_payment_intent_events() {
        let event = BillingEvent::parse(
            r#"{"id":"evt_1","type":"customer.subscription.updated","data":{"object":{"customer":"cus_9"}}}"#,
        )
        .unwrap();
        assert!(event.is_tracked());
        assert_eq!(event.customer_id().unwrap(), "cus_9");

        let ignored = BillingEvent::parse(
            r#"{"type":"customer.created","data":{"object":{"customer":"cus_9"}}}"#,
        )
        .unwrap();
        assert!(!ignored.is_tracked());
    }

    #[test]
    fn expanded_customer_object_is_a_shape_error() {
        let event = BillingEvent::parse(
            r#"{"type":"invoice.paid","data":{"object":{"customer":{"id":"cus_9"}}}}"#,
        )
        .unwrap();
        assert!(matches!(event.customer_id(), Err(AppError::Internal(_))));
    }
}
