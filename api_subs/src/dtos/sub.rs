use common::plan::Plan;
use serde::{Deserialize, Serialize};

use crate::models::sub::PlanChange;

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub plan: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ChangePlanResponse {
    Checkout { url: String, session_id: String },
    Switched { plan: Plan },
    Downgraded { plan: Plan },
    Unchanged { plan: Plan },
}

impl From<PlanChange> for ChangePlanResponse {
    fn from(change: PlanChange) -> Self {
        match change {
            PlanChange::Checkout(handle) => ChangePlanResponse::Checkout {
                url: handle.url,
                session_id: handle.session_id,
            },
            PlanChange::Switched(plan) => ChangePlanResponse::Switched { plan },
            PlanChange::Downgraded => ChangePlanResponse::Downgraded { plan: Plan::Free },
            PlanChange::Unchanged(plan) => ChangePlanResponse::Unchanged { plan },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckoutCompleteQuery {
    #[serde(rename = "newPlan")]
    pub new_plan: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sub::CheckoutHandle;

    #[test]
    fn checkout_response_carries_redirect() {
        let response: ChangePlanResponse = PlanChange::Checkout(CheckoutHandle {
            session_id: "cs_1".into(),
            url: "https://checkout.stripe.com/cs_1".into(),
        })
        .into();
        let json = serde_json::to_value(response).unwrap();
        assert_eq!(json["status"], "checkout");
        assert_eq!(json["url"], "https://checkout.stripe.com/cs_1");
    }

    #[test]
    fn downgrade_reports_free_plan() {
        let json = serde_json::to_value(ChangePlanResponse::from(PlanChange::Downgraded)).unwrap();
        assert_eq!(json, serde_json::json!({"status": "downgraded", "plan": "free"}));
    }
}
