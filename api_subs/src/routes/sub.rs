use std::sync::Arc;

use actix_web::{Responder, get, post, web};
use common::{error::Res, http::Success, jwt::JwtClaims};

use crate::{
    dtos::sub::{ChangePlanRequest, ChangePlanResponse, CheckoutCompleteQuery},
    services::reconcile::ReconciliationService,
};

/// Changes the authenticated user's plan.
///
/// # Input
/// - `claims`: JWT claims of the caller
/// - `req`: JSON body with the target plan (`free`, `starter`, `pro` or `enterprise`)
/// - `service`: reconciliation service
///
/// # Output
/// - `{"status": "checkout", "url", "session_id"}` when the user has no subscription yet
/// - `{"status": "switched" | "downgraded" | "unchanged", "plan"}` otherwise
/// - 400 `invalid_plan`, 409 `unresolved_subscription` or `conflict`,
///   502 `checkout_creation_failed` or `cancellation_failed`
///
/// # Frontend Example
/// ```javascript
/// const response = await fetch('/api/app/sub/change-plan', {
///   method: 'POST',
///   headers: {
///     'Authorization': `Bearer ${token}`,
///     'Content-Type': 'application/json'
///   },
///   body: JSON.stringify({ plan: 'pro' })
/// });
///
/// const result = await response.json();
/// if (result.status === 'checkout') {
///   window.location.href = result.url;
/// }
/// ```
#[post("/change-plan")]
pub async fn post_change_plan(
    claims: web::ReqData<JwtClaims>,
    req: web::Json<ChangePlanRequest>,
    service: web::Data<Arc<ReconciliationService>>,
) -> Res<impl Responder> {
    let change = service.change_plan(claims.user_id, &req.plan).await?;
    Success::ok(ChangePlanResponse::from(change))
}

/// Return leg of the hosted checkout. Refreshes the subscription snapshot and
/// applies the plan once the subscription is active.
///
/// # Input
/// - `query.newPlan`: plan the checkout was started for
///
/// # Output
/// - `{"plan", "snapshot"}` with the resulting plan and subscription state
/// - `409` when the active subscription bills a different plan than `newPlan`
#[get("/checkout/complete")]
pub async fn get_checkout_complete(
    claims: web::ReqData<JwtClaims>,
    query: web::Query<CheckoutCompleteQuery>,
    service: web::Data<Arc<ReconciliationService>>,
) -> Res<impl Responder> {
    let completion = service
        .complete_checkout(claims.user_id, &query.new_plan)
        .await?;
    Success::ok(completion)
}

/// Cached subscription snapshot of the caller. `status` is `none` when the
/// user never subscribed.
#[get("/current")]
pub async fn get_current(
    claims: web::ReqData<JwtClaims>,
    service: web::Data<Arc<ReconciliationService>>,
) -> Res<impl Responder> {
    let snapshot = service.current_snapshot(claims.user_id).await?;
    Success::ok(snapshot)
}
