use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, post, web};

use crate::{
    dtos::sub::WebhookAck,
    models::sub::WebhookOutcome,
    services::reconcile::ReconciliationService,
};

/// Billing provider callback.
///
/// Always acknowledges with `{"received": true}`, so the provider does not
/// retry events that were rejected, ignored or failed here. Failures are logged.
#[post("/webhook")]
pub async fn post_webhook(
    req: HttpRequest,
    body: web::Bytes,
    service: web::Data<Arc<ReconciliationService>>,
) -> HttpResponse {
    let signature = req
        .headers()
        .get("Stripe-Signature")
        .and_then(|value| value.to_str().ok());

    match std::str::from_utf8(&body) {
        Ok(payload) => match service.handle_webhook_event(payload, signature).await {
            Ok(WebhookOutcome::Synced { customer_id, .. }) => {
                log::debug!("Webhook processed for {}", customer_id)
            }
            Ok(outcome) => log::debug!("Webhook not processed: {:?}", outcome),
            Err(e) => log::error!("Webhook processing failed: {}", e),
        },
        Err(e) => log::error!("Webhook body is not UTF-8: {}", e),
    }

    HttpResponse::Ok().json(WebhookAck { received: true })
}
