use std::{future::Future, pin::Pin, rc::Rc, sync::Arc};

use actix_web::{
    Error, web,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use api_subs::services::reconcile::ReconciliationService;
use common::{error::AppError, jwt};

/// Blocks metered routes while the caller's subscription needs attention
/// (past due, unpaid, incomplete). Must run after the bearer middleware.
pub struct EntitlementGuard;

impl<S, B> Transform<S, ServiceRequest> for EntitlementGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<actix_web::body::BoxBody>;
    type Error = Error;
    type Transform = EntitlementGuardService<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(EntitlementGuardService {
            service: Rc::new(service),
        }))
    }
}

pub struct EntitlementGuardService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for EntitlementGuardService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<actix_web::body::BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let srv = Rc::clone(&self.service);

        Box::pin(async move {
            let claims = match jwt::get_jwt_claims(&req) {
                Ok(claims) => claims,
                Err(e) => return Ok(req.error_response(e)),
            };

            let Some(reconciliation) = req
                .app_data::<web::Data<Arc<ReconciliationService>>>()
                .cloned()
            else {
                log::error!("Reconciliation service missing from app data");
                return Ok(req.error_response(AppError::Internal(
                    "Reconciliation service not configured".to_string(),
                )));
            };

            match reconciliation.has_paid_access(claims.user_id).await {
                Ok(true) => srv.call(req).await.map(|res| res.map_into_boxed_body()),
                Ok(false) => {
                    log::info!("User {} blocked by subscription state", claims.user_id);
                    Ok(req.error_response(AppError::UnresolvedSubscription(
                        "Update your payment details to keep using Jarvas".to_string(),
                    )))
                }
                Err(e) => Ok(req.error_response(e)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use actix_web::{App, HttpMessage, HttpResponse, http::StatusCode, test};
    use common::{
        env_config::BillingConfig,
        jwt::JwtClaims,
        plan::{BillingItems, PlanCatalog, PlanLimitsTable},
    };
    use db::ledger::MockUsageLedger;
    use uuid::Uuid;

    use super::*;
    use api_subs::{
        models::sub::{SubscriptionSnapshot, SubscriptionStatus},
        services::{cache::MockSnapshotCache, stripe::MockBillingProvider},
    };

    fn reconciliation(status: Option<SubscriptionStatus>) -> Arc<ReconciliationService> {
        let mut cache = MockSnapshotCache::new();
        cache
            .expect_customer_for_user()
            .returning(|_| Ok(Some("cus_1".into())));
        cache.expect_snapshot().returning(move |_| {
            Ok(status.map(|status| SubscriptionSnapshot {
                status,
                ..SubscriptionSnapshot::none()
            }))
        });

        let items = || BillingItems {
            base: "b".into(),
            uploads: "u".into(),
            messages: "m".into(),
        };
        Arc::new(ReconciliationService::new(
            Arc::new(MockBillingProvider::new()),
            Arc::new(cache),
            Arc::new(MockUsageLedger::new()),
            BillingConfig {
                limits: PlanLimitsTable::default(),
                catalog: PlanCatalog {
                    starter: items(),
                    pro: items(),
                    enterprise: items(),
                },
                warn_threshold: 0.9,
                redirect_base_url: "http://localhost:3000".into(),
            },
            "whsec_test_secret",
        ))
    }

    async fn status_for(snapshot: Option<SubscriptionStatus>, authenticated: bool) -> StatusCode {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(reconciliation(snapshot)))
                .service(
                    web::scope("/app")
                        .wrap(EntitlementGuard)
                        .route("/chat", web::post().to(HttpResponse::Ok)),
                ),
        )
        .await;

        let req = test::TestRequest::post().uri("/app/chat").to_request();
        if authenticated {
            req.extensions_mut().insert(JwtClaims {
                user_id: Uuid::new_v4(),
                exp: usize::MAX,
            });
        }
        test::call_service(&app, req).await.status()
    }

    #[actix_web::test]
    async fn active_and_absent_subscriptions_pass() {
        assert_eq!(status_for(Some(SubscriptionStatus::Active), true).await, StatusCode::OK);
        assert_eq!(status_for(None, true).await, StatusCode::OK);
    }

    #[actix_web::test]
    async fn ended_subscription_falls_back_to_free_access() {
        assert_eq!(status_for(Some(SubscriptionStatus::Canceled), true).await, StatusCode::OK);
        assert_eq!(
            status_for(Some(SubscriptionStatus::IncompleteExpired), true).await,
            StatusCode::OK
        );
    }

    #[actix_web::test]
    async fn past_due_subscription_is_blocked() {
        assert_eq!(
            status_for(Some(SubscriptionStatus::PastDue), true).await,
            StatusCode::CONFLICT
        );
    }

    #[actix_web::test]
    async fn missing_claims_are_unauthorized() {
        assert_eq!(
            status_for(Some(SubscriptionStatus::Active), false).await,
            StatusCode::UNAUTHORIZED
        );
    }
}
