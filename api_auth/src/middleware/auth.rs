use std::{future::Future, pin::Pin, rc::Rc};

use actix_web::{
    Error, HttpMessage,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use common::{error::AppError, jwt};

/// Validates the bearer token and places its claims on the request.
pub struct AuthMiddleware {
    jwt_secret: Rc<String>,
}

impl AuthMiddleware {
    pub fn new(jwt_secret: String) -> Self {
        AuthMiddleware {
            jwt_secret: Rc::new(jwt_secret),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<actix_web::body::BoxBody>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AuthMiddlewareService {
            service: Rc::new(service),
            jwt_secret: Rc::clone(&self.jwt_secret),
        }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: Rc<S>,
    jwt_secret: Rc<String>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
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

        let claims = match jwt::bearer_token(&req) {
            Some(token) => jwt::validate_jwt(&token, &self.jwt_secret),
            None => Err(AppError::Unauthorized(
                "No authorization token provided".to_string(),
            )),
        };

        Box::pin(async move {
            match claims {
                Ok(claims) => {
                    req.extensions_mut().insert(claims);
                    srv.call(req).await.map(|res| res.map_into_boxed_body())
                }
                Err(e) => {
                    log::debug!("Rejected {} {}: {}", req.method(), req.path(), e);
                    Ok(req.error_response(e))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use actix_web::{App, HttpResponse, http::StatusCode, test, web};
    use common::{
        env_config::JwtConfig,
        jwt::{JwtClaims, generate_jwt},
    };
    use uuid::Uuid;

    use super::*;

    const SECRET: &str = "test-secret";

    async fn whoami(claims: web::ReqData<JwtClaims>) -> HttpResponse {
        HttpResponse::Ok().body(claims.user_id.to_string())
    }

    async fn call(header: Option<String>) -> ServiceResponse {
        let app = test::init_service(
            App::new().service(
                web::scope("/app")
                    .wrap(AuthMiddleware::new(SECRET.to_string()))
                    .route("/whoami", web::get().to(whoami)),
            ),
        )
        .await;

        let mut req = test::TestRequest::get().uri("/app/whoami");
        if let Some(value) = header {
            req = req.insert_header(("Authorization", value));
        }
        test::call_service(&app, req.to_request()).await
    }

    #[actix_web::test]
    async fn valid_token_reaches_the_handler() {
        let user_id = Uuid::new_v4();
        let token = generate_jwt(
            user_id,
            &JwtConfig {
                secret: SECRET.to_string(),
                expiration_hours: 1,
            },
        )
        .unwrap();

        let resp = call(Some(format!("Bearer {}", token))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert_eq!(body, user_id.to_string());
    }

    #[actix_web::test]
    async fn missing_or_forged_tokens_are_unauthorized() {
        assert_eq!(call(None).await.status(), StatusCode::UNAUTHORIZED);

        let forged = generate_jwt(
            Uuid::new_v4(),
            &JwtConfig {
                secret: "other-secret".to_string(),
                expiration_hours: 1,
            },
        )
        .unwrap();
        let resp = call(Some(format!("Bearer {}", forged))).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
