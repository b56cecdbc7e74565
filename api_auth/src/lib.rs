use std::sync::Arc;

use actix_web::web;
use common::env_config::Config;
use middleware::auth::AuthMiddleware;

pub mod routes {
    pub mod auth;
    pub mod user;
}

pub mod middleware {
    pub mod auth;
}

pub mod services {
    pub mod auth;
    pub mod user;
}

pub mod dtos {
    pub mod auth;
}

pub fn mount_auth() -> actix_web::Scope {
    web::scope("/auth")
        .service(routes::auth::post_register)
        .service(routes::auth::post_login)
}

pub fn configure_user(cfg: &mut web::ServiceConfig) {
    cfg.service(routes::user::get_me)
        .service(routes::user::delete_me);
}

pub fn auth_middleware(config: Arc<Config>) -> AuthMiddleware {
    AuthMiddleware::new(config.jwt_config.secret.clone())
}
