use actix_web::web;

pub mod routes {
    pub mod chat;
    pub mod file;
}

pub mod service {
    pub mod chat;
    pub mod file;
}

pub mod dtos {
    pub mod chat;
    pub mod file;
}

/// Request bodies may carry several documents of up to 50 MB each.
const UPLOAD_BODY_LIMIT: usize = 2 * dtos::file::MAX_UPLOAD_SIZE;

pub fn mount_chat() -> actix_web::Scope<
    impl actix_web::dev::ServiceFactory<
        actix_web::dev::ServiceRequest,
        Config = (),
        Response = actix_web::dev::ServiceResponse,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    web::scope("/chat")
        .wrap(limiter::entitlement_middleware())
        .service(routes::chat::post_chat)
        .service(routes::chat::patch_chat)
        .service(routes::chat::delete_chat)
        .service(routes::chat::get_messages)
}

pub fn mount_files() -> actix_web::Scope<
    impl actix_web::dev::ServiceFactory<
        actix_web::dev::ServiceRequest,
        Config = (),
        Response = actix_web::dev::ServiceResponse,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    web::scope("/file")
        .app_data(web::JsonConfig::default().limit(UPLOAD_BODY_LIMIT))
        .wrap(limiter::entitlement_middleware())
        .service(routes::file::post_file)
        .service(routes::file::patch_file)
        .service(routes::file::delete_file)
}

/// Read-only listings, served outside the entitlement check.
pub fn configure_listings(cfg: &mut web::ServiceConfig) {
    cfg.service(routes::chat::get_conversations)
        .service(routes::file::get_files);
}
