use actix_web::web::{self};

pub mod routes {
    pub mod pay;
    pub mod sub;
}

pub mod services {
    pub mod cache;
    pub mod events;
    pub mod reconcile;
    pub mod stripe;
}

pub mod dtos {
    pub mod sub;
}

pub mod models {
    pub mod sub;
}

pub fn mount_subs() -> actix_web::Scope {
    web::scope("/sub")
        .service(routes::sub::post_change_plan)
        .service(routes::sub::get_checkout_complete)
        .service(routes::sub::get_current)
}

pub fn mount_webhook() -> actix_web::Scope {
    web::scope("/pay").service(routes::pay::post_webhook)
}
