use std::{future::Future, pin::Pin, rc::Rc, time::Instant};

use actix_web::{
    Error, HttpMessage,
    body::BoxBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use colored::{ColoredString, Colorize};
use common::jwt::JwtClaims;
use log::info;

/// Logs one line per request: status, method, path, elapsed time and the
/// authenticated user, when there is one.
pub struct LoggerMiddleware {
    enabled: bool,
}

impl LoggerMiddleware {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl<S, B> Transform<S, ServiceRequest> for LoggerMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = LoggerMiddlewareService<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(LoggerMiddlewareService {
            service: Rc::new(service),
            enabled: self.enabled,
        }))
    }
}

pub struct LoggerMiddlewareService<S> {
    service: Rc<S>,
    enabled: bool,
}

fn colored_status(status_code: u16) -> ColoredString {
    match status_code {
        200..=299 => status_code.to_string().green(),
        300..=399 => status_code.to_string().yellow(),
        400..=499 => status_code.to_string().bright_red(),
        _ => status_code.to_string().red(),
    }
}

fn colored_method(method: &str) -> ColoredString {
    match method {
        "GET" => method.blue(),
        "POST" => method.yellow(),
        "PATCH" => method.purple(),
        "DELETE" => method.red(),
        _ => method.normal(),
    }
}

impl<S, B> Service<ServiceRequest> for LoggerMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let srv = Rc::clone(&self.service);
        let enabled = self.enabled;

        Box::pin(async move {
            if !enabled {
                return srv.call(req).await.map(|res| res.map_into_boxed_body());
            }

            let method = req.method().to_string();
            let path = req.path().to_string();
            let started = Instant::now();

            let res = srv.call(req).await?;

            let user_id = res
                .request()
                .extensions()
                .get::<JwtClaims>()
                .map_or("None".to_string(), |c| c.user_id.to_string());

            info!(
                "[{}] {} {} {} user_id={}",
                colored_status(res.status().as_u16()),
                colored_method(&method),
                path.bright_white(),
                format!("({}ms)", started.elapsed().as_millis()).bright_black(),
                user_id.bright_blue(),
            );

            Ok(res.map_into_boxed_body())
        })
    }
}
