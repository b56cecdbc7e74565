use actix_web::{HttpResponse, Responder};
use serde::Serialize;

use crate::error::Res;

pub struct Success;

impl Success {
    pub fn created<T: Serialize>(body: T) -> Res<impl Responder> {
        Ok(HttpResponse::Created().json(body))
    }

    pub fn ok<T: Serialize>(body: T) -> Res<impl Responder> {
        Ok(HttpResponse::Ok().json(body))
    }

    pub fn no_content() -> Res<HttpResponse> {
        Ok(HttpResponse::NoContent().finish())
    }
}
