use actix_web::HttpResponse;
use thiserror::Error;

pub type Res<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    // === CONVERSION ERRORS ===
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JWT error: {0}")]
    JWT(#[from] jsonwebtoken::errors::Error),

    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Stripe error: {0}")]
    Stripe(#[from] stripe::StripeError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    RedisPool(#[from] deadpool_redis::PoolError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    // === APPLICATION ERRORS ===
    #[error("Authorization error: {0}")]
    Unauthorized(String),

    #[error("Limit reached: {0}")]
    LimitReached(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Subscription requires attention: {0}")]
    UnresolvedSubscription(String),

    #[error("Checkout could not be created: {0}")]
    CheckoutCreation(String),

    #[error("Cancellation was not confirmed: {0}")]
    CancellationFailed(String),

    #[error("Resource conflict: {0}")]
    Conflict(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Machine readable reason sent next to the message, so clients can tell
    /// a reached limit apart from a missing session.
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::Database(_)
            | AppError::JWT(_)
            | AppError::Reqwest(_)
            | AppError::Stripe(_)
            | AppError::Redis(_)
            | AppError::RedisPool(_)
            | AppError::Serde(_)
            | AppError::Internal(_) => "internal",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::LimitReached(_) => "limit_reached",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::InvalidPlan(_) => "invalid_plan",
            AppError::UnresolvedSubscription(_) => "unresolved_subscription",
            AppError::CheckoutCreation(_) => "checkout_creation_failed",
            AppError::CancellationFailed(_) => "cancellation_failed",
            AppError::Conflict(_) => "conflict",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::Timeout(_) => "timeout",
        }
    }

    pub fn to_http_response(&self) -> HttpResponse {
        let is_dev = cfg!(debug_assertions);

        let to_internal_json = |err_msg: &str| {
            if is_dev {
                serde_json::json!({ "error": err_msg, "reason": "internal" })
            } else {
                serde_json::json!({ "error": "Internal server error", "reason": "internal" })
            }
        };
        let body = || serde_json::json!({ "error": self.to_string(), "reason": self.reason() });

        match self {
            // === CONVERSION ERRORS ===
            AppError::Database(error) => {
                log::error!("Database error: {}", error);
                HttpResponse::InternalServerError().json(to_internal_json(&error.to_string()))
            }
            AppError::JWT(error) => {
                log::error!("JWT error: {}", error);
                HttpResponse::InternalServerError().json(to_internal_json(&error.to_string()))
            }
            AppError::Reqwest(error) => {
                log::error!("Reqwest error: {}", error);
                HttpResponse::InternalServerError().json(to_internal_json(&error.to_string()))
            }
            AppError::Stripe(error) => {
                log::error!("Stripe error: {}", error);
                HttpResponse::InternalServerError().json(to_internal_json("Billing provider error"))
            }
            AppError::Redis(error) => {
                log::error!("Redis error: {}", error);
                HttpResponse::InternalServerError().json(to_internal_json(&error.to_string()))
            }
            AppError::RedisPool(error) => {
                log::error!("Redis pool error: {}", error);
                HttpResponse::InternalServerError().json(to_internal_json(&error.to_string()))
            }
            AppError::Serde(error) => {
                log::error!("Serialization error: {}", error);
                HttpResponse::InternalServerError().json(to_internal_json(&error.to_string()))
            }

            // === APPLICATION ERRORS ===
            AppError::Unauthorized(_) | AppError::LimitReached(_) => {
                HttpResponse::Unauthorized().json(body())
            }
            AppError::Forbidden(_) => HttpResponse::Forbidden().json(body()),
            AppError::NotFound(_) => HttpResponse::NotFound().json(body()),
            AppError::BadRequest(_) | AppError::InvalidPlan(_) => {
                HttpResponse::BadRequest().json(body())
            }
            AppError::UnresolvedSubscription(_) | AppError::Conflict(_) => {
                HttpResponse::Conflict().json(body())
            }
            AppError::CheckoutCreation(_) | AppError::CancellationFailed(_) => {
                HttpResponse::BadGateway().json(body())
            }
            AppError::PayloadTooLarge(_) => HttpResponse::PayloadTooLarge().json(body()),
            AppError::Timeout(_) => HttpResponse::GatewayTimeout().json(body()),

            AppError::Internal(error) => {
                log::error!("Internal error: {}", error);
                HttpResponse::InternalServerError().json(to_internal_json(error))
            }
        }
    }
}

impl actix_web::ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        self.to_http_response()
    }
}
