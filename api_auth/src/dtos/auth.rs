use api_subs::models::sub::SubscriptionSnapshot;
use common::plan::PlanLimits;
use db::models::user::User;
use serde::{Deserialize, Serialize};

pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

/// Dashboard view of the caller: profile with counters, plan limits and the
/// cached subscription state.
#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: User,
    pub limits: PlanLimits,
    pub subscription: SubscriptionSnapshot,
}
