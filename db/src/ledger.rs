use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::Res,
    plan::{Plan, UsageKind},
};
use mockall::automock;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::user::User, user};

/// Persistent plan and usage counters of a user.
#[automock]
#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn get_user(&self, user_id: Uuid) -> Res<User>;

    async fn set_plan(&self, user_id: Uuid, plan: Plan) -> Res<()>;

    /// Atomically adds `delta` and returns the new total.
    async fn increment_usage(&self, user_id: Uuid, kind: UsageKind, delta: i64) -> Res<i64>;

    /// Zeroes every user's counters. Returns the number of users touched.
    async fn reset_usage(&self) -> Res<u64>;
}

pub struct PgLedger {
    pool: Arc<PgPool>,
}

impl PgLedger {
    pub fn new(pool: Arc<PgPool>) -> Self {
        PgLedger { pool }
    }
}

#[async_trait]
impl UsageLedger for PgLedger {
    async fn get_user(&self, user_id: Uuid) -> Res<User> {
        user::get_user_by_id(&*self.pool, user_id).await
    }

    async fn set_plan(&self, user_id: Uuid, plan: Plan) -> Res<()> {
        user::update_plan(&*self.pool, user_id, plan).await?;
        log::info!("User {} moved to plan {}", user_id, plan);
        Ok(())
    }

    async fn increment_usage(&self, user_id: Uuid, kind: UsageKind, delta: i64) -> Res<i64> {
        user::increment_usage(&*self.pool, user_id, kind, delta).await
    }

    async fn reset_usage(&self) -> Res<u64> {
        user::reset_usage(&*self.pool).await
    }
}
