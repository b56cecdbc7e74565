use async_trait::async_trait;
use common::error::{AppError, Res};
use deadpool_redis::Pool;
use mockall::automock;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::models::sub::SubscriptionSnapshot;

fn customer_key(user_id: Uuid) -> String {
    format!("stripe:user:{}", user_id)
}

fn snapshot_key(customer_id: &str) -> String {
    format!("stripe:customer:{}", customer_id)
}

fn owner_key(customer_id: &str) -> String {
    format!("stripe:customer-owner:{}", customer_id)
}

fn plan_change_lock_key(user_id: Uuid) -> String {
    format!("lock:plan-change:{}", user_id)
}

/// Deletes the lock only while it still holds the caller's token.
const RELEASE_IF_HOLDER: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

fn lock_token() -> String {
    Uuid::new_v4().to_string()
}

/// Fast lookup store for the user to customer mapping and the customer's
/// subscription snapshot.
#[automock]
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    async fn customer_for_user(&self, user_id: Uuid) -> Res<Option<String>>;

    async fn set_customer_for_user(&self, user_id: Uuid, customer_id: &str) -> Res<()>;

    async fn delete_customer(&self, user_id: Uuid) -> Res<()>;

    /// Owner of a billing customer, the reverse of `customer_for_user`.
    async fn user_for_customer(&self, customer_id: &str) -> Res<Option<Uuid>>;

    /// `None` when nothing is cached, which callers treat as "no subscription".
    async fn snapshot(&self, customer_id: &str) -> Res<Option<SubscriptionSnapshot>>;

    /// Overwrites the cached snapshot. Last writer wins.
    async fn put_snapshot(&self, customer_id: &str, snapshot: &SubscriptionSnapshot) -> Res<()>;

    async fn delete_snapshot(&self, customer_id: &str) -> Res<()>;

    /// Takes the per-user plan change lock and returns the holder token,
    /// `None` if someone else holds it.
    async fn try_lock_plan_change(&self, user_id: Uuid, ttl_ms: u64) -> Res<Option<String>>;

    /// Releases the lock if it is still held under `token`. A lock that
    /// expired and was taken by another request is left alone.
    async fn release_plan_change(&self, user_id: Uuid, token: &str) -> Res<()>;
}

pub struct RedisSnapshotCache {
    pool: Pool,
}

impl RedisSnapshotCache {
    pub fn new(pool: Pool) -> Self {
        RedisSnapshotCache { pool }
    }
}

#[async_trait]
impl SnapshotCache for RedisSnapshotCache {
    async fn customer_for_user(&self, user_id: Uuid) -> Res<Option<String>> {
        let mut conn = self.pool.get().await?;
        let customer_id: Option<String> = conn.get(customer_key(user_id)).await?;
        Ok(customer_id)
    }

    async fn set_customer_for_user(&self, user_id: Uuid, customer_id: &str) -> Res<()> {
        let mut conn = self.pool.get().await?;
        let _: () = redis::pipe()
            .atomic()
            .set(customer_key(user_id), customer_id)
            .ignore()
            .set(owner_key(customer_id), user_id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete_customer(&self, user_id: Uuid) -> Res<()> {
        let mut conn = self.pool.get().await?;
        let customer_id: Option<String> = conn.get(customer_key(user_id)).await?;
        let mut keys = vec![customer_key(user_id)];
        if let Some(customer_id) = customer_id {
            keys.push(owner_key(&customer_id));
        }
        let _: () = conn.del(keys).await?;
        Ok(())
    }

    async fn user_for_customer(&self, customer_id: &str) -> Res<Option<Uuid>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(owner_key(customer_id)).await?;
        raw.map(|id| {
            Uuid::parse_str(&id).map_err(|e| {
                AppError::Internal(format!("Corrupt owner of customer {}: {}", customer_id, e))
            })
        })
        .transpose()
    }

    async fn snapshot(&self, customer_id: &str) -> Res<Option<SubscriptionSnapshot>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(snapshot_key(customer_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put_snapshot(&self, customer_id: &str, snapshot: &SubscriptionSnapshot) -> Res<()> {
        let json = serde_json::to_string(snapshot)?;
        let mut conn = self.pool.get().await?;
        let _: () = conn.set(snapshot_key(customer_id), json).await?;
        Ok(())
    }

    async fn delete_snapshot(&self, customer_id: &str) -> Res<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.del(snapshot_key(customer_id)).await?;
        Ok(())
    }

    async fn try_lock_plan_change(&self, user_id: Uuid, ttl_ms: u64) -> Res<Option<String>> {
        let token = lock_token();
        let mut conn = self.pool.get().await?;
        let acquired: Option<String> = redis::cmd("SET")
            .arg(plan_change_lock_key(user_id))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(acquired.map(|_| token))
    }

    async fn release_plan_change(&self, user_id: Uuid, token: &str) -> Res<()> {
        let mut conn = self.pool.get().await?;
        let released: i64 = redis::Script::new(RELEASE_IF_HOLDER)
            .key(plan_change_lock_key(user_id))
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        if released == 0 {
            log::warn!("Plan change lock of {} expired before release", user_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_the_stripe_namespace() {
        let user_id = Uuid::nil();
        assert_eq!(
            customer_key(user_id),
            "stripe:user:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(snapshot_key("cus_123"), "stripe:customer:cus_123");
        assert_eq!(owner_key("cus_123"), "stripe:customer-owner:cus_123");
        assert!(plan_change_lock_key(user_id).starts_with("lock:plan-change:"));
    }

    #[test]
    fn every_lock_acquisition_gets_its_own_token() {
        let first = lock_token();
        let second = lock_token();
        assert_ne!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn release_compares_the_token_before_deleting() {
        let get = RELEASE_IF_HOLDER.find("GET").unwrap();
        let del = RELEASE_IF_HOLDER.find("DEL").unwrap();
        assert!(get < del);
        assert!(RELEASE_IF_HOLDER.contains("== ARGV[1]"));
    }
}
