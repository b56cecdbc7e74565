use std::collections::HashMap;

use stripe::{Client, CreateCustomer, Customer};
use uuid::Uuid;

use crate::error::{AppError, Res};

pub const STRIPE_API_BASE: &str = "https://api.stripe.com";

pub fn create_client(secret_key: &str) -> Client {
    Client::new(secret_key)
}

/// Creates a billing customer tagged with the owning user's id.
pub async fn create_customer(client: &Client, user_id: Uuid, email: &str) -> Res<Customer> {
    let metadata = HashMap::from([("userId".to_string(), user_id.to_string())]);
    let params = CreateCustomer {
        email: Some(email),
        metadata: Some(metadata),
        ..Default::default()
    };

    Customer::create(client, params)
        .await
        .map_err(AppError::from)
}
