use reqwest::Client;
use serde::Serialize;

use crate::error::{AppError, Res};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, Serialize)]
pub struct OutgoingEmail<'a> {
    pub from: &'a str,
    pub to: Vec<&'a str>,
    pub subject: &'a str,
    pub html: &'a str,
}

/// Thin Resend client.
#[derive(Clone)]
pub struct EmailClient {
    http: Client,
    api_key: String,
    from: String,
}

impl EmailClient {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        EmailClient {
            http: Client::new(),
            api_key: api_key.into(),
            from: from.into(),
        }
    }

    pub async fn send(&self, to: &str, subject: &str, html: &str) -> Res<()> {
        let body = OutgoingEmail {
            from: &self.from,
            to: vec![to],
            subject,
            html,
        };

        let response = self
            .http
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Email delivery failed ({status}): {text}"
            )));
        }

        Ok(())
    }
}
