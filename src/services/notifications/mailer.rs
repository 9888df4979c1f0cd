use anyhow::Context;
use async_trait::async_trait;

use super::NotificationProvider;

/// Posts transactional email through an HTTP mail API.
pub struct HttpMailer {
    api_url: String,
    api_key: String,
    from_address: String,
    client: reqwest::Client,
}

impl HttpMailer {
    pub fn new(api_url: String, api_key: String, from_address: String) -> Self {
        Self {
            api_url,
            api_key,
            from_address,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationProvider for HttpMailer {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        self.client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "from": self.from_address,
                "to": to,
                "subject": subject,
                "text": body,
            }))
            .send()
            .await
            .context("failed to reach mail API")?
            .error_for_status()
            .context("mail API returned error")?;

        Ok(())
    }
}
