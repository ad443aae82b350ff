//! Out-of-band delivery of one-time codes.
//!
//! The delivery channel is an external HTTP endpoint keyed by user id. A
//! non-200 response or transport error is retried after a fixed delay until
//! the endpoint reports success; only the waiting connection blocks.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use hearth_shared::types::UserId;

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Abstraction over the delivery channel so the state machine can be tested
/// without a network.
pub trait OtpSender: Send + Sync {
    /// Deliver `code` to `user`, blocking until the channel confirms.
    fn deliver(&self, user: &UserId, code: &str) -> impl Future<Output = ()> + Send;
}

/// Production delivery over the configured HTTP endpoint.
pub struct HttpOtpSender {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpOtpSender {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }
}

impl OtpSender for HttpOtpSender {
    async fn deliver(&self, user: &UserId, code: &str) {
        let url = format!(
            "{}?e={}&c={}&a={}",
            self.endpoint, user, code, self.api_key
        );

        loop {
            match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    let body = response.text().await.unwrap_or_default();
                    info!(user = %user, response = %body, "one-time code delivered");
                    return;
                }
                Ok(response) => {
                    warn!(user = %user, status = %response.status(), "code delivery rejected, retrying");
                }
                Err(e) => {
                    warn!(user = %user, error = %e, "code delivery failed, retrying");
                }
            }
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }
}
