//! Expo-compatible push gateway client.
//!
//! Sends mobile push notifications through the Expo push service (or any
//! gateway speaking the same protocol). Messages are submitted in chunks
//! of at most [`PUSH_CHUNK_SIZE`] and answered with one ticket per
//! message, in order.
//!
//! # API Reference
//!
//! See: <https://docs.expo.dev/push-notifications/sending-notifications/>

use async_trait::async_trait;
use serde::Deserialize;

use super::{ChannelError, PushMessage, PushProvider, PushTicket};

/// Base URL for the Expo push API.
const EXPO_API_BASE: &str = "https://exp.host/--/api/v2";

/// Maximum messages per submission, per the Expo API contract.
pub const PUSH_CHUNK_SIZE: usize = 100;

/// Whether a string is syntactically an Expo push token.
///
/// Tokens look like `ExponentPushToken[xxxxxxxx]` (or the older
/// `ExpoPushToken[...]` form). Anything else is rejected before a request
/// is made, since the gateway would refuse the whole chunk.
pub fn is_expo_push_token(token: &str) -> bool {
    (token.starts_with("ExponentPushToken[") || token.starts_with("ExpoPushToken["))
        && token.ends_with(']')
}

/// Client for the Expo push gateway.
#[derive(Clone)]
pub struct ExpoPushClient {
    client: reqwest::Client,
    base_url: String,
}

impl Default for ExpoPushClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpoPushClient {
    /// Create a new client against the public Expo gateway.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: EXPO_API_BASE.to_string(),
        }
    }

    /// Create a new client with a custom base URL (for testing).
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
        }
    }
}

/// Response envelope from the push endpoint.
#[derive(Debug, Deserialize)]
struct ExpoPushResponse {
    #[serde(default)]
    data: Vec<PushTicket>,
}

#[async_trait]
impl PushProvider for ExpoPushClient {
    fn is_valid_token(&self, token: &str) -> bool {
        is_expo_push_token(token)
    }

    async fn send_chunk(
        &self,
        messages: Vec<PushMessage>,
    ) -> Result<Vec<PushTicket>, ChannelError> {
        let url = format!("{}/push/send", self.base_url);
        let expected = messages.len();

        let response = self.client.post(&url).json(&messages).send().await?;
        if !response.status().is_success() {
            return Err(ChannelError::Provider(format!(
                "push gateway returned {}",
                response.status()
            )));
        }

        let body = response.json::<ExpoPushResponse>().await?;
        if body.data.len() != expected {
            return Err(ChannelError::Provider(format!(
                "push gateway returned {} tickets for {} messages",
                body.data.len(),
                expected
            )));
        }

        Ok(body.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_validation() {
        assert!(is_expo_push_token("ExponentPushToken[abc123]"));
        assert!(is_expo_push_token("ExpoPushToken[abc123]"));

        assert!(!is_expo_push_token("abc123"));
        assert!(!is_expo_push_token("ExponentPushToken[abc123"));
        assert!(!is_expo_push_token("fcm:abc123"));
        assert!(!is_expo_push_token(""));
    }

    #[test]
    fn test_ticket_parsing() {
        let json = r#"{
            "data": [
                {"status": "ok", "id": "09e7-aaa"},
                {"status": "error", "message": "DeviceNotRegistered"}
            ]
        }"#;

        let response: ExpoPushResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.data.len(), 2);
        assert!(response.data[0].is_ok());
        assert_eq!(response.data[0].id.as_deref(), Some("09e7-aaa"));
        assert!(!response.data[1].is_ok());
        assert_eq!(
            response.data[1].message.as_deref(),
            Some("DeviceNotRegistered")
        );
    }
}
