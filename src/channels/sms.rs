//! Twilio-compatible SMS gateway client.
//!
//! Sends SMS through the Twilio messages API (or a compatible gateway):
//! form-encoded `POST` with HTTP basic auth, one request per message.
//!
//! # API Reference
//!
//! See: <https://www.twilio.com/docs/messaging/api/message-resource>

use async_trait::async_trait;
use serde::Deserialize;

use super::{ChannelError, SmsMessage, SmsProvider};

/// Base URL for the Twilio REST API.
const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Strip a phone number down to its digits.
///
/// Carriers in the covered regions accept digit-only national and
/// international forms; everything else (spaces, dashes, parentheses,
/// leading `+`) is presentation.
pub fn normalize_phone_number(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Client for the Twilio messages API.
#[derive(Clone)]
pub struct TwilioSmsClient {
    client: reqwest::Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioSmsClient {
    /// Create a new client against the public Twilio API.
    pub fn new(account_sid: &str, auth_token: &str, from_number: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: TWILIO_API_BASE.to_string(),
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
            from_number: from_number.to_string(),
        }
    }

    /// Point the client at a custom base URL (for testing).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

/// Response from the message creation endpoint.
#[derive(Debug, Deserialize)]
struct TwilioMessageResponse {
    #[serde(default)]
    sid: String,
}

#[async_trait]
impl SmsProvider for TwilioSmsClient {
    async fn send(&self, message: SmsMessage) -> Result<String, ChannelError> {
        if message.to.is_empty() {
            return Err(ChannelError::InvalidRecipient(
                "empty phone number".to_string(),
            ));
        }

        let url = format!(
            "{}/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        );

        let params = [
            ("From", self.from_number.as_str()),
            ("To", message.to.as_str()),
            ("Body", message.body.as_str()),
        ];

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ChannelError::Provider(format!(
                "sms gateway returned {}",
                response.status()
            )));
        }

        let body = response.json::<TwilioMessageResponse>().await?;
        Ok(body.sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone_number() {
        assert_eq!(normalize_phone_number("+66 81 234 5678"), "66812345678");
        assert_eq!(normalize_phone_number("(02) 123-4567"), "021234567");
        assert_eq!(normalize_phone_number("66812345678"), "66812345678");
        assert_eq!(normalize_phone_number("no digits"), "");
    }

    #[test]
    fn test_message_response_parsing() {
        let json = r#"{"sid": "SM1234", "status": "queued"}"#;
        let response: TwilioMessageResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.sid, "SM1234");
    }
}
