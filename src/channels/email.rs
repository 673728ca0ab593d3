//! HTTP mail relay client.
//!
//! Sends email through a REST mail relay: one `POST /messages` per email,
//! bearer-token auth when the relay requires it. The relay URL always
//! comes from deployment configuration; there is no public default.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChannelError, EmailBody, EmailMessage, EmailTransport};

/// Client for a REST mail relay.
#[derive(Clone)]
pub struct HttpMailerClient {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    from_address: String,
}

impl HttpMailerClient {
    /// Create a new mailer client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Relay base URL, e.g. `https://mail.example.com/v1`
    /// * `api_token` - Optional bearer token for the relay
    /// * `from_address` - Sender address stamped on every email
    pub fn new(base_url: &str, api_token: Option<String>, from_address: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            from_address: from_address.to_string(),
        }
    }

    /// Build a request with optional authentication.
    fn build_request(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.client.post(url);
        if let Some(token) = &self.api_token {
            req.header("Authorization", format!("Bearer {}", token))
        } else {
            req
        }
    }
}

/// Request body for the relay's send endpoint.
#[derive(Debug, Serialize)]
struct MailerSendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

/// Response from the relay's send endpoint.
#[derive(Debug, Deserialize)]
struct MailerSendResponse {
    #[serde(default)]
    id: String,
}

#[async_trait]
impl EmailTransport for HttpMailerClient {
    async fn send(&self, message: EmailMessage) -> Result<String, ChannelError> {
        let url = format!("{}/messages", self.base_url);

        let (html, text) = match &message.body {
            EmailBody::Html(html) => (Some(html.as_str()), None),
            EmailBody::Text(text) => (None, Some(text.as_str())),
        };

        let request = MailerSendRequest {
            from: &self.from_address,
            to: &message.to,
            subject: &message.subject,
            html,
            text,
        };

        let response = self.build_request(&url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(ChannelError::Provider(format!(
                "mail relay returned {}",
                response.status()
            )));
        }

        let body = response.json::<MailerSendResponse>().await?;
        Ok(body.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_request_serializes_one_body_kind() {
        let html = MailerSendRequest {
            from: "alerts@beacon.example",
            to: "tourist@example.com",
            subject: "Safety update",
            html: Some("<p>hello</p>"),
            text: None,
        };
        let value = serde_json::to_value(&html).unwrap();
        assert!(value.get("html").is_some());
        assert!(value.get("text").is_none());

        let text = MailerSendRequest {
            from: "alerts@beacon.example",
            to: "tourist@example.com",
            subject: "Safety update",
            html: None,
            text: Some("hello"),
        };
        let value = serde_json::to_value(&text).unwrap();
        assert!(value.get("html").is_none());
        assert!(value.get("text").is_some());
    }
}
