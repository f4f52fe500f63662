//! Settlement webhook: POSTs the notification as JSON, signed with
//! HMAC-SHA256 in an `X-Signature: t=<unix>,v1=<hex>` header

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use tracing::debug;

use super::{MatchFinished, SettlementError, SettlementSink};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Signature";

pub struct WebhookSink {
    client: Client,
    url: String,
    secret: String,
}

impl WebhookSink {
    pub fn new(url: String, secret: String) -> Self {
        Self {
            client: Client::new(),
            url,
            secret,
        }
    }
}

#[async_trait]
impl SettlementSink for WebhookSink {
    async fn deliver(&self, notification: &MatchFinished) -> Result<(), SettlementError> {
        let body = serde_json::to_string(notification)?;
        let timestamp = chrono::Utc::now().timestamp();
        let signature = sign(&self.secret, timestamp, &body)?;

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SettlementError::Rejected { status, body });
        }

        debug!(match_id = %notification.match_id, "Settlement webhook accepted");
        Ok(())
    }
}

fn mac_hex(secret: &str, timestamp: &str, payload: &str) -> Result<String, SettlementError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SettlementError::InvalidSecret)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Header value for `payload` signed at `timestamp`
pub fn sign(secret: &str, timestamp: i64, payload: &str) -> Result<String, SettlementError> {
    let ts = timestamp.to_string();
    let v1 = mac_hex(secret, &ts, payload)?;
    Ok(format!("t={},v1={}", ts, v1))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &str = r#"{"match_id":"00000000-0000-0000-0000-000000000000"}"#;

    #[test]
    fn header_carries_timestamp_and_mac_of_the_body() {
        let header = sign(SECRET, 1_700_000_000, BODY).unwrap();
        let expected = mac_hex(SECRET, "1700000000", BODY).unwrap();
        assert_eq!(header, format!("t=1700000000,v1={}", expected));
        assert_eq!(expected.len(), 64);
    }

    #[test]
    fn body_and_secret_change_the_mac() {
        let header = sign(SECRET, 1_700_000_000, BODY).unwrap();
        assert_ne!(header, sign(SECRET, 1_700_000_000, "{}").unwrap());
        assert_ne!(header, sign("other", 1_700_000_000, BODY).unwrap());
        assert_ne!(header, sign(SECRET, 1_700_000_001, BODY).unwrap());
    }
}
