//! Webhook signature verification.
//!
//! The signature is computed over the raw payload bytes exactly as the
//! provider sent them; re-serializing the JSON first would break it. Nothing
//! here touches storage, and neither the secret nor any partial signature
//! match ever appears in an error or a log line.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::events::WebhookEvent;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of the signature timestamp, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Verifies `<Provider>-Signature` headers of the form
/// `t=<unix_ts>,v1=<hmac_sha256_hex>` over `"{t}.{raw_body}"`.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
}

impl WebhookVerifier {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            secret: webhook_secret.into(),
        }
    }

    /// Verify the signature and parse the payload into an event.
    pub fn verify(&self, payload: &[u8], signature_header: &str) -> BillingResult<WebhookEvent> {
        self.verify_at(payload, signature_header, OffsetDateTime::now_utc().unix_timestamp())
    }

    /// Verification against an explicit clock, for tests.
    pub fn verify_at(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: i64,
    ) -> BillingResult<WebhookEvent> {
        let (timestamp, given_signature) = parse_signature_header(signature_header)?;

        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!(
                age_secs = (now - timestamp).abs(),
                "Rejecting webhook with stale signature timestamp"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let given = hex::decode(&given_signature)
            .map_err(|_| BillingError::WebhookSignatureInvalid)?;
        let computed = self.compute_signature(timestamp, payload)?;

        // Constant-time comparison; a mismatch reveals nothing about how
        // close the attempt was.
        if computed.as_slice().ct_eq(given.as_slice()).unwrap_u8() != 1 {
            tracing::warn!("Rejecting webhook with mismatched signature");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let event: WebhookEvent = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(parse_error = %e, "Signed payload is not a valid event");
            BillingError::WebhookSignatureInvalid
        })?;

        tracing::debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Webhook signature verified"
        );

        Ok(event)
    }

    fn compute_signature(&self, timestamp: i64, payload: &[u8]) -> BillingResult<Vec<u8>> {
        // Stripe-style secrets carry a "whsec_" prefix over the actual key.
        let key = self.secret.strip_prefix("whsec_").unwrap_or(&self.secret);

        let mut mac = HmacSha256::new_from_slice(key.as_bytes())
            .map_err(|_| BillingError::WebhookSignatureInvalid)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Parse `t=<ts>,v1=<hex>` out of the signature header.
fn parse_signature_header(header: &str) -> BillingResult<(i64, String)> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<String> = None;

    for part in header.split(',') {
        let kv: Vec<&str> = part.splitn(2, '=').collect();
        if kv.len() == 2 {
            match kv[0].trim() {
                "t" => timestamp = kv[1].parse().ok(),
                "v1" => v1_signature = Some(kv[1].to_string()),
                _ => {}
            }
        }
    }

    match (timestamp, v1_signature) {
        (Some(t), Some(sig)) => Ok((t, sig)),
        _ => Err(BillingError::WebhookSignatureInvalid),
    }
}
