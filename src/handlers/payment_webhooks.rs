use crate::{errors::ServiceError, services::settlement::WebhookEvent, AppState};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Router,
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

pub fn webhook_routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhook", post(payment_webhook))
}

/// Payment provider event intake.
///
/// The signature is verified over the raw body before anything is parsed;
/// an endpoint without a configured secret rejects all deliveries rather
/// than accepting them unverified. Events that verify but cannot be acted
/// on (unknown type, unresolvable order) are still acknowledged with 200 so
/// the provider stops redelivering them.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Event accepted"),
        (status = 400, description = "Invalid signature or payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let Some(secret) = state.config.payment_webhook_secret.as_deref() else {
        warn!("Rejecting webhook delivery: no webhook secret configured");
        return Err(ServiceError::WebhookSignatureInvalid);
    };

    if !verify_signature(
        &headers,
        &body,
        secret,
        state.config.payment_webhook_tolerance_secs,
    ) {
        warn!("Payment webhook signature verification failed");
        return Err(ServiceError::WebhookSignatureInvalid);
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid webhook payload: {}", e)))?;

    info!(
        "Verified webhook event {:?} ({})",
        event.id, event.event_type
    );
    state.services.settlement.handle_event(&event).await?;

    Ok((StatusCode::OK, "ok"))
}

/// Checks the `Stripe-Signature` header (`t=<unix>,v1=<hex hmac>`) against
/// an HMAC-SHA256 of `"{t}.{raw body}"`. The timestamp must fall within the
/// configured tolerance; the digest comparison is constant-time.
pub fn verify_signature(
    headers: &HeaderMap,
    payload: &Bytes,
    secret: &str,
    tolerance_secs: u64,
) -> bool {
    let Some(sig) = headers.get("Stripe-Signature").and_then(|h| h.to_str().ok()) else {
        return false;
    };

    let mut ts = "";
    let mut v1 = "";
    for part in sig.split(',') {
        let mut it = part.trim().splitn(2, '=');
        match (it.next(), it.next()) {
            (Some("t"), Some(val)) => ts = val,
            (Some("v1"), Some(val)) => v1 = val,
            _ => {}
        }
    }
    if ts.is_empty() || v1.is_empty() {
        return false;
    }

    let Ok(ts_i) = ts.parse::<i64>() else {
        return false;
    };
    let now = chrono::Utc::now().timestamp();
    if (now - ts_i).unsigned_abs() > tolerance_secs {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(ts.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    constant_time_eq(&expected, v1)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn sign(secret: &str, ts: i64, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.", ts).as_bytes());
        mac.update(body);
        format!("t={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
    }

    fn headers_with(sig: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Stripe-Signature", HeaderValue::from_str(sig).unwrap());
        headers
    }

    #[test]
    fn accepts_valid_signature() {
        let body = Bytes::from_static(b"{\"type\":\"checkout.session.completed\"}");
        let ts = chrono::Utc::now().timestamp();
        let headers = headers_with(&sign("whsec_test", ts, &body));
        assert!(verify_signature(&headers, &body, "whsec_test", 300));
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = Bytes::from_static(b"{}");
        let ts = chrono::Utc::now().timestamp();
        let headers = headers_with(&sign("whsec_other", ts, &body));
        assert!(!verify_signature(&headers, &body, "whsec_test", 300));
    }

    #[test]
    fn rejects_tampered_body() {
        let body = Bytes::from_static(b"{\"amount\":100}");
        let ts = chrono::Utc::now().timestamp();
        let sig = sign("whsec_test", ts, &body);
        let tampered = Bytes::from_static(b"{\"amount\":999}");
        assert!(!verify_signature(&headers_with(&sig), &tampered, "whsec_test", 300));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let body = Bytes::from_static(b"{}");
        let ts = chrono::Utc::now().timestamp() - 3600;
        let headers = headers_with(&sign("whsec_test", ts, &body));
        assert!(!verify_signature(&headers, &body, "whsec_test", 300));
    }

    #[test]
    fn rejects_missing_header() {
        let body = Bytes::from_static(b"{}");
        assert!(!verify_signature(&HeaderMap::new(), &body, "whsec_test", 300));
    }

    #[test]
    fn rejects_malformed_header() {
        let body = Bytes::from_static(b"{}");
        let headers = headers_with("not-a-signature");
        assert!(!verify_signature(&headers, &body, "whsec_test", 300));
    }
}
