use crate::errors::ServiceError;
use crate::rate_limiter::RateLimiter;
use axum::http::HeaderMap;

pub mod checkout;
pub mod coupons;
pub mod orders;
pub mod products;
pub mod webhooks;

/// Client address for rate-limit keying. Behind the reverse proxy the
/// first `x-forwarded-for` hop is the client; direct connections fall
/// back to `x-real-ip`.
pub(crate) fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Fixed-window guard for public mutation endpoints. Denial-of-service
/// mitigation only, not a correctness mechanism.
pub(crate) async fn enforce_rate_limit(
    limiter: &RateLimiter,
    headers: &HeaderMap,
    scope: &str,
) -> Result<(), ServiceError> {
    let key = format!("{}:{}", scope, client_ip(headers));
    let decision = limiter.check(&key).await;
    if decision.allowed {
        Ok(())
    } else {
        Err(ServiceError::RateLimitExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::RateLimitConfig;
    use assert_matches::assert_matches;
    use axum::http::HeaderValue;
    use std::time::Duration;

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.1"));
        assert_eq!(client_ip(&headers), "203.0.113.9");
    }

    #[test]
    fn real_ip_fallback_then_unknown() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.7"));
        assert_eq!(client_ip(&headers), "198.51.100.7");
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }

    #[tokio::test]
    async fn exhausted_window_maps_to_rate_limit_error() {
        let limiter = RateLimiter::in_memory(RateLimitConfig {
            requests_per_window: 1,
            window: Duration::from_secs(60),
        });
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.44"));

        assert!(enforce_rate_limit(&limiter, &headers, "session").await.is_ok());
        let err = enforce_rate_limit(&limiter, &headers, "session")
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::RateLimitExceeded);

        // Scopes are keyed independently.
        assert!(enforce_rate_limit(&limiter, &headers, "track").await.is_ok());
    }
}
