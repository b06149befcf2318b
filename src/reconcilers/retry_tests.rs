// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `retry.rs`

#[cfg(test)]
mod tests {
    use super::super::{conflict_backoff, default_backoff, is_retryable_error, retry_api_call};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(
            kube::core::Status::failure(&format!("{reason} from test"), reason)
                .with_code(code)
                .boxed(),
        )
    }

    #[test]
    fn test_default_backoff_configuration() {
        let backoff = default_backoff();
        assert_eq!(backoff.initial_interval, Duration::from_millis(100));
        assert_eq!(backoff.max_interval, Duration::from_secs(30));
        assert_eq!(
            backoff.max_elapsed_time,
            Some(Duration::from_secs(300)),
            "Kubernetes API retries should give up after 5 minutes"
        );
    }

    #[test]
    fn test_conflict_backoff_has_no_time_cap() {
        let backoff = conflict_backoff();
        assert_eq!(backoff.initial_interval, Duration::from_millis(50));
        assert_eq!(backoff.max_interval, Duration::from_secs(2));
        assert!(
            backoff.max_elapsed_time.is_none(),
            "Conflict retries are bounded by attempts, not time"
        );
    }

    #[test]
    fn test_next_backoff_applies_bounded_jitter() {
        let mut backoff = default_backoff();
        let first = backoff.next_backoff().expect("first backoff");
        assert!(
            first >= Duration::from_millis(90) && first <= Duration::from_millis(110),
            "First interval should be 100ms ±10%, got {first:?}"
        );
        let second = backoff.next_backoff().expect("second backoff");
        assert!(
            second >= Duration::from_millis(180) && second <= Duration::from_millis(220),
            "Second interval should be 200ms ±10%, got {second:?}"
        );
    }

    #[test]
    fn test_next_backoff_caps_at_max_interval() {
        let mut backoff = conflict_backoff();
        for _ in 0..10 {
            backoff.next_backoff();
        }
        assert_eq!(backoff.current_interval, Duration::from_secs(2));
        let capped = backoff.next_backoff().expect("no elapsed cap");
        assert!(capped <= Duration::from_millis(2200));
    }

    #[test]
    fn test_rate_limit_and_server_errors_are_retryable() {
        for code in [429, 500, 502, 503, 504, 599] {
            assert!(
                is_retryable_error(&api_error(code, "Transient")),
                "HTTP {code} should be retryable"
            );
        }
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        for code in [400, 401, 403, 404, 409, 422] {
            assert!(
                !is_retryable_error(&api_error(code, "Client")),
                "HTTP {code} should not be retryable"
            );
        }
    }

    #[test]
    fn test_service_errors_are_retryable() {
        let io: Box<dyn std::error::Error + Send + Sync> = Box::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(is_retryable_error(&kube::Error::Service(io)));
    }

    #[tokio::test]
    async fn test_retry_api_call_fails_fast_on_not_found() {
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<()> = retry_api_call(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(api_error(404, "NotFound")) }
            },
            "get missing object",
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "404 must not be retried");
    }

    #[tokio::test]
    async fn test_retry_api_call_retries_server_errors() {
        let calls = AtomicU32::new(0);
        let result = retry_api_call(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(api_error(503, "ServiceUnavailable"))
                    } else {
                        Ok(n)
                    }
                }
            },
            "get flaky object",
        )
        .await
        .expect("third attempt succeeds");
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
