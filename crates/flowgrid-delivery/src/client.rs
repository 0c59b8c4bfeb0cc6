//! The delivery client — signed HTTP egress with bounded retries.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use flowgrid_security::sign;

/// Delivery knobs. Defaults match the subscriber contract: 30s timeout,
/// 3 retries.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryOptions {
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// Final outcome of a delivery. Individual attempts are logged as they
/// happen; only the last one is returned.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub attempts: u32,
}

/// Minimal HTTP seam so retry/backoff behavior is testable without a
/// live socket. The production impl is [`HttpTransport`].
pub trait Transport {
    fn post(
        &self,
        url: &str,
        body: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> impl Future<Output = Result<u16, String>> + Send;
}

/// reqwest-backed transport.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl Transport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        body: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<u16, String> {
        let mut req = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .timeout(timeout);
        for (key, value) in headers {
            req = req.header(key.as_str(), value.as_str());
        }
        let resp = req.send().await.map_err(|e| format!("send failed: {e}"))?;
        Ok(resp.status().as_u16())
    }
}

/// Signed, retried webhook delivery.
pub struct DeliveryClient<T: Transport = HttpTransport> {
    transport: T,
}

impl DeliveryClient<HttpTransport> {
    pub fn new() -> Self {
        Self {
            transport: HttpTransport::default(),
        }
    }
}

impl Default for DeliveryClient<HttpTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> DeliveryClient<T> {
    pub fn with_transport(transport: T) -> Self {
        Self { transport }
    }

    /// Deliver a payload to a subscriber endpoint.
    ///
    /// Each attempt signs the payload afresh (new timestamp), so a retry
    /// after a secret rotation or a long backoff never ships a stale
    /// signature. Transport failures and 5xx responses retry with
    /// `2^attempt`-second backoff up to `max_retries`; 4xx responses are
    /// permanent and return immediately.
    pub async fn deliver(
        &self,
        url: &str,
        webhook_id: &str,
        payload: &str,
        secret: &str,
        options: &DeliveryOptions,
    ) -> DeliveryOutcome {
        let mut attempts = 0;
        let mut last_error: Option<String> = None;
        let mut last_status: Option<u16> = None;

        while attempts <= options.max_retries {
            if attempts > 0 {
                let backoff = Duration::from_secs(2u64.pow(attempts));
                tracing::debug!(
                    "⏳ Delivery to {url} backing off {}s before retry {attempts}",
                    backoff.as_secs()
                );
                tokio::time::sleep(backoff).await;
            }
            attempts += 1;

            let timestamp = Utc::now().timestamp();
            let signature = sign(payload, secret, timestamp);
            let headers = vec![
                ("x-webhook-id".to_string(), webhook_id.to_string()),
                ("x-webhook-timestamp".to_string(), timestamp.to_string()),
                ("x-webhook-signature".to_string(), signature),
            ];

            match self
                .transport
                .post(url, payload, &headers, options.timeout)
                .await
            {
                Ok(status) if (200..300).contains(&status) => {
                    tracing::info!("✅ Webhook delivered to {url} ({status}, attempt {attempts})");
                    return DeliveryOutcome {
                        success: true,
                        status_code: Some(status),
                        error: None,
                        attempts,
                    };
                }
                Ok(status) if (500..600).contains(&status) => {
                    tracing::warn!("⚠️ Webhook to {url} got {status} (attempt {attempts}) — will retry");
                    last_status = Some(status);
                    last_error = Some(format!("server error {status}"));
                }
                Ok(status) => {
                    // 4xx (and anything else non-retryable): the endpoint
                    // rejected us; retrying verbatim cannot help.
                    tracing::warn!("🚫 Webhook to {url} got {status} — permanent failure, no retry");
                    return DeliveryOutcome {
                        success: false,
                        status_code: Some(status),
                        error: Some(format!("endpoint rejected delivery with {status}")),
                        attempts,
                    };
                }
                Err(e) => {
                    tracing::warn!("⚠️ Webhook to {url} transport failure (attempt {attempts}): {e}");
                    last_status = None;
                    last_error = Some(e);
                }
            }
        }

        tracing::warn!(
            "❌ Webhook to {url} failed after {attempts} attempts: {}",
            last_error.as_deref().unwrap_or("unknown")
        );
        DeliveryOutcome {
            success: false,
            status_code: last_status,
            error: last_error,
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted transport: pops one result per attempt and records the
    /// headers it saw.
    struct ScriptedTransport {
        responses: Mutex<Vec<Result<u16, String>>>,
        seen_headers: Mutex<Vec<Vec<(String, String)>>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<u16, String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                seen_headers: Mutex::new(Vec::new()),
            }
        }
    }

    impl Transport for ScriptedTransport {
        async fn post(
            &self,
            _url: &str,
            _body: &str,
            headers: &[(String, String)],
            _timeout: Duration,
        ) -> Result<u16, String> {
            self.seen_headers.lock().unwrap().push(headers.to_vec());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Err("script exhausted".into())
            } else {
                responses.remove(0)
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_5xx_then_succeeds_with_backoff() {
        let transport =
            ScriptedTransport::new(vec![Ok(503), Ok(503), Ok(503), Ok(200)]);
        let client = DeliveryClient::with_transport(transport);

        let started = tokio::time::Instant::now();
        let outcome = client
            .deliver(
                "https://example.test/hook",
                "wh_1",
                "{}",
                "whsec_s",
                &DeliveryOptions::default(),
            )
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.status_code, Some(200));
        assert_eq!(outcome.attempts, 4);
        // Backoffs of 2s, 4s, 8s elapsed on the (paused) clock — at the
        // very least the 2+4 the contract promises.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_404_is_permanent_no_retry() {
        let transport = ScriptedTransport::new(vec![Ok(404), Ok(200)]);
        let client = DeliveryClient::with_transport(transport);

        let started = tokio::time::Instant::now();
        let outcome = client
            .deliver(
                "https://example.test/hook",
                "wh_1",
                "{}",
                "whsec_s",
                &DeliveryOptions::default(),
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.status_code, Some(404));
        assert_eq!(outcome.attempts, 1, "4xx must not be retried");
        assert_eq!(started.elapsed(), Duration::ZERO, "no backoff slept");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failures_exhaust_retries() {
        let transport = ScriptedTransport::new(vec![
            Err("timeout".into()),
            Err("timeout".into()),
            Err("timeout".into()),
            Err("timeout".into()),
        ]);
        let client = DeliveryClient::with_transport(transport);

        let outcome = client
            .deliver(
                "https://example.test/hook",
                "wh_1",
                "{}",
                "whsec_s",
                &DeliveryOptions::default(),
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 4, "initial attempt + 3 retries");
        assert_eq!(outcome.status_code, None);
        assert!(outcome.error.unwrap().contains("timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_single_attempt() {
        let transport = ScriptedTransport::new(vec![Ok(503)]);
        let client = DeliveryClient::with_transport(transport);

        let outcome = client
            .deliver(
                "https://example.test/hook",
                "wh_1",
                "{}",
                "whsec_s",
                &DeliveryOptions {
                    timeout: Duration::from_secs(5),
                    max_retries: 0,
                },
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.status_code, Some(503));
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_attempt_freshly_signed() {
        let transport = ScriptedTransport::new(vec![Ok(503), Ok(200)]);
        let client = DeliveryClient::with_transport(transport);

        let payload = r#"{"event":"run.completed"}"#;
        client
            .deliver(
                "https://example.test/hook",
                "wh_9",
                payload,
                "whsec_s",
                &DeliveryOptions::default(),
            )
            .await;

        let seen = client.transport.seen_headers.lock().unwrap();
        assert_eq!(seen.len(), 2);
        for headers in seen.iter() {
            let get = |k: &str| {
                headers
                    .iter()
                    .find(|(key, _)| key == k)
                    .map(|(_, v)| v.clone())
                    .unwrap()
            };
            assert_eq!(get("x-webhook-id"), "wh_9");
            let ts: i64 = get("x-webhook-timestamp").parse().unwrap();
            let sig = get("x-webhook-signature");
            // Each attempt's signature verifies against its own timestamp.
            assert!(flowgrid_security::verify(payload, &sig, "whsec_s", ts, ts).is_ok());
        }
    }
}
