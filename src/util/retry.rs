//! Generic retry-with-backoff for outbound HTTP clients.
//!
//! Bridge provider calls (deBridge, Squid) and identity-service calls are
//! one-shot network requests with no caller-side retry loop of their own,
//! so a transient connection reset or 5xx would otherwise fail the whole
//! job. [`RetryWithBackoff`] wraps a [`reqwest::Client`] in
//! `reqwest_middleware`'s `Middleware` trait and retries transport errors
//! and 5xx responses a bounded number of times with exponential backoff,
//! then gives up and lets the error surface.

use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Error, Middleware, Next, Result as MiddlewareResult};
use std::time::Duration;
use tokio::time::sleep;

/// Default retry budget for the `NetworkError` policy (spec §7): transient
/// RPC/HTTP transport failures get a bounded number of attempts before the
/// caller sees the failure.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

pub struct RetryWithBackoff {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryWithBackoff {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts, base_delay: Duration::from_millis(200) }
    }
}

/// Builds an outbound HTTP client wrapped in [`RetryWithBackoff`], used by
/// every collaborator client (bridge provider quotes/status, identity
/// service calls, nonce fetch) so a single dropped connection or 5xx
/// doesn't immediately fail the job.
pub fn client_with_retry(max_attempts: u32) -> ClientWithMiddleware {
    ClientBuilder::new(reqwest::Client::new()).with(RetryWithBackoff::new(max_attempts)).build()
}

#[async_trait::async_trait]
impl Middleware for RetryWithBackoff {
    async fn handle(&self, req: Request, extensions: &mut Extensions, next: Next<'_>) -> MiddlewareResult<Response> {
        let mut attempt = 0;
        let mut pending = Some(req);

        loop {
            let this_attempt = pending.take().expect("request present on every loop entry");
            let next_clone = if attempt + 1 < self.max_attempts { this_attempt.try_clone() } else { None };

            let result = next.clone().run(this_attempt, extensions).await;

            let retryable = match &result {
                Ok(resp) => resp.status().is_server_error(),
                Err(Error::Reqwest(_)) => true,
                Err(_) => false,
            };

            match next_clone {
                Some(retry_req) if retryable => {
                    attempt += 1;
                    sleep(self.base_delay * 2u32.pow(attempt - 1)).await;
                    pending = Some(retry_req);
                }
                _ => return result,
            }
        }
    }
}
