//! Builds the retrying HTTP client shared by broker drivers, grounded on
//! the teacher's `infrastructure/binance/execution.rs` client construction.

use std::time::Duration;

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;

/// Builds a `ClientWithMiddleware` with bounded exponential backoff for
/// idempotent calls (connect, query, submit-with-idempotency-key), per
/// §4.7's "retry idempotently on transient failures ... linear/exponential
/// backoff."
pub fn build_http_client(timeout: Duration, max_retries: u32) -> ClientWithMiddleware {
    let base = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("reqwest client configuration is static and known valid");

    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);

    ClientBuilder::new(base)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build()
}
