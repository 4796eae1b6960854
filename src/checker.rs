//! Outbound check transport.
//!
//! The controller performs its side effect through the [`Checker`] trait so
//! the reconcile logic can be exercised against a scripted implementation.
//! The production implementation is [`HttpChecker`], a thin reqwest wrapper.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Interface for performing a single outbound check against a URL.
#[async_trait]
pub trait Checker: Send + Sync + 'static {
    /// Issue one GET request to `url` and return the response status code.
    ///
    /// Any transport-level failure (connect, DNS, TLS, timeout, malformed
    /// URL) is the `Err` arm. The response body is irrelevant and discarded.
    async fn check(&self, url: &str) -> Result<u16>;
}

/// HTTP checker backed by a shared reqwest client.
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    /// Build a checker whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Checker for HttpChecker {
    async fn check(&self, url: &str) -> Result<u16> {
        let resp = self.client.get(url).send().await?;
        Ok(resp.status().as_u16())
    }
}
