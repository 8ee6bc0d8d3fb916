//! Outbound HTTP.
//!
//! The engine talks to the cache tier and the origin through the
//! [`Transport`] trait so tests can script failures, panics and canned
//! responses. [`HttpTransport`] is the `reqwest` implementation.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;

use crate::selector::Target;

/// Sends a fully built request to one of the two targets.
pub trait Transport: Send + Sync + 'static {
    fn send<'a>(
        &'a self,
        target: Target,
        req: &'a http::Request<Bytes>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<reqwest::Response>> + Send + 'a>>;
}

/// `reqwest` clients for both targets.
///
/// Redirects are never followed: a `301` from the origin is handled by the
/// engine, and the cache tier must not bounce requests elsewhere.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    bolt: reqwest::Client,
    origin: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration, insecure_bolt_tls: bool) -> anyhow::Result<Self> {
        let bolt = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(insecure_bolt_tls)
            .build()
            .context("could not build cache-tier http client")?;
        let origin = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("could not build origin http client")?;
        Ok(Self { bolt, origin })
    }

    fn client(&self, target: Target) -> &reqwest::Client {
        match target {
            Target::Bolt => &self.bolt,
            Target::Origin => &self.origin,
        }
    }
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        target: Target,
        req: &'a http::Request<Bytes>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<reqwest::Response>> + Send + 'a>> {
        Box::pin(async move {
            let url = req.uri().to_string();
            let resp = self
                .client(target)
                .request(req.method().clone(), &url)
                .headers(req.headers().clone())
                .body(req.body().clone())
                .send()
                .await
                .with_context(|| format!("{} {url}", req.method()))?;
            Ok(resp)
        })
    }
}
