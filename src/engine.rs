//! Execution and failover.
//!
//! A request is attempted against its initial target and, when the failover
//! policy allows, once more against the alternate target. The plan is a
//! fixed list of at most two targets; the second attempt never fails over.
//!
//! Each attempt runs inside a panic boundary. A panic in the transport is
//! converted to [`RouterError::Panic`] and handled exactly like a transport
//! error.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use futures::FutureExt;
use http::StatusCode;
use metrics::{counter, gauge};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analytics::RequestAnalytics;
use crate::credentials::CredentialCache;
use crate::directory::EndpointDirectory;
use crate::errors::RouterError;
use crate::metrics::{
    ATTEMPTS_TOTAL, ENDPOINTS_MARKED_OFFLINE_TOTAL, FAILOVERS_TOTAL, OFFLINE_ENDPOINTS,
};
use crate::request::BoltRequest;
use crate::selector::Target;
use crate::transport::Transport;
use crate::xml;

/// When a failed attempt moves on to the alternate target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailoverPolicy {
    /// Fail over on transport errors, panics and non-2xx statuses.
    pub failover: bool,
    /// Do not treat a 404 as a cross-tier miss.
    pub no_fallback_404: bool,
}

impl FailoverPolicy {
    /// Whether a first attempt with this result should be retried against
    /// the alternate target.
    pub fn should_failover(&self, result: &Result<reqwest::Response, RouterError>) -> bool {
        match result {
            Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                !self.no_fallback_404 || self.failover
            }
            Ok(resp) => self.failover && !resp.status().is_success(),
            Err(e) => self.failover && e.is_transport_class(),
        }
    }
}

/// Terminal outcome of one proxied request.
#[derive(Debug)]
pub struct ExecutionOutcome {
    /// Response or error of the last attempt made.
    pub result: Result<reqwest::Response, RouterError>,
    /// Whether the last attempt was a failover attempt.
    pub is_failover: bool,
    pub analytics: RequestAnalytics,
}

/// Runs the attempt plan for a request.
pub struct Engine {
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialCache>,
    directory: Arc<EndpointDirectory>,
    policy: FailoverPolicy,
}

impl Engine {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<CredentialCache>,
        directory: Arc<EndpointDirectory>,
        policy: FailoverPolicy,
    ) -> Self {
        Self {
            transport,
            credentials,
            directory,
            policy,
        }
    }

    /// Execute `req` starting at `initial`.
    pub async fn execute(
        &self,
        mut req: BoltRequest,
        initial: Target,
        reason: &str,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let mut analytics = RequestAnalytics::new(
            &req.object_key,
            req.bolt.body().len() as u64,
            req.bolt.method().as_str(),
        );
        analytics.initial_target = Some(initial);
        analytics.initial_target_reason = reason.to_string();
        analytics.bolt_endpoint = req.bolt_endpoint.clone();

        let plan = [initial, initial.alternate()];
        let mut outcome = None;
        for (i, &target) in plan.iter().enumerate() {
            let is_failover = i > 0;
            let result = self.attempt(&mut req, target, &mut analytics, cancel).await;

            if is_failover || !self.policy.should_failover(&result) {
                outcome = Some((result, is_failover));
                break;
            }

            let next = plan[i + 1];
            match result {
                Ok(resp) => {
                    warn!(from = %target, to = %next, status = resp.status().as_u16(), "failing over");
                    drain(resp, cancel).await;
                }
                Err(e) => warn!(from = %target, to = %next, error = %e, "failing over"),
            }
            counter!(FAILOVERS_TOTAL, "from" => target.as_str(), "to" => next.as_str()).increment(1);
        }

        let (result, is_failover) = outcome.unwrap_or_else(|| {
            (
                Err(RouterError::Internal(anyhow::anyhow!("no attempt was made"))),
                false,
            )
        });
        log_outcome(&result, is_failover, &analytics);
        ExecutionOutcome {
            result,
            is_failover,
            analytics,
        }
    }

    /// Execute `req` against `target` only, as a failover attempt.
    ///
    /// Used when no initial target could be chosen.
    pub async fn execute_failover_only(
        &self,
        mut req: BoltRequest,
        target: Target,
        reason: &str,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let mut analytics = RequestAnalytics::new(
            &req.object_key,
            req.bolt.body().len() as u64,
            req.bolt.method().as_str(),
        );
        analytics.initial_target_reason = reason.to_string();
        analytics.bolt_endpoint = req.bolt_endpoint.clone();

        let result = self.attempt(&mut req, target, &mut analytics, cancel).await;
        log_outcome(&result, true, &analytics);
        ExecutionOutcome {
            result,
            is_failover: true,
            analytics,
        }
    }

    /// One attempt against `target`, including liveness bookkeeping and,
    /// for the origin, a single cross-region redirect.
    async fn attempt(
        &self,
        req: &mut BoltRequest,
        target: Target,
        analytics: &mut RequestAnalytics,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, RouterError> {
        let outbound = match target {
            Target::Bolt => &req.bolt,
            Target::Origin => &req.origin,
        };
        let start = Instant::now();
        let result = self.send_contained(target, outbound, cancel).await;
        analytics.record(
            target,
            start.elapsed(),
            result.as_ref().ok().map(|r| r.status().as_u16()),
        );
        count_attempt(target, &result);

        match target {
            Target::Bolt => {
                self.update_liveness(&req.bolt_endpoint, &result);
                result
            }
            Target::Origin => match result {
                Ok(resp) if resp.status() == StatusCode::MOVED_PERMANENTLY => {
                    self.follow_redirect(req, resp, analytics, cancel).await
                }
                other => other,
            },
        }
    }

    /// Send through the transport with panic containment and cancellation.
    async fn send_contained(
        &self,
        target: Target,
        req: &http::Request<Bytes>,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, RouterError> {
        let send = AssertUnwindSafe(async { self.transport.send(target, req).await }).catch_unwind();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RouterError::Cancelled),
            res = send => match res {
                Ok(Ok(resp)) => Ok(resp),
                Ok(Err(source)) => Err(RouterError::Transport { target, source }),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(%target, %message, "panic during request");
                    Err(RouterError::Panic { target, message })
                }
            },
        }
    }

    fn update_liveness(&self, endpoint: &str, result: &Result<reqwest::Response, RouterError>) {
        let failed = match result {
            Ok(resp) => {
                let status = resp.status();
                status.as_u16() >= 400 && status != StatusCode::NOT_FOUND
            }
            Err(e) => e.is_transport_class(),
        };
        if failed && self.directory.liveness().mark_offline(endpoint) {
            warn!(endpoint, "marking cache-tier endpoint offline");
            counter!(ENDPOINTS_MARKED_OFFLINE_TOTAL).increment(1);
            gauge!(OFFLINE_ENDPOINTS).set(self.directory.liveness().offline_count() as f64);
        }
    }

    /// Handle a `301` from the origin: find the bucket's real region,
    /// re-sign for it and re-issue once.
    async fn follow_redirect(
        &self,
        req: &mut BoltRequest,
        resp: reqwest::Response,
        analytics: &mut RequestAnalytics,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, RouterError> {
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RouterError::Cancelled),
            body = resp.bytes() => body.map_err(|e| RouterError::Redirect(format!("could not read redirect body: {e}")))?,
        };

        let header_region = headers
            .get("x-amz-bucket-region")
            .and_then(|v| v.to_str().ok())
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        // Bodiless redirects (HEAD) only carry the region header.
        let region = match header_region {
            Some(region) => region,
            None => {
                let redirect = xml::parse_redirect(&String::from_utf8_lossy(&body))
                    .map_err(RouterError::Redirect)?;
                if !redirect.is_permanent_redirect() {
                    return Ok(rebuild_response(status, headers, body));
                }
                xml::region_from_endpoint(&redirect.endpoint).ok_or_else(|| {
                    RouterError::Redirect(format!(
                        "no region in redirect endpoint {:?}",
                        redirect.endpoint
                    ))
                })?
            }
        };
        info!(bucket = %req.source.bucket, from = %req.source.region, to = %region, "following region redirect");

        let credential = self
            .credentials
            .get(&region)
            .await
            .map_err(|e| RouterError::Redirect(format!("credentials for {region}: {e:#}")))?;
        req.retarget_origin(&region, &credential, Utc::now())
            .map_err(|e| RouterError::Redirect(e.to_string()))?;

        let start = Instant::now();
        let result = self
            .send_contained(Target::Origin, &req.origin, cancel)
            .await;
        analytics.record(
            Target::Origin,
            start.elapsed(),
            result.as_ref().ok().map(|r| r.status().as_u16()),
        );
        count_attempt(Target::Origin, &result);
        result
    }
}

/// Read and discard a response body so the connection can be reused.
async fn drain(resp: reqwest::Response, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        body = resp.bytes() => {
            if let Ok(body) = body {
                debug!(body = %String::from_utf8_lossy(&body), "discarded failed response");
            }
        }
    }
}

fn rebuild_response(status: StatusCode, headers: http::HeaderMap, body: Bytes) -> reqwest::Response {
    let mut resp = http::Response::new(body);
    *resp.status_mut() = status;
    *resp.headers_mut() = headers;
    reqwest::Response::from(resp)
}

fn count_attempt(target: Target, result: &Result<reqwest::Response, RouterError>) {
    let outcome = match result {
        Ok(resp) if resp.status().is_success() => "2xx",
        Ok(resp) if resp.status().is_redirection() => "3xx",
        Ok(resp) if resp.status().is_client_error() => "4xx",
        Ok(_) => "5xx",
        Err(RouterError::Cancelled) => "cancelled",
        Err(RouterError::Panic { .. }) => "panic",
        Err(_) => "error",
    };
    counter!(ATTEMPTS_TOTAL, "target" => target.as_str(), "outcome" => outcome).increment(1);
}

fn log_outcome(
    result: &Result<reqwest::Response, RouterError>,
    is_failover: bool,
    analytics: &RequestAnalytics,
) {
    match serde_json::to_string(analytics) {
        Ok(json) => debug!(analytics = %json, "request analytics"),
        Err(e) => debug!(error = %e, "could not serialize request analytics"),
    }
    match result {
        Ok(resp) if is_failover => info!(status = resp.status().as_u16(), "failover attempt completed"),
        Ok(_) => {}
        Err(RouterError::Cancelled) => debug!("request cancelled"),
        Err(e) => warn!(error = %e, is_failover, "request failed"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::tests::CountingProvider;
    use crate::credentials::Credential;
    use crate::directory::DirectorySnapshot;
    use crate::request::TransformOptions;
    use crate::source_bucket::SourceBucket;
    use crate::transport::tests::{ScriptedTransport, Step};

    const ENDPOINT: &str = "10.0.0.7";

    const REDIRECT_BODY: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error><Code>PermanentRedirect</Code><Message>moved</Message><Endpoint>data.s3-eu-west-1.amazonaws.com</Endpoint><Bucket>data</Bucket></Error>";

    struct Harness {
        engine: Engine,
        transport: Arc<ScriptedTransport>,
        directory: Arc<EndpointDirectory>,
        provider: Arc<CountingProvider>,
    }

    fn harness(steps: Vec<Step>, policy: FailoverPolicy) -> Harness {
        let transport = Arc::new(ScriptedTransport::new(steps));
        let provider = Arc::new(CountingProvider::default());
        let credentials = Arc::new(CredentialCache::new(provider.clone()));
        let directory = Arc::new(EndpointDirectory::new());
        directory.replace(DirectorySnapshot::local(ENDPOINT));
        let engine = Engine::new(transport.clone(), credentials, directory.clone(), policy);
        Harness {
            engine,
            transport,
            directory,
            provider,
        }
    }

    fn failover_on() -> FailoverPolicy {
        FailoverPolicy {
            failover: true,
            no_fallback_404: false,
        }
    }

    fn failover_off() -> FailoverPolicy {
        FailoverPolicy {
            failover: false,
            no_fallback_404: true,
        }
    }

    fn bolt_request() -> BoltRequest {
        let inbound = http::Request::builder()
            .method("GET")
            .uri("/data/dir/k")
            .header("host", "localhost")
            .header(
                "authorization",
                "AWS4-HMAC-SHA256 Credential=K/20240101/us-west-2/s3/aws4_request, SignedHeaders=host, Signature=x",
            )
            .body(Bytes::new())
            .unwrap();
        let source = SourceBucket::extract(&inbound, None).unwrap();
        let cred = Credential {
            access_key_id: "AKID".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: None,
            expires_at: None,
            can_expire: false,
        };
        let opts = TransformOptions {
            bolt_hostname: "bolt.us-west-2.example.io".to_string(),
            user_agent_prefix: "granica-sidekick/".to_string(),
            zone_id: String::new(),
            passthrough: false,
            bolt_scheme: "http",
        };
        BoltRequest::new(&inbound, source, &cred, ENDPOINT.to_string(), &opts, Utc::now()).unwrap()
    }

    async fn run(h: &Harness, initial: Target) -> ExecutionOutcome {
        h.engine
            .execute(bolt_request(), initial, "traffic splitting", &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_success_no_failover() {
        let h = harness(vec![Step::Status(200, "ok")], failover_on());
        let out = run(&h, Target::Bolt).await;

        assert_eq!(out.result.unwrap().status(), 200);
        assert!(!out.is_failover);
        assert_eq!(out.analytics.bolt_status, 200);
        assert_eq!(out.analytics.origin_status, -1);
        assert_eq!(h.transport.targets(), vec![Target::Bolt]);
    }

    #[tokio::test]
    async fn test_transport_error_fails_over_to_origin() {
        let h = harness(
            vec![Step::Fail("connection refused"), Step::Status(200, "from origin")],
            failover_on(),
        );
        let out = run(&h, Target::Bolt).await;

        assert!(out.is_failover);
        assert_eq!(out.result.unwrap().text().await.unwrap(), "from origin");
        assert_eq!(out.analytics.bolt_status, -1);
        assert_eq!(out.analytics.origin_status, 200);
        assert_eq!(h.transport.targets(), vec![Target::Bolt, Target::Origin]);
        assert!(h.directory.liveness().is_offline(ENDPOINT));
    }

    #[tokio::test]
    async fn test_transport_error_without_failover_is_returned() {
        let h = harness(vec![Step::Fail("connection refused")], failover_off());
        let out = run(&h, Target::Bolt).await;

        assert!(!out.is_failover);
        assert!(matches!(out.result, Err(RouterError::Transport { target: Target::Bolt, .. })));
        assert!(h.directory.liveness().is_offline(ENDPOINT));
    }

    #[tokio::test]
    async fn test_panic_without_failover_is_contained() {
        let h = harness(vec![Step::Panic("nil client")], failover_off());
        let out = run(&h, Target::Bolt).await;

        let err = out.result.unwrap_err();
        assert_eq!(err.to_string(), "panic during bolt request: nil client");
        assert!(!out.is_failover);
        assert_eq!(h.transport.targets(), vec![Target::Bolt]);
    }

    #[tokio::test]
    async fn test_panic_with_failover_goes_to_origin() {
        let h = harness(
            vec![Step::Panic("boom"), Step::Status(200, "ok")],
            failover_on(),
        );
        let out = run(&h, Target::Bolt).await;

        assert!(out.is_failover);
        assert_eq!(out.result.unwrap().status(), 200);
        assert!(h.directory.liveness().is_offline(ENDPOINT));
    }

    #[tokio::test]
    async fn test_404_falls_back_even_without_failover() {
        let policy = FailoverPolicy {
            failover: false,
            no_fallback_404: false,
        };
        let h = harness(
            vec![Step::Status(404, "missing"), Step::Status(200, "found")],
            policy,
        );
        let out = run(&h, Target::Bolt).await;

        assert!(out.is_failover);
        assert_eq!(out.result.unwrap().status(), 200);
        assert_eq!(out.analytics.bolt_status, 404);
        assert!(!h.directory.liveness().is_offline(ENDPOINT));
    }

    #[tokio::test]
    async fn test_404_returned_when_fallback_disabled() {
        let h = harness(vec![Step::Status(404, "missing")], failover_off());
        let out = run(&h, Target::Bolt).await;

        assert!(!out.is_failover);
        assert_eq!(out.result.unwrap().status(), 404);
    }

    #[tokio::test]
    async fn test_non_2xx_without_failover_is_returned() {
        let h = harness(vec![Step::Status(503, "busy")], failover_off());
        let out = run(&h, Target::Bolt).await;

        assert_eq!(out.result.unwrap().status(), 503);
        assert!(h.directory.liveness().is_offline(ENDPOINT));
    }

    #[tokio::test]
    async fn test_failover_attempt_never_fails_over_again() {
        let h = harness(
            vec![Step::Status(500, "bolt down"), Step::Status(500, "origin down")],
            failover_on(),
        );
        let out = run(&h, Target::Bolt).await;

        assert!(out.is_failover);
        assert_eq!(out.result.unwrap().status(), 500);
        assert_eq!(h.transport.targets(), vec![Target::Bolt, Target::Origin]);
    }

    #[tokio::test]
    async fn test_origin_first_fails_over_to_bolt() {
        let h = harness(
            vec![Step::Fail("dns"), Step::Status(200, "bolt")],
            failover_on(),
        );
        let out = run(&h, Target::Origin).await;

        assert!(out.is_failover);
        assert_eq!(h.transport.targets(), vec![Target::Origin, Target::Bolt]);
        assert_eq!(out.analytics.origin_status, -1);
        assert_eq!(out.analytics.bolt_status, 200);
        assert_eq!(out.analytics.initial_target, Some(Target::Origin));
    }

    #[tokio::test]
    async fn test_origin_failure_does_not_mark_liveness() {
        let h = harness(vec![Step::Fail("dns")], failover_off());
        run(&h, Target::Origin).await;
        assert_eq!(h.directory.liveness().offline_count(), 0);
    }

    #[tokio::test]
    async fn test_region_redirect_is_followed_once() {
        let h = harness(
            vec![Step::Status(301, REDIRECT_BODY), Step::Status(200, "eu")],
            failover_off(),
        );
        let out = run(&h, Target::Origin).await;

        assert_eq!(out.result.unwrap().status(), 200);
        let calls = h.transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].uri, "https://s3.eu-west-1.amazonaws.com/data/dir/k");
        assert!(calls[1]
            .authorization
            .as_deref()
            .unwrap()
            .contains("/eu-west-1/s3/aws4_request"));
        assert_eq!(h.provider.fetches.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(out.analytics.origin_status, 200);
    }

    #[tokio::test]
    async fn test_redirect_region_header_wins() {
        let h = harness(
            vec![
                Step::StatusWithHeader(301, REDIRECT_BODY, "x-amz-bucket-region", "ap-south-1"),
                Step::Status(200, "ap"),
            ],
            failover_off(),
        );
        run(&h, Target::Origin).await;
        assert_eq!(
            h.transport.calls()[1].uri,
            "https://s3.ap-south-1.amazonaws.com/data/dir/k"
        );
    }

    #[tokio::test]
    async fn test_bodiless_redirect_uses_region_header() {
        let h = harness(
            vec![
                Step::StatusWithHeader(301, "", "x-amz-bucket-region", "eu-west-1"),
                Step::Status(200, ""),
            ],
            failover_off(),
        );
        let out = run(&h, Target::Origin).await;

        assert_eq!(out.result.unwrap().status(), 200);
        let calls = h.transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].uri, "https://s3.eu-west-1.amazonaws.com/data/dir/k");
        assert!(calls[1]
            .authorization
            .as_deref()
            .unwrap()
            .contains("/eu-west-1/s3/aws4_request"));
    }

    #[tokio::test]
    async fn test_bodiless_redirect_without_region_is_fatal() {
        let h = harness(vec![Step::Status(301, "")], failover_off());
        let out = run(&h, Target::Origin).await;

        assert!(matches!(out.result, Err(RouterError::Redirect(_))));
        assert_eq!(h.transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_redirect_is_fatal() {
        let h = harness(
            vec![Step::Status(301, "<<not xml"), Step::Status(200, "bolt")],
            failover_on(),
        );
        let out = run(&h, Target::Origin).await;

        assert!(matches!(out.result, Err(RouterError::Redirect(_))));
        assert!(!out.is_failover);
        assert_eq!(h.transport.targets(), vec![Target::Origin]);
    }

    #[tokio::test]
    async fn test_redirect_credential_failure_is_fatal() {
        let h = harness(vec![Step::Status(301, REDIRECT_BODY)], failover_on());
        h.provider
            .failing
            .lock()
            .unwrap()
            .insert("eu-west-1".to_string());
        let out = run(&h, Target::Origin).await;

        assert!(matches!(out.result, Err(RouterError::Redirect(_))));
        assert_eq!(h.transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_other_301_is_passed_through() {
        let body = "<Error><Code>Moved</Code></Error>";
        let h = harness(vec![Step::Status(301, body)], failover_off());
        let out = run(&h, Target::Origin).await;

        let resp = out.result.unwrap();
        assert_eq!(resp.status(), 301);
        assert_eq!(resp.text().await.unwrap(), body);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_a_liveness_failure() {
        let h = harness(vec![Step::Hang], failover_on());
        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };

        let out = h
            .engine
            .execute(bolt_request(), Target::Bolt, "traffic splitting", &cancel)
            .await;
        canceller.await.unwrap();

        assert!(matches!(out.result, Err(RouterError::Cancelled)));
        assert!(!out.is_failover);
        assert_eq!(h.transport.targets(), vec![Target::Bolt]);
        assert_eq!(h.directory.liveness().offline_count(), 0);
    }

    #[tokio::test]
    async fn test_failover_only_marks_outcome() {
        let h = harness(vec![Step::Status(200, "ok")], failover_off());
        let out = h
            .engine
            .execute_failover_only(bolt_request(), Target::Origin, "panic", &CancellationToken::new())
            .await;
        assert!(out.is_failover);
        assert_eq!(h.transport.targets(), vec![Target::Origin]);
    }

    #[test]
    fn test_should_failover_matrix() {
        let ok = |status| -> Result<reqwest::Response, RouterError> {
            Ok(crate::transport::tests::response(status, ""))
        };
        let transport_err = || -> Result<reqwest::Response, RouterError> {
            Err(RouterError::Transport {
                target: Target::Bolt,
                source: anyhow::anyhow!("reset"),
            })
        };

        let on = failover_on();
        assert!(!on.should_failover(&ok(200)));
        assert!(on.should_failover(&ok(500)));
        assert!(on.should_failover(&ok(403)));
        assert!(on.should_failover(&ok(404)));
        assert!(on.should_failover(&transport_err()));
        assert!(!on.should_failover(&Err(RouterError::Cancelled)));
        assert!(!on.should_failover(&Err(RouterError::Redirect("x".into()))));

        let off = failover_off();
        assert!(!off.should_failover(&ok(500)));
        assert!(!off.should_failover(&ok(404)));
        assert!(!off.should_failover(&transport_err()));
    }
}
