//! Request transformation and dual signing.
//!
//! One inbound S3 request becomes a [`BoltRequest`]: a copy addressed to a
//! cache-tier endpoint and a copy addressed to the cloud origin, each signed
//! for its destination, plus a routing hash over bucket and key.
//!
//! The cache-tier copy does not carry a signature over its own payload.
//! Instead it carries the signing headers of a zero-length `HEAD` probe
//! scoped to a random per-request auth prefix, which the cache tier
//! validates against the origin.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{HeaderName, HeaderValue, AUTHORIZATION, HOST, USER_AGENT};
use http::{Method, Request, Uri};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::auth::{payload_sha256, sign_request, EMPTY_SHA256};
use crate::credentials::Credential;
use crate::errors::RouterError;
use crate::source_bucket::{AddressingStyle, SourceBucket};

pub const HEADER_AUTH_PREFIX: &str = "x-bolt-auth-prefix";
pub const HEADER_PASSTHROUGH_READ: &str = "x-bolt-passthrough-read";
pub const HEADER_AVAILABILITY_ZONE: &str = "x-bolt-availability-zone";

/// Headers that describe one hop and are never forwarded.
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Probe headers copied onto the cache-tier request.
const PROBE_HEADERS: &[&str] = &[
    "x-amz-security-token",
    "x-amz-date",
    "authorization",
    "x-amz-content-sha256",
];

/// Per-process settings that shape the cache-tier request.
#[derive(Debug, Clone)]
pub struct TransformOptions {
    /// `Host` header the cache tier expects.
    pub bolt_hostname: String,
    pub user_agent_prefix: String,
    /// Availability-zone hint; omitted when empty.
    pub zone_id: String,
    pub passthrough: bool,
    /// `http` in local mode, `https` otherwise.
    pub bolt_scheme: &'static str,
}

/// The cache-tier and origin representations of one inbound request.
#[derive(Debug)]
pub struct BoltRequest {
    pub bolt: Request<Bytes>,
    pub origin: Request<Bytes>,
    /// Cache-tier endpoint `bolt` is addressed to.
    pub bolt_endpoint: String,
    pub source: SourceBucket,
    pub object_key: String,
    /// CRC32 of `bucket/key`.
    pub routing_hash: u32,
}

impl BoltRequest {
    /// Build both representations of `inbound`.
    pub fn new(
        inbound: &Request<Bytes>,
        source: SourceBucket,
        credential: &Credential,
        bolt_endpoint: String,
        opts: &TransformOptions,
        now: DateTime<Utc>,
    ) -> Result<BoltRequest, RouterError> {
        let object_key = source.object_key(inbound);
        let routing_hash = routing_hash(&source.bucket, &object_key);

        let origin = origin_request(inbound, &source, &source.region, credential, now)?;

        let auth_prefix = random_auth_prefix();
        let probe = probe_request(&source, &auth_prefix, credential, now)?;
        let bolt = bolt_request(inbound, &source, &bolt_endpoint, &probe, &auth_prefix, opts)?;

        Ok(BoltRequest {
            bolt,
            origin,
            bolt_endpoint,
            source,
            object_key,
            routing_hash,
        })
    }

    /// Re-address and re-sign the origin copy for `region`, keeping the
    /// addressing style. Used after a cross-region redirect.
    pub fn retarget_origin(
        &mut self,
        region: &str,
        credential: &Credential,
        now: DateTime<Utc>,
    ) -> Result<(), RouterError> {
        let origin = origin_request(&self.origin, &self.source, region, credential, now)?;
        self.origin = origin;
        self.source.region = region.to_string();
        Ok(())
    }
}

/// CRC32 over `bucket + "/" + key`.
pub fn routing_hash(bucket: &str, key: &str) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bucket.as_bytes());
    hasher.update(b"/");
    hasher.update(key.as_bytes());
    hasher.finalize()
}

/// Origin host for a bucket in `region`.
pub fn origin_host(source: &SourceBucket, region: &str) -> String {
    match source.style {
        AddressingStyle::VirtualHosted => format!("{}.s3.{region}.amazonaws.com", source.bucket),
        AddressingStyle::PathStyle | AddressingStyle::Unknown => {
            format!("s3.{region}.amazonaws.com")
        }
    }
}

/// Copy a request. `http::Request` is not `Clone` because of extensions,
/// which are never carried here.
pub fn clone_request(req: &Request<Bytes>) -> Request<Bytes> {
    let mut out = Request::new(req.body().clone());
    *out.method_mut() = req.method().clone();
    *out.uri_mut() = req.uri().clone();
    *out.version_mut() = req.version();
    *out.headers_mut() = req.headers().clone();
    out
}

fn origin_request(
    from: &Request<Bytes>,
    source: &SourceBucket,
    region: &str,
    credential: &Credential,
    now: DateTime<Utc>,
) -> Result<Request<Bytes>, RouterError> {
    let mut req = clone_request(from);
    let headers = req.headers_mut();
    headers.remove(AUTHORIZATION);
    headers.remove("x-amz-security-token");
    headers.remove(HOST);
    strip_hop_by_hop(headers);

    let host = origin_host(source, region);
    *req.uri_mut() = rebase_uri("https", &host, path_and_query(from))?;

    let payload_hash = match req
        .headers()
        .get("x-amz-content-sha256")
        .and_then(|v| v.to_str().ok())
    {
        Some(hash) if !hash.is_empty() => hash.to_string(),
        _ => payload_sha256(req.body()),
    };

    sign_request(&mut req, credential, region, &payload_hash, now).map_err(|message| {
        RouterError::Signing {
            stage: "origin",
            message,
        }
    })?;
    Ok(req)
}

fn probe_request(
    source: &SourceBucket,
    auth_prefix: &str,
    credential: &Credential,
    now: DateTime<Utc>,
) -> Result<Request<Bytes>, RouterError> {
    let signing_err = |message: String| RouterError::Signing {
        stage: "auth probe",
        message,
    };
    let url = format!(
        "https://s3.{}.amazonaws.com/{}/{auth_prefix}/auth",
        source.region, source.bucket
    );
    let mut req = Request::builder()
        .method(Method::HEAD)
        .uri(url)
        .body(Bytes::new())
        .map_err(|e| signing_err(e.to_string()))?;
    sign_request(&mut req, credential, &source.region, EMPTY_SHA256, now).map_err(signing_err)?;
    Ok(req)
}

fn bolt_request(
    inbound: &Request<Bytes>,
    source: &SourceBucket,
    endpoint: &str,
    probe: &Request<Bytes>,
    auth_prefix: &str,
    opts: &TransformOptions,
) -> Result<Request<Bytes>, RouterError> {
    let mut req = clone_request(inbound);

    let path = match source.style {
        AddressingStyle::VirtualHosted => format!("/{}{}", source.bucket, inbound.uri().path()),
        AddressingStyle::PathStyle | AddressingStyle::Unknown => inbound.uri().path().to_string(),
    };
    let path_and_query = match inbound.uri().query() {
        Some(q) => format!("{path}?{q}"),
        None => path,
    };
    *req.uri_mut() = rebase_uri(opts.bolt_scheme, endpoint, &path_and_query)?;

    let user_agent = inbound
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let user_agent = format!("{}{user_agent}", opts.user_agent_prefix);

    let headers = req.headers_mut();
    strip_hop_by_hop(headers);
    for name in PROBE_HEADERS {
        match probe.headers().get(*name) {
            Some(value) => {
                headers.insert(HeaderName::from_static(*name), value.clone());
            }
            None => {
                headers.remove(*name);
            }
        }
    }

    let mut set = |name: HeaderName, value: &str| -> Result<(), RouterError> {
        let value = HeaderValue::from_str(value).map_err(|e| RouterError::Signing {
            stage: "bolt",
            message: format!("invalid {name} header: {e}"),
        })?;
        headers.insert(name, value);
        Ok(())
    };
    set(HOST, &opts.bolt_hostname)?;
    set(HeaderName::from_static(HEADER_AUTH_PREFIX), auth_prefix)?;
    set(USER_AGENT, &user_agent)?;
    if !opts.passthrough {
        set(HeaderName::from_static(HEADER_PASSTHROUGH_READ), "disable")?;
    }
    if !opts.zone_id.is_empty() {
        set(HeaderName::from_static(HEADER_AVAILABILITY_ZONE), &opts.zone_id)?;
    }

    Ok(req)
}

fn random_auth_prefix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect()
}

fn path_and_query(req: &Request<Bytes>) -> &str {
    req.uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
}

fn rebase_uri(scheme: &str, authority: &str, path_and_query: &str) -> Result<Uri, RouterError> {
    format!("{scheme}://{authority}{path_and_query}")
        .parse()
        .map_err(|e: http::uri::InvalidUri| RouterError::Signing {
            stage: "rewrite",
            message: format!("invalid target uri for {authority}: {e}"),
        })
}

fn strip_hop_by_hop(headers: &mut http::HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const AUTH: &str = "AWS4-HMAC-SHA256 Credential=CLIENTKEY/20240101/us-west-2/s3/aws4_request, SignedHeaders=host;x-amz-date, Signature=abc";

    fn credential(token: Option<&str>) -> Credential {
        Credential {
            access_key_id: "AKIDPROXY".to_string(),
            secret_access_key: "proxy-secret".to_string(),
            session_token: token.map(str::to_string),
            expires_at: None,
            can_expire: token.is_some(),
        }
    }

    fn opts() -> TransformOptions {
        TransformOptions {
            bolt_hostname: "bolt.us-west-2.example.io".to_string(),
            user_agent_prefix: "granica-sidekick/".to_string(),
            zone_id: "usw2-az1".to_string(),
            passthrough: false,
            bolt_scheme: "https",
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn inbound(host: &str, path: &str) -> Request<Bytes> {
        Request::builder()
            .method("GET")
            .uri(path)
            .header("host", host)
            .header("authorization", AUTH)
            .header("x-amz-security-token", "client-token")
            .header("user-agent", "aws-sdk-go/1.0")
            .header("x-amz-content-sha256", EMPTY_SHA256)
            .body(Bytes::new())
            .unwrap()
    }

    fn build(req: &Request<Bytes>, cred: &Credential, opts: &TransformOptions) -> BoltRequest {
        let source = SourceBucket::extract(req, None).unwrap();
        BoltRequest::new(req, source, cred, "10.0.0.7".to_string(), opts, now()).unwrap()
    }

    fn header<'a>(req: &'a Request<Bytes>, name: &str) -> &'a str {
        req.headers().get(name).unwrap().to_str().unwrap()
    }

    #[test]
    fn test_virtual_hosted_bolt_request() {
        let req = inbound("data.s3.us-west-2.amazonaws.com", "/dir/obj.parquet?versionId=3");
        let br = build(&req, &credential(None), &opts());

        assert_eq!(
            br.bolt.uri().to_string(),
            "https://10.0.0.7/data/dir/obj.parquet?versionId=3"
        );
        assert_eq!(header(&br.bolt, "host"), "bolt.us-west-2.example.io");
        assert_eq!(header(&br.bolt, "user-agent"), "granica-sidekick/aws-sdk-go/1.0");
        assert_eq!(header(&br.bolt, "x-bolt-passthrough-read"), "disable");
        assert_eq!(header(&br.bolt, "x-bolt-availability-zone"), "usw2-az1");
        assert_eq!(header(&br.bolt, "x-bolt-auth-prefix").len(), 4);
        assert_eq!(br.object_key, "dir/obj.parquet");
        assert_eq!(br.bolt_endpoint, "10.0.0.7");
    }

    #[test]
    fn test_path_style_bolt_request_keeps_path() {
        let req = inbound("localhost:7075", "/data/dir/obj.parquet");
        let mut o = opts();
        o.bolt_scheme = "http";
        let br = build(&req, &credential(None), &o);
        assert_eq!(br.bolt.uri().to_string(), "http://10.0.0.7/data/dir/obj.parquet");
        assert_eq!(br.object_key, "dir/obj.parquet");
    }

    #[test]
    fn test_bolt_request_carries_auth_head_signature() {
        let req = inbound("data.s3.us-west-2.amazonaws.com", "/k");
        let br = build(&req, &credential(Some("proxy-token")), &opts());

        let auth = header(&br.bolt, "authorization");
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDPROXY/20240101/us-west-2/s3/aws4_request"));
        assert_eq!(header(&br.bolt, "x-amz-security-token"), "proxy-token");
        assert_eq!(header(&br.bolt, "x-amz-date"), "20240101T120000Z");
        assert_eq!(header(&br.bolt, "x-amz-content-sha256"), EMPTY_SHA256);
    }

    #[test]
    fn test_client_token_dropped_without_proxy_token() {
        let req = inbound("data.s3.us-west-2.amazonaws.com", "/k");
        let br = build(&req, &credential(None), &opts());
        assert!(!br.bolt.headers().contains_key("x-amz-security-token"));
        assert!(!br.origin.headers().contains_key("x-amz-security-token"));
    }

    #[test]
    fn test_auth_head_matches_bolt_signature() {
        let cred = credential(None);
        let source = SourceBucket::extract(&inbound("localhost", "/data/k"), None).unwrap();
        let probe = probe_request(&source, "AbCd", &cred, now()).unwrap();
        assert_eq!(
            probe.uri().to_string(),
            "https://s3.us-west-2.amazonaws.com/data/AbCd/auth"
        );
        assert_eq!(probe.method(), Method::HEAD);
        assert!(header(&probe, "authorization").contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date,"));
    }

    #[test]
    fn test_passthrough_omits_header() {
        let req = inbound("data.s3.us-west-2.amazonaws.com", "/k");
        let mut o = opts();
        o.passthrough = true;
        o.zone_id.clear();
        let br = build(&req, &credential(None), &o);
        assert!(!br.bolt.headers().contains_key("x-bolt-passthrough-read"));
        assert!(!br.bolt.headers().contains_key("x-bolt-availability-zone"));
    }

    #[test]
    fn test_origin_request_virtual_hosted() {
        let req = inbound("data.s3.us-west-2.amazonaws.com", "/dir/a%20b.txt?partNumber=1");
        let br = build(&req, &credential(None), &opts());

        assert_eq!(
            br.origin.uri().to_string(),
            "https://data.s3.us-west-2.amazonaws.com/dir/a%20b.txt?partNumber=1"
        );
        assert_eq!(header(&br.origin, "host"), "data.s3.us-west-2.amazonaws.com");
        assert_eq!(header(&br.origin, "user-agent"), "aws-sdk-go/1.0");
        let auth = header(&br.origin, "authorization");
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDPROXY/"));
        assert!(!auth.contains("CLIENTKEY"));
    }

    #[test]
    fn test_origin_request_path_style() {
        let req = inbound("localhost:7075", "/data/k");
        let br = build(&req, &credential(None), &opts());
        assert_eq!(br.origin.uri().to_string(), "https://s3.us-west-2.amazonaws.com/data/k");
    }

    #[test]
    fn test_origin_hashes_body_when_hash_missing() {
        let req = Request::builder()
            .method("PUT")
            .uri("/data/k")
            .header("host", "localhost")
            .header("authorization", AUTH)
            .header("transfer-encoding", "chunked")
            .body(Bytes::from_static(b"abc"))
            .unwrap();
        let br = build(&req, &credential(None), &opts());
        assert_eq!(
            header(&br.origin, "x-amz-content-sha256"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(!br.origin.headers().contains_key("transfer-encoding"));
        assert!(!br.bolt.headers().contains_key("transfer-encoding"));
        assert_eq!(br.bolt.body(), &Bytes::from_static(b"abc"));
    }

    #[test]
    fn test_retarget_origin() {
        let req = inbound("data.s3.us-west-2.amazonaws.com", "/k");
        let mut br = build(&req, &credential(None), &opts());

        br.retarget_origin("eu-central-1", &credential(None), now()).unwrap();

        assert_eq!(br.origin.uri().to_string(), "https://data.s3.eu-central-1.amazonaws.com/k");
        assert_eq!(header(&br.origin, "host"), "data.s3.eu-central-1.amazonaws.com");
        assert!(header(&br.origin, "authorization").contains("/eu-central-1/s3/aws4_request"));
        assert_eq!(br.source.region, "eu-central-1");
    }

    #[test]
    fn test_routing_hash_is_stable() {
        assert_eq!(routing_hash("b", "k"), crc32fast::hash(b"b/k"));
        assert_eq!(routing_hash("b", "k"), routing_hash("b", "k"));
        assert_ne!(routing_hash("b", "k1"), routing_hash("b", "k2"));

        let vh = build(&inbound("data.s3.us-west-2.amazonaws.com", "/x/y"), &credential(None), &opts());
        let ps = build(&inbound("localhost", "/data/x/y"), &credential(None), &opts());
        assert_eq!(vh.routing_hash, ps.routing_hash);
    }
}
