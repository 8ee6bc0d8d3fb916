//! Bucket and region extraction from an inbound S3 request.

use std::fmt;

use http::header::{AUTHORIZATION, HOST};

use crate::auth::parse_signing_region;
use crate::errors::RouterError;

/// Bucket reported for requests that carry no bucket at all, such as
/// authentication probes against the service root.
pub const UNIDENTIFIED_BUCKET: &str = "n-auth-dummy";

/// How the inbound request addressed its bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingStyle {
    /// `bucket.s3.region.amazonaws.com/key`
    VirtualHosted,
    /// `s3.region.amazonaws.com/bucket/key`
    PathStyle,
    /// Neither the host nor the path named a bucket.
    Unknown,
}

impl fmt::Display for AddressingStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AddressingStyle::VirtualHosted => "virtual-hosted-style",
            AddressingStyle::PathStyle => "path-style",
            AddressingStyle::Unknown => "unknown",
        })
    }
}

/// The bucket an inbound request targets and the region it was signed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBucket {
    pub bucket: String,
    pub region: String,
    pub style: AddressingStyle,
}

impl SourceBucket {
    /// Extract the bucket, addressing style and signing region.
    ///
    /// The region comes from the `Authorization` credential scope. When the
    /// header is missing or malformed, `default_region` is used if set,
    /// otherwise the request is rejected.
    pub fn extract<B>(
        req: &http::Request<B>,
        default_region: Option<&str>,
    ) -> Result<SourceBucket, RouterError> {
        let region = match signing_region(req) {
            Ok(region) => region,
            Err(reason) => match default_region {
                Some(region) if !region.is_empty() => region.to_string(),
                _ => return Err(RouterError::Extraction(reason)),
            },
        };

        let host = request_host(req);
        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() > 1 && !labels[0].is_empty() && labels[0].parse::<u64>().is_err() {
            return Ok(SourceBucket {
                bucket: labels[0].to_string(),
                region,
                style: AddressingStyle::VirtualHosted,
            });
        }

        if let Some(bucket) = req.uri().path().split('/').find(|s| !s.is_empty()) {
            return Ok(SourceBucket {
                bucket: bucket.to_string(),
                region,
                style: AddressingStyle::PathStyle,
            });
        }

        Ok(SourceBucket {
            bucket: UNIDENTIFIED_BUCKET.to_string(),
            region,
            style: AddressingStyle::Unknown,
        })
    }

    /// The object key addressed by `req`, without the bucket.
    pub fn object_key<B>(&self, req: &http::Request<B>) -> String {
        let path = req.uri().path().trim_start_matches('/');
        match self.style {
            AddressingStyle::PathStyle => path
                .split_once('/')
                .map(|(_, key)| key.to_string())
                .unwrap_or_default(),
            AddressingStyle::VirtualHosted | AddressingStyle::Unknown => path.to_string(),
        }
    }
}

fn signing_region<B>(req: &http::Request<B>) -> Result<String, String> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or("no auth header in request, cannot extract region")?
        .to_str()
        .map_err(|_| "auth header is not valid ascii".to_string())?;
    parse_signing_region(header)
}

/// Host the client addressed, without any port.
fn request_host<B>(req: &http::Request<B>) -> String {
    let host = req
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().host().map(str::to_string))
        .unwrap_or_default();
    strip_port(&host).to_string()
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host;
    }
    host.rsplit_once(':')
        .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
        .map(|(h, _)| h)
        .unwrap_or(host)
}
