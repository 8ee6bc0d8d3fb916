//! AWS Signature Version 4 signing.
//!
//! The proxy never verifies inbound signatures; it reads the signing scope
//! out of the inbound `Authorization` header and re-signs outbound requests
//! with credentials it owns. Signing steps:
//! 1. Build a canonical request
//! 2. Build a string-to-sign
//! 3. Derive a signing key via HMAC chain
//! 4. Compute the signature and attach the `Authorization` header

use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use http::header::{HeaderName, HeaderValue, AUTHORIZATION, HOST};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::credentials::Credential;

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 of the empty string.
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Service name used in every credential scope.
const SERVICE: &str = "s3";

/// Headers outside the `x-amz-*` family that are covered by the signature.
const SIGNED_EXTRA_HEADERS: &[&str] = &["host", "content-type", "content-md5", "range"];

// ── Authorization header parsing ────────────────────────────────────

/// Extract the signing region from an `Authorization` header value.
///
/// Expected format:
/// ```text
/// AWS4-HMAC-SHA256 Credential=AKID/20260222/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature=abcdef...
/// ```
pub fn parse_signing_region(header: &str) -> Result<String, String> {
    let rest = header
        .trim()
        .strip_prefix("AWS4-HMAC-SHA256")
        .ok_or("Authorization header does not start with AWS4-HMAC-SHA256")?
        .trim();

    let credential = rest
        .split(',')
        .find_map(|part| part.trim().strip_prefix("Credential="))
        .map(str::trim)
        .ok_or("Missing Credential in Authorization header")?;

    // AKID/YYYYMMDD/region/service/aws4_request
    let parts: Vec<&str> = credential.split('/').collect();
    if parts.len() != 5 {
        return Err(format!(
            "Invalid Credential format in Authorization header: {credential}"
        ));
    }
    if parts[2].is_empty() {
        return Err("Credential scope has an empty region".to_string());
    }
    Ok(parts[2].to_string())
}

// ── Request signing ─────────────────────────────────────────────────

/// Sign `req` in place for `region` with `credential`.
///
/// Sets `host` (from the URI authority when absent), `x-amz-date`,
/// `x-amz-content-sha256` and, for temporary credentials,
/// `x-amz-security-token`, then attaches the `Authorization` header.
/// Signed headers are `host`, `content-type`, `content-md5`, `range` and
/// every `x-amz-*` header present on the request.
pub fn sign_request(
    req: &mut http::Request<Bytes>,
    credential: &Credential,
    region: &str,
    payload_hash: &str,
    now: DateTime<Utc>,
) -> Result<(), String> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();

    if !req.headers().contains_key(HOST) {
        let authority = req
            .uri()
            .authority()
            .ok_or("request URI has no host")?
            .to_string();
        set_header(req, HOST.as_str(), &authority)?;
    }
    set_header(req, "x-amz-date", &amz_date)?;
    set_header(req, "x-amz-content-sha256", payload_hash)?;
    match credential.session_token.as_deref() {
        Some(token) if !token.is_empty() => set_header(req, "x-amz-security-token", token)?,
        _ => {
            req.headers_mut().remove("x-amz-security-token");
        }
    }
    req.headers_mut().remove(AUTHORIZATION);

    let headers = headers_for_signing(req.headers());
    let signed_headers = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = build_canonical_request(
        req.method().as_str(),
        &s3_uri_encode_path(req.uri().path()),
        req.uri().query().unwrap_or(""),
        &headers,
        &signed_headers,
        payload_hash,
    );

    let credential_scope = format!("{date_stamp}/{region}/{SERVICE}/aws4_request");
    let string_to_sign = build_string_to_sign(&amz_date, &credential_scope, &canonical_request);
    let signing_key =
        derive_signing_key(&credential.secret_access_key, &date_stamp, region, SERVICE);
    let signature = compute_signature(&signing_key, &string_to_sign);

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credential.access_key_id
    );
    set_header(req, AUTHORIZATION.as_str(), &authorization)
}

/// Hex-encoded SHA-256 of a request body.
pub fn payload_sha256(body: &[u8]) -> String {
    if body.is_empty() {
        return EMPTY_SHA256.to_string();
    }
    hex::encode(Sha256::digest(body))
}

fn set_header(req: &mut http::Request<Bytes>, name: &str, value: &str) -> Result<(), String> {
    let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| e.to_string())?;
    let value = HeaderValue::from_str(value).map_err(|e| format!("invalid {name} value: {e}"))?;
    req.headers_mut().insert(name, value);
    Ok(())
}

/// Collect the headers covered by the signature as sorted
/// (lowercase-name, comma-joined value) pairs.
fn headers_for_signing(header_map: &http::HeaderMap) -> Vec<(String, String)> {
    let mut header_values: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in header_map.iter() {
        let name = name.as_str();
        if !name.starts_with("x-amz-") && !SIGNED_EXTRA_HEADERS.contains(&name) {
            continue;
        }
        let val_str = String::from_utf8_lossy(value.as_bytes()).to_string();
        header_values
            .entry(name.to_string())
            .or_default()
            .push(val_str);
    }

    header_values
        .into_iter()
        .map(|(name, values)| (name, values.join(",")))
        .collect()
}

// ── Canonical request construction ──────────────────────────────────

/// Build the canonical request string.
///
/// ```text
/// HTTPMethod + '\n' +
/// CanonicalURI + '\n' +
/// CanonicalQueryString + '\n' +
/// CanonicalHeaders + '\n' +
/// SignedHeaders + '\n' +
/// HashedPayload
/// ```
pub fn build_canonical_request(
    method: &str,
    uri: &str,
    query_string: &str,
    headers: &[(String, String)],
    signed_headers_str: &str,
    payload_hash: &str,
) -> String {
    let canonical_uri = if uri.is_empty() { "/" } else { uri };
    let canonical_query = build_canonical_query_string(query_string);

    let mut canonical_headers = String::new();
    for name in signed_headers_str.split(';') {
        if let Some((hname, hval)) = headers.iter().find(|(n, _)| n == name) {
            canonical_headers.push_str(hname);
            canonical_headers.push(':');
            canonical_headers.push_str(&collapse_whitespace(hval));
            canonical_headers.push('\n');
        }
    }

    format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers_str}\n{payload_hash}"
    )
}

/// Build the canonical query string from raw query string.
///
/// Parameters are decoded, re-encoded with S3 rules, sorted by name then
/// value and joined with `&`. Parameters with no value use `name=`.
pub fn build_canonical_query_string(query_string: &str) -> String {
    if query_string.is_empty() {
        return String::new();
    }

    let mut params: Vec<(String, String)> = query_string
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (k, v) = part.split_once('=').unwrap_or((part, ""));
            (
                s3_uri_encode(&percent_decode(k), true),
                s3_uri_encode(&percent_decode(v), true),
            )
        })
        .collect();

    params.sort();

    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

// ── String to sign ──────────────────────────────────────────────────

/// Build the string to sign.
///
/// ```text
/// AWS4-HMAC-SHA256 + '\n' +
/// Timestamp + '\n' +
/// CredentialScope + '\n' +
/// HexEncode(SHA256(CanonicalRequest))
/// ```
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request: &str,
) -> String {
    let hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!("AWS4-HMAC-SHA256\n{timestamp}\n{credential_scope}\n{hash}")
}

// ── Signing key derivation ──────────────────────────────────────────

/// Derive the signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC-SHA256("AWS4" + secret, dateStamp)
/// kRegion  = HMAC-SHA256(kDate, region)
/// kService = HMAC-SHA256(kRegion, "s3")
/// kSigning = HMAC-SHA256(kService, "aws4_request")
/// ```
pub fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Vec<u8> {
    let k_secret = format!("AWS4{secret_key}");
    let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compute the signature: HexEncode(HMAC-SHA256(SigningKey, StringToSign)).
pub fn compute_signature(signing_key: &[u8], string_to_sign: &str) -> String {
    hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes()))
}

// ── URI encoding ────────────────────────────────────────────────────

/// S3-compatible URI encoding (RFC 3986 with S3 exceptions).
///
/// - Characters A-Z, a-z, 0-9, -, _, ., ~ are NOT encoded.
/// - All other characters are percent-encoded with uppercase hex.
/// - If `encode_slash` is false, `/` is NOT encoded (for URI paths).
pub fn s3_uri_encode(input: &str, encode_slash: bool) -> String {
    let mut encoded = String::with_capacity(input.len() * 2);
    for byte in input.bytes() {
        let ch = byte as char;
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' || ch == '~' {
            encoded.push(ch);
        } else if ch == '/' && !encode_slash {
            encoded.push('/');
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

/// URI-encode a path for S3 canonical requests.
///
/// The raw path may already be percent-encoded, so it is decoded first and
/// each segment re-encoded (preserving `/`).
pub fn s3_uri_encode_path(raw_path: &str) -> String {
    if raw_path.is_empty() || raw_path == "/" {
        return "/".to_string();
    }
    let decoded = percent_decode(raw_path);
    let result = decoded
        .split('/')
        .map(|seg| s3_uri_encode(seg, false))
        .collect::<Vec<_>>()
        .join("/");
    if result.starts_with('/') {
        result
    } else {
        format!("/{result}")
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Collapse consecutive whitespace in a header value to a single space,
/// and trim leading/trailing whitespace.
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn percent_decode(s: &str) -> String {
    percent_encoding::percent_decode_str(s)
        .decode_utf8_lossy()
        .into_owned()
}

// ── Tests ───────────────────────────────────────────────────────────
