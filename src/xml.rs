//! S3 XML bodies.
//!
//! The proxy only needs two XML shapes: the `<Error>` document it renders
//! for terminal failures, and the `PermanentRedirect` error the origin
//! returns when a bucket lives in another region.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Deserialize;
use std::io::Cursor;

// ── Error response ──────────────────────────────────────────────────

/// Render an S3 `<Error>` XML document.
///
/// ```xml
/// <?xml version="1.0" encoding="UTF-8"?>
/// <Error>
///   <Code>InternalError</Code>
///   <Message>no endpoints available</Message>
///   <Resource></Resource>
///   <RequestId>abcd-1234</RequestId>
/// </Error>
/// ```
pub fn render_error(code: &str, message: &str, resource: &str, request_id: &str) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer
        .write_event(Event::Decl(quick_xml::events::BytesDecl::new(
            "1.0",
            Some("UTF-8"),
            None,
        )))
        .expect("xml decl");

    write_simple_element_group(
        &mut writer,
        "Error",
        &[
            ("Code", code),
            ("Message", message),
            ("Resource", resource),
            ("RequestId", request_id),
        ],
    );

    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

// ── Redirect response ───────────────────────────────────────────────

/// Error body S3 returns alongside a `301 Moved Permanently`.
///
/// ```xml
/// <Error>
///   <Code>PermanentRedirect</Code>
///   <Message>The bucket you are attempting to access must be addressed using the specified endpoint.</Message>
///   <Endpoint>my-bucket.s3-us-west-2.amazonaws.com</Endpoint>
///   <Bucket>my-bucket</Bucket>
///   <RequestId>..</RequestId>
///   <HostId>..</HostId>
/// </Error>
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3RedirectResponse {
    #[serde(rename = "Code", default)]
    pub code: String,
    #[serde(rename = "Message", default)]
    pub message: String,
    #[serde(rename = "Endpoint", default)]
    pub endpoint: String,
    #[serde(rename = "Bucket", default)]
    pub bucket: String,
    #[serde(rename = "RequestId", default)]
    pub request_id: String,
    #[serde(rename = "HostId", default)]
    pub host_id: String,
}

impl S3RedirectResponse {
    /// Whether this is a `PermanentRedirect` error.
    pub fn is_permanent_redirect(&self) -> bool {
        self.code == "PermanentRedirect"
    }
}

/// Parse an S3 redirect error body.
pub fn parse_redirect(body: &str) -> Result<S3RedirectResponse, String> {
    quick_xml::de::from_str(body).map_err(|e| format!("malformed redirect body: {e}"))
}

/// Derive the region from a redirect endpoint hostname.
///
/// Both legacy dash form (`bucket.s3-us-west-2.amazonaws.com`) and dot form
/// (`bucket.s3.us-west-2.amazonaws.com`) are understood. A global endpoint
/// (`bucket.s3.amazonaws.com`) means `us-east-1`.
pub fn region_from_endpoint(endpoint: &str) -> Option<String> {
    let labels: Vec<&str> = endpoint.trim_end_matches('.').split('.').collect();
    let s3_pos = labels
        .iter()
        .rposition(|l| *l == "s3" || l.starts_with("s3-"))?;
    let label = labels[s3_pos];

    if let Some(region) = label.strip_prefix("s3-") {
        if region == "external-1" {
            return Some("us-east-1".to_string());
        }
        return (!region.is_empty()).then(|| region.to_string());
    }

    match labels.get(s3_pos + 1) {
        Some(next) if *next == "amazonaws" => Some("us-east-1".to_string()),
        Some(next) if next.contains('-') => Some((*next).to_string()),
        _ => None,
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Write a `<tag>text</tag>` element.
fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str, text: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .expect("start tag");
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .expect("text");
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .expect("end tag");
}

/// Write a parent element containing a flat list of child text elements.
fn write_simple_element_group(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    parent: &str,
    children: &[(&str, &str)],
) {
    writer
        .write_event(Event::Start(BytesStart::new(parent)))
        .expect("start parent");
    for (tag, value) in children {
        write_text_element(writer, tag, value);
    }
    writer
        .write_event(Event::End(BytesEnd::new(parent)))
        .expect("end parent");
}
