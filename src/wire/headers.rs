//! Pre-encoded HTTP headers.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::errors::{PipelineError, PipelineResult};

/// Well-known header names.
pub mod names {
    /// `Host`.
    pub const HOST: &str = "Host";
    /// `Content-Length`.
    pub const CONTENT_LENGTH: &str = "Content-Length";
    /// `Content-Type`.
    pub const CONTENT_TYPE: &str = "Content-Type";
    /// `User-Agent`.
    pub const USER_AGENT: &str = "User-Agent";
    /// `Connection`.
    pub const CONNECTION: &str = "Connection";
    /// `Transfer-Encoding`.
    pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
    /// `Retry-After`.
    pub const RETRY_AFTER: &str = "Retry-After";
    /// Per-request correlation id stamped by the telemetry policy.
    pub const CLIENT_REQUEST_ID: &str = "x-client-request-id";
}

/// `Content-Type: application/json`.
pub const CONTENT_TYPE_JSON: Header =
    Header::from_static(b"Content-Type: application/json\r\n", 12);

/// `Content-Type: application/octet-stream`.
pub const CONTENT_TYPE_OCTET_STREAM: Header =
    Header::from_static(b"Content-Type: application/octet-stream\r\n", 12);

/// `Content-Type: text/plain; charset=utf-8`.
pub const CONTENT_TYPE_TEXT: Header =
    Header::from_static(b"Content-Type: text/plain; charset=utf-8\r\n", 12);

/// `Accept: application/json`.
pub const ACCEPT_JSON: Header = Header::from_static(b"Accept: application/json\r\n", 6);

/// `Content-Length: 0`.
pub const CONTENT_LENGTH_ZERO: Header = Header::from_static(b"Content-Length: 0\r\n", 14);

const SEPARATOR: &[u8] = b": ";
const CRLF: &[u8] = b"\r\n";

/// An immutable header, stored as the request-ready bytes `Name: Value\r\n`.
///
/// Equality compares the encoded bytes exactly, so names differing only in
/// case are distinct headers.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Header {
    encoded: Bytes,
    name_len: usize,
}

impl Header {
    const fn from_static(encoded: &'static [u8], name_len: usize) -> Self {
        Self {
            encoded: Bytes::from_static(encoded),
            name_len,
        }
    }

    /// Creates a header from textual name and value.
    ///
    /// Fails with an encoding error if either contains characters that
    /// cannot be sent as ASCII header text.
    pub fn new(name: &str, value: &str) -> PipelineResult<Self> {
        if !value.is_ascii() {
            return Err(PipelineError::encoding(format!(
                "value of header '{}' contains non-ASCII characters",
                name
            )));
        }
        Self::from_bytes(name.as_bytes(), value.as_bytes())
    }

    /// Creates a header from raw name and value bytes.
    ///
    /// Leading and trailing whitespace around the value is not preserved.
    pub fn from_bytes(name: &[u8], value: &[u8]) -> PipelineResult<Self> {
        validate_name(name)?;
        let value = trim_ows(value);
        if let Some(b) = value.iter().find(|b| matches!(b, b'\r' | b'\n' | 0)) {
            return Err(PipelineError::encoding(format!(
                "header value contains forbidden byte 0x{:02x}",
                b
            )));
        }

        let mut buf = BytesMut::with_capacity(name.len() + value.len() + 4);
        buf.put_slice(name);
        buf.put_slice(SEPARATOR);
        buf.put_slice(value);
        buf.put_slice(CRLF);

        Ok(Self {
            encoded: buf.freeze(),
            name_len: name.len(),
        })
    }

    /// Creates a `Content-Length` header.
    pub fn content_length(len: usize) -> Self {
        let value = len.to_string();
        let mut buf = BytesMut::with_capacity(names::CONTENT_LENGTH.len() + value.len() + 4);
        buf.put_slice(names::CONTENT_LENGTH.as_bytes());
        buf.put_slice(SEPARATOR);
        buf.put_slice(value.as_bytes());
        buf.put_slice(CRLF);

        Self {
            encoded: buf.freeze(),
            name_len: names::CONTENT_LENGTH.len(),
        }
    }

    /// Creates a `Content-Type` header for a MIME type.
    pub fn content_type(mime: &mime::Mime) -> PipelineResult<Self> {
        Self::new(names::CONTENT_TYPE, mime.as_ref())
    }

    /// Creates the `User-Agent` header identifying the SDK.
    ///
    /// Formatted as `User-Agent: {app-id }{sdk-name}/{sdk-version} ({platform})`.
    pub fn user_agent(
        sdk_name: &str,
        sdk_version: &str,
        application_id: Option<&str>,
    ) -> PipelineResult<Self> {
        if sdk_name.is_empty() || sdk_version.is_empty() {
            return Err(PipelineError::argument(
                "SDK name and version are required for the User-Agent header",
            ));
        }

        let value = match application_id.filter(|id| !id.is_empty()) {
            Some(id) => format!("{} {}/{} ({})", id, sdk_name, sdk_version, platform_info()),
            None => format!("{}/{} ({})", sdk_name, sdk_version, platform_info()),
        };
        Self::new(names::USER_AGENT, &value)
    }

    /// Parses one `Name: Value\r\n` line from the front of `bytes`.
    ///
    /// Returns the header and the number of bytes consumed.
    pub fn parse(bytes: &[u8]) -> PipelineResult<(Self, usize)> {
        let line_end = find_crlf(bytes)
            .ok_or_else(|| PipelineError::protocol("header line is not CRLF-terminated"))?;
        let (name, value) = split_line(&bytes[..line_end])?;
        Ok((Self::from_bytes(name, value)?, line_end + 2))
    }

    /// Returns the header name.
    pub fn name(&self) -> &[u8] {
        &self.encoded[..self.name_len]
    }

    /// Returns the header value.
    pub fn value(&self) -> &[u8] {
        let end = self.encoded.len() - CRLF.len();
        &self.encoded[self.name_len + SEPARATOR.len()..end]
    }

    /// Returns the value as text, if it is valid UTF-8.
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(self.value()).ok()
    }

    /// Returns true if the name matches `name`, ignoring ASCII case.
    pub fn is(&self, name: &str) -> bool {
        self.name().eq_ignore_ascii_case(name.as_bytes())
    }

    /// Returns the encoded `Name: Value\r\n` bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.encoded
    }

    /// Returns the encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        self.encoded.len()
    }

    /// Copies the encoded header into `buffer`.
    ///
    /// Returns the number of bytes written, or `None` when `buffer` is too
    /// small; callers retry with a larger buffer.
    pub fn try_write(&self, buffer: &mut [u8]) -> Option<usize> {
        let len = self.encoded.len();
        let target = buffer.get_mut(..len)?;
        target.copy_from_slice(&self.encoded);
        Some(len)
    }

    /// Appends the encoded header to a growable buffer.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.encoded);
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Header")
            .field(&String::from_utf8_lossy(self.name()))
            .field(&String::from_utf8_lossy(self.value()))
            .finish()
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}",
            String::from_utf8_lossy(self.name()),
            String::from_utf8_lossy(self.value())
        )
    }
}

/// Iterator over the `(name, value)` pairs of a CRLF-separated header block.
///
/// Lines without a colon are skipped.
#[derive(Debug, Clone)]
pub struct HeaderLines<'a> {
    rest: &'a [u8],
}

impl<'a> HeaderLines<'a> {
    /// Iterates over `block`, which holds zero or more `Name: Value\r\n` lines.
    pub fn new(block: &'a [u8]) -> Self {
        Self { rest: block }
    }

    /// Returns the first value for `name`, ignoring ASCII case.
    pub fn get(self, name: &str) -> Option<&'a [u8]> {
        self.into_iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, v)| v)
    }

    /// Returns true if a header named `name` is present.
    pub fn contains(self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

impl<'a> Iterator for HeaderLines<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        while !self.rest.is_empty() {
            let (line, rest) = match find_crlf(self.rest) {
                Some(end) => (&self.rest[..end], &self.rest[end + 2..]),
                None => (self.rest, &self.rest[self.rest.len()..]),
            };
            self.rest = rest;
            if let Ok(pair) = split_line(line) {
                return Some(pair);
            }
        }
        None
    }
}

pub(crate) fn split_line(line: &[u8]) -> PipelineResult<(&[u8], &[u8])> {
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or_else(|| PipelineError::protocol("header line has no ':' separator"))?;
    let name = &line[..colon];
    if name.is_empty() {
        return Err(PipelineError::protocol("header line has an empty name"));
    }
    Ok((name, trim_ows(&line[colon + 1..])))
}

pub(crate) fn find_crlf(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|w| w == CRLF)
}

fn trim_ows(mut value: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = value {
        value = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = value {
        value = rest;
    }
    value
}

fn validate_name(name: &[u8]) -> PipelineResult<()> {
    if name.is_empty() {
        return Err(PipelineError::encoding("header name is empty"));
    }
    let valid = name.iter().all(|&b| {
        b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
    });
    if !valid {
        return Err(PipelineError::encoding(format!(
            "header name '{}' contains characters outside the token set",
            String::from_utf8_lossy(name)
        )));
    }
    Ok(())
}

fn platform_info() -> String {
    format!("Rust; {}; {}", std::env::consts::OS, std::env::consts::ARCH)
}
