//! Absolute request URLs.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;

use crate::errors::{PipelineError, PipelineResult};

const SCHEME_SEPARATOR: &[u8] = b"://";

/// URL scheme as far as the transports care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// `http`.
    Http,
    /// `https`.
    Https,
    /// Any other scheme.
    Other,
}

impl Protocol {
    /// Returns the default port, if the protocol has one.
    pub fn default_port(self) -> Option<u16> {
        match self {
            Protocol::Http => Some(80),
            Protocol::Https => Some(443),
            Protocol::Other => None,
        }
    }
}

/// An absolute URL parsed once at construction.
///
/// Scheme, host, and path are slices of the stored bytes; accessors never
/// allocate or re-scan. A URL without a path gets `/` appended, so the path
/// always starts with `/`. Any `#fragment` is dropped.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Url {
    bytes: Bytes,
    scheme_end: usize,
    path_start: usize,
    protocol: Protocol,
}

impl Url {
    /// Parses an absolute URL.
    pub fn parse(input: &str) -> PipelineResult<Self> {
        Self::from_bytes(Bytes::copy_from_slice(input.as_bytes()))
    }

    /// Parses an absolute URL from bytes, reusing them when no normalization is needed.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> PipelineResult<Self> {
        let bytes = bytes.into();
        let original = bytes.clone();
        let reject = move |message: &str| {
            PipelineError::invalid_url(String::from_utf8_lossy(&original), message)
        };

        if let Some(b) = bytes.iter().find(|b| !b.is_ascii_graphic()) {
            return Err(reject(&format!("contains byte 0x{:02x}", b)));
        }

        let scheme_end = bytes
            .windows(SCHEME_SEPARATOR.len())
            .position(|w| w == SCHEME_SEPARATOR)
            .ok_or_else(|| reject("missing '://' separator"))?;
        if scheme_end == 0 {
            return Err(reject("empty scheme"));
        }

        let host_start = scheme_end + SCHEME_SEPARATOR.len();
        // The fragment never goes on the wire.
        let bytes = match bytes[host_start..].iter().position(|&b| b == b'#') {
            Some(i) => bytes.slice(..host_start + i),
            None => bytes,
        };
        let host_end = bytes[host_start..]
            .iter()
            .position(|b| matches!(b, b'/' | b'?'))
            .map_or(bytes.len(), |i| host_start + i);
        if host_end == host_start {
            return Err(reject("empty host"));
        }

        // A missing path is normalized to "/" so the request line is always valid.
        let bytes = if bytes.get(host_end) == Some(&b'/') {
            bytes
        } else {
            let mut normalized = BytesMut::with_capacity(bytes.len() + 1);
            normalized.put_slice(&bytes[..host_end]);
            normalized.put_u8(b'/');
            normalized.put_slice(&bytes[host_end..]);
            normalized.freeze()
        };

        let scheme = &bytes[..scheme_end];
        let protocol = if scheme.eq_ignore_ascii_case(b"https") {
            Protocol::Https
        } else if scheme.eq_ignore_ascii_case(b"http") {
            Protocol::Http
        } else {
            Protocol::Other
        };

        Ok(Self {
            bytes,
            scheme_end,
            path_start: host_end,
            protocol,
        })
    }

    /// Returns the protocol.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Returns the scheme bytes, before `://`.
    pub fn scheme(&self) -> &[u8] {
        &self.bytes[..self.scheme_end]
    }

    /// Returns the authority between `://` and the path, including any port.
    pub fn host(&self) -> &[u8] {
        &self.bytes[self.scheme_end + SCHEME_SEPARATOR.len()..self.path_start]
    }

    /// Returns the path and query, starting at the first `/` after the host.
    pub fn path(&self) -> &[u8] {
        &self.bytes[self.path_start..]
    }

    /// Returns `(protocol, host, path)`.
    pub fn deconstruct(&self) -> (Protocol, &[u8], &[u8]) {
        (self.protocol, self.host(), self.path())
    }

    /// Returns the host without the port.
    pub fn host_name(&self) -> &str {
        let host = self.host_str();
        match host.rfind(':') {
            Some(i) if !host.ends_with(']') => &host[..i],
            _ => host,
        }
    }

    /// Returns the explicit port, or the protocol default.
    pub fn port(&self) -> Option<u16> {
        let host = self.host_str();
        match host.rfind(':') {
            Some(i) if !host.ends_with(']') => host[i + 1..].parse().ok(),
            _ => self.protocol.default_port(),
        }
    }

    /// Returns the host as text.
    pub fn host_str(&self) -> &str {
        // ASCII was verified at parse time.
        std::str::from_utf8(self.host()).unwrap_or_default()
    }

    /// Returns the path as text.
    pub fn path_str(&self) -> &str {
        std::str::from_utf8(self.path()).unwrap_or_default()
    }

    /// Returns the whole URL as text.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or_default()
    }

    /// Returns the whole URL as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl FromStr for Url {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Url").field(&self.as_str()).finish()
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
