//! Incremental HTTP/1.1 response-head parser.
//!
//! [`parse_response_head`] is run over the bytes received so far after every
//! read. It answers [`ParseStatus::NeedMoreData`] until the status line and
//! the full header block are present, then reports where the header block
//! and the content start.

use std::ops::Range;

use super::headers::{find_crlf, split_line};
use crate::errors::{PipelineError, PipelineResult};

/// Responses whose head exceeds this size are rejected.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

const HEAD_END: &[u8] = b"\r\n\r\n";
const VERSION_PREFIX: &[u8] = b"HTTP/1.";

/// Outcome of a parse attempt over a partial buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseStatus {
    /// The head is incomplete; read again and re-parse.
    NeedMoreData,
    /// The status line and header block are complete.
    Done(ResponseHead),
}

/// Framing information of a parsed response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// Status code.
    pub status: u16,
    /// Byte range of the header lines, each terminated by CRLF.
    pub headers: Range<usize>,
    /// Offset of the first content byte.
    pub content_start: usize,
    /// Value of `Content-Length`, if present.
    pub content_length: Option<usize>,
    /// True if `Transfer-Encoding: chunked` was announced.
    pub chunked: bool,
    /// False if the server asked to close the connection after this response.
    pub keep_alive: bool,
}

impl ResponseHead {
    /// Returns true if a response with this status never carries content.
    pub fn is_bodiless(&self) -> bool {
        matches!(self.status, 100..=199 | 204 | 304)
    }
}

/// Parses the response head at the start of `buf`.
pub fn parse_response_head(buf: &[u8]) -> PipelineResult<ParseStatus> {
    // Reject garbage before waiting for a full line.
    let prefix_len = buf.len().min(VERSION_PREFIX.len());
    if buf[..prefix_len] != VERSION_PREFIX[..prefix_len] {
        return Err(PipelineError::protocol("response does not start with an HTTP/1.x status line"));
    }

    let Some(status_end) = find_crlf(buf) else {
        return need_more(buf);
    };
    let (status, http10) = parse_status_line(&buf[..status_end])?;

    let headers_start = status_end + 2;
    // The blank line may directly follow the status line.
    let head_end = if buf[status_end..].starts_with(HEAD_END) {
        status_end
    } else {
        match buf[headers_start..]
            .windows(HEAD_END.len())
            .position(|w| w == HEAD_END)
        {
            Some(i) => headers_start + i,
            None => return need_more(buf),
        }
    };

    let headers = headers_start..(head_end + 2).max(headers_start);
    let mut head = ResponseHead {
        status,
        headers: headers.clone(),
        content_start: head_end + HEAD_END.len(),
        content_length: None,
        chunked: false,
        keep_alive: !http10,
    };

    for line in buf[headers].split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let (name, value) = split_line(line)?;

        if name.eq_ignore_ascii_case(b"content-length") {
            let length = parse_content_length(value)?;
            if head.content_length.is_some_and(|existing| existing != length) {
                return Err(PipelineError::protocol("conflicting Content-Length headers"));
            }
            head.content_length = Some(length);
        } else if name.eq_ignore_ascii_case(b"transfer-encoding") {
            head.chunked = value
                .split(|&b| b == b',')
                .any(|coding| trim(coding).eq_ignore_ascii_case(b"chunked"));
        } else if name.eq_ignore_ascii_case(b"connection") {
            for option in value.split(|&b| b == b',').map(trim) {
                if option.eq_ignore_ascii_case(b"close") {
                    head.keep_alive = false;
                } else if option.eq_ignore_ascii_case(b"keep-alive") {
                    head.keep_alive = true;
                }
            }
        }
    }

    Ok(ParseStatus::Done(head))
}

fn need_more(buf: &[u8]) -> PipelineResult<ParseStatus> {
    if buf.len() > MAX_HEAD_SIZE {
        return Err(PipelineError::protocol(format!(
            "response head exceeds {} bytes",
            MAX_HEAD_SIZE
        )));
    }
    Ok(ParseStatus::NeedMoreData)
}

/// Parses `HTTP/1.x SSS reason`, returning the status and whether it is HTTP/1.0.
fn parse_status_line(line: &[u8]) -> PipelineResult<(u16, bool)> {
    let malformed = || {
        PipelineError::protocol(format!(
            "malformed status line '{}'",
            String::from_utf8_lossy(line)
        ))
    };

    let mut parts = line.splitn(3, |&b| b == b' ');
    let version = parts.next().ok_or_else(malformed)?;
    let code = parts.next().ok_or_else(malformed)?;

    let http10 = match version {
        b"HTTP/1.1" => false,
        b"HTTP/1.0" => true,
        _ => return Err(malformed()),
    };
    if code.len() != 3 || !code.iter().all(u8::is_ascii_digit) {
        return Err(malformed());
    }
    let status = code
        .iter()
        .fold(0u16, |acc, &d| acc * 10 + u16::from(d - b'0'));
    if status < 100 {
        return Err(malformed());
    }

    Ok((status, http10))
}

fn parse_content_length(value: &[u8]) -> PipelineResult<usize> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| {
            PipelineError::protocol(format!(
                "invalid Content-Length '{}'",
                String::from_utf8_lossy(value)
            ))
        })
}

fn trim(value: &[u8]) -> &[u8] {
    let start = value.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(value.len());
    let end = value.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &value[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const RESPONSE: &[u8] =
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nx-ms-request-id: abc\r\n\r\nhello";

    fn done(buf: &[u8]) -> ResponseHead {
        match parse_response_head(buf).unwrap() {
            ParseStatus::Done(head) => head,
            ParseStatus::NeedMoreData => panic!("expected a complete head"),
        }
    }

    #[test]
    fn test_complete_head() {
        let head = done(RESPONSE);
        assert_eq!(head.status, 200);
        assert_eq!(head.content_length, Some(5));
        assert!(head.keep_alive);
        assert!(!head.chunked);
        assert_eq!(
            &RESPONSE[head.headers.clone()],
            b"Content-Length: 5\r\nx-ms-request-id: abc\r\n"
        );
        assert_eq!(&RESPONSE[head.content_start..], b"hello");
    }

    #[test]
    fn test_every_prefix_needs_more_data() {
        let head_len = RESPONSE.len() - 5;
        for end in 0..head_len {
            assert_eq!(
                parse_response_head(&RESPONSE[..end]).unwrap(),
                ParseStatus::NeedMoreData,
                "prefix of {} bytes",
                end
            );
        }
        assert_eq!(done(&RESPONSE[..head_len]).content_start, head_len);
    }

    #[test]
    fn test_empty_header_block() {
        let buf = b"HTTP/1.1 204 No Content\r\n\r\n";
        let head = done(buf);
        assert_eq!(head.status, 204);
        assert!(head.headers.is_empty());
        assert_eq!(head.content_start, buf.len());
        assert!(head.is_bodiless());
    }

    #[test]
    fn test_status_without_reason() {
        let head = done(b"HTTP/1.1 500\r\nContent-Length: 0\r\n\r\n");
        assert_eq!(head.status, 500);
    }

    #[test_case(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n", false ; "close")]
    #[test_case(b"HTTP/1.0 200 OK\r\n\r\n", false ; "http 1.0 default")]
    #[test_case(b"HTTP/1.0 200 OK\r\nConnection: keep-alive\r\n\r\n", true ; "http 1.0 keep alive")]
    #[test_case(b"HTTP/1.1 200 OK\r\n\r\n", true ; "http 1.1 default")]
    fn test_keep_alive(buf: &[u8], keep_alive: bool) {
        assert_eq!(done(buf).keep_alive, keep_alive);
    }

    #[test]
    fn test_chunked_is_detected() {
        let head = done(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip, chunked\r\n\r\n");
        assert!(head.chunked);
        assert_eq!(head.content_length, None);
    }

    #[test_case(b"SMTP 220 ready\r\n" ; "wrong protocol")]
    #[test_case(b"HTTP/1.1 2x0 OK\r\n\r\n" ; "non numeric status")]
    #[test_case(b"HTTP/1.1 20 OK\r\n\r\n" ; "short status")]
    #[test_case(b"HTTP/2.0 200 OK\r\n\r\n" ; "unsupported version")]
    #[test_case(b"HTTP/1.1 200 OK\r\nno colon here\r\n\r\n" ; "header without colon")]
    #[test_case(b"HTTP/1.1 200 OK\r\nContent-Length: ten\r\n\r\n" ; "bad content length")]
    #[test_case(b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\n" ; "conflicting lengths")]
    fn test_malformed_heads_are_rejected(buf: &[u8]) {
        assert!(matches!(parse_response_head(buf), Err(PipelineError::Protocol { .. })));
    }

    #[test]
    fn test_oversized_head_is_rejected() {
        let mut buf = b"HTTP/1.1 200 OK\r\n".to_vec();
        while buf.len() <= MAX_HEAD_SIZE {
            buf.extend_from_slice(b"x-filler: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n");
        }
        assert!(parse_response_head(&buf).is_err());
    }
}
