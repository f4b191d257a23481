//! Byte-level HTTP primitives.
//!
//! Pre-encoded headers, zero-copy URLs, and the incremental response-head
//! parser shared by the transports.

mod headers;
mod parser;
mod url;

pub use self::headers::{
    names, Header, HeaderLines, ACCEPT_JSON, CONTENT_LENGTH_ZERO, CONTENT_TYPE_JSON,
    CONTENT_TYPE_OCTET_STREAM, CONTENT_TYPE_TEXT,
};
pub use self::parser::{parse_response_head, ParseStatus, ResponseHead, MAX_HEAD_SIZE};
pub use self::url::{Protocol, Url};
