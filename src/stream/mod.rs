//! HTTP range handling for resource streaming
//!
//! Turns a byte-range request against one resource into status, headers and a
//! bounded byte stream.

mod range;
mod response;

pub use range::{parse_range_header, select_range, ByteRange};
pub use response::{resolve_range_request, respond, RangeResponse};
