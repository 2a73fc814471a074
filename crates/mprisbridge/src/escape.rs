//! Reversible mapping between opaque remote identifiers and object-path segments.
//!
//! Every byte outside `[A-Za-z0-9]` is percent-encoded, including `. - ~ _`,
//! and the `%` marker is then replaced by `_`. Since `_` never survives the
//! first pass raw, the substitution is unambiguous and `unescape` inverts it.

use std::str::Utf8Error;

use percent_encoding::NON_ALPHANUMERIC;
use percent_encoding::percent_decode_str;
use percent_encoding::utf8_percent_encode;

/// Escapes `id` into a string made only of `[A-Za-z0-9_]`.
pub fn escape(id: &str) -> String {
    utf8_percent_encode(id, NON_ALPHANUMERIC).to_string().replace('%', "_")
}

/// Restores the identifier produced by `escape`.
///
/// # Errors
/// Fails when the decoded bytes are not UTF-8, which `escape` never produces.
pub fn unescape(segment: &str) -> Result<String, Utf8Error> {
    let encoded = segment.replace('_', "%");
    percent_decode_str(&encoded).decode_utf8().map(|s| s.into_owned())
}
