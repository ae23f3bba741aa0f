//! RFC 3986 `application/x-www-form-urlencoded` bodies for OAuth token
//! endpoint requests.
//!
//! Deliberately *not* the traditional `application/x-www-form-urlencoded`
//! scheme (which escapes spaces as `+`): token endpoints here expect strict
//! RFC 3986 percent-encoding — only `A-Za-z0-9-._~` pass through unescaped,
//! and pairs are emitted sorted by key for deterministic request bodies.
//! `percent-encoding` (part of the same `servo/rust-url` family as
//! `form_urlencoded`) gives us an `AsciiSet` we can tune to exactly that
//! alphabet instead of hand-rolling a percent-encoder.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};

/// Everything NOT in RFC 3986's `unreserved` set (`A-Za-z0-9-._~`) gets
/// percent-encoded. `NON_ALPHANUMERIC` already excludes letters/digits, so
/// we only need to punch back in `-`, `.`, `_`, `~`.
const UNRESERVED_EXTRA: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Encode `pairs` as a form body, sorted by key, e.g.
/// `encode_form_urlencoded(&[("grant_type", "refresh_token")])`.
pub fn encode_form_urlencoded(pairs: &[(&str, &str)]) -> String {
    let mut sorted: Vec<&(&str, &str)> = pairs.iter().collect();
    sorted.sort_by_key(|(key, _)| *key);

    sorted
        .into_iter()
        .map(|(key, value)| {
            let key = percent_encoding::utf8_percent_encode(key, UNRESERVED_EXTRA);
            let value = percent_encoding::utf8_percent_encode(value, UNRESERVED_EXTRA);
            format!("{key}={value}")
        })
        .collect::<Vec<_>>()
        .join("&")
}
