//! Chat link construction.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters `encodeURIComponent` leaves untouched; everything else is escaped.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Longest national number that still counts as local when it happens to start with the
/// country code.
const MAX_LOCAL_DIGITS: usize = 10;

fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Normalize `address` to digits and apply the default country code.
///
/// A number already starting with the code is only treated as international when more than
/// ten digits follow the code; shorter ones are local numbers that coincidentally begin with
/// the same digits.
pub fn format_number(address: &str, country_code: &str) -> String {
    let digits = digits_only(address);
    let code = digits_only(country_code);
    if code.is_empty() || digits.is_empty() {
        return digits;
    }
    if digits.starts_with(&code) && digits.len() - code.len() > MAX_LOCAL_DIGITS {
        return digits;
    }
    let national = digits.strip_prefix('0').unwrap_or(&digits);
    format!("{code}{national}")
}

/// Bare host name: tolerates `https://wa.me/` style input.
pub fn normalize_host(host: &str) -> &str {
    let host = host.trim();
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host);
    host.trim_end_matches('/')
}

/// `https://<host>/<number>?text=<message>`; `number` must already be normalized.
pub fn target_url(host: &str, number: &str, message: &str) -> String {
    format!(
        "https://{}/{}?text={}",
        normalize_host(host),
        number,
        utf8_percent_encode(message, COMPONENT)
    )
}
