//! Host string helpers.

/// Split a trailing `:digits` port suffix off a host string.
///
/// The split happens at the last `:` and only when everything after it is
/// ASCII digits; the digits are returned verbatim without range validation.
pub(crate) fn split_host_port(host: &str) -> (&str, Option<&str>) {
    match host.rfind(':') {
        Some(i) if i + 1 < host.len() && host[i + 1..].bytes().all(|b| b.is_ascii_digit()) => {
            (&host[..i], Some(&host[i + 1..]))
        }
        _ => (host, None),
    }
}

/// Check a hostname against the allowed character set: ASCII alphanumerics,
/// `-`, `.`, `_`, `:` and `]`, plus `[` in leading position only.
pub(crate) fn is_valid_hostname(host: &str) -> bool {
    !host.is_empty()
        && host.char_indices().all(|(i, c)| {
            c.is_ascii_alphanumeric()
                || matches!(c, '-' | '.' | '_' | ':' | ']')
                || (c == '[' && i == 0)
        })
}
