//! Strict parser for the `Forwarded` header defined by
//! [RFC 7239](https://tools.ietf.org/html/rfc7239).

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use crate::config::TrustedHeader;

/// Forwarding properties reported by one proxy hop.
///
/// Property names are case-sensitive; unknown properties are accepted by the
/// parser but not retained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardedElement {
    pub by: Option<String>,
    pub r#for: Option<String>,
    pub host: Option<String>,
    pub proto: Option<String>,
}

/// Properties reconciled between the `Forwarded` header and its
/// `X-Forwarded-*` counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardedProperty {
    For,
    Host,
    Proto,
    Port,
}

impl ForwardedProperty {
    /// Name of the legacy header carrying the same information.
    pub fn x_header(self) -> &'static str {
        match self {
            Self::For => "x-forwarded-for",
            Self::Host => "x-forwarded-host",
            Self::Proto => "x-forwarded-proto",
            Self::Port => "x-forwarded-port",
        }
    }

    pub(crate) fn trust_flag(self) -> TrustedHeader {
        match self {
            Self::For => TrustedHeader::X_FORWARDED_FOR,
            Self::Host => TrustedHeader::X_FORWARDED_HOST,
            Self::Proto => TrustedHeader::X_FORWARDED_PROTO,
            Self::Port => TrustedHeader::X_FORWARDED_PORT,
        }
    }
}

impl fmt::Display for ForwardedProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::For => "for",
            Self::Host => "host",
            Self::Proto => "proto",
            Self::Port => "port",
        })
    }
}

/// Parse a `Forwarded` header value into its per-hop elements, first hop
/// first.
///
/// The grammar is applied strictly: anything malformed (a duplicate property
/// within an element, an empty element, stray whitespace outside the optional
/// whitespace after `,` and `;`, an unterminated quoted value) yields `None`,
/// as does an empty or whitespace-only header. Callers treat `None` exactly
/// like a missing header.
pub fn parse_forwarded(header: &str) -> Option<Vec<ForwardedElement>> {
    let header = header.trim_end_matches([' ', '\t']);
    if header.is_empty() {
        return None;
    }

    let mut chars = header.chars().peekable();
    let mut elements = Vec::new();

    loop {
        elements.push(parse_element(&mut chars)?);

        match chars.next() {
            None => return Some(elements),
            Some(',') => skip_ows(&mut chars),
            _ => return None,
        }
    }
}

fn parse_element(chars: &mut Peekable<Chars>) -> Option<ForwardedElement> {
    let mut element = ForwardedElement::default();
    let mut seen: Vec<String> = Vec::new();

    loop {
        let token = read_token(chars)?;
        if chars.next() != Some('=') {
            return None;
        }
        let value = read_value(chars)?;

        // unknown properties are discarded but still count as duplicates
        if seen.contains(&token) {
            return None;
        }

        match token.as_str() {
            "by" => element.by = Some(value),
            "for" => element.r#for = Some(value),
            "host" => element.host = Some(value),
            "proto" => element.proto = Some(value),
            _ => {}
        }
        seen.push(token);

        match chars.peek() {
            None | Some(&',') => return Some(element),
            Some(&';') => {
                chars.next();
                skip_ows(chars);
            }
            _ => return None,
        }
    }
}

fn read_token(chars: &mut Peekable<Chars>) -> Option<String> {
    let mut token = String::new();
    while let Some(&c) = chars.peek() {
        if !is_tchar(c) {
            break;
        }
        token.push(c);
        chars.next();
    }
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

fn read_value(chars: &mut Peekable<Chars>) -> Option<String> {
    if chars.peek() == Some(&'"') {
        chars.next();
        return read_quoted(chars);
    }

    let mut value = String::new();
    while let Some(&c) = chars.peek() {
        if !is_value_char(c) {
            break;
        }
        value.push(c);
        chars.next();
    }
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn read_quoted(chars: &mut Peekable<Chars>) -> Option<String> {
    let mut value = String::new();
    loop {
        match chars.next()? {
            '"' => return Some(value),
            '\\' => value.push(chars.next()?),
            c if c != '\t' && c.is_control() => return None,
            c => value.push(c),
        }
    }
}

/// `tchar` from RFC 7230 section 3.2.6.
fn is_tchar(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '.' | '^' | '_' | '`' | '|' | '~'
        )
}

fn is_value_char(c: char) -> bool {
    c.is_ascii_graphic() && !matches!(c, ',' | ';' | '"' | '=')
}

fn skip_ows(chars: &mut Peekable<Chars>) {
    while matches!(chars.peek(), Some(&' ') | Some(&'\t')) {
        chars.next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(
        by: Option<&str>,
        r#for: Option<&str>,
        host: Option<&str>,
        proto: Option<&str>,
    ) -> ForwardedElement {
        ForwardedElement {
            by: by.map(str::to_string),
            r#for: r#for.map(str::to_string),
            host: host.map(str::to_string),
            proto: proto.map(str::to_string),
        }
    }

    #[test]
    fn single_element() {
        assert_eq!(
            parse_forwarded("for=192.0.2.60;proto=http;by=203.0.113.43"),
            Some(vec![element(
                Some("203.0.113.43"),
                Some("192.0.2.60"),
                None,
                Some("http")
            )])
        );
    }

    #[test]
    fn multiple_elements() {
        assert_eq!(
            parse_forwarded("for=192.0.2.43, for=198.51.100.17"),
            Some(vec![
                element(None, Some("192.0.2.43"), None, None),
                element(None, Some("198.51.100.17"), None, None),
            ])
        );
    }

    #[test]
    fn optional_whitespace_after_separators() {
        assert_eq!(
            parse_forwarded("for=192.0.2.43,\tfor=198.51.100.17; proto=https"),
            Some(vec![
                element(None, Some("192.0.2.43"), None, None),
                element(None, Some("198.51.100.17"), None, Some("https")),
            ])
        );
    }

    #[test]
    fn quoted_value() {
        assert_eq!(
            parse_forwarded(r#"for="_gazonk""#),
            Some(vec![element(None, Some("_gazonk"), None, None)])
        );
        assert_eq!(
            parse_forwarded(r#"for="[2001:db8:cafe::17]:4711""#),
            Some(vec![element(None, Some("[2001:db8:cafe::17]:4711"), None, None)])
        );
    }

    #[test]
    fn quoted_value_with_escapes() {
        assert_eq!(
            parse_forwarded(r#"for="a\"b\\c""#),
            Some(vec![element(None, Some(r#"a"b\c"#), None, None)])
        );
        // spaces are legal inside quotes
        assert_eq!(
            parse_forwarded(r#"by="proxy one""#),
            Some(vec![element(Some("proxy one"), None, None, None)])
        );
    }

    #[test]
    fn quoted_value_keeps_embedded_separators() {
        // `,` and `;` inside quotes split nothing
        assert_eq!(
            parse_forwarded(r#"for=" foo, bar; \"baz\" ""#),
            Some(vec![element(None, Some(r#" foo, bar; "baz" "#), None, None)])
        );
    }

    #[test]
    fn unquoted_ipv6_with_port() {
        assert_eq!(
            parse_forwarded("for=[2001:db8::1]:80"),
            Some(vec![element(None, Some("[2001:db8::1]:80"), None, None)])
        );
    }

    #[test]
    fn property_names_are_case_sensitive() {
        // "For" is an unknown property, accepted and discarded
        assert_eq!(
            parse_forwarded("For=192.0.2.60"),
            Some(vec![element(None, None, None, None)])
        );
    }

    #[test]
    fn unknown_properties_are_discarded() {
        assert_eq!(
            parse_forwarded("secret=egah2CGj55fSJFs, for=192.0.2.43"),
            Some(vec![
                element(None, None, None, None),
                element(None, Some("192.0.2.43"), None, None),
            ])
        );
    }

    #[test]
    fn duplicate_property_fails() {
        assert_eq!(parse_forwarded("for=192.0.2.43;for=198.51.100.17"), None);
        // unknown properties participate in duplicate detection too
        assert_eq!(parse_forwarded("secret=a;secret=b"), None);
    }

    #[test]
    fn empty_header_is_none() {
        assert_eq!(parse_forwarded(""), None);
        assert_eq!(parse_forwarded("   "), None);
        assert_eq!(parse_forwarded("\t"), None);
    }

    #[test]
    fn trailing_whitespace_is_trimmed() {
        assert_eq!(
            parse_forwarded("for=192.0.2.43 \t"),
            Some(vec![element(None, Some("192.0.2.43"), None, None)])
        );
    }

    #[test]
    fn malformed_headers_fail() {
        for header in [
            ",",
            "for=a,",
            ",for=a",
            ";",
            "for=a;",
            "for=a;;proto=b",
            "for=a ;proto=b",
            "for =a",
            "for= a",
            "for=",
            "=a",
            "for=a proto=b",
            "for=\"unterminated",
            "for=a\nb",
            "for=a=b",
            "for=\"a\nb\"",
        ] {
            assert_eq!(parse_forwarded(header), None, "expected failure for {header:?}");
        }
    }
}
