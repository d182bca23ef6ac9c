use thiserror::Error;

use crate::forwarded::ForwardedProperty;

/// Failure conditions surfaced while resolving request information.
#[derive(Debug, Error)]
pub enum Error {
    /// The `Forwarded` header and its `X-Forwarded-*` counterpart disagree on a
    /// property. Only raised when both headers are trusted and present.
    #[error("conflicting \"{property}\" information: the \"forwarded\" header reports [{forwarded}] while the \"{header}\" header reports [{x_forwarded}]")]
    HeaderConflict {
        property: ForwardedProperty,
        header: &'static str,
        forwarded: String,
        x_forwarded: String,
    },

    /// The resolved host contains characters outside the hostname grammar.
    #[error("invalid host \"{0}\"")]
    InvalidHost(String),

    /// The resolved host is not covered by the configured trusted hosts.
    #[error("untrusted host \"{0}\"")]
    UntrustedHost(String),

    /// An IPv6 address comparison was requested but the `ipv6` feature is not
    /// compiled in.
    #[error("ipv6 address matching requires the `ipv6` feature")]
    UnsupportedOperation,

    /// Rebuilding the request url failed.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}
