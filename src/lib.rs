//! # Trusted request
//!
//! This crate resolves the client-facing view of a http request served from behind one or
//! more reverse proxies: the real client ip chain, scheme, host, port, method, url and the
//! script deployment paths.
//!
//! Forwarding headers can be written by any client, so nothing is honored unless the
//! immediate peer address matches the configured trusted proxies, and only the header
//! families explicitly marked as trusted are read at all.
//!
//! ## Usage
//!
//! ```rust
//! use trusted_request::{Config, Resolver, ServerVars, TrustedHeader};
//!
//! let mut config = Config::new();
//! config.add_trusted_proxy("10.0.0.0/8");
//! config.set_trusted_headers(TrustedHeader::FORWARDED | TrustedHeader::X_FORWARDED_FOR);
//!
//! let vars: ServerVars = [
//!     ("REMOTE_ADDR".to_string(), "10.0.0.1".to_string()),
//!     ("HTTP_HOST".to_string(), "example.com".to_string()),
//!     ("HTTP_FORWARDED".to_string(), "for=1.2.3.4;proto=https".to_string()),
//!     ("REQUEST_URI".to_string(), "/dashboard".to_string()),
//! ]
//! .into_iter()
//! .collect();
//!
//! let resolver = Resolver::new(vars, config);
//!
//! assert_eq!(resolver.scheme().unwrap(), "https");
//! assert_eq!(resolver.host().unwrap(), "example.com");
//! assert_eq!(resolver.client_ips().unwrap(), ["1.2.3.4"]);
//! assert_eq!(resolver.url().unwrap().as_str(), "https://example.com/dashboard");
//! ```
//!
//! ## Features
//!
//!  * Use the `Forwarded` header in priority and reconcile it against the legacy
//!    `X-Forwarded-For` / `X-Forwarded-Host` / `X-Forwarded-Proto` / `X-Forwarded-Port`
//!    headers, failing on a disagreement between the two trusted sources instead of
//!    guessing.
//!  * Validate the resolved host and optionally restrict it to an allow list of exact
//!    names and case-insensitive patterns.
//!  * Reconstruct the deployment base path of the front controller from the script
//!    attributes, so routing works below a sub-directory or a rewrite rule.
//!  * Build the attribute snapshot directly from an `http::Request` with the `http`
//!    feature; match ipv6 proxy entries with the `ipv6` feature.
//!
//! ## Implementation
//!
//! The `Forwarded` parser follows the [RFC 7239](https://tools.ietf.org/html/rfc7239)
//! grammar strictly and treats a malformed header like a missing one.

mod config;
mod error;
mod forwarded;
mod host;
mod ip;
mod path;
mod resolve;
mod vars;

pub use config::{Config, TrustedHeader};
pub use error::Error;
pub use forwarded::{parse_forwarded, ForwardedElement, ForwardedProperty};
pub use resolve::Resolver;
pub use url::Url;
pub use vars::{RequestAttributes, ServerVars};
