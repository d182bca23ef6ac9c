use bitflags::bitflags;
use regex::{Regex, RegexBuilder};

use crate::ip;
use crate::Error;

bitflags! {
    /// Set of forwarding headers whose content may be trusted when the request
    /// comes from a trusted proxy.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct TrustedHeader: u8 {
        const FORWARDED = 1;
        const X_FORWARDED_FOR = 1 << 1;
        const X_FORWARDED_HOST = 1 << 2;
        const X_FORWARDED_PROTO = 1 << 3;
        const X_FORWARDED_PORT = 1 << 4;
        /// Every `X-Forwarded-*` header, without `Forwarded`.
        const X_FORWARDED_ALL = Self::X_FORWARDED_FOR.bits()
            | Self::X_FORWARDED_HOST.bits()
            | Self::X_FORWARDED_PROTO.bits()
            | Self::X_FORWARDED_PORT.bits();
    }
}

/// Trust configuration for request resolution
///
/// By default nothing is trusted: no proxies, no forwarding headers, any
/// syntactically valid host, no method override.
///
/// # Example
/// ```
/// use trusted_request::{Config, TrustedHeader};
///
/// let mut config = Config::new();
/// config.add_trusted_proxy("168.10.0.0/16");
/// config.trust_headers(TrustedHeader::FORWARDED | TrustedHeader::X_FORWARDED_FOR);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Config {
    trusted_proxies: Vec<String>,
    trusted_headers: TrustedHeader,
    trusted_hosts: Vec<String>,
    trusted_host_patterns: Vec<Regex>,
    http_method_override: bool,
}

impl Config {
    /// Create a configuration with no trusted proxies, headers or hosts
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration with local and private networks trusted and the
    /// `Forwarded` / `X-Forwarded-For` headers trusted
    pub fn new_local() -> Self {
        Self {
            trusted_proxies: vec![
                // IPV4 Loopback
                "127.0.0.0/8".to_string(),
                // IPV4 Private Networks
                "10.0.0.0/8".to_string(),
                "172.16.0.0/12".to_string(),
                "192.168.0.0/16".to_string(),
                // IPV6 Loopback
                "::1/128".to_string(),
                // IPV6 Private network
                "fd00::/8".to_string(),
            ],
            trusted_headers: TrustedHeader::FORWARDED | TrustedHeader::X_FORWARDED_FOR,
            ..Self::default()
        }
    }

    /// Add a trusted proxy to the list of trusted proxies
    ///
    /// proxy can be an IP address or a CIDR. Entries are kept verbatim and
    /// matched lazily; a malformed entry never matches anything instead of
    /// failing here.
    pub fn add_trusted_proxy(&mut self, proxy: impl Into<String>) {
        self.trusted_proxies.push(proxy.into());
    }

    /// Replace the list of trusted proxies
    pub fn set_trusted_proxies(&mut self, proxies: Vec<String>) {
        self.trusted_proxies = proxies;
    }

    /// The configured trusted proxy entries
    pub fn trusted_proxies(&self) -> &[String] {
        &self.trusted_proxies
    }

    /// Check if a remote address is trusted given the list of trusted proxies
    pub fn is_trusted_proxy(&self, remote_addr: &str) -> Result<bool, Error> {
        ip::check_ip(remote_addr, &self.trusted_proxies)
    }

    /// Trust additional forwarding headers, keeping the ones already trusted
    ///
    /// It is only safe to trust a header that every proxy in front of the
    /// application overwrites or strips on incoming requests; a header that is
    /// passed through verbatim can be spoofed by any client.
    pub fn trust_headers(&mut self, headers: TrustedHeader) {
        self.trusted_headers |= headers;
    }

    /// Replace the set of trusted forwarding headers
    pub fn set_trusted_headers(&mut self, headers: TrustedHeader) {
        self.trusted_headers = headers;
    }

    /// The currently trusted forwarding headers
    pub fn trusted_headers(&self) -> TrustedHeader {
        self.trusted_headers
    }

    pub(crate) fn is_header_trusted(&self, header: TrustedHeader) -> bool {
        self.trusted_headers.contains(header)
    }

    /// Add an exact host name to the trusted host list
    ///
    /// Comparison is case-insensitive. While the list is empty, any
    /// syntactically valid host is accepted.
    pub fn add_trusted_host(&mut self, host: impl Into<String>) {
        self.trusted_hosts.push(host.into());
    }

    /// Add a case-insensitive pattern to the trusted host list
    ///
    /// The pattern is matched anywhere in the host name; anchor it with `^`
    /// and `$` to require a full match.
    pub fn add_trusted_host_pattern(&mut self, pattern: &str) -> Result<(), regex::Error> {
        let pattern = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        self.trusted_host_patterns.push(pattern);
        Ok(())
    }

    /// Replace the trusted host list.
    pub fn set_trusted_hosts(&mut self, hosts: Vec<String>) {
        self.trusted_hosts = hosts;
    }

    /// Replace the trusted host patterns, compiling each one.
    pub fn set_trusted_host_patterns<I, S>(&mut self, patterns: I) -> Result<(), regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut compiled = Vec::new();
        for pattern in patterns {
            compiled.push(
                RegexBuilder::new(pattern.as_ref())
                    .case_insensitive(true)
                    .build()?,
            );
        }
        self.trusted_host_patterns = compiled;
        Ok(())
    }

    /// Exact host names accepted by [`Resolver::host`](crate::Resolver::host).
    pub fn trusted_hosts(&self) -> &[String] {
        &self.trusted_hosts
    }

    /// Compiled host patterns accepted by
    /// [`Resolver::host`](crate::Resolver::host).
    pub fn trusted_host_patterns(&self) -> &[Regex] {
        &self.trusted_host_patterns
    }

    pub(crate) fn has_trusted_hosts(&self) -> bool {
        !self.trusted_hosts.is_empty() || !self.trusted_host_patterns.is_empty()
    }

    /// Honor the `X-Http-Method-Override` header on POST requests
    pub fn enable_http_method_override(&mut self) {
        self.http_method_override = true;
    }

    /// Set whether the `X-Http-Method-Override` header is honored
    pub fn set_http_method_override(&mut self, enabled: bool) {
        self.http_method_override = enabled;
    }

    /// Whether the `X-Http-Method-Override` header is honored
    pub fn is_http_method_override_enabled(&self) -> bool {
        self.http_method_override
    }
}
