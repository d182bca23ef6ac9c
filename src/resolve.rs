use std::collections::HashMap;
use std::net::IpAddr;

use once_cell::unsync::OnceCell;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::forwarded::{parse_forwarded, ForwardedElement, ForwardedProperty};
use crate::host::{is_valid_hostname, split_host_port};
use crate::ip;
use crate::vars::RequestAttributes;
use crate::{path, Error, TrustedHeader};

/// Reduce a `for` entry to a bare address: strip a `:port` suffix from dotted
/// addresses and the square brackets (with any port) from IPv6 forms.
fn bare_client_ip(value: &str) -> &str {
    if value.contains('.') {
        match value.find(':') {
            Some(i) if i > 0 => &value[..i],
            _ => value,
        }
    } else if let Some(inner) = value.strip_prefix('[') {
        match inner.find(']') {
            Some(i) => &inner[..i],
            None => value,
        }
    } else {
        value
    }
}

#[derive(Default)]
struct Cache {
    headers: OnceCell<HashMap<String, String>>,
    forwarded: OnceCell<Option<Vec<ForwardedElement>>>,
    from_trusted_proxy: OnceCell<bool>,
    secure: OnceCell<bool>,
    client_ips: OnceCell<Vec<String>>,
    method: OnceCell<String>,
    host: OnceCell<String>,
    port: OnceCell<u16>,
    url: OnceCell<Url>,
    request_uri: OnceCell<String>,
    base_path: OnceCell<String>,
    base_dir: OnceCell<String>,
    path_info: OnceCell<String>,
}

/// Resolves the effective client-facing properties of a request that may have
/// crossed one or more reverse proxies.
///
/// Forwarding headers are only honored when the immediate peer matches the
/// configured trusted proxies, and the `Forwarded` header is reconciled
/// against its `X-Forwarded-*` counterparts when both are trusted.
///
/// Every accessor memoizes its result on success; a failing accessor caches
/// nothing and is re-evaluated on the next call.
pub struct Resolver<V: RequestAttributes> {
    vars: V,
    config: Config,
    cache: Cache,
}

impl<V: RequestAttributes> Resolver<V> {
    /// Create a resolver over an attribute source and a trust configuration.
    pub fn new(vars: V, config: Config) -> Self {
        Self {
            vars,
            config,
            cache: Cache::default(),
        }
    }

    /// The attribute source backing this resolver.
    pub fn vars(&self) -> &V {
        &self.vars
    }

    /// The active trust configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replace the trust configuration, dropping every memoized fact.
    pub fn set_config(&mut self, config: Config) {
        self.config = config;
        self.clear_cache();
    }

    /// Drop every memoized fact; the next accessor call resolves again.
    pub fn clear_cache(&mut self) {
        self.cache = Cache::default();
    }

    /// Restore the default trust-nothing configuration and clear the cache.
    pub fn reset(&mut self) {
        self.set_config(Config::default());
    }

    /// Header view derived from the `HTTP_*` attributes plus the non-prefixed
    /// content metadata trio, keyed by lowercase hyphenated names.
    pub fn headers(&self) -> &HashMap<String, String> {
        self.cache.headers.get_or_init(|| {
            let mut headers = HashMap::new();
            for (name, value) in self.vars.attributes() {
                if let Some(suffix) = name.strip_prefix("HTTP_") {
                    headers.insert(suffix.to_ascii_lowercase().replace('_', "-"), value.to_string());
                }
            }
            // the content trio wins over any HTTP_CONTENT_* spelling
            for name in ["CONTENT_LENGTH", "CONTENT_TYPE", "CONTENT_MD5"] {
                if let Some(value) = self.vars.attribute(name) {
                    headers.insert(name.to_ascii_lowercase().replace('_', "-"), value.to_string());
                }
            }
            headers
        })
    }

    /// Single header lookup by lowercase hyphenated name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name).map(String::as_str)
    }

    /// Whether the immediate peer matches the configured trusted proxies.
    pub fn is_from_trusted_proxy(&self) -> Result<bool, Error> {
        self.cache
            .from_trusted_proxy
            .get_or_try_init(|| {
                let Some(remote) = self.remote_addr() else {
                    return Ok(false);
                };
                ip::check_ip(remote, self.config.trusted_proxies())
            })
            .copied()
    }

    /// Client address chain reported by trusted proxies, most recent report
    /// first, with the proxies themselves filtered out.
    ///
    /// Falls back to the immediate peer address when nothing usable is
    /// reported, and to an empty list when even that is missing.
    pub fn client_ips(&self) -> Result<&[String], Error> {
        self.cache
            .client_ips
            .get_or_try_init(|| {
                let Some(remote) = self.remote_addr() else {
                    return Ok(Vec::new());
                };
                if !self.is_from_trusted_proxy()? {
                    return Ok(vec![remote.to_string()]);
                }

                let filter = |values: Vec<String>| self.normalize_and_filter_ips(values, remote);
                let ips = self.trusted_values(ForwardedProperty::For, Some(&filter))?;

                if ips.is_empty() {
                    Ok(vec![remote.to_string()])
                } else {
                    Ok(ips)
                }
            })
            .map(Vec::as_slice)
    }

    /// Whether the request reached the stack over TLS, as reported by trusted
    /// proxies or the `HTTPS` attribute.
    pub fn is_secure(&self) -> Result<bool, Error> {
        self.cache
            .secure
            .get_or_try_init(|| {
                if self.is_from_trusted_proxy()? {
                    let protos = self.trusted_values(ForwardedProperty::Proto, None)?;
                    if let Some(proto) = protos.first() {
                        return Ok(matches!(
                            proto.to_ascii_lowercase().as_str(),
                            "https" | "on" | "ssl" | "1"
                        ));
                    }
                }
                let https = self.vars.attribute("HTTPS").unwrap_or("");
                Ok(!https.is_empty() && !https.eq_ignore_ascii_case("off"))
            })
            .copied()
    }

    /// `https` when the request is secure, `http` otherwise.
    pub fn scheme(&self) -> Result<&'static str, Error> {
        Ok(if self.is_secure()? { "https" } else { "http" })
    }

    /// Effective HTTP method, honoring `x-http-method-override` on POST
    /// requests when the configuration enables it.
    pub fn method(&self) -> &str {
        self.cache.method.get_or_init(|| {
            let method = self
                .vars
                .attribute("REQUEST_METHOD")
                .unwrap_or("GET")
                .to_ascii_uppercase();
            if method == "POST" && self.config.is_http_method_override_enabled() {
                if let Some(override_method) = self.header("x-http-method-override") {
                    // anything other than plain letters is ignored
                    if !override_method.is_empty()
                        && override_method.bytes().all(|b| b.is_ascii_alphabetic())
                    {
                        return override_method.to_ascii_uppercase();
                    }
                }
            }
            method
        })
    }

    /// Validated, lowercased effective host name.
    ///
    /// When trusted hosts are configured, a host outside that set fails with
    /// [`Error::UntrustedHost`].
    pub fn host(&self) -> Result<&str, Error> {
        self.cache
            .host
            .get_or_try_init(|| {
                let candidate = self.host_candidate()?;
                let host = split_host_port(candidate.trim()).0.to_ascii_lowercase();

                if !is_valid_hostname(&host) {
                    return Err(Error::InvalidHost(host));
                }

                if !self.config.has_trusted_hosts() {
                    return Ok(host);
                }
                let trusted = self
                    .config
                    .trusted_hosts()
                    .iter()
                    .any(|trusted| host.eq_ignore_ascii_case(trusted))
                    || self
                        .config
                        .trusted_host_patterns()
                        .iter()
                        .any(|pattern| pattern.is_match(&host));
                if trusted {
                    Ok(host)
                } else {
                    warn!(host = %host, "request host is outside the trusted host set");
                    Err(Error::UntrustedHost(host))
                }
            })
            .map(String::as_str)
    }

    /// Effective port, favoring trusted proxy reports over the host string
    /// and the `SERVER_PORT` attribute.
    pub fn port(&self) -> Result<u16, Error> {
        self.cache
            .port
            .get_or_try_init(|| {
                if self.is_from_trusted_proxy()? {
                    let ports = self.trusted_values(ForwardedProperty::Port, None)?;
                    if let Some(port) = ports.first().and_then(|port| port.parse::<u16>().ok()) {
                        return Ok(port);
                    }
                }
                let candidate = self.host_candidate()?;
                if let Some(port) = split_host_port(candidate.trim())
                    .1
                    .and_then(|port| port.parse::<u16>().ok())
                {
                    return Ok(port);
                }
                if let Some(port) = self
                    .vars
                    .attribute("SERVER_PORT")
                    .and_then(|port| port.parse::<u16>().ok())
                {
                    return Ok(port);
                }
                Ok(if self.is_secure()? { 443 } else { 80 })
            })
            .copied()
    }

    /// Effective URL of the request. Each call returns an independent copy of
    /// the resolved value.
    pub fn url(&self) -> Result<Url, Error> {
        self.cache
            .url
            .get_or_try_init(|| {
                let scheme = self.scheme()?;
                let host = self.host()?;
                let port = self.port()?;

                // only spell the port out when it is not implied by the scheme
                let authority = match (scheme, port) {
                    ("https", 443) | ("http", 80) => host.to_string(),
                    _ => format!("{host}:{port}"),
                };
                let raw = self.raw_request_uri();
                let target = if raw.starts_with('/') {
                    raw.to_string()
                } else {
                    format!("/{raw}")
                };

                // parse the composed string whole: resolving the target as a
                // reference would let a `//host/...` request uri replace the
                // resolved authority
                Ok(Url::parse(&format!("{scheme}://{authority}{target}"))?)
            })
            .cloned()
    }

    /// Deployment prefix of the front controller inside the request path,
    /// empty when the application sits at the document root.
    pub fn base_path(&self) -> &str {
        self.cache.base_path.get_or_init(|| {
            path::derive_base_path(
                &self.heuristic_request_uri(),
                self.vars.attribute("SCRIPT_FILENAME").unwrap_or(""),
                self.vars.attribute("SCRIPT_NAME").unwrap_or(""),
                self.vars.attribute("DOCUMENT_URI").unwrap_or(""),
                self.is_iis_rewrite(),
            )
        })
    }

    /// Directory portion of the base path.
    pub fn base_dir(&self) -> &str {
        self.cache.base_dir.get_or_init(|| {
            path::derive_base_dir(
                self.base_path(),
                self.vars.attribute("SCRIPT_FILENAME").unwrap_or(""),
            )
        })
    }

    /// Path below the base path, query string excluded.
    pub fn path_info(&self) -> &str {
        self.cache.path_info.get_or_init(|| {
            let raw = self.raw_request_uri();
            let truncated = match raw.find('?') {
                Some(pos) => &raw[..pos],
                None => raw,
            };
            let truncated = if !truncated.is_empty() && !truncated.starts_with('/') {
                format!("/{truncated}")
            } else {
                truncated.to_string()
            };
            truncated.get(self.base_path().len()..).unwrap_or("").to_string()
        })
    }

    /// Name of the executed script. Not cached.
    pub fn script_name(&self) -> &str {
        self.vars
            .attribute("SCRIPT_NAME")
            .or_else(|| self.vars.attribute("ORIG_SCRIPT_NAME"))
            .unwrap_or("")
    }

    fn remote_addr(&self) -> Option<&str> {
        self.vars.attribute("REMOTE_ADDR").filter(|addr| !addr.is_empty())
    }

    fn forwarded_elements(&self) -> Option<&[ForwardedElement]> {
        self.cache
            .forwarded
            .get_or_init(|| {
                let header = self.header("forwarded")?;
                let parsed = parse_forwarded(header);
                if parsed.is_none() && !header.trim().is_empty() {
                    debug!(header, "ignoring malformed forwarded header");
                }
                parsed
            })
            .as_deref()
    }

    /// Collect one property from the trusted forwarding headers, reconciling
    /// the `Forwarded` header against its `X-Forwarded-*` counterpart.
    fn trusted_values(
        &self,
        property: ForwardedProperty,
        filter: Option<&dyn Fn(Vec<String>) -> Result<Vec<String>, Error>>,
    ) -> Result<Vec<String>, Error> {
        let mut forwarded_values = Vec::new();
        if self.config.is_header_trusted(TrustedHeader::FORWARDED) {
            if let Some(elements) = self.forwarded_elements() {
                for element in elements {
                    match property {
                        ForwardedProperty::For => {
                            forwarded_values.push(element.r#for.clone().unwrap_or_default());
                        }
                        ForwardedProperty::Proto => {
                            forwarded_values.push(element.proto.clone().unwrap_or_default());
                        }
                        ForwardedProperty::Host => {
                            if let Some(host) = &element.host {
                                forwarded_values.push(split_host_port(host).0.to_string());
                            }
                        }
                        ForwardedProperty::Port => {
                            let port = element.host.as_deref().and_then(|host| split_host_port(host).1);
                            let port = match port {
                                Some(digits) => digits.to_string(),
                                None if element.proto.as_deref() == Some("https") => "443".to_string(),
                                None => "80".to_string(),
                            };
                            forwarded_values.push(port);
                        }
                    }
                }
            }
        }

        let mut header_values = Vec::new();
        if self.config.is_header_trusted(property.trust_flag()) {
            if let Some(raw) = self.header(property.x_header()) {
                for segment in raw.split(',') {
                    let segment = segment.trim();
                    if property == ForwardedProperty::Port
                        && (segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()))
                    {
                        continue;
                    }
                    header_values.push(segment.to_string());
                }
            }
        }

        let forwarded_values = match filter {
            Some(filter) => filter(forwarded_values)?,
            None => forwarded_values,
        };
        let header_values = match filter {
            Some(filter) => filter(header_values)?,
            None => header_values,
        };

        if !forwarded_values.is_empty() && !header_values.is_empty() && forwarded_values != header_values {
            let conflict = Error::HeaderConflict {
                property,
                header: property.x_header(),
                forwarded: forwarded_values.join(", "),
                x_forwarded: header_values.join(", "),
            };
            warn!(%conflict, "request reports conflicting forwarding information");
            return Err(conflict);
        }

        if forwarded_values.is_empty() {
            Ok(header_values)
        } else {
            Ok(forwarded_values)
        }
    }

    /// The client ip pipeline: append the peer, reduce entries to bare
    /// addresses, drop what does not parse or belongs to a trusted proxy, and
    /// reverse into most-recent-report-first order.
    fn normalize_and_filter_ips(&self, mut values: Vec<String>, remote: &str) -> Result<Vec<String>, Error> {
        if values.is_empty() {
            return Ok(values);
        }
        values.push(remote.to_string());

        let mut kept = Vec::with_capacity(values.len());
        for value in &values {
            let candidate = bare_client_ip(value);
            if candidate.parse::<IpAddr>().is_err() {
                debug!(value = %value, "dropping unparseable client ip");
                continue;
            }
            if ip::check_ip(candidate, self.config.trusted_proxies())? {
                continue;
            }
            kept.push(candidate.to_string());
        }
        kept.reverse();
        Ok(kept)
    }

    /// First non-empty host source: trusted proxy values, then the `host`
    /// header, the server attributes and finally `localhost`. The value may
    /// still carry a port.
    fn host_candidate(&self) -> Result<String, Error> {
        if self.is_from_trusted_proxy()? {
            let hosts = self.trusted_values(ForwardedProperty::Host, None)?;
            if let Some(host) = hosts.into_iter().next().filter(|host| !host.is_empty()) {
                return Ok(host);
            }
        }
        let fallback = self
            .header("host")
            .filter(|host| !host.is_empty())
            .or_else(|| self.vars.attribute("SERVER_NAME").filter(|host| !host.is_empty()))
            .or_else(|| self.vars.attribute("SERVER_ADDR").filter(|host| !host.is_empty()))
            .unwrap_or("localhost");
        Ok(fallback.to_string())
    }

    /// Raw request target: the IIS rewrite variants win, then `REQUEST_URI`,
    /// then the legacy `ORIG_PATH_INFO` plus query string.
    fn raw_request_uri(&self) -> &str {
        self.cache.request_uri.get_or_init(|| {
            if self.is_iis_rewrite() {
                if let Some(unencoded) = self.vars.attribute("UNENCODED_URL").filter(|u| !u.is_empty()) {
                    return unencoded.to_string();
                }
            }
            if let Some(uri) = self.vars.attribute("REQUEST_URI") {
                if uri.starts_with('/') {
                    // keep path and query, drop any fragment
                    return match uri.find('#') {
                        Some(pos) => uri[..pos].to_string(),
                        None => uri.to_string(),
                    };
                }
                // absolute-form target from proxy requests: keep path and query
                if let Ok(parsed) = Url::parse(uri) {
                    let mut reduced = parsed.path().to_string();
                    if let Some(query) = parsed.query() {
                        reduced.push('?');
                        reduced.push_str(query);
                    }
                    return reduced;
                }
                return uri.to_string();
            }
            if let Some(orig) = self.vars.attribute("ORIG_PATH_INFO") {
                let mut uri = orig.to_string();
                if let Some(query) = self.vars.attribute("QUERY_STRING").filter(|q| !q.is_empty()) {
                    uri.push('?');
                    uri.push_str(query);
                }
                return uri;
            }
            String::new()
        })
    }

    fn heuristic_request_uri(&self) -> String {
        let raw = self.raw_request_uri();
        if !raw.is_empty() && !raw.starts_with('/') {
            format!("/{raw}")
        } else {
            raw.to_string()
        }
    }

    fn is_iis_rewrite(&self) -> bool {
        self.vars.attribute("IIS_WasUrlRewritten") == Some("1")
    }
}
