use std::collections::HashMap;

/// A source of CGI-style server variables describing one request
///
/// Attribute names follow the CGI convention: `REMOTE_ADDR`, `REQUEST_URI`,
/// `SERVER_NAME` and friends, one `HTTP_<NAME>` entry per request header
/// (name uppercased, `-` mapped to `_`), plus the non-prefixed
/// `CONTENT_TYPE` / `CONTENT_LENGTH` / `CONTENT_MD5` trio.
pub trait RequestAttributes {
    /// Get a single attribute by its exact name
    fn attribute(&self, name: &str) -> Option<&str>;

    /// Iterate over every attribute
    fn attributes(&self) -> impl Iterator<Item = (&str, &str)>;
}

/// Owned attribute source backed by a map
///
/// # Example
/// ```
/// use trusted_request::ServerVars;
///
/// let mut vars = ServerVars::new();
/// vars.set("REMOTE_ADDR", "127.0.0.1");
/// vars.set("HTTP_HOST", "example.com");
///
/// assert_eq!(vars.get("HTTP_HOST"), Some("example.com"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ServerVars {
    vars: HashMap<String, String>,
}

impl ServerVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute, replacing any previous value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Remove an attribute
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.vars.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

impl RequestAttributes for ServerVars {
    fn attribute(&self, name: &str) -> Option<&str> {
        self.get(name)
    }

    fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for ServerVars {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

#[cfg(feature = "http")]
mod http {
    use std::net::IpAddr;

    use super::ServerVars;

    impl ServerVars {
        /// Build server variables from a parsed request and its peer address
        ///
        /// Headers land as `HTTP_<NAME>` attributes, multi-valued headers
        /// joined with `", "`, except the content metadata trio which keeps
        /// its non-prefixed CGI names. Attributes only the server can know
        /// (`SERVER_NAME`, `SCRIPT_FILENAME`, ...) are left unset.
        pub fn from_request<T>(remote_addr: IpAddr, request: &http::Request<T>) -> Self {
            let mut vars = Self::new();
            vars.set("REMOTE_ADDR", remote_addr.to_string());
            vars.set("REQUEST_METHOD", request.method().as_str());
            if let Some(path_and_query) = request.uri().path_and_query() {
                vars.set("REQUEST_URI", path_and_query.as_str());
            }
            if let Some(query) = request.uri().query() {
                vars.set("QUERY_STRING", query);
            }
            if request.uri().scheme_str() == Some("https") {
                vars.set("HTTPS", "on");
            }

            for name in request.headers().keys() {
                let value = request
                    .headers()
                    .get_all(name)
                    .iter()
                    .filter_map(|value| value.to_str().ok())
                    .collect::<Vec<&str>>()
                    .join(", ");
                let cgi_name = name.as_str().to_ascii_uppercase().replace('-', "_");

                if matches!(cgi_name.as_str(), "CONTENT_TYPE" | "CONTENT_LENGTH" | "CONTENT_MD5") {
                    vars.set(cgi_name, value);
                } else {
                    vars.set(format!("HTTP_{cgi_name}"), value);
                }
            }

            vars
        }
    }
}
