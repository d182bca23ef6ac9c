//! Path decomposition heuristics for front-controller deployments.

use percent_encoding::percent_decode_str;

/// Final path segment. Trailing separators are ignored, so
/// `basename("/fruit/") == "fruit"`. Both `/` and `\` separate segments to
/// cope with IIS-style script filenames.
pub(crate) fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches(['/', '\\']);
    match trimmed.rfind(['/', '\\']) {
        Some(i) => &trimmed[i + 1..],
        None => trimmed,
    }
}

/// Parent directory of a `/`-separated path.
pub(crate) fn dirname(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.is_empty() { "" } else { "/" };
    }
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(i) => {
            let parent = trimmed[..i].trim_end_matches('/');
            if parent.is_empty() {
                "/"
            } else {
                parent
            }
        }
        None => ".",
    }
}

/// Deployment prefix of the front controller inside `request_uri`.
///
/// `request_uri` must already carry its leading `/` (unless empty) and may
/// still contain the query string.
pub(crate) fn derive_base_path(
    request_uri: &str,
    script_filename: &str,
    script_name: &str,
    document_uri: &str,
    iis_rewrite: bool,
) -> String {
    let filename = basename(script_filename);

    let base_url = if basename(script_name) == filename {
        script_name.to_string()
    } else if basename(document_uri) == filename {
        document_uri.to_string()
    } else {
        // walk the script filename backwards, growing a suffix until it no
        // longer floats inside the request path
        let segments: Vec<&str> = script_filename.trim_matches('/').split('/').rev().collect();
        let mut base_url = String::new();
        for (index, segment) in segments.iter().enumerate() {
            base_url = format!("/{segment}{base_url}");
            let more = index + 1 < segments.len();
            if !(more && matches!(document_uri.find(&base_url), Some(pos) if pos != 0)) {
                break;
            }
        }
        base_url
    };

    if !base_url.is_empty() {
        // full prefix
        if let Some(prefix) = encoded_prefix(request_uri, &base_url, iis_rewrite) {
            return prefix.trim_end_matches(['/', '\\']).to_string();
        }

        // directory portion of the prefix
        let parent = format!("{}/", dirname(&base_url).trim_end_matches(['/', '\\']));
        if let Some(prefix) = encoded_prefix(request_uri, &parent, iis_rewrite) {
            return prefix.trim_end_matches(['/', '\\']).to_string();
        }
    }

    // no prefix in common; look for the script basename inside the path
    let truncated = match request_uri.find('?') {
        Some(pos) => &request_uri[..pos],
        None => request_uri,
    };
    let script_basename = basename(&base_url);
    if script_basename.is_empty() {
        return String::new();
    }
    let decoded = percent_decode_str(truncated).collect::<Vec<u8>>();
    match find_bytes(&decoded, script_basename.as_bytes()) {
        None | Some(0) => return String::new(),
        Some(_) => {}
    }

    // the request uri may repeat path levels in front of the base url when a
    // rewrite embedded it deeper; keep everything up to its occurrence
    let mut base_url = base_url;
    if request_uri.len() >= base_url.len() {
        if let Some(pos) = request_uri.find(&base_url) {
            if pos != 0 {
                base_url = request_uri[..pos + base_url.len()].to_string();
            }
        }
    }

    base_url.trim_end_matches(['/', '\\']).to_string()
}

/// Directory portion of a base path.
pub(crate) fn derive_base_dir(base_path: &str, script_filename: &str) -> String {
    if base_path.is_empty() {
        return String::new();
    }
    let base_dir = if basename(base_path) == basename(script_filename) {
        dirname(base_path)
    } else {
        base_path
    };
    base_dir.replace('\\', "/").trim_end_matches('/').to_string()
}

/// If `prefix` is a percent-decoded prefix of `uri`, return the raw slice of
/// `uri` that encodes it: one `%XX` sequence or one byte per prefix byte.
fn encoded_prefix<'a>(uri: &'a str, prefix: &str, case_insensitive: bool) -> Option<&'a str> {
    if prefix.is_empty() {
        return None;
    }

    let decoded = percent_decode_str(uri).collect::<Vec<u8>>();
    let matched = if case_insensitive {
        decoded.len() >= prefix.len() && decoded[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
    } else {
        decoded.starts_with(prefix.as_bytes())
    };
    if !matched {
        return None;
    }

    let bytes = uri.as_bytes();
    let mut end = 0;
    for _ in 0..prefix.len() {
        if end >= bytes.len() {
            return None;
        }
        if bytes[end] == b'%'
            && end + 2 < bytes.len()
            && bytes[end + 1].is_ascii_hexdigit()
            && bytes[end + 2].is_ascii_hexdigit()
        {
            end += 3;
        } else {
            end += 1;
        }
    }
    uri.get(..end)
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_segments() {
        assert_eq!(basename("/var/www/index.php"), "index.php");
        assert_eq!(basename("/fruit/"), "fruit");
        assert_eq!(basename("index.php"), "index.php");
        assert_eq!(basename(""), "");
        assert_eq!(basename(r"c:\inetpub\index.php"), "index.php");
    }

    #[test]
    fn dirname_segments() {
        assert_eq!(dirname("/fruit/index.php"), "/fruit");
        assert_eq!(dirname("/index.php"), "/");
        assert_eq!(dirname("/"), "/");
        assert_eq!(dirname("index.php"), ".");
        assert_eq!(dirname(""), "");
        assert_eq!(dirname("/a//b"), "/a");
    }

    #[test]
    fn base_path_from_script_name() {
        // front controller deployed below /fruit
        assert_eq!(
            derive_base_path(
                "/fruit/strawberry?ripe=yes",
                "/var/www/fruit/index.php",
                "/fruit/index.php",
                "",
                false,
            ),
            "/fruit"
        );
        // request targeting the script itself keeps the full prefix
        assert_eq!(
            derive_base_path(
                "/fruit/index.php/strawberry",
                "/var/www/fruit/index.php",
                "/fruit/index.php",
                "",
                false,
            ),
            "/fruit/index.php"
        );
    }

    #[test]
    fn base_path_at_docroot_is_empty() {
        assert_eq!(
            derive_base_path("/strawberry", "/var/www/index.php", "/index.php", "", false),
            ""
        );
    }

    #[test]
    fn base_path_from_document_uri() {
        assert_eq!(
            derive_base_path(
                "/shop/index.php/cart",
                "/srv/app/index.php",
                "",
                "/shop/index.php",
                false,
            ),
            "/shop/index.php"
        );
    }

    #[test]
    fn base_path_from_segment_walk() {
        // neither SCRIPT_NAME nor DOCUMENT_URI carry the script basename, so
        // the suffix of SCRIPT_FILENAME that opens DOCUMENT_URI wins
        assert_eq!(
            derive_base_path(
                "/index.php/path/info",
                "/var/www/index.php",
                "",
                "/index.php/path/info",
                false,
            ),
            "/index.php"
        );
    }

    #[test]
    fn base_path_keeps_encoded_form() {
        assert_eq!(
            derive_base_path(
                "/fru%20it/index.php/salad",
                "/var/www/fru it/index.php",
                "/fru it/index.php",
                "",
                false,
            ),
            "/fru%20it/index.php"
        );
    }

    #[test]
    fn base_path_embedded_by_rewrite() {
        assert_eq!(
            derive_base_path(
                "/other/app/index.php/x",
                "/var/www/app/index.php",
                "/app/index.php",
                "",
                false,
            ),
            "/other/app/index.php"
        );
    }

    #[test]
    fn base_path_case_insensitive_under_iis_rewrite() {
        assert_eq!(
            derive_base_path(
                "/Fruit/strawberry",
                "c:/inetpub/fruit/index.php",
                "/fruit/index.php",
                "",
                true,
            ),
            "/Fruit"
        );
        // without the rewrite flag the same request has no common prefix
        assert_eq!(
            derive_base_path(
                "/Fruit/strawberry",
                "c:/inetpub/fruit/index.php",
                "/fruit/index.php",
                "",
                false,
            ),
            ""
        );
    }

    #[test]
    fn base_dir_strips_the_script() {
        assert_eq!(derive_base_dir("/fruit/index.php", "/var/www/fruit/index.php"), "/fruit");
        assert_eq!(derive_base_dir("/index.php", "/var/www/index.php"), "");
        assert_eq!(derive_base_dir("/fruit", "/var/www/fruit/index.php"), "/fruit");
        assert_eq!(derive_base_dir("", "/var/www/index.php"), "");
    }

    #[test]
    fn encoded_prefix_consumes_percent_sequences() {
        assert_eq!(encoded_prefix("/fru%20it/x", "/fru it/", false), Some("/fru%20it/"));
        assert_eq!(encoded_prefix("/fruit/x", "/fruit/", false), Some("/fruit/"));
        assert_eq!(encoded_prefix("/fruit/x", "/veg/", false), None);
        assert_eq!(encoded_prefix("/FRUIT/x", "/fruit/", true), Some("/FRUIT/"));
        assert_eq!(encoded_prefix("/FRUIT/x", "/fruit/", false), None);
    }
}
