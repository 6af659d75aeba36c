//! Pure conversions between real-site URLs and same-origin proxy URLs.
//!
//! A proxy URL is `<proxy origin><prefix><real absolute URL>`, e.g.
//! `https://proxy.example/prefix/https://site.example/login`. Relative input
//! is resolved against the *real* location encoded in the proxy href so that
//! links keep pointing at the real site.

use url::Url;

use crate::error::UrlRewriteError;
use crate::location::ProxyLocation;

/// Schemes that never carry a network request and are left untouched.
const PASSTHROUGH_SCHEMES: &[&str] = &["javascript:", "data:", "blob:", "about:", "mailto:"];

/// Whether a rewritten URL should keep the proxy origin or be made
/// origin-relative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlForm {
    /// Absolute URL including scheme and host.
    Full,
    /// Path, query and fragment only.
    Relative,
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

fn is_passthrough(url: &str) -> bool {
    let url = url.trim_start();
    PASSTHROUGH_SCHEMES
        .iter()
        .any(|scheme| starts_with_ignore_case(url, scheme))
}

fn has_network_scheme(url: &str) -> bool {
    starts_with_ignore_case(url, "http://") || starts_with_ignore_case(url, "https://")
}

/// Map a real URL into proxy space.
///
/// * `http(s)://` input becomes `prefix + real_url`.
/// * Anything else is resolved against the real location carried by
///   `proxy_href` and returned in absolute proxy form. If `proxy_href` does
///   not carry a proxied URL the input is resolved against `proxy_href`
///   itself, which is already same-origin.
/// * `javascript:`, `data:`, `blob:`, `about:` and `mailto:` URLs and URLs
///   already bearing the prefix come back unchanged.
pub fn to_proxy(real_url: &str, proxy_href: &str, prefix: &str) -> Result<String, UrlRewriteError> {
    if is_passthrough(real_url) {
        return Ok(real_url.to_string());
    }

    let proxy = Url::parse(proxy_href).map_err(|source| UrlRewriteError::InvalidLocation {
        href: proxy_href.to_string(),
        source,
    })?;
    let origin = proxy.origin().ascii_serialization();

    if !prefix.is_empty()
        && (real_url.starts_with(prefix) || real_url.starts_with(&format!("{origin}{prefix}")))
    {
        return Ok(real_url.to_string());
    }

    if has_network_scheme(real_url) {
        return Ok(format!("{prefix}{real_url}"));
    }

    let real_base = after_prefix(proxy_href, prefix, &origin);
    let proxied_base = if real_base != proxy_href && has_network_scheme(&real_base) {
        Url::parse(&real_base).ok()
    } else {
        None
    };

    match proxied_base {
        Some(base) => {
            let resolved = base
                .join(real_url)
                .map_err(|source| UrlRewriteError::Resolve {
                    input: real_url.to_string(),
                    base: real_base.clone(),
                    source,
                })?;
            if !has_network_scheme(resolved.as_str()) {
                return Ok(resolved.to_string());
            }
            Ok(format!("{origin}{prefix}{resolved}"))
        }
        None => {
            let resolved = proxy
                .join(real_url)
                .map_err(|source| UrlRewriteError::Resolve {
                    input: real_url.to_string(),
                    base: proxy_href.to_string(),
                    source,
                })?;
            Ok(resolved.to_string())
        }
    }
}

/// Strip leading `origin + prefix` (or bare `prefix`) from `url`.
///
/// Stripping repeats until neither is present, so the function is idempotent
/// for every input.
pub fn after_prefix(url: &str, prefix: &str, origin: &str) -> String {
    let full = format!("{origin}{prefix}");
    let mut rest = url;
    loop {
        if !full.is_empty() {
            if let Some(stripped) = rest.strip_prefix(full.as_str()) {
                rest = stripped;
                continue;
            }
        }
        if !prefix.is_empty() {
            if let Some(stripped) = rest.strip_prefix(prefix) {
                rest = stripped;
                continue;
            }
        }
        return rest.to_string();
    }
}

/// Strip a single leading `origin` from `url`.
pub fn after_origin(url: &str, origin: &str) -> String {
    url.strip_prefix(origin).unwrap_or(url).to_string()
}

/// Unwrap a rewrite result, logging the failure and falling back to the
/// original value. URL rewriting must never break the surrounding operation.
pub fn rewrite_or_passthrough(result: Result<String, UrlRewriteError>, original: &str) -> String {
    match result {
        Ok(rewritten) => rewritten,
        Err(err) => {
            tracing::warn!(url = original, error = %err, "URL rewrite failed; passing through");
            original.to_string()
        }
    }
}

/// Codec bound to one context's [`ProxyLocation`].
#[derive(Debug, Clone)]
pub struct UrlCodec {
    location: ProxyLocation,
}

impl UrlCodec {
    pub fn new(location: ProxyLocation) -> Self {
        Self { location }
    }

    pub fn location(&self) -> &ProxyLocation {
        &self.location
    }

    /// Real URL → proxy URL in the requested form.
    pub fn encode(&self, real_url: &str, form: UrlForm) -> Result<String, UrlRewriteError> {
        let loc = &self.location;
        let proxied = to_proxy(real_url, loc.href(), loc.prefix())?;
        Ok(match form {
            UrlForm::Full if proxied.starts_with('/') && !proxied.starts_with("//") => {
                format!("{}{}", loc.origin(), proxied)
            }
            UrlForm::Full => proxied,
            UrlForm::Relative => after_origin(&proxied, loc.origin()),
        })
    }

    /// Proxy URL → real URL in the requested form. Relative output drops the
    /// real origin when the URL is on it.
    pub fn decode(&self, proxy_url: &str, form: UrlForm) -> String {
        let loc = &self.location;
        let real = after_prefix(proxy_url, loc.prefix(), loc.origin());
        match (form, loc.real_origin()) {
            (UrlForm::Relative, Some(real_origin)) => after_origin(&real, real_origin),
            _ => real,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HREF: &str = "https://proxy.example/prefix/https://site.example/";
    const PREFIX: &str = "/prefix/";
    const ORIGIN: &str = "https://proxy.example";

    // -----------------------------------------------------------------------
    // to_proxy
    // -----------------------------------------------------------------------

    #[test]
    fn absolute_url_gets_prefix() {
        assert_eq!(
            to_proxy("https://cdn.example/a.js", HREF, PREFIX).unwrap(),
            "/prefix/https://cdn.example/a.js"
        );
    }

    #[test]
    fn relative_url_resolves_against_real_location() {
        assert_eq!(
            to_proxy("/login", HREF, PREFIX).unwrap(),
            "https://proxy.example/prefix/https://site.example/login"
        );
        let deep = "https://proxy.example/prefix/https://site.example/docs/page.html";
        assert_eq!(
            to_proxy("other.html?x=1", deep, PREFIX).unwrap(),
            "https://proxy.example/prefix/https://site.example/docs/other.html?x=1"
        );
    }

    #[test]
    fn protocol_relative_url_keeps_target_host() {
        assert_eq!(
            to_proxy("//cdn.example/lib.js", HREF, PREFIX).unwrap(),
            "https://proxy.example/prefix/https://cdn.example/lib.js"
        );
    }

    #[test]
    fn relative_url_on_unproxied_page_stays_same_origin() {
        assert_eq!(
            to_proxy("sw.js", "https://proxy.example/", PREFIX).unwrap(),
            "https://proxy.example/sw.js"
        );
    }

    #[test]
    fn non_network_schemes_pass_through() {
        for url in [
            "javascript:alert(1)",
            "JavaScript:void(0)",
            "data:text/plain,hi",
            "about:blank",
            "blob:https://site.example/uuid",
        ] {
            assert_eq!(to_proxy(url, HREF, PREFIX).unwrap(), url);
        }
    }

    #[test]
    fn already_prefixed_urls_are_not_reprefixed() {
        let rel = "/prefix/https://site.example/a";
        assert_eq!(to_proxy(rel, HREF, PREFIX).unwrap(), rel);
        let abs = "https://proxy.example/prefix/https://site.example/a";
        assert_eq!(to_proxy(abs, HREF, PREFIX).unwrap(), abs);
    }

    #[test]
    fn malformed_location_is_typed_error() {
        let err = to_proxy("/x", "::not-a-url::", PREFIX).unwrap_err();
        assert!(matches!(err, UrlRewriteError::InvalidLocation { .. }));
    }

    // -----------------------------------------------------------------------
    // after_prefix / after_origin
    // -----------------------------------------------------------------------

    #[test]
    fn round_trip_absolute_urls() {
        for u in [
            "https://site.example/",
            "https://site.example/a/b?c=d#e",
            "http://plain.example:8080/x",
        ] {
            let proxied = to_proxy(u, HREF, PREFIX).unwrap();
            assert_eq!(after_prefix(&proxied, PREFIX, ORIGIN), u);
        }
    }

    #[test]
    fn after_prefix_is_idempotent() {
        for x in [
            "https://proxy.example/prefix/https://site.example/",
            "/prefix//prefix/a",
            "https://proxy.example/prefix/https://proxy.example/prefix/x",
            "unrelated",
            "",
        ] {
            let once = after_prefix(x, PREFIX, ORIGIN);
            assert_eq!(after_prefix(&once, PREFIX, ORIGIN), once, "input {x}");
        }
    }

    #[test]
    fn after_prefix_leaves_foreign_urls_alone() {
        assert_eq!(
            after_prefix("https://other.example/prefix/x", PREFIX, ORIGIN),
            "https://other.example/prefix/x"
        );
    }

    #[test]
    fn after_origin_strips_once() {
        assert_eq!(
            after_origin("https://proxy.example/prefix/x", ORIGIN),
            "/prefix/x"
        );
        assert_eq!(after_origin("/already/relative", ORIGIN), "/already/relative");
    }

    // -----------------------------------------------------------------------
    // UrlCodec
    // -----------------------------------------------------------------------

    fn codec() -> UrlCodec {
        UrlCodec::new(ProxyLocation::new(HREF, PREFIX).unwrap())
    }

    #[test]
    fn codec_encode_forms() {
        let c = codec();
        assert_eq!(
            c.encode("https://site.example/a", UrlForm::Full).unwrap(),
            "https://proxy.example/prefix/https://site.example/a"
        );
        assert_eq!(
            c.encode("/a", UrlForm::Relative).unwrap(),
            "/prefix/https://site.example/a"
        );
    }

    #[test]
    fn codec_decode_forms() {
        let c = codec();
        let proxied = "https://proxy.example/prefix/https://site.example/a?b=1";
        assert_eq!(c.decode(proxied, UrlForm::Full), "https://site.example/a?b=1");
        assert_eq!(c.decode(proxied, UrlForm::Relative), "/a?b=1");
    }

    #[test]
    fn passthrough_keeps_original_on_error() {
        let err = UrlRewriteError::OpaqueOrigin {
            href: "data:,".to_string(),
        };
        assert_eq!(rewrite_or_passthrough(Err(err), "/keep"), "/keep");
    }
}
