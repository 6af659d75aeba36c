use url::Url;

use crate::codec::after_prefix;
use crate::error::UrlRewriteError;

/// Where the current execution context is being served from.
///
/// Derived once per context from the document/worker location and cached
/// for the context's lifetime. `prefix` is fixed configuration; `origin` is
/// read from the host's location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyLocation {
    href: String,
    origin: String,
    prefix: String,
    real_href: String,
    real_origin: Option<String>,
}

impl ProxyLocation {
    /// Derive the location from the context's `href` and the configured prefix.
    pub fn new(href: &str, prefix: impl Into<String>) -> Result<Self, UrlRewriteError> {
        let prefix = prefix.into();
        let url = Url::parse(href).map_err(|source| UrlRewriteError::InvalidLocation {
            href: href.to_string(),
            source,
        })?;

        let origin = url.origin();
        if !origin.is_tuple() {
            return Err(UrlRewriteError::OpaqueOrigin {
                href: href.to_string(),
            });
        }
        let origin = origin.ascii_serialization();

        let real_href = after_prefix(href, &prefix, &origin);
        let real_origin = if real_href != href {
            Url::parse(&real_href)
                .ok()
                .map(|u| u.origin())
                .filter(|o| o.is_tuple())
                .map(|o| o.ascii_serialization())
        } else {
            None
        };

        Ok(Self {
            href: href.to_string(),
            origin,
            prefix,
            real_href,
            real_origin,
        })
    }

    /// The full proxy-side URL of the context.
    pub fn href(&self) -> &str {
        &self.href
    }

    /// The proxy origin (`scheme://host[:port]`).
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The URL the site believes it is on. Equals [`href`](Self::href) when
    /// the context is not serving a proxied page.
    pub fn real_href(&self) -> &str {
        &self.real_href
    }

    /// Origin of the real site, if the location carries a proxied URL.
    pub fn real_origin(&self) -> Option<&str> {
        self.real_origin.as_deref()
    }

    pub fn is_proxied(&self) -> bool {
        self.real_origin.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_proxy_and_real_origins() {
        let loc = ProxyLocation::new(
            "https://proxy.example/prefix/https://site.example/app/index.html",
            "/prefix/",
        )
        .unwrap();
        assert_eq!(loc.origin(), "https://proxy.example");
        assert_eq!(loc.real_href(), "https://site.example/app/index.html");
        assert_eq!(loc.real_origin(), Some("https://site.example"));
        assert!(loc.is_proxied());
    }

    #[test]
    fn unproxied_location_has_no_real_origin() {
        let loc = ProxyLocation::new("https://proxy.example/", "/prefix/").unwrap();
        assert_eq!(loc.real_href(), "https://proxy.example/");
        assert!(loc.real_origin().is_none());
        assert!(!loc.is_proxied());
    }

    #[test]
    fn keeps_non_default_port_in_origin() {
        let loc = ProxyLocation::new("http://localhost:8080/prefix/http://a.test/", "/prefix/")
            .unwrap();
        assert_eq!(loc.origin(), "http://localhost:8080");
        assert_eq!(loc.real_origin(), Some("http://a.test"));
    }

    #[test]
    fn rejects_opaque_and_malformed_locations() {
        assert!(matches!(
            ProxyLocation::new("data:text/html,hi", "/prefix/"),
            Err(UrlRewriteError::OpaqueOrigin { .. })
        ));
        assert!(matches!(
            ProxyLocation::new("not a url", "/prefix/"),
            Err(UrlRewriteError::InvalidLocation { .. })
        ));
    }
}
