//! `Cookie` / `Set-Cookie` path scoping under the proxy transform.
//!
//! Cookies set by a proxied site are scoped below `<prefix><real origin>` so
//! that sites served through the same proxy origin cannot read each other's
//! cookies. The original path is kept in a `_path=` sidecar attribute so the
//! getter side can undo the rewrite exactly.

use http::header::SET_COOKIE;
use http::{HeaderMap, HeaderValue};
use regex::{Captures, Regex};

use crate::error::HeaderRewriteError;
use crate::location::ProxyLocation;

/// Name of the attribute carrying the original, unscoped path.
pub const PATH_MARKER: &str = "_path";

/// Matches a `path=` attribute at the start of the header or after a `;`,
/// capturing the attribute name as written. `_path=` never matches because
/// `_` sits between the boundary and `path`.
const PATH_ATTR: &str = r"(?i)(^|;\s*)(path)=([^;]*)";

/// Pre-compiled cookie rewriter for one location.
#[derive(Debug)]
pub struct CookieRewriter {
    scope: String,
    path_attr: Regex,
    scoped_path_attr: Regex,
    marker_attr: Regex,
}

impl CookieRewriter {
    /// Compile the patterns for `location`. The scope is
    /// `prefix + real origin`; an unproxied location has no scope.
    pub fn new(location: &ProxyLocation, prefix: &str) -> Result<Self, HeaderRewriteError> {
        let real_origin = location
            .real_origin()
            .ok_or_else(|| HeaderRewriteError::Unproxied {
                href: location.href().to_string(),
            })?;
        let scope = format!("{prefix}{real_origin}");

        let path_attr = Regex::new(PATH_ATTR)?;
        let scoped_path_attr = Regex::new(&format!(
            r"(?i)(^|;\s*)(path)={}([^;]*)",
            regex::escape(&scope)
        ))?;
        // Case-sensitive and never first: the marker always trails a path.
        let marker_attr = Regex::new(&format!(r";\s*{}=[^;]*", regex::escape(PATH_MARKER)))?;

        Ok(Self {
            scope,
            path_attr,
            scoped_path_attr,
            marker_attr,
        })
    }

    /// The path every rewritten cookie is scoped under.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Scope every `path=` attribute under the proxy and append the sidecar
    /// marker holding the original path.
    pub fn rewrite_set_cookie(&self, header: &str) -> String {
        self.path_attr
            .replace_all(header, |caps: &Captures<'_>| {
                let lead = &caps[1];
                let name = &caps[2];
                let path = caps[3].trim();
                format!(
                    "{lead}{name}={scope}{path}; {PATH_MARKER}={path}",
                    scope = self.scope
                )
            })
            .into_owned()
    }

    /// Undo [`rewrite_set_cookie`](Self::rewrite_set_cookie): strip the scope
    /// from `path=` attributes and drop the sidecar marker.
    pub fn rewrite_get_cookie(&self, header: &str) -> String {
        let unscoped = self
            .scoped_path_attr
            .replace_all(header, "${1}${2}=${3}");
        self.marker_attr.replace_all(&unscoped, "").into_owned()
    }
}

/// Restore the original `path=` scoping of a cookie header.
pub fn rewrite_get_cookie(
    header: &str,
    location: &ProxyLocation,
    prefix: &str,
) -> Result<String, HeaderRewriteError> {
    Ok(CookieRewriter::new(location, prefix)?.rewrite_get_cookie(header))
}

/// Scope a `Set-Cookie` header under the proxy.
pub fn rewrite_set_cookie(
    header: &str,
    location: &ProxyLocation,
    prefix: &str,
) -> Result<String, HeaderRewriteError> {
    Ok(CookieRewriter::new(location, prefix)?.rewrite_set_cookie(header))
}

/// Rewrite every `Set-Cookie` value in a response header map.
///
/// Values that are not valid UTF-8, or that fail to produce a valid header
/// value after rewriting, are kept unchanged and logged. Returns the number of
/// values rewritten.
pub fn rewrite_set_cookie_headers(headers: &mut HeaderMap, rewriter: &CookieRewriter) -> usize {
    let originals: Vec<HeaderValue> = headers.get_all(SET_COOKIE).iter().cloned().collect();
    if originals.is_empty() {
        return 0;
    }

    headers.remove(SET_COOKIE);
    let mut rewritten = 0;
    for value in originals {
        let replacement = value
            .to_str()
            .ok()
            .map(|text| rewriter.rewrite_set_cookie(text))
            .and_then(|text| HeaderValue::from_str(&text).ok());
        match replacement {
            Some(new_value) => {
                headers.append(SET_COOKIE, new_value);
                rewritten += 1;
            }
            None => {
                tracing::warn!(?value, "Set-Cookie value left unrewritten");
                headers.append(SET_COOKIE, value);
            }
        }
    }
    rewritten
}
