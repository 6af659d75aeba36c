use url::Url;

// ---------------------------------------------------------------------------
// Compiled source expressions
// ---------------------------------------------------------------------------

/// Digest algorithms usable in hash sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

/// A pre-parsed CSP source expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceExpression {
    /// `'none'`
    None,
    /// `'self'`
    SelfOrigin,
    /// `*`
    Wildcard,
    /// `https:`
    Scheme(String),
    /// `'https://site.example'` style quoted origin.
    OriginLiteral(String),
    /// `[scheme://]host[:port][/path]`, host may start with `*.`.
    Host {
        scheme: Option<String>,
        host: String,
        port: Option<PortSource>,
        path: Option<String>,
    },
    /// `'sha256-<base64>'` and friends.
    Hash {
        algorithm: HashAlgorithm,
        digest: String,
    },
    /// Nonces, `'unsafe-inline'` and other keywords. Never match a URL.
    Keyword(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSource {
    Any,
    Exact(u16),
}

impl SourceExpression {
    /// Parse one source expression. Unrecognised input becomes a
    /// [`Keyword`](Self::Keyword) and matches nothing.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let lower = raw.to_ascii_lowercase();

        if lower == "'none'" {
            return Self::None;
        }
        if lower == "'self'" {
            return Self::SelfOrigin;
        }
        if raw == "*" {
            return Self::Wildcard;
        }

        if let Some(inner) = raw.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
            return parse_quoted(inner);
        }

        if is_scheme_source(raw) {
            return Self::Scheme(lower.trim_end_matches(':').to_string());
        }

        parse_host(raw).unwrap_or_else(|| Self::Keyword(raw.to_string()))
    }

    pub fn is_hash(&self) -> bool {
        matches!(self, Self::Hash { .. })
    }
}

fn parse_quoted(inner: &str) -> SourceExpression {
    let lower = inner.to_ascii_lowercase();
    for (prefix, algorithm) in [
        ("sha256-", HashAlgorithm::Sha256),
        ("sha384-", HashAlgorithm::Sha384),
        ("sha512-", HashAlgorithm::Sha512),
    ] {
        if lower.starts_with(prefix) {
            return SourceExpression::Hash {
                algorithm,
                digest: inner[prefix.len()..].to_string(),
            };
        }
    }

    if inner.contains("://") {
        if let Ok(url) = Url::parse(inner) {
            let origin = url.origin();
            if origin.is_tuple() {
                return SourceExpression::OriginLiteral(origin.ascii_serialization());
            }
        }
    }

    SourceExpression::Keyword(format!("'{inner}'"))
}

fn is_scheme_source(raw: &str) -> bool {
    let Some(scheme) = raw.strip_suffix(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn parse_host(raw: &str) -> Option<SourceExpression> {
    let (scheme, rest) = match raw.split_once("://") {
        Some((s, r)) => (Some(s.to_ascii_lowercase()), r),
        None => (None, raw),
    };

    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], Some(rest[i..].to_string())),
        None => (rest, None),
    };

    let (host, port) = match authority.rsplit_once(':') {
        Some((h, "*")) => (h, Some(PortSource::Any)),
        Some((h, p)) => (h, Some(PortSource::Exact(p.parse().ok()?))),
        None => (authority, None),
    };

    if host.is_empty() || (host.contains('*') && !host.starts_with("*.") && host != "*") {
        return None;
    }

    Some(SourceExpression::Host {
        scheme,
        host: host.to_ascii_lowercase(),
        port,
        path,
    })
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// What a source expression is matched against.
#[derive(Debug, Clone)]
pub struct MatchTarget<'a> {
    /// The candidate, as the page sees it (real-site URL when proxied).
    pub url: &'a Url,
    /// Origin the `'self'` keyword stands for.
    pub self_origin: &'a str,
    /// Scheme of the protected page, for scheme-less host sources.
    pub page_scheme: &'a str,
}

impl SourceExpression {
    /// Whether this source allows the candidate URL. Hash, nonce and keyword
    /// sources never allow a URL.
    pub fn matches_url(&self, target: &MatchTarget<'_>) -> bool {
        let url = target.url;
        match self {
            Self::None | Self::Hash { .. } | Self::Keyword(_) => false,
            Self::SelfOrigin => url.origin().ascii_serialization() == target.self_origin,
            Self::Wildcard => matches!(url.scheme(), "http" | "https" | "ws" | "wss")
                || url.scheme() == target.page_scheme,
            Self::Scheme(scheme) => scheme_matches(scheme, url.scheme()),
            Self::OriginLiteral(origin) => url.origin().ascii_serialization() == *origin,
            Self::Host {
                scheme,
                host,
                port,
                path,
            } => {
                let scheme_ok = match scheme {
                    Some(s) => scheme_matches(s, url.scheme()),
                    None => scheme_matches(target.page_scheme, url.scheme()),
                };
                scheme_ok
                    && url.host_str().is_some_and(|h| host_matches(host, h))
                    && port_matches(*port, url)
                    && path.as_deref().map_or(true, |p| path_matches(p, url.path()))
            }
        }
    }
}

/// `http` sources also admit the secure upgrade of their scheme.
fn scheme_matches(source: &str, candidate: &str) -> bool {
    source == candidate
        || matches!(
            (source, candidate),
            ("http", "https" | "ws" | "wss") | ("https", "wss") | ("ws", "wss")
        )
}

fn host_matches(pattern: &str, host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    if pattern == "*" {
        return true;
    }
    match pattern.strip_prefix("*.") {
        // Wildcards match subdomains only, never the bare parent.
        Some(parent) => host.len() > parent.len() + 1 && glob_match(&format!("*.{parent}"), &host),
        None => pattern == host,
    }
}

fn port_matches(port: Option<PortSource>, url: &Url) -> bool {
    match port {
        Some(PortSource::Any) => true,
        Some(PortSource::Exact(p)) => url.port_or_known_default() == Some(p),
        None => url.port().is_none(),
    }
}

fn path_matches(pattern: &str, path: &str) -> bool {
    if pattern.ends_with('/') {
        path.starts_with(pattern)
    } else {
        path == pattern
    }
}

/// `*` matches any run of characters; everything else is literal.
fn glob_match(pattern: &str, value: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == value;
    }

    let mut remaining = value;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match remaining.strip_prefix(segment) {
                Some(rest) => remaining = rest,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return remaining.ends_with(segment);
        } else {
            match remaining.find(segment) {
                Some(pos) => remaining = &remaining[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}
