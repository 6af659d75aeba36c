use thiserror::Error;

/// A URL could not be mapped between real and proxy space.
///
/// Callers are expected to log this and keep the unrewritten value; see
/// [`crate::codec::rewrite_or_passthrough`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlRewriteError {
    #[error("cannot parse location '{href}': {source}")]
    InvalidLocation {
        href: String,
        #[source]
        source: url::ParseError,
    },

    #[error("location '{href}' has an opaque origin")]
    OpaqueOrigin { href: String },

    #[error("cannot resolve '{input}' against '{base}': {source}")]
    Resolve {
        input: String,
        base: String,
        #[source]
        source: url::ParseError,
    },
}

/// Cookie header text could not be rewritten.
///
/// Header text is site-controlled, so these are recovered locally by callers
/// rather than propagated as hard failures.
#[derive(Debug, Error)]
pub enum HeaderRewriteError {
    #[error("failed to compile cookie path pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("location '{href}' does not carry a proxied URL; cookie scope is undefined")]
    Unproxied { href: String },
}

/// A sidecar query parameter could not be injected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchParamError {
    #[error("no free parameter name for '{base}' within {limit} escapes")]
    EscapeLimit { base: String, limit: usize },

    #[error("escape character must be exactly one character, got '{0}'")]
    InvalidEscapeChar(String),
}
